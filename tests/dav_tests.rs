#[cfg(target_os = "linux")]
mod dav_tests {
    use std::sync::Arc;

    use dav_engine::localfs::LocalFs;
    use dav_engine::{Body, DavHandler};
    use http::{Request, StatusCode};

    fn setup_dav_server_symlink() -> (tempfile::TempDir, DavHandler) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("normal_dir")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("normal_dir"), dir.path().join("symlink_to_dir")).unwrap();

        let handler = DavHandler::builder().filesystem(Arc::new(LocalFs::new(dir.path()))).build_handler();
        (dir, handler)
    }

    async fn resp_to_string(mut resp: http::Response<Body>) -> String {
        use futures_util::StreamExt;

        let mut data = Vec::new();
        while let Some(chunk) = resp.next().await {
            match chunk {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(e) => panic!("error reading body stream: {}", e),
            }
        }

        String::from_utf8(data).unwrap_or_else(|_| "".to_string())
    }

    #[tokio::test]
    async fn symlinked_collection_is_not_found_directly() {
        let (_dir, server) = setup_dav_server_symlink();

        let req = Request::builder().method("PROPFIND").uri("/symlink_to_dir").body(Body::empty()).unwrap();
        let resp = server.handle(req, "127.0.0.1").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn symlinked_collection_is_omitted_from_parent_listing() {
        let (_dir, server) = setup_dav_server_symlink();

        let req = Request::builder().method("PROPFIND").uri("/").body(Body::empty()).unwrap();
        let resp = server.handle(req, "127.0.0.1").await;
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let resp_text = resp_to_string(resp).await;
        assert!(!resp_text.contains("symlink_to_dir"));
        assert!(resp_text.contains("normal_dir"));
    }

    #[tokio::test]
    async fn symlinked_collection_is_not_found_via_get() {
        let (_dir, server) = setup_dav_server_symlink();

        let req = Request::builder().method("GET").uri("/symlink_to_dir/").body(Body::empty()).unwrap();
        let resp = server.handle(req, "127.0.0.1").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_hidden_backend_exposes_the_symlink() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("normal_dir")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("normal_dir"), dir.path().join("symlink_to_dir")).unwrap();

        let fs = LocalFs::new_with_options(dir.path(), false);
        let server = DavHandler::builder().filesystem(Arc::new(fs)).build_handler();

        let req = Request::builder().method("PROPFIND").uri("/").body(Body::empty()).unwrap();
        let resp = server.handle(req, "127.0.0.1").await;
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let resp_text = resp_to_string(resp).await;
        assert!(resp_text.contains("symlink_to_dir"));
    }
}
