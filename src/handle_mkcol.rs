//! MKCOL (§4.8): non-recursive collection creation.

use http::{Response, StatusCode};

use crate::body::Body;
use crate::conditional::{self, PreconditionInput};
use crate::dispatch::{self, Ctx};
use crate::error::{DavError, DavResult};
use crate::fs::ResourceKind;

pub async fn handle(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    if !ctx.kind.is_null() {
        return Err(DavError::MethodNotAllowed("a resource already exists at this location"));
    }

    let parent = ctx.path.parent();
    let parent_kind = dispatch::stat_path(ctx.config.fs.as_ref(), &ctx.stat_cache, &parent).await;
    let parent_exists = matches!(parent_kind, ResourceKind::Collection(_));

    conditional::check(&PreconditionInput {
        read_only: ctx.config.read_only,
        content_length: None,
        max_upload_size: None,
        lock_store: ctx.config.lock_store.as_deref(),
        path: ctx.path.internal_path(),
        headers: ctx.headers,
        parent_exists: Some(parent_exists),
        current_etag: None,
        resource_exists: false,
    })?;

    ctx.config.fs.create_dir(&ctx.path).await?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(http::header::LOCATION, ctx.path.as_url_string_with_prefix())
        .body(Body::empty())
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DavConfigBuilder;
    use crate::fs::DavFileSystem;
    use crate::memfs::MemFs;
    use crate::path::DavPath;
    use std::cell::RefCell;

    fn ctx(config: &crate::config::DavConfig, path: &str, kind: ResourceKind) -> Ctx<'_> {
        Ctx {
            config,
            path: DavPath::parse(path, "").unwrap(),
            kind,
            headers: Box::leak(Box::new(http::HeaderMap::new())),
            uri: Box::leak(Box::new(path.parse::<http::Uri>().unwrap())),
            body: bytes::Bytes::new(),
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        }
    }

    #[tokio::test]
    async fn creates_collection_and_returns_201() {
        let fs = std::sync::Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let resp = handle(&ctx(&config, "/newdir/", ResourceKind::Null)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(fs.metadata(&DavPath::parse("/newdir/", "").unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn existing_resource_is_method_not_allowed() {
        let fs = std::sync::Arc::new(MemFs::new());
        fs.create_dir(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let meta = config.fs.metadata(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let fm = crate::fs::FileMeta::from_dyn(meta.as_ref()).unwrap();
        let err = handle(&ctx(&config, "/dir/", ResourceKind::Collection(fm))).await.unwrap_err();
        assert!(matches!(err, DavError::MethodNotAllowed(_)));
    }

    #[tokio::test]
    async fn missing_parent_is_conflict() {
        let fs = std::sync::Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let err = handle(&ctx(&config, "/missing/newdir/", ResourceKind::Null)).await.unwrap_err();
        assert!(matches!(err, DavError::MissingParent));
    }
}
