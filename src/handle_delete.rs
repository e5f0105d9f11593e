//! DELETE (§4.8): single-resource removal for a file; recursive removal
//! for a collection, with a 207 Multi-Status listing only the members
//! that failed (absence from the body means success, per §4.6).

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{Response, StatusCode};

use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional::{self, PreconditionInput};
use crate::dispatch::{self, Ctx};
use crate::error::{DavError, DavResult};
use crate::fs::{DavFileSystem, ResourceKind};
use crate::path::DavPath;
use crate::props::PropertyStore;
use crate::xmlcodec::MultiStatus;

pub async fn handle(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    if ctx.kind.is_null() {
        return Err(DavError::NotFound);
    }
    if ctx.path.internal_path() == "/" {
        return Err(DavError::PathForbidden);
    }

    let etag = ctx.kind.meta().map(|m| dispatch::compute_etag(&ctx.path, m));

    conditional::check(&PreconditionInput {
        read_only: ctx.config.read_only,
        content_length: None,
        max_upload_size: None,
        lock_store: ctx.config.lock_store.as_deref(),
        path: ctx.path.internal_path(),
        headers: ctx.headers,
        parent_exists: None,
        current_etag: etag.as_deref(),
        resource_exists: true,
    })?;

    match &ctx.kind {
        ResourceKind::File(_) => {
            ctx.config.fs.remove_file(&ctx.path).await?;
            ctx.config.property_store.remove_all(ctx.path.internal_path()).await?;
            Ok(Response::builder().status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap())
        },
        ResourceKind::Collection(_) => delete_collection(ctx).await,
        ResourceKind::Null => unreachable!("checked above"),
    }
}

async fn delete_collection(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    let mut failures = Vec::new();
    let _ =
        delete_recursive(ctx.config.fs.as_ref(), ctx.config.property_store.as_ref(), ctx.path.clone(), &mut failures).await;

    if failures.is_empty() {
        return Ok(Response::builder().status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap());
    }

    let stream = AsyncStream::<Bytes, std::io::Error>::new(move |tx| async move {
        let mut ms = MultiStatus::start(tx)?;
        for (path, status) in failures {
            ms.write_error_response(&path.as_url_string_with_prefix(), status).await?;
        }
        ms.finish().await?;
        Ok(())
    });

    Ok(Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(stream))
        .unwrap())
}

/// Post-order recursive delete: children first, then the directory itself.
/// Returns whether `path` itself was removed; a directory whose child
/// failed is left in place (it's no longer empty) without aborting its
/// siblings.
pub(crate) fn delete_recursive<'a>(
    fs: &'a dyn DavFileSystem,
    props: &'a dyn PropertyStore,
    path: DavPath,
    failures: &'a mut Vec<(DavPath, StatusCode)>,
) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
    Box::pin(async move {
        if path.is_collection() {
            let entries = match fs.read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    failures.push((path.clone(), DavError::from(e).status_code()));
                    return false;
                },
            };
            let mut all_children_ok = true;
            for entry in entries {
                let name = String::from_utf8_lossy(&entry.name()).into_owned();
                let is_dir = entry.metadata().await.map(|m| m.is_dir()).unwrap_or(false);
                let mut child = path.join(&name);
                if is_dir {
                    child.add_slash();
                }
                if !delete_recursive(fs, props, child, failures).await {
                    all_children_ok = false;
                }
            }
            if !all_children_ok {
                return false;
            }
            if let Err(e) = fs.remove_dir(&path).await {
                failures.push((path.clone(), DavError::from(e).status_code()));
                return false;
            }
        } else if let Err(e) = fs.remove_file(&path).await {
            failures.push((path.clone(), DavError::from(e).status_code()));
            return false;
        }
        let _ = props.remove_all(path.internal_path()).await;
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DavConfigBuilder;
    use crate::fs::{DavFile, OpenOptions};
    use crate::memfs::MemFs;
    use std::cell::RefCell;
    use std::sync::Arc;

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
    async fn deletes_file_and_returns_204() {
        let fs = Arc::new(MemFs::new());
        let mut f = fs.open(&DavPath::parse("/a.txt", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/a.txt", "").unwrap()).await.unwrap();
        let fm = crate::fs::FileMeta::from_dyn(meta.as_ref()).unwrap();
        let resp = handle(&ctx(&config, "/a.txt", ResourceKind::File(fm))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(fs.metadata(&DavPath::parse("/a.txt", "").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn deletes_collection_recursively() {
        let fs = Arc::new(MemFs::new());
        fs.create_dir(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let mut f = fs.open(&DavPath::parse("/dir/a.txt", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let fm = crate::fs::FileMeta::from_dyn(meta.as_ref()).unwrap();
        let resp = handle(&ctx(&config, "/dir/", ResourceKind::Collection(fm))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(fs.metadata(&DavPath::parse("/dir/", "").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn deleting_root_is_forbidden() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let meta = config.fs.metadata(&DavPath::parse("/", "").unwrap()).await.unwrap();
        let fm = crate::fs::FileMeta::from_dyn(meta.as_ref()).unwrap();
        let err = handle(&ctx(&config, "/", ResourceKind::Collection(fm))).await.unwrap_err();
        assert!(matches!(err, DavError::PathForbidden));
    }
}
