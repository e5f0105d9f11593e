//! PUT (§4.8): whole-body upload of a single resource. An existing file is
//! replaced through a sibling temp file and `fs.copy`/`fs.remove_file` so a
//! client never observes a half-written resource; a new file is opened and
//! written directly since there's nothing yet to race against.

use http::{Response, StatusCode};

use crate::body::Body;
use crate::conditional::{self, PreconditionInput};
use crate::dispatch::{self, Ctx};
use crate::error::{DavError, DavResult};
use crate::fs::{DavFile, FileMeta, OpenOptions, ResourceKind};
use crate::util::systemtime_to_httpdate;

pub async fn handle(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    if ctx.kind.is_collection() {
        return Err(DavError::MethodNotAllowed("PUT is not valid on a collection"));
    }
    if ctx.path.is_collection() {
        return Err(DavError::Conflict("PUT target must not end in a slash"));
    }

    let parent = ctx.path.parent();
    let parent_kind = dispatch::stat_path(ctx.config.fs.as_ref(), &ctx.stat_cache, &parent).await;
    let parent_exists = matches!(parent_kind, ResourceKind::Collection(_));

    let resource_exists = !ctx.kind.is_null();
    let current_etag = ctx.kind.meta().map(|m| dispatch::compute_etag(&ctx.path, m));

    conditional::check(&PreconditionInput {
        read_only: ctx.config.read_only,
        content_length: Some(ctx.body.len() as u64),
        max_upload_size: ctx.config.max_upload_size_bytes,
        lock_store: ctx.config.lock_store.as_deref(),
        path: ctx.path.internal_path(),
        headers: ctx.headers,
        parent_exists: Some(parent_exists),
        current_etag: current_etag.as_deref(),
        resource_exists,
    })?;

    if resource_exists {
        write_via_temp(ctx).await?;
    } else {
        let mut file = ctx.config.fs.open(&ctx.path, OpenOptions::write_new()).await?;
        if let Err(e) = write_and_flush(&mut *file, &ctx.body).await {
            let _ = ctx.config.fs.remove_file(&ctx.path).await;
            return Err(e.into());
        }
    }

    let meta = ctx.config.fs.metadata(&ctx.path).await?;
    let fm = FileMeta::from_dyn(meta.as_ref())?;
    let etag = dispatch::compute_etag(&ctx.path, &fm);
    let status = if resource_exists { StatusCode::NO_CONTENT } else { StatusCode::CREATED };

    Ok(Response::builder()
        .status(status)
        .header(http::header::ETAG, etag)
        .header(http::header::LAST_MODIFIED, systemtime_to_httpdate(fm.modified))
        .body(Body::empty())
        .unwrap())
}

/// Writes the new content to a sibling temp file, then swaps it into place
/// with `copy`+`remove_file` (the filesystem trait has no atomic
/// rename-over-existing primitive every backend can guarantee). The temp
/// file is removed on any failure in this sequence.
async fn write_via_temp(ctx: &Ctx<'_>) -> DavResult<()> {
    let parent = ctx.path.parent();
    let tmp_path = parent.join(&format!(".{}.tmp-{}", ctx.path.file_name(), uuid::Uuid::new_v4()));

    let mut tmp_file = ctx.config.fs.open(&tmp_path, OpenOptions::write_new()).await?;
    if let Err(e) = write_and_flush(&mut *tmp_file, &ctx.body).await {
        let _ = ctx.config.fs.remove_file(&tmp_path).await;
        return Err(e.into());
    }
    drop(tmp_file);

    if let Err(e) = ctx.config.fs.copy(&tmp_path, &ctx.path).await {
        let _ = ctx.config.fs.remove_file(&tmp_path).await;
        return Err(e.into());
    }
    ctx.config.fs.remove_file(&tmp_path).await?;
    Ok(())
}

async fn write_and_flush(file: &mut dyn DavFile, buf: &[u8]) -> crate::fs::FsResult<()> {
    dispatch::write_all(file, buf).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DavConfigBuilder;
    use crate::fs::DavFileSystem;
    use crate::memfs::MemFs;
    use crate::path::DavPath;
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::sync::Arc;

    fn ctx(config: &crate::config::DavConfig, path: &str, kind: ResourceKind, body: Bytes) -> Ctx<'_> {
        Ctx {
            config,
            path: DavPath::parse(path, "").unwrap(),
            kind,
            headers: Box::leak(Box::new(http::HeaderMap::new())),
            uri: Box::leak(Box::new(path.parse::<http::Uri>().unwrap())),
            body,
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        }
    }

    #[tokio::test]
    async fn creates_new_file_and_returns_201() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let resp = handle(&ctx(&config, "/a.txt", ResourceKind::Null, Bytes::from("hello"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(resp.headers().contains_key(http::header::ETAG));

        let meta = fs.metadata(&DavPath::parse("/a.txt", "").unwrap()).await.unwrap();
        assert_eq!(meta.len(), 5);
    }

    #[tokio::test]
    async fn overwrites_existing_file_and_returns_204() {
        let fs = Arc::new(MemFs::new());
        let path = DavPath::parse("/a.txt", "").unwrap();
        let mut f = fs.open(&path, OpenOptions::write_new()).await.unwrap();
        f.write(b"old content").await.unwrap();
        f.flush().await.unwrap();
        drop(f);

        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&path).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();
        let resp = handle(&ctx(&config, "/a.txt", ResourceKind::File(fm), Bytes::from("new"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let meta = fs.metadata(&path).await.unwrap();
        assert_eq!(meta.len(), 3);
        let entries = fs.read_dir(&DavPath::parse("/", "").unwrap()).await.unwrap();
        assert!(entries.into_iter().all(|e| !e.name().starts_with(b".a.txt.tmp-")));
    }

    #[tokio::test]
    async fn put_on_collection_is_method_not_allowed() {
        let fs = Arc::new(MemFs::new());
        fs.create_dir(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();
        let err = handle(&ctx(&config, "/dir/", ResourceKind::Collection(fm), Bytes::new())).await.unwrap_err();
        assert!(matches!(err, DavError::MethodNotAllowed(_)));
    }

    #[tokio::test]
    async fn trailing_slash_on_new_resource_is_conflict() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let err = handle(&ctx(&config, "/newdir/", ResourceKind::Null, Bytes::new())).await.unwrap_err();
        assert!(matches!(err, DavError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_parent_is_conflict() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let err = handle(&ctx(&config, "/missing/a.txt", ResourceKind::Null, Bytes::from("hi"))).await.unwrap_err();
        assert!(matches!(err, DavError::MissingParent));
    }

    #[tokio::test]
    async fn read_only_server_rejects_put() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).read_only(true).build();
        let err = handle(&ctx(&config, "/a.txt", ResourceKind::Null, Bytes::from("hi"))).await.unwrap_err();
        assert!(matches!(err, DavError::ReadOnly));
    }
}
