//! LOCK/UNLOCK: creates, refreshes, and releases exclusive/shared write
//! locks against the engine's `Ctx`/`LockStore` trait, with lock tokens
//! extracted by the simple literal scan in `conditional.rs`.

use headers::HeaderMapExt;
use http::{Response, StatusCode};

use crate::body::Body;
use crate::conditional::extract_lock_token;
use crate::dispatch::Ctx;
use crate::error::{DavError, DavResult};
use crate::locks::{LockDepth, LockStore};
use crate::xmlcodec::lock::{build_response, parse_request, LockRequest};

pub async fn handle_lock(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    let Some(store) = ctx.config.lock_store.as_deref() else {
        return Err(DavError::MethodNotAllowed("locking is disabled on this server"));
    };

    match parse_request(&ctx.body)? {
        Some(req) => create_lock(ctx, store, req),
        None => refresh_lock(ctx, store),
    }
}

/// LOCK depth defaults to `0` (unlike PROPFIND's `infinity`).
fn create_lock(ctx: &Ctx<'_>, store: &dyn LockStore, req: LockRequest) -> DavResult<Response<Body>> {
    let depth = match ctx.headers.get("depth").and_then(|v| v.to_str().ok()) {
        Some("0") | None => LockDepth::Zero,
        Some("infinity") | Some("Infinity") => LockDepth::Infinity,
        _ => return Err(DavError::BadRequest("Depth must be 0 or infinity for LOCK")),
    };
    let timeout = ctx.headers.typed_get::<crate::davheaders::Timeout>().and_then(|t| t.first_duration());

    let lock = store
        .create(ctx.path.internal_path(), req.scope, req.owner, timeout, depth)
        .ok_or(DavError::Locked)?;

    let body = build_response(&lock)?;
    let status = if ctx.kind.is_null() { StatusCode::CREATED } else { StatusCode::OK };
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .header("Lock-Token", format!("<{}>", lock.token))
        .body(Body::from(body))
        .unwrap())
}

fn refresh_lock(ctx: &Ctx<'_>, store: &dyn LockStore) -> DavResult<Response<Body>> {
    let token = extract_lock_token(ctx.headers).ok_or(DavError::LockTokenInvalid)?;
    let existing = store.get(&token).ok_or(DavError::LockTokenInvalid)?;
    if !existing.covers(ctx.path.internal_path()) {
        return Err(DavError::LockTokenInvalid);
    }
    let timeout = ctx.headers.typed_get::<crate::davheaders::Timeout>().and_then(|t| t.first_duration());
    let lock = store.refresh(&token, timeout).ok_or(DavError::LockTokenInvalid)?;

    let body = build_response(&lock)?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .header("Lock-Token", format!("<{}>", lock.token))
        .body(Body::from(body))
        .unwrap())
}

pub async fn handle_unlock(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    let Some(store) = ctx.config.lock_store.as_deref() else {
        return Err(DavError::MethodNotAllowed("locking is disabled on this server"));
    };

    let token = ctx
        .headers
        .get("lock-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_start_matches('<').trim_end_matches('>').to_string())
        .ok_or(DavError::BadRequest("UNLOCK requires a Lock-Token header"))?;

    if !store.remove(&token) {
        return Err(DavError::Conflict("no such lock token"));
    }
    Ok(Response::builder().status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DavConfigBuilder;
    use crate::fs::{DavFile, DavFileSystem, FileMeta, OpenOptions, ResourceKind};
    use crate::memfs::MemFs;
    use crate::path::DavPath;
    use std::cell::RefCell;
    use std::sync::Arc;

    fn ctx_with(
        config: &crate::config::DavConfig,
        path: &str,
        kind: ResourceKind,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    ) -> Ctx<'_> {
        Ctx {
            config,
            path: DavPath::parse(path, "").unwrap(),
            kind,
            headers: Box::leak(Box::new(headers)),
            uri: Box::leak(Box::new(path.parse::<http::Uri>().unwrap())),
            body,
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        }
    }

    fn lock_body() -> bytes::Bytes {
        bytes::Bytes::from_static(
            br#"<?xml version="1.0"?>
            <lockinfo xmlns="DAV:">
              <lockscope><exclusive/></lockscope>
              <locktype><write/></locktype>
              <owner>jane</owner>
            </lockinfo>"#,
        )
    }

    #[tokio::test]
    async fn locks_a_null_resource_and_returns_201() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let resp = handle_lock(&ctx_with(&config, "/new.txt", ResourceKind::Null, http::HeaderMap::new(), lock_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(resp.headers().contains_key("lock-token"));
    }

    #[tokio::test]
    async fn second_exclusive_lock_conflicts() {
        let fs = Arc::new(MemFs::new());
        let path = DavPath::parse("/a.txt", "").unwrap();
        let mut f = fs.open(&path, OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        drop(f);
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&path).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();

        let resp = handle_lock(&ctx_with(
            &config,
            "/a.txt",
            ResourceKind::File(fm.clone()),
            http::HeaderMap::new(),
            lock_body(),
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let err = handle_lock(&ctx_with(&config, "/a.txt", ResourceKind::File(fm), http::HeaderMap::new(), lock_body()))
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::Locked));
    }

    #[tokio::test]
    async fn locking_disabled_is_method_not_allowed() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).enable_locking(false).build();
        let err = handle_lock(&ctx_with(&config, "/a.txt", ResourceKind::Null, http::HeaderMap::new(), lock_body()))
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::MethodNotAllowed(_)));
    }

    #[tokio::test]
    async fn refresh_without_token_is_rejected() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let err =
            handle_lock(&ctx_with(&config, "/a.txt", ResourceKind::Null, http::HeaderMap::new(), bytes::Bytes::new()))
                .await
                .unwrap_err();
        assert!(matches!(err, DavError::LockTokenInvalid));
    }

    #[tokio::test]
    async fn unlock_with_valid_token_returns_204() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let resp = handle_lock(&ctx_with(&config, "/a.txt", ResourceKind::Null, http::HeaderMap::new(), lock_body()))
            .await
            .unwrap();
        let token = resp.headers().get("lock-token").unwrap().to_str().unwrap().to_string();

        let mut headers = http::HeaderMap::new();
        headers.insert("lock-token", token.parse().unwrap());
        let resp = handle_unlock(&ctx_with(&config, "/a.txt", ResourceKind::Null, headers, bytes::Bytes::new()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unlock_unknown_token_is_conflict() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let mut headers = http::HeaderMap::new();
        headers.insert("lock-token", "<opaquelocktoken:bogus>".parse().unwrap());
        let err = handle_unlock(&ctx_with(&config, "/a.txt", ResourceKind::Null, headers, bytes::Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::Conflict(_)));
    }

    #[tokio::test]
    async fn unlock_without_header_is_bad_request() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let err = handle_unlock(&ctx_with(
            &config,
            "/a.txt",
            ResourceKind::Null,
            http::HeaderMap::new(),
            bytes::Bytes::new(),
        ))
        .await
        .unwrap_err();
        assert!(matches!(err, DavError::BadRequest(_)));
    }
}
