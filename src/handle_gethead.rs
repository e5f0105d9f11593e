//! GET/HEAD (§4.8): conditional evaluation, single- range support, and
//! streaming delivery of a file's body. Collections produce an empty 200
//! (no directory listing — out of scope for this engine).

use std::sync::Arc;

use http::{Response, StatusCode};

use crate::body::Body;
use crate::dispatch::Ctx;
use crate::error::{DavError, DavResult};
use crate::fs::ResourceKind;
use crate::range::{self, RangeOutcome};
use crate::util::systemtime_to_httpdate;
use crate::{dispatch, etag};

pub async fn handle(ctx: &Ctx<'_>, is_get: bool) -> DavResult<Response<Body>> {
    let meta = match &ctx.kind {
        ResourceKind::Null => return Err(DavError::NotFound),
        ResourceKind::Collection(_) => {
            return Ok(Response::builder().status(StatusCode::OK).body(Body::empty()).unwrap());
        },
        ResourceKind::File(m) => m,
    };

    let tag = dispatch::compute_etag(&ctx.path, meta);
    let last_modified = systemtime_to_httpdate(meta.modified);

    if let Some(header) = ctx.headers.get(http::header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if etag::matches(&tag, header) {
            return Err(DavError::NotModified);
        }
    }
    if let Some(header) = ctx.headers.get(http::header::IF_MATCH).and_then(|v| v.to_str().ok()) {
        if !etag::matches(&tag, header) {
            return Err(DavError::EtagMismatch);
        }
    }

    let range_header = ctx.headers.get(http::header::RANGE).and_then(|v| v.to_str().ok());
    let outcome = range_header.map(|h| range::parse(h, meta.len)).unwrap_or(RangeOutcome::None);

    let mut builder = Response::builder()
        .header(http::header::ACCEPT_RANGES, "bytes")
        .header(http::header::ETAG, tag)
        .header(http::header::LAST_MODIFIED, last_modified)
        .header(http::header::CONTENT_TYPE, ctx.path.mime_type_str());

    match outcome {
        RangeOutcome::Unsatisfiable => {
            return Err(DavError::RangeNotSatisfiable(meta.len));
        },
        RangeOutcome::Satisfiable(range) => {
            builder = builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(http::header::CONTENT_RANGE, range.content_range_header(meta.len))
                .header(http::header::CONTENT_LENGTH, range.len().to_string());
            if !is_get {
                return Ok(builder.body(Body::empty()).unwrap());
            }
            let stream = dispatch::stream_file_range(
                Arc::clone(&ctx.config.fs),
                ctx.path.clone(),
                range.start,
                range.len(),
            );
            Ok(builder.body(Body::from(stream)).unwrap())
        },
        RangeOutcome::None => {
            builder = builder.status(StatusCode::OK).header(http::header::CONTENT_LENGTH, meta.len.to_string());
            if !is_get {
                return Ok(builder.body(Body::empty()).unwrap());
            }
            let stream = dispatch::stream_file_range(Arc::clone(&ctx.config.fs), ctx.path.clone(), 0, meta.len);
            Ok(builder.body(Body::from(stream)).unwrap())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DavConfigBuilder;
    use crate::fs::{DavFileSystem, FileMeta, OpenOptions};
    use crate::memfs::MemFs;
    use crate::path::DavPath;
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::sync::Arc;

    async fn ctx_for_file<'a>(config: &'a crate::config::DavConfig, path: &'a str) -> Ctx<'a> {
        let dp = DavPath::parse(path, "").unwrap();
        let meta = FileMeta::from_dyn(&*config.fs.metadata(&dp).await.unwrap()).unwrap();
        Ctx {
            config,
            path: dp,
            kind: ResourceKind::File(meta),
            headers: Box::leak(Box::new(http::HeaderMap::new())),
            uri: Box::leak(Box::new(path.parse::<http::Uri>().unwrap())),
            body: Bytes::new(),
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        }
    }

    #[tokio::test]
    async fn get_and_head_report_identical_content_type_etag_and_length() {
        let fs = Arc::new(MemFs::new());
        let mut file = fs.open(&DavPath::parse("/report.html", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        file.write(b"<html></html>").await.unwrap();
        file.flush().await.unwrap();

        let config = DavConfigBuilder::default().filesystem(fs).build();
        let ctx = ctx_for_file(&config, "/report.html").await;

        let get_resp = handle(&ctx, true).await.unwrap();
        let head_resp = handle(&ctx, false).await.unwrap();

        assert_eq!(get_resp.status(), StatusCode::OK);
        assert_eq!(head_resp.status(), StatusCode::OK);
        for header in [http::header::CONTENT_TYPE, http::header::CONTENT_LENGTH, http::header::ETAG] {
            assert_eq!(get_resp.headers().get(&header), head_resp.headers().get(&header));
        }
        assert_eq!(get_resp.headers().get(http::header::CONTENT_TYPE).unwrap(), "text/html");
    }

    #[tokio::test]
    async fn collection_get_is_empty_200_without_content_type() {
        let fs = Arc::new(MemFs::new());
        fs.create_dir(&DavPath::parse("/dir", "").unwrap()).await.unwrap();
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = FileMeta::from_dyn(&*fs.metadata(&DavPath::parse("/dir", "").unwrap()).await.unwrap()).unwrap();
        let ctx = Ctx {
            config: &config,
            path: DavPath::parse("/dir", "").unwrap(),
            kind: ResourceKind::Collection(meta),
            headers: Box::leak(Box::new(http::HeaderMap::new())),
            uri: Box::leak(Box::new("/dir".parse::<http::Uri>().unwrap())),
            body: Bytes::new(),
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        };
        let resp = handle(&ctx, true).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key(http::header::CONTENT_TYPE));
    }

    #[tokio::test]
    async fn null_resource_is_not_found() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let ctx = Ctx {
            config: &config,
            path: DavPath::parse("/missing.txt", "").unwrap(),
            kind: ResourceKind::Null,
            headers: Box::leak(Box::new(http::HeaderMap::new())),
            uri: Box::leak(Box::new("/missing.txt".parse::<http::Uri>().unwrap())),
            body: Bytes::new(),
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        };
        assert!(matches!(handle(&ctx, true).await, Err(DavError::NotFound)));
    }
}
