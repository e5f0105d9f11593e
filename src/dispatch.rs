//! The dispatcher (§4.9): the one place that turns a raw `http::Request`
//! into a `http::Response` by running the fixed pipeline — path safety,
//! a single stat, handler lookup, handler invocation, metrics.
//!
//! `Ctx` is the per-request bundle every handler closes over; it exists so
//! the eight `handle_*` modules don't each repeat the "stat the mapped
//! path, build a `DavPath`, borrow the config" boilerplate.

use std::cell::RefCell;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, Request, Response, Uri};

use crate::config::DavConfig;
use crate::error::{self, DavError, DavResult};
use crate::fs::{DavFile, DavFileSystem, FileMeta, FsResult, OpenOptions, ResourceKind};
use crate::path::DavPath;
use crate::stat_cache::StatCache;
use crate::util::{dav_method, DavMethod, DavMethodSet};
use crate::{
    handle_copymove, handle_delete, handle_gethead, handle_lock, handle_mkcol, handle_options, handle_props,
    handle_put,
};

/// Everything a method handler needs, assembled once by [`dispatch`].
pub struct Ctx<'a> {
    pub config: &'a DavConfig,
    pub path: DavPath,
    pub kind: ResourceKind,
    pub headers: &'a HeaderMap,
    pub uri: &'a Uri,
    pub body: Bytes,
    pub user: Option<String>,
    pub stat_cache: RefCell<StatCache>,
}

/// Stats `path`, consulting (and populating) the request-scoped cache
/// first (§4.9 step 1, §5).
pub async fn stat_path(fs: &dyn DavFileSystem, cache: &RefCell<StatCache>, path: &DavPath) -> ResourceKind {
    if let Some(kind) = cache.borrow().get(path.internal_path()) {
        return kind;
    }
    let kind = stat_uncached(fs, path).await;
    cache.borrow_mut().put(path.internal_path(), kind.clone());
    kind
}

/// Stats `path` with no cache involved, for traversals that outlive the
/// request-scoped cache (PROPFIND's recursive descent, §4.6).
pub(crate) async fn stat_uncached(fs: &dyn DavFileSystem, path: &DavPath) -> ResourceKind {
    match fs.metadata(path).await {
        Ok(meta) => match FileMeta::from_dyn(meta.as_ref()) {
            Ok(fm) if fm.is_dir => ResourceKind::Collection(fm),
            Ok(fm) => ResourceKind::File(fm),
            Err(_) => ResourceKind::Null,
        },
        Err(_) => ResourceKind::Null,
    }
}

/// Writes all of `buf` to `file`, looping on short writes.
pub(crate) async fn write_all(file: &mut dyn DavFile, mut buf: &[u8]) -> FsResult<()> {
    while !buf.is_empty() {
        let n = file.write(buf).await?;
        if n == 0 {
            return Err(crate::fs::FsError::GeneralFailure);
        }
        buf = &buf[n..];
    }
    Ok(())
}

/// Streams `len` bytes starting at `start` out of the file at `path`, as
/// an [`crate::body::Body`]-compatible [`crate::async_stream::AsyncStream`].
pub(crate) fn stream_file_range(
    fs: Arc<dyn DavFileSystem>,
    path: DavPath,
    start: u64,
    len: u64,
) -> crate::async_stream::AsyncStream<Bytes, io::Error> {
    crate::async_stream::AsyncStream::new(move |mut tx| async move {
        let mut file = fs.open(&path, OpenOptions::read()).await.map_err(fs_err_to_io)?;
        if start > 0 {
            file.seek(start).await.map_err(fs_err_to_io)?;
        }
        let mut remaining = len;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want]).await.map_err(fs_err_to_io)?;
            if n == 0 {
                break;
            }
            tx.send(Bytes::copy_from_slice(&buf[..n])).await;
            remaining -= n as u64;
        }
        Ok(())
    })
}

pub(crate) fn fs_err_to_io(e: crate::fs::FsError) -> io::Error {
    io::Error::other(format!("{e:?}"))
}

/// Computes the ETag for a resource from its metadata and path (§4.3).
/// Shared by every handler that needs one for a conditional check or a
/// response header, so all of them agree on the exact same value.
pub(crate) fn compute_etag(path: &DavPath, meta: &FileMeta) -> String {
    let mtime_ms = meta.modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
    crate::etag::compute(meta.len, mtime_ms, path.internal_path())
}

fn allowed_methods(config: &DavConfig) -> DavMethodSet {
    let mut set = if config.read_only { DavMethodSet::WEBDAV_RO } else { DavMethodSet::WEBDAV_RW };
    if !config.enable_locking {
        set.remove(DavMethod::Lock);
        set.remove(DavMethod::Unlock);
    }
    set
}

fn method_not_allowed_response(config: &DavConfig) -> Response<crate::body::Body> {
    Response::builder()
        .status(http::StatusCode::METHOD_NOT_ALLOWED)
        .header(http::header::ALLOW, allowed_methods(config).as_allow_header())
        .body(crate::body::Body::empty())
        .unwrap()
}

/// Runs the full §4.9 pipeline for one already-authenticated,
/// already-throttled request.
pub async fn dispatch(config: &DavConfig, req: Request<Bytes>, user: Option<String>) -> Response<crate::body::Body> {
    let method = match dav_method(req.method()) {
        Ok(m) => m,
        Err(_) => {
            config.metrics.record_request(DavMethod::Get);
            let resp = method_not_allowed_response(config);
            config.metrics.record_response(DavMethod::Get, resp.status(), std::time::Duration::from_secs(0));
            return resp;
        },
    };

    config.metrics.record_request(method);
    let start = Instant::now();

    let dpath = match DavPath::parse(req.uri().path(), &config.url_prefix) {
        Ok(p) => p,
        Err(e) => {
            let resp = error::to_response(&e);
            config.metrics.record_response(method, resp.status(), start.elapsed());
            return resp;
        },
    };

    let stat_cache = RefCell::new(StatCache::new());
    let kind = stat_path(config.fs.as_ref(), &stat_cache, &dpath).await;

    let (parts, body) = req.into_parts();
    let ctx = Ctx {
        config,
        path: dpath,
        kind,
        headers: &parts.headers,
        uri: &parts.uri,
        body,
        user,
        stat_cache,
    };

    let result: DavResult<Response<crate::body::Body>> = match method {
        DavMethod::Options => handle_options::handle(&ctx).await,
        DavMethod::Get => handle_gethead::handle(&ctx, true).await,
        DavMethod::Head => handle_gethead::handle(&ctx, false).await,
        DavMethod::Put => handle_put::handle(&ctx).await,
        DavMethod::Delete => handle_delete::handle(&ctx).await,
        DavMethod::MkCol => handle_mkcol::handle(&ctx).await,
        DavMethod::Copy => handle_copymove::handle_copy(&ctx).await,
        DavMethod::Move => handle_copymove::handle_move(&ctx).await,
        DavMethod::PropFind => handle_props::handle_propfind(&ctx).await,
        DavMethod::PropPatch => handle_props::handle_proppatch(&ctx).await,
        DavMethod::Lock => handle_lock::handle_lock(&ctx).await,
        DavMethod::Unlock => handle_lock::handle_unlock(&ctx).await,
    };

    let response = match result {
        Ok(r) => r,
        Err(ref e @ DavError::MethodNotAllowed(_)) => {
            let mut r = error::to_response(e);
            r.headers_mut().insert(http::header::ALLOW, allowed_methods(config).as_allow_header().parse().unwrap());
            r
        },
        Err(ref e) => error::to_response(e),
    };
    config.metrics.record_response(method, response.status(), start.elapsed());
    response
}
