//! PROPFIND/PROPPATCH: property discovery and mutation over the engine's
//! `Ctx`/`PropertyStore`/`LockStore` abstractions, using the streaming
//! `xmlcodec::MultiStatus` builder and delegating request parsing and
//! per-resource assembly to `xmlcodec::propfind`/`xmlcodec::proppatch`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Response, StatusCode};

use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional::{self, PreconditionInput};
use crate::davheaders::Depth;
use crate::dispatch::{self, Ctx};
use crate::error::{DavError, DavResult};
use crate::fs::{DavFileSystem, ResourceKind};
use crate::locks::LockStore;
use crate::path::DavPath;
use crate::props::PropertyStore;
use crate::xmlcodec::propfind::{self, PropfindQuery};
use crate::xmlcodec::proppatch::{self, PatchOp};
use crate::xmlcodec::{MultiStatus, PropNode, PropStatGroup};

pub async fn handle_propfind(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    if ctx.kind.is_null() {
        return Err(DavError::NotFound);
    }

    let query = propfind::parse_request(&ctx.body);
    let depth = crate::davheaders::parse_depth(ctx.headers.get("depth"));

    let fs = Arc::clone(&ctx.config.fs);
    let property_store = Arc::clone(&ctx.config.property_store);
    let lock_store = ctx.config.lock_store.clone();
    let root = ctx.path.clone();

    let stream = AsyncStream::<Bytes, io::Error>::new(move |tx| async move {
        let mut ms = MultiStatus::start(tx)?;
        walk(fs.as_ref(), property_store.as_ref(), lock_store.as_deref(), root, depth, 0, &query, &mut ms).await?;
        ms.finish().await?;
        Ok(())
    });

    Ok(Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(stream))
        .unwrap())
}

/// Visits `path` and, depending on `depth`, its descendants, writing one
/// `<response>` per resource. Recursion under `Depth: infinity` is capped at
/// [`propfind::MAX_TRAVERSAL_DEPTH`] — a guard against filesystem backends
/// with symlink cycles that don't otherwise detect them.
fn walk<'a>(
    fs: &'a dyn DavFileSystem,
    property_store: &'a dyn PropertyStore,
    lock_store: Option<&'a dyn LockStore>,
    path: DavPath,
    depth: Depth,
    level: u32,
    query: &'a PropfindQuery,
    ms: &'a mut MultiStatus,
) -> Pin<Box<dyn Future<Output = DavResult<()>> + Send + 'a>> {
    Box::pin(async move {
        if depth == Depth::Infinity && level > propfind::MAX_TRAVERSAL_DEPTH {
            return Err(propfind::too_deep());
        }

        let kind = dispatch::stat_uncached(fs, &path).await;
        if kind.is_null() {
            ms.write_error_response(&path.as_url_string_with_prefix(), StatusCode::NOT_FOUND).await?;
            return Ok(());
        }

        let etag = kind.meta().map(|m| dispatch::compute_etag(&path, m));
        let locks = lock_store.map(|s| s.locks_for(path.internal_path())).unwrap_or_default();
        let dead = property_store.get_all(path.internal_path()).await?;
        let groups = propfind::build_propstats(&kind, &path, etag.as_deref(), &locks, &dead, query);
        ms.write_response(&path.as_url_string_with_prefix(), &groups).await?;

        let recurse = match depth {
            Depth::Zero => false,
            Depth::One => level == 0,
            Depth::Infinity => true,
        };
        if recurse && kind.is_collection() {
            let entries = match fs.read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    ms.write_error_response(&path.as_url_string_with_prefix(), DavError::from(e).status_code()).await?;
                    return Ok(());
                },
            };
            for entry in entries {
                let name = String::from_utf8_lossy(&entry.name()).into_owned();
                let is_dir = entry.metadata().await.map(|m| m.is_dir()).unwrap_or(false);
                let mut child = path.join(&name);
                if is_dir {
                    child.add_slash();
                }
                walk(fs, property_store, lock_store, child, depth, level + 1, query, ms).await?;
            }
        }
        Ok(())
    })
}

pub async fn handle_proppatch(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    if ctx.kind.is_null() {
        return Err(DavError::NotFound);
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

    let ops = proppatch::parse_request(&ctx.body)?;

    // Each operation is applied and gets its own status: one
    // property failing to persist doesn't roll back the others.
    let mut ok = Vec::new();
    let mut not_found = Vec::new();
    let mut failed = Vec::new();
    for op in ops {
        match op {
            PatchOp::Set(prop) => {
                let name = prop.name.clone();
                match ctx.config.property_store.set(ctx.path.internal_path(), prop).await {
                    Ok(()) => ok.push(name),
                    Err(_) => failed.push(name),
                }
            },
            PatchOp::Remove(name) => match ctx.config.property_store.remove(ctx.path.internal_path(), &name).await {
                Ok(true) => ok.push(name),
                Ok(false) => not_found.push(name),
                Err(_) => failed.push(name),
            },
        }
    }

    let href = ctx.path.as_url_string_with_prefix();
    let mut groups = Vec::new();
    if !ok.is_empty() {
        groups.push(PropStatGroup {
            status: StatusCode::OK,
            props: ok.into_iter().map(|n| PropNode::Empty { ns: n.ns, name: n.name }).collect(),
        });
    }
    if !not_found.is_empty() {
        groups.push(PropStatGroup {
            status: StatusCode::NOT_FOUND,
            props: not_found.into_iter().map(|n| PropNode::Empty { ns: n.ns, name: n.name }).collect(),
        });
    }
    if !failed.is_empty() {
        groups.push(PropStatGroup {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            props: failed.into_iter().map(|n| PropNode::Empty { ns: n.ns, name: n.name }).collect(),
        });
    }

    let stream = AsyncStream::<Bytes, io::Error>::new(move |tx| async move {
        let mut ms = MultiStatus::start(tx)?;
        ms.write_response(&href, &groups).await?;
        ms.finish().await?;
        Ok(())
    });

    Ok(Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(stream))
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DavConfigBuilder;
    use crate::fs::{DavFile, FileMeta, OpenOptions};
    use crate::memfs::MemFs;
    use crate::props::QName;
    use bytes::Bytes as TestBytes;
    use futures_util::StreamExt;
    use std::cell::RefCell;

    fn ctx(config: &crate::config::DavConfig, path: &str, kind: ResourceKind, body: TestBytes) -> Ctx<'_> {
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

    async fn drain(resp: Response<Body>) -> String {
        let mut body = resp.into_body();
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn propfind_on_missing_resource_is_not_found() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let err = handle_propfind(&ctx(&config, "/missing.txt", ResourceKind::Null, TestBytes::new())).await.unwrap_err();
        assert!(matches!(err, DavError::NotFound));
    }

    #[tokio::test]
    async fn propfind_depth_zero_returns_only_the_resource() {
        let fs = Arc::new(MemFs::new());
        fs.create_dir(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let mut f = fs.open(&DavPath::parse("/dir/a.txt", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        drop(f);

        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();

        let mut headers = http::HeaderMap::new();
        headers.insert("depth", "0".parse().unwrap());
        let c = Ctx {
            config: &config,
            path: DavPath::parse("/dir/", "").unwrap(),
            kind: ResourceKind::Collection(fm),
            headers: &headers,
            uri: Box::leak(Box::new("/dir/".parse::<http::Uri>().unwrap())),
            body: TestBytes::new(),
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        };
        let resp = handle_propfind(&c).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let xml = drain(resp).await;
        assert_eq!(xml.matches("<D:response>").count(), 1);
    }

    #[tokio::test]
    async fn propfind_depth_one_includes_children() {
        let fs = Arc::new(MemFs::new());
        fs.create_dir(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let mut f = fs.open(&DavPath::parse("/dir/a.txt", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        drop(f);

        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/dir/", "").unwrap()).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();

        let mut headers = http::HeaderMap::new();
        headers.insert("depth", "1".parse().unwrap());
        let c = Ctx {
            config: &config,
            path: DavPath::parse("/dir/", "").unwrap(),
            kind: ResourceKind::Collection(fm),
            headers: &headers,
            uri: Box::leak(Box::new("/dir/".parse::<http::Uri>().unwrap())),
            body: TestBytes::new(),
            user: None,
            stat_cache: RefCell::new(crate::stat_cache::StatCache::new()),
        };
        let resp = handle_propfind(&c).await.unwrap();
        let xml = drain(resp).await;
        assert_eq!(xml.matches("<D:response>").count(), 2);
    }

    #[tokio::test]
    async fn proppatch_sets_and_reports_200() {
        let fs = Arc::new(MemFs::new());
        let mut f = fs.open(&DavPath::parse("/a.txt", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        drop(f);

        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/a.txt", "").unwrap()).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();

        let body = TestBytes::from_static(
            br#"<?xml version="1.0"?>
            <propertyupdate xmlns="DAV:">
              <set><prop><author>jane</author></prop></set>
            </propertyupdate>"#,
        );
        let resp = handle_proppatch(&ctx(&config, "/a.txt", ResourceKind::File(fm), body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let xml = drain(resp).await;
        assert!(xml.contains("200"));

        let got = config.property_store.get("/a.txt", &QName::new("", "author")).await.unwrap();
        assert_eq!(got.unwrap().xml, "jane");
    }

    #[tokio::test]
    async fn proppatch_on_missing_resource_is_not_found() {
        let fs = Arc::new(MemFs::new());
        let config = DavConfigBuilder::default().filesystem(fs).build();
        let body = TestBytes::from_static(
            br#"<?xml version="1.0"?><propertyupdate xmlns="DAV:"><set><prop><a/></prop></set></propertyupdate>"#,
        );
        let err = handle_proppatch(&ctx(&config, "/missing.txt", ResourceKind::Null, body)).await.unwrap_err();
        assert!(matches!(err, DavError::NotFound));
    }

    #[tokio::test]
    async fn proppatch_remove_of_absent_property_reports_404() {
        let fs = Arc::new(MemFs::new());
        let mut f = fs.open(&DavPath::parse("/a.txt", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        drop(f);

        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/a.txt", "").unwrap()).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();

        let body = TestBytes::from_static(
            br#"<?xml version="1.0"?>
            <propertyupdate xmlns="DAV:">
              <remove><prop><author/></prop></remove>
            </propertyupdate>"#,
        );
        let resp = handle_proppatch(&ctx(&config, "/a.txt", ResourceKind::File(fm), body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let xml = drain(resp).await;
        assert!(xml.contains("404"));
        assert!(!xml.contains("<D:status>HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn proppatch_empty_body_is_bad_request() {
        let fs = Arc::new(MemFs::new());
        let mut f = fs.open(&DavPath::parse("/a.txt", "").unwrap(), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        drop(f);
        let config = DavConfigBuilder::default().filesystem(fs.clone()).build();
        let meta = config.fs.metadata(&DavPath::parse("/a.txt", "").unwrap()).await.unwrap();
        let fm = FileMeta::from_dyn(meta.as_ref()).unwrap();
        let err =
            handle_proppatch(&ctx(&config, "/a.txt", ResourceKind::File(fm), TestBytes::new())).await.unwrap_err();
        assert!(matches!(err, DavError::BadRequest(_)));
    }
}
