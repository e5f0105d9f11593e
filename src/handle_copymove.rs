//! COPY/MOVE (§4.8): cross-path operations sharing one precondition
//! pipeline (`Destination` parsing, same-source check, parent/overwrite
//! checks, lock gate) and diverging only in how the file/collection body
//! gets to its new home.
//!
//! RFC 4918 leaves If-Match on a COPY/MOVE source ambiguous, so neither
//! handler runs the full `conditional::check` (which includes the ETag
//! checks) — only the read-only and lock-gate subset of it.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};

use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::davheaders::Depth;
use crate::dispatch::{self, Ctx};
use crate::error::{DavError, DavResult};
use crate::fs::{DavFileSystem, FileMeta, FsError, ResourceKind};
use crate::handle_delete::delete_recursive;
use crate::path::DavPath;
use crate::props::PropertyStore;
use crate::util::systemtime_to_httpdate;
use crate::xmlcodec::MultiStatus;

pub async fn handle_copy(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    if ctx.kind.is_null() {
        return Err(DavError::NotFound);
    }

    let (dest, overwrite, dest_exists) = common_preconditions(ctx).await?;
    check_locks(ctx, &dest, false).await?;

    if dest_exists && overwrite {
        let mut trash = Vec::new();
        let _ =
            delete_recursive(ctx.config.fs.as_ref(), ctx.config.property_store.as_ref(), dest.clone(), &mut trash).await;
    }

    match &ctx.kind {
        ResourceKind::File(_) => {
            ctx.config.fs.copy(&ctx.path, &dest).await?;
            ctx.config.property_store.copy(ctx.path.internal_path(), dest.internal_path()).await?;
            file_success_response(ctx, &dest, dest_exists).await
        },
        ResourceKind::Collection(_) => {
            let depth = match ctx.headers.get("depth").and_then(|v| v.to_str().ok()) {
                None | Some("infinity") | Some("Infinity") => Depth::Infinity,
                Some("0") => Depth::Zero,
                _ => return Err(DavError::BadRequest("Depth must be 0 or infinity for COPY")),
            };

            let mut failures = Vec::new();
            copy_recursive(
                ctx.config.fs.as_ref(),
                ctx.config.property_store.as_ref(),
                ctx.path.clone(),
                dest.clone(),
                depth,
                &mut failures,
            )
            .await;
            collection_response(&dest, dest_exists, failures)
        },
        ResourceKind::Null => unreachable!("checked above"),
    }
}

pub async fn handle_move(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    if ctx.kind.is_null() {
        return Err(DavError::NotFound);
    }

    match ctx.headers.get("depth").and_then(|v| v.to_str().ok()) {
        None | Some("infinity") | Some("Infinity") => {},
        _ => return Err(DavError::BadRequest("Depth must be infinity for MOVE")),
    }

    let (dest, overwrite, dest_exists) = common_preconditions(ctx).await?;
    check_locks(ctx, &dest, true).await?;

    if dest_exists && overwrite {
        let mut trash = Vec::new();
        let _ =
            delete_recursive(ctx.config.fs.as_ref(), ctx.config.property_store.as_ref(), dest.clone(), &mut trash).await;
    }

    match &ctx.kind {
        ResourceKind::File(_) => {
            move_file(ctx, &ctx.path, &dest).await?;
            file_success_response(ctx, &dest, dest_exists).await
        },
        ResourceKind::Collection(_) => move_collection(ctx, &dest, dest_exists).await,
        ResourceKind::Null => unreachable!("checked above"),
    }
}

/// Shared setup for COPY and MOVE: parse and validate `Destination`, check
/// same-source-destination, confirm the destination's parent exists, and
/// apply the `Overwrite` header (§4.8 "Common").
async fn common_preconditions(ctx: &Ctx<'_>) -> DavResult<(DavPath, bool, bool)> {
    if ctx.config.read_only {
        return Err(DavError::ReadOnly);
    }

    let dest_header = ctx.headers.get("destination").and_then(|v| v.to_str().ok()).unwrap_or("");
    let dest = DavPath::parse_destination(dest_header, ctx.uri, ctx.path.prefix())?;

    if same_resource(&ctx.path, &dest) {
        return Err(DavError::SameSourceDestination);
    }

    let dest_parent = dest.parent();
    let parent_kind = dispatch::stat_path(ctx.config.fs.as_ref(), &ctx.stat_cache, &dest_parent).await;
    if !matches!(parent_kind, ResourceKind::Collection(_)) {
        return Err(DavError::MissingParent);
    }

    let dest_kind = dispatch::stat_path(ctx.config.fs.as_ref(), &ctx.stat_cache, &dest).await;
    let dest_exists = !dest_kind.is_null();
    let overwrite = parse_overwrite(ctx.headers);
    if dest_exists && !overwrite {
        return Err(DavError::DestinationExists);
    }

    Ok((dest, overwrite, dest_exists))
}

/// Lock gate (§4.7 step 3): destination is always checked; source is only
/// checked for MOVE, since COPY leaves the source untouched.
async fn check_locks(ctx: &Ctx<'_>, dest: &DavPath, is_move: bool) -> DavResult<()> {
    let Some(store) = ctx.config.lock_store.as_deref() else {
        return Ok(());
    };
    let token = crate::conditional::extract_lock_token(ctx.headers);
    if is_move && !store.can_modify(ctx.path.internal_path(), token.as_deref()) {
        return Err(DavError::Locked);
    }
    if !store.can_modify(dest.internal_path(), token.as_deref()) {
        return Err(DavError::Locked);
    }
    Ok(())
}

fn parse_overwrite(headers: &HeaderMap) -> bool {
    headers.get("overwrite").and_then(|v| v.to_str().ok()).map(|s| s != "F").unwrap_or(true)
}

/// `DavPath` equality up to a trailing collection slash, which `Destination`
/// parsing may or may not preserve depending on the client.
fn same_resource(a: &DavPath, b: &DavPath) -> bool {
    a.internal_path().trim_end_matches('/') == b.internal_path().trim_end_matches('/')
}

async fn file_success_response(ctx: &Ctx<'_>, dest: &DavPath, existed: bool) -> DavResult<Response<Body>> {
    let meta = ctx.config.fs.metadata(dest).await?;
    let fm = FileMeta::from_dyn(meta.as_ref())?;
    let etag = dispatch::compute_etag(dest, &fm);
    let status = if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
    let mut builder = Response::builder().status(status);
    if !existed {
        builder = builder.header(http::header::LOCATION, dest.as_url_string_with_prefix());
    }
    Ok(builder
        .header(http::header::ETAG, etag)
        .header(http::header::LAST_MODIFIED, systemtime_to_httpdate(fm.modified))
        .body(Body::empty())
        .unwrap())
}

fn collection_response(dest: &DavPath, existed: bool, failures: Vec<(DavPath, StatusCode)>) -> DavResult<Response<Body>> {
    if failures.is_empty() {
        let status = if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
        let mut builder = Response::builder().status(status);
        if !existed {
            builder = builder.header(http::header::LOCATION, dest.as_url_string_with_prefix());
        }
        return Ok(builder.body(Body::empty()).unwrap());
    }
    Ok(multistatus_response(failures))
}

fn multistatus_response(failures: Vec<(DavPath, StatusCode)>) -> Response<Body> {
    let stream = AsyncStream::<Bytes, std::io::Error>::new(move |tx| async move {
        let mut ms = MultiStatus::start(tx)?;
        for (path, _status) in failures {
            // §4.8: a failed member is listed with its own status; the
            // spec's literal wording for an aborted descendant is 403.
            ms.write_error_response(&path.as_url_string_with_prefix(), StatusCode::FORBIDDEN).await?;
        }
        ms.finish().await?;
        Ok(())
    });
    Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(stream))
        .unwrap()
}

/// Recursively copies `source` onto `dest`: creates the target directory
/// (tolerating "already exists" so Depth:0 onto an existing collection is a
/// no-op), copies its own properties, and — at `Depth::Infinity` — walks
/// its children one at a time via `read_dir`/`create_dir`/per-file `copy`
/// (a single top-level `fs.copy` can't be relied on for a whole subtree:
/// some backends only copy files). Per-member failures are recorded rather
/// than aborting siblings (§4.8).
fn copy_recursive<'a>(
    fs: &'a dyn DavFileSystem,
    props: &'a dyn PropertyStore,
    source: DavPath,
    dest: DavPath,
    depth: Depth,
    failures: &'a mut Vec<(DavPath, StatusCode)>,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        if source.is_collection() {
            if let Err(e) = fs.create_dir(&dest).await {
                if e != FsError::Exists {
                    failures.push((dest.clone(), DavError::from(e).status_code()));
                    return;
                }
            }
            let _ = props.copy(source.internal_path(), dest.internal_path()).await;

            if depth == Depth::Zero {
                return;
            }

            let entries = match fs.read_dir(&source).await {
                Ok(entries) => entries,
                Err(e) => {
                    failures.push((source.clone(), DavError::from(e).status_code()));
                    return;
                },
            };
            for entry in entries {
                let name = String::from_utf8_lossy(&entry.name()).into_owned();
                let is_dir = entry.metadata().await.map(|m| m.is_dir()).unwrap_or(false);
                let mut child_src = source.join(&name);
                let mut child_dest = dest.join(&name);
                if is_dir {
                    child_src.add_slash();
                    child_dest.add_slash();
                }
                copy_recursive(fs, props, child_src, child_dest, depth, failures).await;
            }
        } else if let Err(e) = fs.copy(&source, &dest).await {
            failures.push((dest.clone(), DavError::from(e).status_code()));
        } else {
            let _ = props.copy(source.internal_path(), dest.internal_path()).await;
        }
    })
}

async fn move_file(ctx: &Ctx<'_>, source: &DavPath, dest: &DavPath) -> DavResult<()> {
    if ctx.config.fs.rename(source, dest).await.is_err() {
        ctx.config.fs.copy(source, dest).await?;
        ctx.config.fs.remove_file(source).await?;
    }
    ctx.config.property_store.mv(source.internal_path(), dest.internal_path()).await?;
    Ok(())
}

async fn move_collection(ctx: &Ctx<'_>, dest: &DavPath, existed: bool) -> DavResult<Response<Body>> {
    if ctx.config.fs.rename(&ctx.path, dest).await.is_ok() {
        migrate_properties_tree(ctx.config.fs.as_ref(), ctx.config.property_store.as_ref(), &ctx.path, dest).await;
        let status = if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
        let mut builder = Response::builder().status(status);
        if !existed {
            builder = builder.header(http::header::LOCATION, dest.as_url_string_with_prefix());
        }
        return Ok(builder.body(Body::empty()).unwrap());
    }

    // Cross-filesystem or otherwise non-atomic rename: fall back to a
    // recursive copy (which migrates properties per descendant via
    // `props.copy`) followed by a recursive delete of the source (which
    // clears them via `props.remove_all`) — together equivalent to `mv`.
    let mut failures = Vec::new();
    copy_recursive(
        ctx.config.fs.as_ref(),
        ctx.config.property_store.as_ref(),
        ctx.path.clone(),
        dest.clone(),
        Depth::Infinity,
        &mut failures,
    )
    .await;
    let _ =
        delete_recursive(ctx.config.fs.as_ref(), ctx.config.property_store.as_ref(), ctx.path.clone(), &mut failures)
            .await;

    collection_response(dest, existed, failures)
}

/// After a native directory rename, the source subtree is gone; walk the
/// (now-relocated) destination tree and re-key each descendant's dead
/// properties individually, since `PropertyStore` has no subtree-move
/// primitive.
async fn migrate_properties_tree(fs: &dyn DavFileSystem, props: &dyn PropertyStore, source: &DavPath, dest: &DavPath) {
    let _ = props.mv(source.internal_path(), dest.internal_path()).await;
    let mut stack = vec![(source.clone(), dest.clone())];
    while let Some((s, d)) = stack.pop() {
        if !d.is_collection() {
            continue;
        }
        let entries = match fs.read_dir(&d).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries {
            let name = String::from_utf8_lossy(&entry.name()).into_owned();
            let is_dir = entry.metadata().await.map(|m| m.is_dir()).unwrap_or(false);
            let mut cs = s.join(&name);
            let mut cd = d.join(&name);
            if is_dir {
                cs.add_slash();
                cd.add_slash();
            }
            let _ = props.mv(cs.internal_path(), cd.internal_path()).await;
            if is_dir {
                stack.push((cs, cd));
            }
        }
    }
}
