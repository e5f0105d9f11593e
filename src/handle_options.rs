//! OPTIONS (§4.8): unconditional capability advertisement, on every
//! resource variant including a null one.

use http::Response;

use crate::body::Body;
use crate::dispatch::Ctx;
use crate::error::DavResult;
use crate::util::{DavMethod, DavMethodSet};

fn allowed_methods(ctx: &Ctx<'_>) -> DavMethodSet {
    let mut set = if ctx.config.read_only { DavMethodSet::WEBDAV_RO } else { DavMethodSet::WEBDAV_RW };
    if !ctx.config.enable_locking {
        set.remove(DavMethod::Lock);
        set.remove(DavMethod::Unlock);
    }
    set
}

pub async fn handle(ctx: &Ctx<'_>) -> DavResult<Response<Body>> {
    let resp = Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::ALLOW, allowed_methods(ctx).as_allow_header())
        .header("DAV", "1,2")
        .header("MS-Author-Via", "DAV")
        .header(http::header::CONTENT_LENGTH, "0")
        .body(Body::empty())
        .unwrap();
    Ok(resp)
}
