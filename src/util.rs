//! Small stateless helpers shared across the engine: HTTP method
//! classification, date formatting, the plain-text `<D:error>` body, and an
//! in-memory `Write` sink used by the XML codec's streaming writers.

use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::body::Body;
use crate::error::{DavError, DavResult};

/// The WebDAV methods this engine understands, independent of `http::Method`
/// (which has no WebDAV extension variants).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u32)]
pub enum DavMethod {
    Head = 0x0001,
    Get = 0x0002,
    Put = 0x0004,
    Options = 0x0008,
    PropFind = 0x0010,
    PropPatch = 0x0020,
    MkCol = 0x0040,
    Copy = 0x0080,
    Move = 0x0100,
    Delete = 0x0200,
    Lock = 0x0400,
    Unlock = 0x0800,
}

pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    Ok(match m {
        &http::Method::HEAD => DavMethod::Head,
        &http::Method::GET => DavMethod::Get,
        &http::Method::PUT => DavMethod::Put,
        &http::Method::DELETE => DavMethod::Delete,
        &http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            other => return Err(DavError::MethodNotAllowed(method_name_leak(other))),
        },
    })
}

fn method_name_leak(s: &str) -> &'static str {
    match s {
        "PATCH" => "PATCH is not supported",
        _ => "method not recognized",
    }
}

/// A set of allowed [`DavMethod`]s, used to compute the `Allow` header and
/// to restrict the engine to a read-only or HTTP-only surface (§6).
#[derive(Clone, Copy, Debug)]
pub struct DavMethodSet(u32);

impl DavMethodSet {
    pub const HTTP_RO: DavMethodSet =
        DavMethodSet(DavMethod::Get as u32 | DavMethod::Head as u32 | DavMethod::Options as u32);
    pub const HTTP_RW: DavMethodSet = DavMethodSet(Self::HTTP_RO.0 | DavMethod::Put as u32);
    pub const WEBDAV_RO: DavMethodSet = DavMethodSet(Self::HTTP_RO.0 | DavMethod::PropFind as u32);
    pub const WEBDAV_RW: DavMethodSet = DavMethodSet(0xffff_ffff);

    pub fn all() -> DavMethodSet {
        DavMethodSet(0xffff_ffff)
    }

    pub fn none() -> DavMethodSet {
        DavMethodSet(0)
    }

    pub fn add(&mut self, m: DavMethod) -> &Self {
        self.0 |= m as u32;
        self
    }

    pub fn remove(&mut self, m: DavMethod) -> &Self {
        self.0 &= !(m as u32);
        self
    }

    pub fn contains(&self, m: DavMethod) -> bool {
        self.0 & (m as u32) > 0
    }

    /// The `Allow` header value for this set, DAV methods following the
    /// standard HTTP ones.
    pub fn as_allow_header(&self) -> String {
        const ALL: &[(DavMethod, &str)] = &[
            (DavMethod::Options, "OPTIONS"),
            (DavMethod::Head, "HEAD"),
            (DavMethod::Get, "GET"),
            (DavMethod::Put, "PUT"),
            (DavMethod::Delete, "DELETE"),
            (DavMethod::PropFind, "PROPFIND"),
            (DavMethod::PropPatch, "PROPPATCH"),
            (DavMethod::MkCol, "MKCOL"),
            (DavMethod::Copy, "COPY"),
            (DavMethod::Move, "MOVE"),
            (DavMethod::Lock, "LOCK"),
            (DavMethod::Unlock, "UNLOCK"),
        ];
        ALL.iter().filter(|(m, _)| self.contains(*m)).map(|(_, s)| *s).collect::<Vec<_>>().join(", ")
    }
}

/// The plain-text `<D:error>` body used for single-status error responses
/// that carry a WebDAV-specific condition code (§7).
pub fn dav_xml_error(condition: &str) -> Body {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n<D:error xmlns:D=\"DAV:\">{}</D:error>\n",
        condition
    );
    Body::from(xml)
}

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => time::OffsetDateTime::from_unix_timestamp(d.as_secs() as i64)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
            .to_offset(offset!(UTC)),
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

/// RFC 1123 date for `Last-Modified`/`Date` headers.
pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    httpdate::fmt_http_date(t)
}

/// `1996-12-19T16:39:57Z` for the `creationdate`/`getlastmodified` dead
/// property values PROPFIND emits (§6).
pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    systemtime_to_offsetdatetime(t).format(&Rfc3339).unwrap_or_default()
}

/// A `Write` sink whose contents can be drained into a `Bytes` chunk; used
/// by the XML codec's streaming writers to flush one `<response>` element
/// at a time onto the body stream.
#[derive(Clone, Default)]
pub struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer::default()
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
