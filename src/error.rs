//! Error taxonomy for the engine.
//!
//! Every fallible path in the engine returns a [`DavError`]. Exactly one
//! HTTP status corresponds to each variant (see [`DavError::status_code`]);
//! the dispatcher is the only place that turns a `DavError` into a wire
//! response.

use http::StatusCode;
use std::fmt;
use std::io;

pub type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub enum DavError {
    /// Mutating method attempted while the engine is configured read-only.
    ReadOnly,
    /// A covering lock blocks this write and the caller didn't supply (or
    /// supplied the wrong) lock token.
    Locked,
    /// `Content-Length` exceeded the configured upload cap.
    UploadTooLarge,
    /// Safe method (GET/HEAD) + `If-None-Match` hit: 304, not an error body.
    NotModified,
    /// `If-Match` miss, or `If-None-Match: *` on an existing resource.
    EtagMismatch,
    /// LOCK refresh named a token that doesn't exist or doesn't cover the
    /// request path.
    LockTokenInvalid,
    /// COPY/MOVE with an absent or empty `Destination` header.
    MissingDestination,
    /// COPY/MOVE with a malformed, cross-host, or traversal-containing
    /// destination.
    InvalidDestination,
    /// COPY/MOVE where source and destination normalize to the same path.
    SameSourceDestination,
    /// COPY/MOVE destination exists and `Overwrite: F`.
    DestinationExists,
    /// Parent collection of the target does not exist.
    MissingParent,
    /// Path failed traversal/prefix/containment checks.
    PathForbidden,
    /// Operation on a null resource that doesn't accept it.
    NotFound,
    /// Method not valid for this resource variant, or method unknown.
    MethodNotAllowed(&'static str),
    /// MKCOL on an existing resource; UNLOCK with an unknown token.
    Conflict(&'static str),
    /// Locking disabled and the request required it.
    NotImplemented,
    /// Malformed request body (XML parse failure, empty PROPPATCH body...).
    BadRequest(&'static str),
    /// Range header named an out-of-bounds range.
    RangeNotSatisfiable(u64),
    /// Request body carried unsupported media for the method.
    UnsupportedMediaType,
    /// Authentication failed; carries the `WWW-Authenticate` challenge.
    Unauthorized(String),
    /// Authorization denied; carries a human-readable reason.
    Forbidden(String),
    /// Caller is over the concurrency or rate limit (§4.11). Carries the
    /// `X-RateLimit-*` accounting alongside `Retry-After` so the gate's
    /// rejection path doesn't need a second place to stamp headers.
    TooManyRequests { retry_after_secs: u64, limit: u32, remaining: u32, reset_at: Option<u64> },
    /// Unhandled I/O failure from the filesystem or a store.
    Io(io::Error),
    /// XML parse/generate failure not otherwise classified above.
    Xml(String),
}

impl DavError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DavError::ReadOnly => StatusCode::FORBIDDEN,
            DavError::Locked => StatusCode::LOCKED,
            DavError::UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            DavError::NotModified => StatusCode::NOT_MODIFIED,
            DavError::EtagMismatch => StatusCode::PRECONDITION_FAILED,
            DavError::LockTokenInvalid => StatusCode::PRECONDITION_FAILED,
            DavError::MissingDestination => StatusCode::FORBIDDEN,
            DavError::InvalidDestination => StatusCode::FORBIDDEN,
            DavError::SameSourceDestination => StatusCode::FORBIDDEN,
            DavError::DestinationExists => StatusCode::PRECONDITION_FAILED,
            DavError::MissingParent => StatusCode::CONFLICT,
            DavError::PathForbidden => StatusCode::FORBIDDEN,
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            DavError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DavError::Forbidden(_) => StatusCode::FORBIDDEN,
            DavError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            DavError::Io(e) => ioerror_to_status(e),
            DavError::Xml(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Plain-text body for single-status error responses (§7).
    pub fn message(&self) -> String {
        match self {
            DavError::ReadOnly => "Server is in read-only mode".into(),
            DavError::Locked => "Resource is locked".into(),
            DavError::UploadTooLarge => "Upload exceeds the configured size limit".into(),
            DavError::NotModified => String::new(),
            DavError::EtagMismatch => "ETag precondition failed".into(),
            DavError::LockTokenInvalid => "lock token is missing, unknown, or does not cover this resource".into(),
            DavError::MissingDestination => "Destination header missing".into(),
            DavError::InvalidDestination => "Destination header is invalid".into(),
            DavError::SameSourceDestination => "Source and destination are the same resource".into(),
            DavError::DestinationExists => "Destination exists and Overwrite is not allowed".into(),
            DavError::MissingParent => "Parent collection does not exist".into(),
            DavError::PathForbidden => "Access denied".into(),
            DavError::NotFound => "Not found".into(),
            DavError::MethodNotAllowed(s) => s.to_string(),
            DavError::Conflict(s) => s.to_string(),
            DavError::NotImplemented => "Not implemented".into(),
            DavError::BadRequest(s) => s.to_string(),
            DavError::RangeNotSatisfiable(_) => "Requested range not satisfiable".into(),
            DavError::UnsupportedMediaType => "Unsupported media type".into(),
            DavError::Unauthorized(_) => "Unauthorized".into(),
            DavError::Forbidden(reason) => reason.clone(),
            DavError::TooManyRequests { .. } => "Too many requests".into(),
            DavError::Io(e) => e.to_string(),
            DavError::Xml(s) => s.clone(),
        }
    }
}

fn ioerror_to_status(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        io::ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        io::ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for DavError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DavError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::Io(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_e: xmltree::ParseError) -> Self {
        DavError::Xml("malformed XML body".into())
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::Xml(e.to_string())
    }
}

/// Lets XML-codec calls (`DavResult`) be `?`-propagated directly out of an
/// `AsyncStream` closure, whose error type is `io::Error`.
impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        io::Error::other(e)
    }
}

impl From<crate::fs::FsError> for DavError {
    fn from(e: crate::fs::FsError) -> Self {
        use crate::fs::FsError::*;
        match e {
            NotFound => DavError::NotFound,
            Forbidden => DavError::PathForbidden,
            Exists => DavError::Conflict("resource already exists"),
            NotImplemented => DavError::NotImplemented,
            GeneralFailure | InsufficientStorage | LoopDetected | PathTooLong | IsRemote => {
                DavError::Io(io::Error::other(format!("{e:?}")))
            },
        }
    }
}

/// Turns a `DavError` into a wire response (§7): status from
/// [`DavError::status_code`], a plain-text body from [`DavError::message`],
/// except for the handful of variants that carry their own header or empty
/// body.
pub fn to_response(e: &DavError) -> http::Response<crate::body::Body> {
    let status = e.status_code();
    let mut builder = http::Response::builder().status(status);
    match e {
        DavError::NotModified => {
            return builder.body(crate::body::Body::empty()).unwrap();
        },
        DavError::TooManyRequests { retry_after_secs, limit, remaining, reset_at } => {
            builder = builder
                .header(http::header::RETRY_AFTER, retry_after_secs.to_string())
                .header("x-ratelimit-limit", limit.to_string())
                .header("x-ratelimit-remaining", remaining.to_string());
            if let Some(reset_at) = reset_at {
                builder = builder.header("x-ratelimit-reset", reset_at.to_string());
            }
        },
        DavError::Unauthorized(challenge) => {
            builder = builder.header(http::header::WWW_AUTHENTICATE, challenge.as_str());
        },
        DavError::RangeNotSatisfiable(size) => {
            builder = builder.header(http::header::CONTENT_RANGE, format!("bytes */{size}"));
        },
        DavError::MethodNotAllowed(_) => {},
        _ => {},
    }
    let message = e.message();
    if message.is_empty() {
        builder.body(crate::body::Body::empty()).unwrap()
    } else {
        builder.header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8").body(crate::body::Body::from(message)).unwrap()
    }
}
