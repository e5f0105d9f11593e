//! A WebDAV (RFC 4918 Level 2) protocol engine: an async `DavHandler` that
//! turns an `http::Request` into an `http::Response` by running the
//! transport-independent pipeline described across this crate's modules —
//! authentication, throttling, path safety, method dispatch, and the
//! filesystem/property/lock backends a method handler needs.
//!
//! Transport binding is left to the embedder (see `demos/` for hyper and
//! axum wiring); this crate only deals in `http`/`http-body` types.

pub mod async_stream;
pub mod auth;
pub mod body;
pub mod conditional;
pub mod config;
pub mod davheaders;
pub mod dispatch;
pub mod error;
pub mod etag;
pub mod fs;
pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;
pub mod kv;
pub mod locks;
pub mod metrics;
pub mod path;
pub mod props;
pub mod range;
pub mod stat_cache;
pub mod throttle;
pub mod util;
pub mod xmlcodec;

#[cfg(feature = "localfs")]
pub mod localfs;
#[cfg(feature = "memfs")]
pub mod memfs;

pub use body::Body;
pub use config::{DavConfig, DavConfigBuilder, ThrottleConfig};
pub use error::{DavError, DavResult};

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;

use crate::auth::{self, AuthOutcome};
use crate::throttle::{Rejection, Throttle};

/// The assembled engine: an immutable [`DavConfig`] plus the throttle gate's
/// runtime state, both cheaply `Clone`-able so one instance can be shared
/// across connection tasks.
#[derive(Clone)]
pub struct DavHandler {
    config: Arc<DavConfig>,
    throttle: Option<Arc<Throttle>>,
}

/// Builds a [`DavHandler`]. A thin wrapper around [`DavConfigBuilder`] whose
/// terminal method is named to match the rest of the engine's
/// builder-then-`build_handler` convention.
#[derive(Default)]
pub struct DavHandlerBuilder(DavConfigBuilder);

impl DavHandlerBuilder {
    pub fn filesystem(self, fs: Arc<dyn fs::DavFileSystem>) -> Self {
        DavHandlerBuilder(self.0.filesystem(fs))
    }

    pub fn url_prefix(self, prefix: impl Into<String>) -> Self {
        DavHandlerBuilder(self.0.url_prefix(prefix))
    }

    pub fn allow_anonymous(self, yes: bool) -> Self {
        DavHandlerBuilder(self.0.allow_anonymous(yes))
    }

    pub fn max_upload_size_bytes(self, n: u64) -> Self {
        DavHandlerBuilder(self.0.max_upload_size_bytes(n))
    }

    pub fn enable_locking(self, yes: bool) -> Self {
        DavHandlerBuilder(self.0.enable_locking(yes))
    }

    pub fn read_only(self, yes: bool) -> Self {
        DavHandlerBuilder(self.0.read_only(yes))
    }

    pub fn property_store(self, store: Arc<dyn props::PropertyStore>) -> Self {
        DavHandlerBuilder(self.0.property_store(store))
    }

    pub fn lock_store(self, store: Arc<dyn locks::LockStore>) -> Self {
        DavHandlerBuilder(self.0.lock_store(store))
    }

    pub fn throttle(self, cfg: ThrottleConfig) -> Self {
        DavHandlerBuilder(self.0.throttle(cfg))
    }

    pub fn authenticator(self, auth: Arc<dyn auth::Authenticator>) -> Self {
        DavHandlerBuilder(self.0.authenticator(auth))
    }

    pub fn authorizer(self, authz: Arc<dyn auth::Authorizer>) -> Self {
        DavHandlerBuilder(self.0.authorizer(authz))
    }

    pub fn metrics_sink(self, sink: Arc<dyn metrics::MetricsSink>) -> Self {
        DavHandlerBuilder(self.0.metrics_sink(sink))
    }

    /// Assembles the [`DavConfig`] and wraps it in a [`DavHandler`],
    /// spinning up the throttle gate's eviction sweep if a [`ThrottleConfig`]
    /// was set. Panics under the same condition as [`DavConfigBuilder::build`]
    /// (no filesystem configured).
    pub fn build_handler(self) -> DavHandler {
        let config = self.0.build();
        let throttle = config.throttle.map(|t| {
            let throttle = Arc::new(Throttle::new(t.max_concurrent, t.max_rps, t.window_s));
            crate::throttle::spawn_eviction_sweep(throttle.clone());
            throttle
        });
        if let Some(lock_store) = config.lock_store.clone() {
            crate::locks::spawn_expiry_sweep(lock_store);
        }
        DavHandler { config: Arc::new(config), throttle }
    }
}

/// Request body size accepted before a client has a chance to hit the
/// configured upload cap and get a clean 413 instead of an OOM. Methods
/// without a meaningful body (everything but PUT/PROPFIND/PROPPATCH/LOCK)
/// are capped much lower.
const MAX_BODY_BYTES_DEFAULT: u64 = 64 * 1024 * 1024;
const MAX_BODY_BYTES_NO_PAYLOAD: usize = 65_536;

impl DavHandler {
    pub fn builder() -> DavHandlerBuilder {
        DavHandlerBuilder::default()
    }

    pub fn new(fs: Arc<dyn fs::DavFileSystem>) -> DavHandler {
        DavHandler::builder().filesystem(fs).build_handler()
    }

    pub fn config(&self) -> &DavConfig {
        &self.config
    }

    /// Runs the full request pipeline (auth gate, throttle gate, dispatcher)
    /// for one request, given the caller's best guess at the remote
    /// address (used only as the last resort in the throttle gate's
    /// client-key derivation; see `throttle::client_key`).
    pub async fn handle<ReqBody>(&self, req: Request<ReqBody>, remote_addr: &str) -> Response<Body>
    where
        ReqBody: http_body::Body<Data = Bytes> + Send + 'static,
        ReqBody::Error: std::fmt::Display,
    {
        if let Some(litmus) = req.headers().get("x-litmus").and_then(|v| v.to_str().ok()) {
            log::debug!("X-Litmus: {}", litmus);
        }

        let (parts, body) = req.into_parts();
        let cap = if matches!(parts.method.as_str(), "PUT" | "PROPFIND" | "PROPPATCH" | "LOCK") {
            self.config.max_upload_size_bytes.unwrap_or(MAX_BODY_BYTES_DEFAULT) as usize
        } else {
            MAX_BODY_BYTES_NO_PAYLOAD
        };
        let body_bytes = match read_capped(body, cap).await {
            Ok(b) => b,
            Err(e) => return error::to_response(&e),
        };

        let action = auth::action_for(util::dav_method(&parts.method).unwrap_or(util::DavMethod::Get));

        let outcome = self.config.authenticator.authenticate(&parts.headers).await;
        let user = match outcome {
            AuthOutcome::User(u) => u,
            AuthOutcome::Reject { challenge } => {
                return error::to_response(&DavError::Unauthorized(challenge));
            },
        };
        let auth_path = match crate::path::DavPath::parse(parts.uri.path(), &self.config.url_prefix) {
            Ok(p) => p.internal_path().to_string(),
            Err(e) => return error::to_response(&e),
        };
        let allowed = self.config.authorizer.authorize(user.as_deref(), action, &auth_path).await;
        if !allowed {
            return error::to_response(&DavError::Forbidden("not authorized for this resource".into()));
        }

        if let Some(throttle) = &self.throttle {
            let key = throttle::client_key(&parts.headers, remote_addr);
            match throttle.acquire(&key) {
                Ok(ticket) => {
                    let req = Request::from_parts(parts, body_bytes);
                    let mut resp = dispatch::dispatch(&self.config, req, user).await;
                    resp.headers_mut().insert("x-ratelimit-limit", ticket.grant.limit.to_string().parse().unwrap());
                    resp.headers_mut()
                        .insert("x-ratelimit-remaining", ticket.grant.remaining.to_string().parse().unwrap());
                    resp
                },
                Err(Rejection::Concurrency { limit }) => error::to_response(&DavError::TooManyRequests {
                    retry_after_secs: 1,
                    limit: limit as u32,
                    remaining: 0,
                    reset_at: None,
                }),
                Err(Rejection::RateLimit { limit, reset_at, .. }) => {
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    let retry_after_secs = reset_at.saturating_sub(now);
                    error::to_response(&DavError::TooManyRequests {
                        retry_after_secs,
                        limit,
                        remaining: 0,
                        reset_at: Some(reset_at),
                    })
                },
            }
        } else {
            let req = Request::from_parts(parts, body_bytes);
            dispatch::dispatch(&self.config, req, user).await
        }
    }
}

/// Drains `body` into a single `Bytes` buffer, failing closed with a 413
/// the moment the accumulated size would exceed `cap` rather than buffering
/// an arbitrarily large request first.
async fn read_capped<B>(mut body: B, cap: usize) -> DavResult<Bytes>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::fmt::Display,
{
    let mut buf = Vec::new();
    let mut body = std::pin::pin!(body);
    while let Some(frame) = body.as_mut().frame().await {
        let frame = frame.map_err(|e| DavError::Io(io::Error::other(e.to_string())))?;
        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > cap {
                return Err(DavError::UploadTooLarge);
            }
            buf.extend_from_slice(&data);
        }
    }
    Ok(Bytes::from(buf))
}
