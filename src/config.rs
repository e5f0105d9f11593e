//! `DavConfig`: the engine's configuration record and builder, assembled
//! into a `DavHandler` via `DavHandler::builder()...build_handler()` with
//! every backend the engine uses — filesystem, property store, lock store,
//! authenticator, authorizer, metrics sink — pluggable independently.

use std::sync::Arc;

use crate::auth::{Authenticator, Authorizer};
use crate::fs::DavFileSystem;
use crate::locks::LockStore;
use crate::metrics::MetricsSink;
use crate::props::PropertyStore;

/// Throttle gate limits. Omitting a `ThrottleConfig` from the builder
/// disables that gate entirely.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    pub max_concurrent: usize,
    pub max_rps: u32,
    pub window_s: u64,
}

impl ThrottleConfig {
    pub fn new(max_concurrent: usize, max_rps: u32, window_s: u64) -> ThrottleConfig {
        ThrottleConfig { max_concurrent, max_rps, window_s }
    }
}

/// The assembled, immutable configuration a `DavHandler` runs with.
pub struct DavConfig {
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) url_prefix: String,
    pub(crate) allow_anonymous: bool,
    pub(crate) max_upload_size_bytes: Option<u64>,
    pub(crate) enable_locking: bool,
    pub(crate) read_only: bool,
    pub(crate) property_store: Arc<dyn PropertyStore>,
    pub(crate) lock_store: Option<Arc<dyn LockStore>>,
    pub(crate) throttle: Option<ThrottleConfig>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
}

/// Builds a [`DavConfig`] field by field; unset polymorphic slots get
/// permissive pass-through defaults (anonymous auth, allow-all authorization,
/// a no-op metrics sink) rather than failing to build.
pub struct DavConfigBuilder {
    fs: Option<Arc<dyn DavFileSystem>>,
    url_prefix: String,
    allow_anonymous: bool,
    max_upload_size_bytes: Option<u64>,
    enable_locking: bool,
    read_only: bool,
    property_store: Option<Arc<dyn PropertyStore>>,
    lock_store: Option<Arc<dyn LockStore>>,
    throttle: Option<ThrottleConfig>,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl Default for DavConfigBuilder {
    fn default() -> DavConfigBuilder {
        DavConfigBuilder {
            fs: None,
            url_prefix: String::new(),
            allow_anonymous: true,
            max_upload_size_bytes: None,
            enable_locking: true,
            read_only: false,
            property_store: None,
            lock_store: None,
            throttle: None,
            authenticator: None,
            authorizer: None,
            metrics: None,
        }
    }
}

impl DavConfigBuilder {
    pub fn filesystem(mut self, fs: Arc<dyn DavFileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = prefix.into();
        self
    }

    pub fn allow_anonymous(mut self, yes: bool) -> Self {
        self.allow_anonymous = yes;
        self
    }

    pub fn max_upload_size_bytes(mut self, n: u64) -> Self {
        self.max_upload_size_bytes = Some(n);
        self
    }

    pub fn enable_locking(mut self, yes: bool) -> Self {
        self.enable_locking = yes;
        self
    }

    pub fn read_only(mut self, yes: bool) -> Self {
        self.read_only = yes;
        self
    }

    pub fn property_store(mut self, store: Arc<dyn PropertyStore>) -> Self {
        self.property_store = Some(store);
        self
    }

    pub fn lock_store(mut self, store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(store);
        self
    }

    pub fn throttle(mut self, cfg: ThrottleConfig) -> Self {
        self.throttle = Some(cfg);
        self
    }

    pub fn authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(auth);
        self
    }

    pub fn authorizer(mut self, authz: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authz);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Assembles the final `DavConfig`. Panics if no filesystem was set —
    /// every other slot has a sensible default and doesn't need to.
    pub fn build(self) -> DavConfig {
        let fs = self.fs.expect("DavConfigBuilder::filesystem must be called before build()");
        let authenticator = self.authenticator.unwrap_or_else(|| {
            if self.allow_anonymous {
                Arc::new(crate::auth::AnonymousAuthenticator) as Arc<dyn Authenticator>
            } else {
                Arc::new(crate::auth::DenyAllAuthenticator { realm: "dav".to_string() }) as Arc<dyn Authenticator>
            }
        });
        let authorizer = self.authorizer.unwrap_or_else(|| Arc::new(crate::auth::AllowAllAuthorizer) as Arc<dyn Authorizer>);
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(crate::metrics::NoopMetrics) as Arc<dyn MetricsSink>);
        let property_store = self
            .property_store
            .unwrap_or_else(|| Arc::new(crate::props::MemoryPropertyStore::new()) as Arc<dyn PropertyStore>);
        let lock_store = if self.enable_locking {
            Some(self.lock_store.unwrap_or_else(|| Arc::new(crate::locks::MemoryLockStore::new()) as Arc<dyn LockStore>))
        } else {
            None
        };

        DavConfig {
            fs,
            url_prefix: self.url_prefix,
            allow_anonymous: self.allow_anonymous,
            max_upload_size_bytes: self.max_upload_size_bytes,
            enable_locking: self.enable_locking,
            read_only: self.read_only,
            property_store,
            lock_store,
            throttle: self.throttle,
            authenticator,
            authorizer,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemFs;

    #[test]
    fn defaults_build_without_explicit_stores() {
        let cfg = DavConfigBuilder::default().filesystem(Arc::new(MemFs::new())).build();
        assert!(cfg.lock_store.is_some());
        assert!(cfg.allow_anonymous);
        assert!(!cfg.read_only);
    }

    #[test]
    fn disabling_locking_leaves_lock_store_empty() {
        let cfg = DavConfigBuilder::default().filesystem(Arc::new(MemFs::new())).enable_locking(false).build();
        assert!(cfg.lock_store.is_none());
    }

    #[test]
    #[should_panic]
    fn build_without_filesystem_panics() {
        DavConfigBuilder::default().build();
    }
}
