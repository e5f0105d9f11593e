//! Request-scoped stat cache: dedupes `stat` calls made while handling one
//! request. TTL 1s, owned by the request context, never shared or promoted
//! to a global cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::fs::ResourceKind;

const TTL: Duration = Duration::from_secs(1);

struct Entry {
    kind: ResourceKind,
    at: Instant,
}

/// Not `Send`-shared by design: one instance is created per request and
/// dropped with it.
#[derive(Default)]
pub struct StatCache {
    entries: HashMap<String, Entry>,
}

impl StatCache {
    pub fn new() -> StatCache {
        StatCache::default()
    }

    /// Returns the cached `ResourceKind` for `path` if it was stored
    /// within the last second, else `None`.
    pub fn get(&self, path: &str) -> Option<ResourceKind> {
        self.entries.get(path).filter(|e| e.at.elapsed() < TTL).map(|e| e.kind.clone())
    }

    pub fn put(&mut self, path: &str, kind: ResourceKind) {
        self.entries.insert(path.to_string(), Entry { kind, at: Instant::now() });
    }

    /// Drops a path's cached entry; call after any mutation so a later
    /// stat in the same request re-reads the filesystem (e.g. PUT
    /// followed by a PROPFIND-through-redirect in the same handler).
    pub fn invalidate(&mut self, path: &str) {
        self.entries.remove(path);
    }
}
