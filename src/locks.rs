//! Lock store (§4.5): create/refresh/resolve locks, enforcing scope and
//! depth coverage. Operations are synchronous and point-wise atomic under
//! one `parking_lot::Mutex`: there's no I/O in the critical section, so an
//! async trait buys nothing here (see §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

#[derive(Debug, Clone)]
pub struct Lock {
    pub token: String,
    pub path: String,
    pub scope: LockScope,
    pub owner: Option<String>,
    pub created: SystemTime,
    pub timeout: Option<Duration>,
    pub depth: LockDepth,
}

impl Lock {
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.timeout.map(|d| self.created + d)
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at().map_or(false, |exp| now >= exp)
    }

    pub fn remaining_secs(&self, now: SystemTime) -> Option<u64> {
        self.expires_at().map(|exp| exp.duration_since(now).map(|d| d.as_secs()).unwrap_or(0))
    }

    /// A lock at `self.path` with `self.depth` covers `path` iff they're
    /// equal, or depth is infinity and `path` is a descendant.
    pub fn covers(&self, path: &str) -> bool {
        if paths_equal(&self.path, path) {
            return true;
        }
        if self.depth != LockDepth::Infinity {
            return false;
        }
        is_descendant(&self.path, path)
    }
}

fn norm(p: &str) -> &str {
    p.trim_end_matches('/')
}

fn paths_equal(a: &str, b: &str) -> bool {
    let (a, b) = (norm(a), norm(b));
    if a.is_empty() && b.is_empty() {
        return true;
    }
    a == b
}

fn is_descendant(ancestor: &str, path: &str) -> bool {
    let ancestor = norm(ancestor);
    let path = norm(path);
    if ancestor.is_empty() {
        // root covers everything below it.
        return !path.is_empty();
    }
    path.starts_with(ancestor) && path[ancestor.len()..].starts_with('/')
}

/// Token generation per §4.5: `"opaquelocktoken:" + uuid`.
pub fn new_token() -> String {
    format!("opaquelocktoken:{}", uuid::Uuid::new_v4())
}

pub trait LockStore: Send + Sync {
    /// Returns `None` on conflict: a covering lock is exclusive, or a
    /// covering lock is shared and the request is exclusive.
    fn create(
        &self,
        path: &str,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
        depth: LockDepth,
    ) -> Option<Lock>;

    /// Returns `None` if absent or expired (an expired lock is removed as
    /// a side effect of being observed).
    fn get(&self, token: &str) -> Option<Lock>;

    /// All locks covering `path`, including ancestor depth-infinity locks.
    fn locks_for(&self, path: &str) -> Vec<Lock>;

    fn refresh(&self, token: &str, timeout: Option<Duration>) -> Option<Lock>;

    fn remove(&self, token: &str) -> bool;

    fn remove_expired(&self);

    fn is_locked(&self, path: &str) -> bool {
        !self.locks_for(path).is_empty()
    }

    /// True iff no covering lock exists, or `token` matches a covering lock.
    fn can_modify(&self, path: &str, token: Option<&str>) -> bool {
        let covering = self.locks_for(path);
        if covering.is_empty() {
            return true;
        }
        match token {
            Some(t) => covering.iter().any(|l| l.token == t),
            None => false,
        }
    }

    fn close(&self) {}
}

#[derive(Default)]
struct Inner {
    by_token: HashMap<String, Lock>,
}

/// In-process lock store. Locks do not survive restart.
pub struct MemoryLockStore {
    inner: Mutex<Inner>,
}

impl MemoryLockStore {
    pub fn new() -> Arc<MemoryLockStore> {
        Arc::new(MemoryLockStore { inner: Mutex::new(Inner::default()) })
    }

    fn covering_unlocked(inner: &Inner, path: &str, now: SystemTime) -> Vec<Lock> {
        inner
            .by_token
            .values()
            .filter(|l| !l.is_expired(now) && l.covers(path))
            .cloned()
            .collect()
    }
}

impl LockStore for MemoryLockStore {
    fn create(
        &self,
        path: &str,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
        depth: LockDepth,
    ) -> Option<Lock> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let covering = Self::covering_unlocked(&inner, path, now);
        let conflict = covering
            .iter()
            .any(|l| l.scope == LockScope::Exclusive || scope == LockScope::Exclusive);
        if conflict {
            return None;
        }
        let lock = Lock { token: new_token(), path: path.to_string(), scope, owner, created: now, timeout, depth };
        inner.by_token.insert(lock.token.clone(), lock.clone());
        Some(lock)
    }

    fn get(&self, token: &str) -> Option<Lock> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        match inner.by_token.get(token) {
            Some(l) if l.is_expired(now) => {
                inner.by_token.remove(token);
                None
            },
            Some(l) => Some(l.clone()),
            None => None,
        }
    }

    fn locks_for(&self, path: &str) -> Vec<Lock> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> =
            inner.by_token.values().filter(|l| l.is_expired(now)).map(|l| l.token.clone()).collect();
        for t in expired {
            inner.by_token.remove(&t);
        }
        Self::covering_unlocked(&inner, path, now)
    }

    fn refresh(&self, token: &str, timeout: Option<Duration>) -> Option<Lock> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let lock = inner.by_token.get_mut(token)?;
        if lock.is_expired(now) {
            inner.by_token.remove(token);
            return None;
        }
        lock.created = now;
        lock.timeout = timeout;
        inner.by_token.get(token).cloned()
    }

    fn remove(&self, token: &str) -> bool {
        self.inner.lock().by_token.remove(token).is_some()
    }

    fn remove_expired(&self) {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        inner.by_token.retain(|_, l| !l.is_expired(now));
    }
}

/// Spawn the periodic expiry sweep (§4.5: "every 60s"). Returns a handle
/// whose `abort()` stops the sweep; dropped automatically when the engine
/// shuts down.
pub fn spawn_expiry_sweep(store: Arc<dyn LockStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            store.remove_expired();
        }
    })
}
