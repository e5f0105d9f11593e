//! `KvBackend`: the seam a persistent lock store is built on (§6 "Persisted
//! state"). A real sled/redis/etc-backed implementation is out of scope
//! (external collaborator); [`InMemoryKv`] is a reference implementation
//! used by tests and by [`PersistentLockStore`]'s own doctests.
//!
//! Kept synchronous (blocking), matching sled's own API shape, so it can sit
//! underneath the lock store's synchronous, mutex-guarded design (§5)
//! without forcing the whole `LockStore` trait into `async`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::locks::{Lock, LockDepth, LockScope, LockStore};

pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&self, key: &str, value: Vec<u8>);
    fn delete(&self, key: &str);
}

/// Reference `KvBackend`: a mutex-guarded `HashMap`. Nothing persists across
/// process restarts, so using it as the backend of [`PersistentLockStore`]
/// is behaviorally equivalent to [`crate::locks::MemoryLockStore`] — its
/// purpose is exercising `PersistentLockStore`'s key-schema logic in tests.
#[derive(Default)]
pub struct InMemoryKv {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryKv {
    pub fn new() -> InMemoryKv {
        InMemoryKv::default()
    }
}

impl KvBackend for InMemoryKv {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.map.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: Vec<u8>) {
        self.map.lock().insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.map.lock().remove(key);
    }
}

/// JSON schema for a stored lock record (§6): `{token, path, scope, type,
/// owner?, created, expires?, depth}`. ISO-8601 timestamps map to
/// `SystemTime` via `UNIX_EPOCH + Duration` rather than pulling in a date
/// crate the rest of the engine has no other use for.
#[derive(Serialize, Deserialize)]
struct LockRecord {
    token: String,
    path: String,
    scope: String,
    #[serde(rename = "type")]
    kind: String,
    owner: Option<String>,
    created_unix_ms: u64,
    expires_unix_ms: Option<u64>,
    depth: u8,
}

fn to_unix_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn from_unix_ms(ms: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
}

impl From<&Lock> for LockRecord {
    fn from(l: &Lock) -> LockRecord {
        LockRecord {
            token: l.token.clone(),
            path: l.path.clone(),
            scope: match l.scope {
                LockScope::Exclusive => "exclusive".into(),
                LockScope::Shared => "shared".into(),
            },
            kind: "write".into(),
            owner: l.owner.clone(),
            created_unix_ms: to_unix_ms(l.created),
            expires_unix_ms: l.expires_at().map(to_unix_ms),
            depth: match l.depth {
                LockDepth::Zero => 0,
                LockDepth::Infinity => u8::MAX,
            },
        }
    }
}

impl TryFrom<LockRecord> for Lock {
    type Error = ();

    fn try_from(r: LockRecord) -> Result<Lock, ()> {
        let created = from_unix_ms(r.created_unix_ms);
        let timeout = match r.expires_unix_ms {
            Some(ms) => Some(from_unix_ms(ms).duration_since(created).map_err(|_| ())?),
            None => None,
        };
        Ok(Lock {
            token: r.token,
            path: r.path,
            scope: if r.scope == "shared" { LockScope::Shared } else { LockScope::Exclusive },
            owner: r.owner,
            created,
            timeout,
            depth: if r.depth == 0 { LockDepth::Zero } else { LockDepth::Infinity },
        })
    }
}

fn token_key(token: &str) -> String {
    format!("lock:token:{}", token)
}

fn path_key(path: &str) -> String {
    format!("lock:path:{}", path)
}

fn read_path_tokens(kv: &dyn KvBackend, path: &str) -> Vec<String> {
    kv.get(&path_key(path)).and_then(|b| serde_json::from_slice(&b).ok()).unwrap_or_default()
}

fn write_path_tokens(kv: &dyn KvBackend, path: &str, tokens: &[String]) {
    if tokens.is_empty() {
        kv.delete(&path_key(path));
    } else {
        if let Ok(bytes) = serde_json::to_vec(tokens) {
            kv.put(&path_key(path), bytes);
        }
    }
}

/// Lock store backed by a [`KvBackend`], keyed per §6's two key families.
/// All multi-key updates (token record + the path's token list) run inside
/// one `parking_lot::Mutex`, so a reader never observes a token recorded in
/// one family but not the other.
pub struct PersistentLockStore<K: KvBackend> {
    kv: K,
    write_lock: Mutex<()>,
}

impl<K: KvBackend> PersistentLockStore<K> {
    pub fn new(kv: K) -> Arc<PersistentLockStore<K>> {
        Arc::new(PersistentLockStore { kv, write_lock: Mutex::new(()) })
    }

    fn read_lock(&self, token: &str) -> Option<Lock> {
        self.kv.get(&token_key(token)).and_then(|b| serde_json::from_slice::<LockRecord>(&b).ok()).and_then(|r| r.try_into().ok())
    }

    fn store_lock(&self, lock: &Lock) {
        let record = LockRecord::from(lock);
        if let Ok(bytes) = serde_json::to_vec(&record) {
            self.kv.put(&token_key(&lock.token), bytes);
        }
        let mut tokens = read_path_tokens(&self.kv, &lock.path);
        if !tokens.contains(&lock.token) {
            tokens.push(lock.token.clone());
        }
        write_path_tokens(&self.kv, &lock.path, &tokens);
    }

    fn drop_lock(&self, lock: &Lock) {
        self.kv.delete(&token_key(&lock.token));
        let mut tokens = read_path_tokens(&self.kv, &lock.path);
        tokens.retain(|t| t != &lock.token);
        write_path_tokens(&self.kv, &lock.path, &tokens);
    }

    fn all_locks_for_path(&self, path: &str, now: SystemTime) -> Vec<Lock> {
        let tokens = read_path_tokens(&self.kv, path);
        let mut live = Vec::new();
        let mut stale = Vec::new();
        for token in tokens {
            match self.read_lock(&token) {
                Some(l) if l.is_expired(now) => stale.push(l),
                Some(l) => live.push(l),
                None => {},
            }
        }
        for l in stale {
            self.drop_lock(&l);
        }
        live
    }
}

impl<K: KvBackend> LockStore for PersistentLockStore<K> {
    fn create(
        &self,
        path: &str,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
        depth: LockDepth,
    ) -> Option<Lock> {
        let now = SystemTime::now();
        let _guard = self.write_lock.lock();
        let covering = self.all_locks_for_path(path, now);
        let conflict = covering.iter().any(|l| l.scope == LockScope::Exclusive || scope == LockScope::Exclusive);
        if conflict {
            return None;
        }
        let lock = Lock { token: crate::locks::new_token(), path: path.to_string(), scope, owner, created: now, timeout, depth };
        self.store_lock(&lock);
        Some(lock)
    }

    fn get(&self, token: &str) -> Option<Lock> {
        let _guard = self.write_lock.lock();
        let now = SystemTime::now();
        match self.read_lock(token) {
            Some(l) if l.is_expired(now) => {
                self.drop_lock(&l);
                None
            },
            other => other,
        }
    }

    fn locks_for(&self, path: &str) -> Vec<Lock> {
        let _guard = self.write_lock.lock();
        // Path-family locks are an index keyed by exact path, but `covers`
        // also has to catch depth-infinity ancestors, whose key is a
        // different path entirely: walk up the path chain to the root.
        let now = SystemTime::now();
        let mut out = self.all_locks_for_path(path, now);
        let mut ancestor = path.trim_end_matches('/');
        while let Some(idx) = ancestor.rfind('/') {
            ancestor = &ancestor[..idx];
            let key = if ancestor.is_empty() { "/" } else { ancestor };
            for l in self.all_locks_for_path(key, now) {
                if l.covers(path) && !out.iter().any(|o| o.token == l.token) {
                    out.push(l);
                }
            }
            if ancestor.is_empty() {
                break;
            }
        }
        out
    }

    fn refresh(&self, token: &str, timeout: Option<Duration>) -> Option<Lock> {
        let _guard = self.write_lock.lock();
        let now = SystemTime::now();
        let mut lock = self.read_lock(token)?;
        if lock.is_expired(now) {
            self.drop_lock(&lock);
            return None;
        }
        lock.created = now;
        lock.timeout = timeout;
        self.store_lock(&lock);
        Some(lock)
    }

    fn remove(&self, token: &str) -> bool {
        let _guard = self.write_lock.lock();
        match self.read_lock(token) {
            Some(l) => {
                self.drop_lock(&l);
                true
            },
            None => false,
        }
    }

    fn remove_expired(&self) {
        // Swept lazily as paths/tokens are observed; a from-scratch full
        // scan would need a key-iteration capability `KvBackend` doesn't
        // expose (the reference `sled`-style backends this targets support
        // prefix scans, but the minimal trait here doesn't require one).
    }
}
