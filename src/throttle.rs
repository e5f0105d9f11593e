//! Throttle gate (§4.11): a global concurrency semaphore plus a
//! sliding-window per-client rate limiter. State is protected by one
//! `parking_lot::Mutex` (§5: "fine-grained locking is not required at
//! expected load"), matching the lock store's single-mutex discipline in
//! `locks.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Derived from `X-Forwarded-For` (first entry), then `X-Real-IP`, then
/// the transport-provided remote address (§4.11).
pub fn client_key(headers: &http::HeaderMap, remote_addr: &str) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.trim().is_empty() {
            return real_ip.trim().to_string();
        }
    }
    remote_addr.to_string()
}

struct Window {
    /// Unix-second timestamps of requests inside the current window.
    hits: Vec<u64>,
}

/// Why a request was rejected, carrying everything needed to build the
/// response headers (§4.11).
pub enum Rejection {
    Concurrency { limit: usize },
    RateLimit { limit: u32, window_s: u64, reset_at: u64 },
}

/// A granted slot's accounting, attached to the response on success.
pub struct Grant {
    pub limit: u32,
    pub remaining: u32,
}

struct Inner {
    windows: HashMap<String, Window>,
}

/// The throttle gate itself. One instance is shared across the server via
/// `Arc`; `acquire` is called once per request ahead of the dispatcher.
pub struct Throttle {
    semaphore: Semaphore,
    max_concurrent: usize,
    max_rps: u32,
    window_s: u64,
    state: Mutex<Inner>,
}

/// A held concurrency permit plus rate-limit accounting, returned by a
/// successful [`Throttle::acquire`]. Dropping it releases the semaphore
/// slot (§5: "cancellation of the request task releases... semaphore
/// slots").
pub struct Ticket<'a> {
    _permit: SemaphorePermit<'a>,
    pub grant: Grant,
}

impl Throttle {
    pub fn new(max_concurrent: usize, max_rps: u32, window_s: u64) -> Throttle {
        Throttle {
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            max_rps,
            window_s,
            state: Mutex::new(Inner { windows: HashMap::new() }),
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }

    /// Attempts to admit one request for `key`. On `Err`, the concurrency
    /// slot (if any was acquired) has already been released (§4.11: "On
    /// rejection, the concurrency slot is released").
    pub fn acquire(&self, key: &str) -> Result<Ticket<'_>, Rejection> {
        let permit =
            self.semaphore.try_acquire().map_err(|_| Rejection::Concurrency { limit: self.max_concurrent })?;

        let now = Self::now_secs();
        let mut state = self.state.lock();
        let window = state.windows.entry(key.to_string()).or_insert_with(|| Window { hits: Vec::new() });
        window.hits.retain(|&t| now.saturating_sub(t) < self.window_s);

        if window.hits.len() as u32 >= self.max_rps {
            let reset_at = window.hits.first().copied().unwrap_or(now) + self.window_s;
            drop(permit);
            return Err(Rejection::RateLimit { limit: self.max_rps, window_s: self.window_s, reset_at });
        }

        window.hits.push(now);
        let remaining = self.max_rps.saturating_sub(window.hits.len() as u32);
        Ok(Ticket { _permit: permit, grant: Grant { limit: self.max_rps, remaining } })
    }

    /// Drops rate-limit entries with no requests inside `2 * window_s`
    /// (§4.11), run every 60s by [`spawn_eviction_sweep`].
    pub fn evict_stale(&self) {
        let now = Self::now_secs();
        let stale_after = self.window_s * 2;
        let mut state = self.state.lock();
        state.windows.retain(|_, w| w.hits.iter().any(|&t| now.saturating_sub(t) < stale_after));
    }
}

pub fn spawn_eviction_sweep(throttle: Arc<Throttle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            throttle.evict_stale();
        }
    })
}
