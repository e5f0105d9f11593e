//! ETag computer (§4.2).

use md5::{Digest, Md5};

/// `"<size>-<mtime_ms>-<hash8>"` where `hash8` is the first 8 hex chars of
/// MD5 over `"<size>-<mtime_ms>-<canonical_path>"`.
pub fn compute(size: u64, mtime_ms: u128, canonical_path: &str) -> String {
    let hashed = format!("{}-{}-{}", size, mtime_ms, canonical_path);
    let mut hasher = Md5::new();
    hasher.update(hashed.as_bytes());
    let digest = hasher.finalize();
    let hash8 = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect::<String>();
    format!("\"{}-{}-{}\"", size, mtime_ms, hash8)
}

/// Strip a leading `W/` weak-validator marker, if present, keeping quotes.
pub fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// `header == "*"` matches any; otherwise comma-split, trim, require
/// structural quotes, exact string equality on the quoted form.
pub fn matches(etag: &str, header: &str) -> bool {
    let header = header.trim();
    if header == "*" {
        return true;
    }
    header.split(',').map(str::trim).map(strip_weak).any(|candidate| {
        candidate.len() >= 2
            && candidate.starts_with('"')
            && candidate.ends_with('"')
            && candidate == etag
    })
}
