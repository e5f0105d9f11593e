//! Path & URI utilities (§4.1).
//!
//! Five steps run, in order, on every request: raw traversal check,
//! prefix check, canonicalization, filesystem mapping, containment check.
//! Traversal detection is its own explicit, separately testable first pass
//! rather than folded into normalization, since both the percent-encoded
//! and decoded forms of a path need checking before any normalization
//! happens.

use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

use crate::error::{DavError, DavResult};

const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// A request path, decoded and prefix-stripped, plus the original prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavPath {
    /// Decoded internal path, always starting with `/`. Ends in `/` iff the
    /// request URI named a collection.
    internal: String,
    prefix: String,
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.prefix, self.internal)
    }
}

/// Raw traversal check (§4.1 step 1): run on the percent-encoded raw path
/// and again, by the caller, on the decoded form.
fn has_traversal_signal(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    const SIGNALS: &[&str] = &[
        "../",
        "..\\",
        "%2e%2e%2f",
        "%2e%2e/",
        "..%2f",
        "%2e%2e%5c",
        "%252e%252e%252f",
    ];
    if SIGNALS.iter().any(|s| lower.contains(s)) {
        return true;
    }
    raw.split('/').any(|seg| seg == ".." || seg.eq_ignore_ascii_case("%2e%2e"))
}

fn percent_decode_segment(seg: &str) -> DavResult<String> {
    percent_encoding::percent_decode_str(seg)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|_| DavError::PathForbidden)
}

/// Canonicalize a decoded path: resolve `.`/`..`, collapse duplicate `/`.
/// Input must already have passed the raw traversal check.
fn canonicalize(decoded: &str) -> DavResult<(String, bool)> {
    let is_collection = decoded.ends_with('/') || decoded.is_empty();
    let mut stack: Vec<&str> = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {},
            ".." => {
                // Already rejected by has_traversal_signal, but a defensive
                // second line of defense costs nothing here.
                if stack.pop().is_none() {
                    return Err(DavError::PathForbidden);
                }
            },
            s => stack.push(s),
        }
    }
    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    if is_collection && out != "/" {
        out.push('/');
    }
    Ok((out, is_collection))
}

impl DavPath {
    /// Build a `DavPath` from a raw request-URI path (percent-encoded,
    /// as it appears on the wire) and the configured mount prefix.
    ///
    /// Runs all of §4.1 steps 1-3 (raw traversal check, prefix check,
    /// canonicalize). Steps 4-5 (filesystem mapping + containment) are the
    /// caller's job via [`DavPath::to_fs_path`], since they need the
    /// configured root directory.
    pub fn parse(raw_uri_path: &str, prefix: &str) -> DavResult<DavPath> {
        if has_traversal_signal(raw_uri_path) {
            return Err(DavError::PathForbidden);
        }

        let prefix = prefix.trim_end_matches('/');
        if !prefix.is_empty() && !raw_uri_path.starts_with(prefix) {
            return Err(DavError::PathForbidden);
        }
        let rest = if prefix.is_empty() {
            raw_uri_path
        } else {
            &raw_uri_path[prefix.len()..]
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(DavError::PathForbidden);
        }

        let mut decoded = String::new();
        for (i, seg) in rest.split('/').enumerate() {
            if i > 0 {
                decoded.push('/');
            }
            decoded.push_str(&percent_decode_segment(seg)?);
        }
        if has_traversal_signal(&decoded) {
            return Err(DavError::PathForbidden);
        }

        let (internal, _) = canonicalize(&decoded)?;
        Ok(DavPath { internal, prefix: prefix.to_string() })
    }

    /// Map to a filesystem path under `root`, then verify containment
    /// (§4.1 steps 4-5).
    pub fn to_fs_path(&self, root: &Path) -> DavResult<PathBuf> {
        let rel = self.internal.trim_start_matches('/').trim_end_matches('/');
        let mapped = if rel.is_empty() { root.to_path_buf() } else { root.join(rel) };

        let root_abs = normalize_absolute(root);
        let mapped_abs = normalize_absolute(&mapped);
        if !mapped_abs.starts_with(&root_abs) {
            return Err(DavError::PathForbidden);
        }
        Ok(mapped)
    }

    pub fn is_collection(&self) -> bool {
        self.internal.ends_with('/')
    }

    pub fn add_slash(&mut self) {
        if !self.is_collection() {
            self.internal.push('/');
        }
    }

    pub fn internal_path(&self) -> &str {
        &self.internal
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parent collection of this path.
    pub fn parent(&self) -> DavPath {
        let trimmed = self.internal.trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(0) => "/".to_string(),
            Some(i) => format!("{}/", &trimmed[..i]),
            None => "/".to_string(),
        };
        DavPath { internal: parent, prefix: self.prefix.clone() }
    }

    /// Join a child segment onto a collection path.
    pub fn join(&self, name: &str) -> DavPath {
        let mut internal = self.internal.clone();
        if !internal.ends_with('/') {
            internal.push('/');
        }
        internal.push_str(name);
        DavPath { internal, prefix: self.prefix.clone() }
    }

    pub fn file_name(&self) -> &str {
        self.internal.trim_end_matches('/').rsplit('/').next().unwrap_or("")
    }

    pub fn mime_type_str(&self) -> &'static str {
        let name = self.file_name();
        match name.rsplit_once('.') {
            Some((_, ext)) => mime_guess::from_ext(ext).first_raw().unwrap_or("application/octet-stream"),
            None => "application/octet-stream",
        }
    }

    /// As a percent-encoded URL path, with the mount prefix re-attached.
    pub fn as_url_string_with_prefix(&self) -> String {
        let encoded = encode_path(&self.internal);
        format!("{}{}", self.prefix, encoded)
    }

    /// Parse and validate a `Destination` header (§4.1): must be an
    /// absolute URI whose scheme/host/port match the request's (or a bare
    /// absolute path), must pass the same traversal checks, and must start
    /// with the mount prefix.
    pub fn parse_destination(
        dest_header: &str,
        request_uri: &http::Uri,
        prefix: &str,
    ) -> DavResult<DavPath> {
        if dest_header.is_empty() {
            return Err(DavError::MissingDestination);
        }
        let dest_path = if dest_header.starts_with('/') {
            dest_header.to_string()
        } else {
            let uri: http::Uri = dest_header.parse().map_err(|_| DavError::InvalidDestination)?;
            let same_scheme = uri.scheme_str() == request_uri.scheme_str();
            let same_authority = uri.authority().map(|a| a.as_str()) == request_uri.authority().map(|a| a.as_str());
            if !(same_scheme && same_authority) {
                return Err(DavError::InvalidDestination);
            }
            uri.path().to_string()
        };
        DavPath::parse(&dest_path, prefix).map_err(|_| DavError::InvalidDestination)
    }
}

fn normalize_absolute(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        use std::path::Component::*;
        match comp {
            ParentDir => {
                out.pop();
            },
            CurDir => {},
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn encode_path(p: &str) -> String {
    percent_encoding::percent_encode(p.as_bytes(), PATH_ENCODE_SET).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_literal_traversal() {
        assert!(DavPath::parse("/dav/../etc/passwd", "/dav").is_err());
    }

    #[test]
    fn rejects_encoded_traversal() {
        assert!(DavPath::parse("/dav/%2e%2e/secret", "/dav").is_err());
        assert!(DavPath::parse("/dav/..%2fsecret", "/dav").is_err());
        assert!(DavPath::parse("/dav/%252e%252e%252fsecret", "/dav").is_err());
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(DavPath::parse("/other/a.txt", "/dav").is_err());
    }

    #[test]
    fn strips_prefix_and_canonicalizes() {
        let p = DavPath::parse("/dav/a//b/./c.txt", "/dav").unwrap();
        assert_eq!(p.internal_path(), "/a/b/c.txt");
    }

    #[test]
    fn collection_paths_keep_trailing_slash() {
        let p = DavPath::parse("/dav/dir/", "/dav").unwrap();
        assert!(p.is_collection());
        assert_eq!(p.internal_path(), "/dir/");
    }

    #[test]
    fn root_maps_to_root() {
        let root = std::path::Path::new("/srv/dav");
        let p = DavPath::parse("/dav/", "/dav").unwrap();
        assert_eq!(p.to_fs_path(root).unwrap(), root);
    }

    #[test]
    fn containment_rejects_escape_via_root_parent() {
        // Even though traversal signals are rejected earlier, containment
        // is checked independently as defense in depth.
        let root = std::path::Path::new("/srv/dav");
        let p = DavPath { internal: "/../../etc/passwd".into(), prefix: "".into() };
        assert!(p.to_fs_path(root).is_err());
    }
}
