//! Precondition evaluator. Applied, in order, to every mutating method
//! before the method handler runs:
//!
//! 1. read-only mode
//! 2. upload size limit
//! 3. lock gate
//! 4. parent existence (PUT / MKCOL / COPY-dest / MOVE-dest)
//! 5. ETag preconditions (RFC 7232 `If-Match`/`If-None-Match`)
//!
//! Lock tokens are pulled out of the `If`/`Lock-Token` header with a small
//! literal scan rather than a full RFC 4918 `If` state-token grammar parser.

use http::HeaderMap;

use crate::error::{DavError, DavResult};
use crate::etag;
use crate::locks::LockStore;

/// Extracts a lock token naming the request, trying the `If` header first
/// with the literal pattern `(<token>)`, then falling back to `Lock-Token`
/// stripped of its angle brackets (§4.7 step 3).
pub fn extract_lock_token(headers: &HeaderMap) -> Option<String> {
    if let Some(if_header) = headers.get("if").and_then(|v| v.to_str().ok()) {
        if let Some(token) = extract_paren_angle_token(if_header) {
            return Some(token);
        }
    }
    headers
        .get("lock-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_start_matches('<').trim_end_matches('>').to_string())
}

/// Finds the first substring matching `(<...>)` and returns its inner text.
fn extract_paren_angle_token(s: &str) -> Option<String> {
    let open_paren = s.find('(')?;
    let rest = &s[open_paren + 1..];
    let open_angle = rest.find('<')?;
    let rest = &rest[open_angle + 1..];
    let close_angle = rest.find('>')?;
    Some(rest[..close_angle].to_string())
}

pub struct PreconditionInput<'a> {
    pub read_only: bool,
    pub content_length: Option<u64>,
    pub max_upload_size: Option<u64>,
    pub lock_store: Option<&'a dyn LockStore>,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    /// Required for PUT/MKCOL/COPY-dest/MOVE-dest: the parent must exist.
    pub parent_exists: Option<bool>,
    pub current_etag: Option<&'a str>,
    /// True when the resource already exists (drives If-None-Match: *).
    pub resource_exists: bool,
}

/// Runs all five checks in spec order, short-circuiting on the first
/// failure.
pub fn check(input: &PreconditionInput<'_>) -> DavResult<()> {
    if input.read_only {
        return Err(DavError::ReadOnly);
    }

    if let (Some(len), Some(max)) = (input.content_length, input.max_upload_size) {
        if len > max {
            return Err(DavError::UploadTooLarge);
        }
    }

    if let Some(store) = input.lock_store {
        if store.is_locked(input.path) {
            let token = extract_lock_token(input.headers);
            if !store.can_modify(input.path, token.as_deref()) {
                return Err(DavError::Locked);
            }
        }
    }

    if let Some(false) = input.parent_exists {
        return Err(DavError::MissingParent);
    }

    check_etags(input)?;

    Ok(())
}

fn check_etags(input: &PreconditionInput<'_>) -> DavResult<()> {
    if let Some(if_match) = input.headers.get("if-match").and_then(|v| v.to_str().ok()) {
        let ok = input.current_etag.map_or(false, |tag| etag::matches(tag, if_match));
        if !ok {
            return Err(DavError::EtagMismatch);
        }
    }

    if let Some(if_none_match) = input.headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
        if if_none_match.trim() == "*" {
            if input.resource_exists {
                return Err(DavError::EtagMismatch);
            }
        } else if let Some(tag) = input.current_etag {
            if etag::matches(tag, if_none_match) {
                return Err(DavError::EtagMismatch);
            }
        }
    }

    Ok(())
}

/// Safe-method (GET/HEAD) freshness check: `If-None-Match` hit on a
/// matching resource is a 304, not a precondition failure (§4.2).
pub fn check_not_modified(current_etag: Option<&str>, headers: &HeaderMap) -> bool {
    match headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
        Some(header) => {
            let tag = match current_etag {
                Some(t) => t,
                None => return false,
            };
            header.trim() == "*" || etag::matches(tag, header)
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_from_if_header() {
        let s = r#"(<opaquelocktoken:abc-123>)"#;
        assert_eq!(extract_paren_angle_token(s).unwrap(), "opaquelocktoken:abc-123");
    }

    #[test]
    fn falls_back_to_lock_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert("lock-token", "<opaquelocktoken:xyz>".parse().unwrap());
        assert_eq!(extract_lock_token(&headers).as_deref(), Some("opaquelocktoken:xyz"));
    }

    #[test]
    fn if_header_takes_priority_over_lock_token() {
        let mut headers = HeaderMap::new();
        headers.insert("if", "(<opaquelocktoken:from-if>)".parse().unwrap());
        headers.insert("lock-token", "<opaquelocktoken:from-header>".parse().unwrap());
        assert_eq!(extract_lock_token(&headers).as_deref(), Some("opaquelocktoken:from-if"));
    }

    #[test]
    fn if_none_match_star_on_existing_resource_fails() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", "*".parse().unwrap());
        let input = PreconditionInput {
            read_only: false,
            content_length: None,
            max_upload_size: None,
            lock_store: None,
            path: "/a.txt",
            headers: &headers,
            parent_exists: Some(true),
            current_etag: Some("\"x\""),
            resource_exists: true,
        };
        assert!(matches!(check(&input), Err(DavError::EtagMismatch)));
    }

    #[test]
    fn if_none_match_star_on_absent_resource_passes() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", "*".parse().unwrap());
        let input = PreconditionInput {
            read_only: false,
            content_length: None,
            max_upload_size: None,
            lock_store: None,
            path: "/a.txt",
            headers: &headers,
            parent_exists: Some(true),
            current_etag: None,
            resource_exists: false,
        };
        assert!(check(&input).is_ok());
    }

    #[test]
    fn upload_too_large_is_rejected() {
        let headers = HeaderMap::new();
        let input = PreconditionInput {
            read_only: false,
            content_length: Some(100),
            max_upload_size: Some(10),
            lock_store: None,
            path: "/a.txt",
            headers: &headers,
            parent_exists: Some(true),
            current_etag: None,
            resource_exists: false,
        };
        assert!(matches!(check(&input), Err(DavError::UploadTooLarge)));
    }

    #[test]
    fn missing_parent_is_conflict() {
        let headers = HeaderMap::new();
        let input = PreconditionInput {
            read_only: false,
            content_length: None,
            max_upload_size: None,
            lock_store: None,
            path: "/a/b.txt",
            headers: &headers,
            parent_exists: Some(false),
            current_etag: None,
            resource_exists: false,
        };
        assert!(matches!(check(&input), Err(DavError::MissingParent)));
    }

    #[test]
    fn not_modified_on_matching_if_none_match() {
        let mut headers = HeaderMap::new();
        let tag = "\"abc\"";
        headers.insert("if-none-match", tag.parse().unwrap());
        assert!(check_not_modified(Some(tag), &headers));
    }
}
