//! Auth gate (§4.10): authentication (who), then authorization (may they
//! do this). Runs ahead of the throttle gate and the dispatcher proper.
//!
//! Grounded on the same seam shape as `fs.rs`'s `DavFileSystem`/`locks.rs`'s
//! `LockStore`: a small trait the embedder implements, plus a couple of
//! reference implementations covering the common cases.

use std::collections::HashMap;
use std::pin::Pin;

use http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::util::DavMethod;

pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The outcome of authenticating a request: either an identified user, or
/// a rejection carrying the `WWW-Authenticate` challenge to return.
pub enum AuthOutcome {
    User(Option<String>),
    Reject { challenge: String },
}

pub trait Authenticator: Send + Sync {
    fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> AuthFuture<'a, AuthOutcome>;
}

/// What an authorization check is being asked to permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Lock,
}

/// `{GET, HEAD, PROPFIND, OPTIONS} → Read`; `{LOCK, UNLOCK} → Lock`; every
/// other mutating method → `Write` (§4.10). An unrecognized method maps to
/// `Read`, the least-privileged action, rather than failing closed on
/// something the dispatcher hasn't even matched to a handler yet.
pub fn action_for(method: DavMethod) -> Action {
    match method {
        DavMethod::Get | DavMethod::Head | DavMethod::PropFind | DavMethod::Options => Action::Read,
        DavMethod::Lock | DavMethod::Unlock => Action::Lock,
        DavMethod::Put
        | DavMethod::PropPatch
        | DavMethod::MkCol
        | DavMethod::Copy
        | DavMethod::Move
        | DavMethod::Delete => Action::Write,
    }
}

pub trait Authorizer: Send + Sync {
    fn authorize<'a>(&'a self, user: Option<&'a str>, action: Action, path: &'a str) -> AuthFuture<'a, bool>;
}

/// No authenticator configured and anonymous access is allowed: everyone
/// is `user = None`.
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn authenticate<'a>(&'a self, _headers: &'a HeaderMap) -> AuthFuture<'a, AuthOutcome> {
        Box::pin(async { AuthOutcome::User(None) })
    }
}

/// No authenticator configured and anonymous access is disallowed: every
/// request is rejected with the default Basic challenge.
pub struct DenyAllAuthenticator {
    pub realm: String,
}

impl Authenticator for DenyAllAuthenticator {
    fn authenticate<'a>(&'a self, _headers: &'a HeaderMap) -> AuthFuture<'a, AuthOutcome> {
        let challenge = format!("Basic realm=\"{}\"", self.realm);
        Box::pin(async move { AuthOutcome::Reject { challenge } })
    }
}

/// Grants every action to every user, including anonymous. The default
/// authorizer when the embedder supplies an authenticator but no
/// authorizer, i.e. "identify callers, but don't restrict them".
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn authorize<'a>(&'a self, _user: Option<&'a str>, _action: Action, _path: &'a str) -> AuthFuture<'a, bool> {
        Box::pin(async { true })
    }
}

fn sha256_hex(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Constant-time comparison of two equal-length hex digests: compares
/// every byte regardless of where a mismatch first occurs, so early exit
/// doesn't leak timing information about how many leading bytes matched.
fn ct_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// HTTP Basic auth (§4.10) against an in-process table of SHA-256
/// password hashes. `realm` names the `WWW-Authenticate` challenge.
pub struct BasicAuthenticator {
    realm: String,
    /// username -> sha256(password) hex digest
    credentials: HashMap<String, String>,
}

impl BasicAuthenticator {
    pub fn new(realm: impl Into<String>) -> BasicAuthenticator {
        BasicAuthenticator { realm: realm.into(), credentials: HashMap::new() }
    }

    /// Registers a user with a plaintext password, storing only its
    /// SHA-256 hash (§4.10: "stored credentials are SHA-256 hashes of
    /// plaintext").
    pub fn add_user(mut self, username: impl Into<String>, password: &str) -> BasicAuthenticator {
        self.credentials.insert(username.into(), sha256_hex(password));
        self
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }

    fn check(&self, header: &str) -> Option<String> {
        let encoded = header.strip_prefix("Basic ")?;
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        let expected = self.credentials.get(user)?;
        if ct_eq(&sha256_hex(pass), expected) {
            Some(user.to_string())
        } else {
            None
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> AuthFuture<'a, AuthOutcome> {
        Box::pin(async move {
            match headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
                Some(header) => match self.check(header) {
                    Some(user) => AuthOutcome::User(Some(user)),
                    None => AuthOutcome::Reject { challenge: self.challenge() },
                },
                None => AuthOutcome::Reject { challenge: self.challenge() },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn basic_header(user: &str, pass: &str) -> String {
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}")))
    }

    #[tokio::test]
    async fn correct_credentials_authenticate() {
        let auth = BasicAuthenticator::new("dav").add_user("jane", "secret");
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, basic_header("jane", "secret").parse().unwrap());
        match auth.authenticate(&headers).await {
            AuthOutcome::User(Some(u)) => assert_eq!(u, "jane"),
            _ => panic!("expected authenticated user"),
        }
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = BasicAuthenticator::new("dav").add_user("jane", "secret");
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, basic_header("jane", "wrong").parse().unwrap());
        match auth.authenticate(&headers).await {
            AuthOutcome::Reject { challenge } => assert!(challenge.contains("dav")),
            _ => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let auth = BasicAuthenticator::new("dav");
        let headers = HeaderMap::new();
        assert!(matches!(auth.authenticate(&headers).await, AuthOutcome::Reject { .. }));
    }

    #[test]
    fn action_mapping_matches_spec_table() {
        assert_eq!(action_for(DavMethod::Get), Action::Read);
        assert_eq!(action_for(DavMethod::PropFind), Action::Read);
        assert_eq!(action_for(DavMethod::Options), Action::Read);
        assert_eq!(action_for(DavMethod::Lock), Action::Lock);
        assert_eq!(action_for(DavMethod::Unlock), Action::Lock);
        assert_eq!(action_for(DavMethod::Put), Action::Write);
        assert_eq!(action_for(DavMethod::Delete), Action::Write);
    }

    #[test]
    fn ct_eq_rejects_different_lengths_and_content() {
        assert!(ct_eq("abcd", "abcd"));
        assert!(!ct_eq("abcd", "abce"));
        assert!(!ct_eq("abc", "abcd"));
    }

    #[tokio::test]
    async fn anonymous_authenticator_always_succeeds() {
        let headers = HeaderMap::new();
        assert!(matches!(AnonymousAuthenticator.authenticate(&headers).await, AuthOutcome::User(None)));
    }

    #[tokio::test]
    async fn deny_all_always_rejects() {
        let auth = DenyAllAuthenticator { realm: "dav".to_string() };
        let headers = HeaderMap::new();
        assert!(matches!(auth.authenticate(&headers).await, AuthOutcome::Reject { .. }));
    }
}
