//! Typed representations of the WebDAV-specific request/response headers:
//! `Depth`, `Overwrite`, `Timeout`, `Destination`, `Lock-Token`. No RFC 4918
//! `If` state-token grammar here — the precondition evaluator extracts lock
//! tokens with a small literal scan instead (see `conditional.rs`).

use std::sync::LazyLock;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

static DEPTH: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("depth"));
static TIMEOUT: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("timeout"));
static OVERWRITE: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("overwrite"));
static DESTINATION: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("destination"));
static LOCK_TOKEN: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("lock-token"));

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        Err(invalid())
    } else {
        Ok(v)
    }
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

/// `Depth` header: default is `Infinity`, invalid values fall back to
/// `Infinity` at the call site rather than erroring (RFC 4918 default).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            b"infinity" | b"Infinity" => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "Infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Parses a raw `Depth` header value, defaulting (and falling back on any
/// unrecognized value) to `Infinity`.
pub fn parse_depth(raw: Option<&HeaderValue>) -> Depth {
    match raw.and_then(|v| v.to_str().ok()) {
        Some("0") => Depth::Zero,
        Some("1") => Depth::One,
        _ => Depth::Infinity,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.as_bytes() {
            b"F" => Ok(Overwrite(false)),
            b"T" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

#[derive(Debug, Clone)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Timeout {
    /// The effective timeout: the first entry, or `None` for `Infinite`
    /// (LOCK's `timeout` parameter is `Option<Duration>` throughout; an
    /// absent `Timeout` header is handled by the caller, not here).
    pub fn first_duration(&self) -> Option<std::time::Duration> {
        match self.0.first() {
            Some(DavTimeout::Seconds(n)) => Some(std::time::Duration::from_secs(*n as u64)),
            _ => None,
        }
    }
}

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        let mut v = Vec::new();
        for word in value.to_str().map_err(map_invalid)?.split(',') {
            let word = word.trim();
            let parsed = if word == "Infinite" {
                DavTimeout::Infinite
            } else if let Some(num) = word.strip_prefix("Second-") {
                DavTimeout::Seconds(num.parse().map_err(map_invalid)?)
            } else {
                return Err(invalid());
            };
            v.push(parsed);
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{}", n),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        values.extend(std::iter::once(HeaderValue::from_str(&value).unwrap()));
    }
}

/// `Destination` header: a bare path or absolute URI. Kept as a
/// thin typed wrapper; the traversal/prefix/authority validation itself
/// lives in `DavPath::parse_destination`, which takes the raw string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        one(values)?.to_str().map(|s| Destination(s.to_string())).map_err(map_invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(std::iter::once(HeaderValue::from_str(&self.0).unwrap()));
    }
}

/// `Lock-Token` header: `<opaquelocktoken:...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl LockToken {
    pub fn token(&self) -> &str {
        self.0.trim_start_matches('<').trim_end_matches('>')
    }
}

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        one(values)?.to_str().map(|s| LockToken(s.to_string())).map_err(map_invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(std::iter::once(HeaderValue::from_str(&self.0).unwrap()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<H: Header>(raw: &'static str) -> Result<H, headers::Error> {
        let v = HeaderValue::from_static(raw);
        let mut iter = std::iter::once(&v);
        H::decode(&mut iter)
    }

    #[test]
    fn depth_values() {
        assert_eq!(decode::<Depth>("0").unwrap(), Depth::Zero);
        assert_eq!(decode::<Depth>("1").unwrap(), Depth::One);
        assert_eq!(decode::<Depth>("infinity").unwrap(), Depth::Infinity);
        assert!(decode::<Depth>("bogus").is_err());
    }

    #[test]
    fn parse_depth_falls_back_to_infinity() {
        assert_eq!(parse_depth(None), Depth::Infinity);
        assert_eq!(parse_depth(Some(&HeaderValue::from_static("bogus"))), Depth::Infinity);
        assert_eq!(parse_depth(Some(&HeaderValue::from_static("0"))), Depth::Zero);
    }

    #[test]
    fn overwrite_values() {
        assert_eq!(decode::<Overwrite>("T").unwrap(), Overwrite(true));
        assert_eq!(decode::<Overwrite>("F").unwrap(), Overwrite(false));
        assert!(decode::<Overwrite>("x").is_err());
    }

    #[test]
    fn timeout_parses_seconds_and_infinite() {
        let t = decode::<Timeout>("Second-300").unwrap();
        assert_eq!(t.first_duration(), Some(std::time::Duration::from_secs(300)));
        let t = decode::<Timeout>("Infinite, Second-300").unwrap();
        assert_eq!(t.first_duration(), None);
    }

    #[test]
    fn lock_token_strips_brackets() {
        let t = decode::<LockToken>("<opaquelocktoken:abc>").unwrap();
        assert_eq!(t.token(), "opaquelocktoken:abc");
    }
}
