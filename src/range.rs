//! Range parser. Single `bytes=start-end?` ranges only; multi-range,
//! suffix ranges, and non-`bytes` units are rejected (treated as "no
//! range", i.e. the caller falls back to a full 200 response).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range_header(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Parsing outcome distinguishing "no range requested / unsupported range
/// syntax" (fall back to a full response) from "range syntax parsed but is
/// out of bounds for this resource" (416).
pub enum RangeOutcome {
    None,
    Satisfiable(ByteRange),
    Unsatisfiable,
}

/// Parse a `Range` header value against a resource of the given `size`.
pub fn parse(header: &str, size: u64) -> RangeOutcome {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::None;
    };
    if spec.contains(',') {
        return RangeOutcome::None;
    }
    let Some((start_s, end_s)) = spec.split_once('-') else {
        return RangeOutcome::None;
    };
    if start_s.is_empty() {
        // suffix range (bytes=-N): unsupported.
        return RangeOutcome::None;
    }
    let Ok(start) = start_s.parse::<u64>() else {
        return RangeOutcome::None;
    };
    let end = if end_s.is_empty() {
        None
    } else {
        match end_s.parse::<u64>() {
            Ok(e) => Some(e),
            Err(_) => return RangeOutcome::None,
        }
    };

    let valid = start < size && end.map_or(true, |e| start <= e && e < size);
    if !valid {
        return RangeOutcome::Unsatisfiable;
    }
    let end = end.unwrap_or(size.saturating_sub(1));
    RangeOutcome::Satisfiable(ByteRange { start, end })
}
