//! Metrics sink: one call per request recording the method, and one
//! recording its outcome once the handler returns. A single always-present
//! handle injected at construction, not a split global-default-plus-override
//! pair — one sink per `DavHandler` instance is enough.

use std::time::Duration;

use http::StatusCode;

use crate::util::DavMethod;

pub trait MetricsSink: Send + Sync {
    fn record_request(&self, method: DavMethod);
    fn record_response(&self, method: DavMethod, status: StatusCode, elapsed: Duration);
}

/// Discards everything; the default when no sink is configured.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_request(&self, _method: DavMethod) {}

    fn record_response(&self, _method: DavMethod, _status: StatusCode, _elapsed: Duration) {}
}

/// Logs each request/response pair at `debug` level via the `log` facade,
/// the same logging idiom used elsewhere in the engine.
pub struct LoggingMetrics;

impl MetricsSink for LoggingMetrics {
    fn record_request(&self, method: DavMethod) {
        log::debug!("{:?} request received", method);
    }

    fn record_response(&self, method: DavMethod, status: StatusCode, elapsed: Duration) {
        log::debug!("{:?} -> {} in {:?}", method, status, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_does_not_panic() {
        let sink = NoopMetrics;
        sink.record_request(DavMethod::Get);
        sink.record_response(DavMethod::Get, StatusCode::OK, Duration::from_millis(5));
    }
}
