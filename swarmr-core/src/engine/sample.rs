use std::sync::Arc;
use std::time::Duration;

use swarmr_http::HttpTransportErrorKind;

/// How a single network call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The server answered; any status code, including 4xx/5xx.
    Status(u16),
    /// The per-call deadline fired before a complete response arrived.
    Timeout,
    /// The call failed below HTTP (connect refused, TLS, bad URL, ...).
    Transport(HttpTransportErrorKind),
}

impl CallOutcome {
    /// Label with bounded cardinality, used as a metric tag.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Status(code) => code.to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::Transport(kind) => kind.to_string(),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// One recorded outcome of a single network call. Immutable once created;
/// every sample lands in exactly one per-tag series inside the aggregator.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Semantic endpoint tag declared by the scenario ("product-detail"),
    /// never the interpolated URL.
    pub tag: Arc<str>,
    pub method: http::Method,
    pub outcome: CallOutcome,
    pub latency: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl Sample {
    /// Failed means transport error, timeout, or a 4xx/5xx status.
    #[must_use]
    pub fn failed(&self) -> bool {
        match self.outcome {
            CallOutcome::Status(code) => code >= 400,
            CallOutcome::Timeout | CallOutcome::Transport(_) => true,
        }
    }
}
