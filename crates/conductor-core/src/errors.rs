use std::time::Duration;

/// Failure reported by a model client, either when opening a stream or as a
/// stream item.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider refused the request (bad credentials, bad input).
    #[error("request rejected{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Rejected { status: Option<u16>, message: String },

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection failures and 5xx responses.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// A chunk that could not be decoded into a `ModelChunk`.
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: None,
            message: message.into(),
        }
    }

    /// Whether the same request could succeed if sent again later.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. } | Self::MalformedChunk(_))
    }

    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::MalformedChunk(_) => "malformed_chunk",
            Self::Timeout(_) => "timeout",
        }
    }
}
