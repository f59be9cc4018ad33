use thiserror::Error;

pub const MSG_TRANSPORT: &str = "Connection error. Please check your network and try again.";
pub const MSG_RATE_LIMITED: &str = "Rate limit exceeded. Please wait a moment and try again.";
pub const MSG_CAPACITY: &str = "Service temporarily unavailable. Please try again later.";
pub const MSG_GENERIC: &str = "Failed to get response. Please try again.";
pub const MSG_NO_BODY: &str = "No response received. Please try again.";
pub const MSG_ABORTED: &str = "Request cancelled.";

/// Core error type for chip.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChipError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("rate limited by upstream")]
    RateLimited {
        retry_after: Option<u64>,
        upstream: Option<String>,
    },

    #[error("upstream capacity exceeded")]
    CapacityExceeded { upstream: Option<String> },

    #[error("malformed upstream response (status {status:?}): {message:?}")]
    MalformedUpstream {
        status: Option<u16>,
        message: Option<String>,
    },

    #[error("request aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChipError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Stable short code used in logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport { .. } => "transport",
            Self::RateLimited { .. } => "rate_limited",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::MalformedUpstream { .. } => "malformed_upstream",
            Self::Aborted => "aborted",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// The text shown to the person chatting. Request-level failures collapse
    /// into the transport, rate-limit, capacity or generic categories.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { .. } => MSG_TRANSPORT.to_string(),
            Self::RateLimited { .. } => MSG_RATE_LIMITED.to_string(),
            Self::CapacityExceeded { .. } => MSG_CAPACITY.to_string(),
            Self::MalformedUpstream {
                status: None,
                message: None,
            } => MSG_NO_BODY.to_string(),
            Self::MalformedUpstream {
                message: Some(m), ..
            } if !m.trim().is_empty() => m.clone(),
            Self::Aborted => MSG_ABORTED.to_string(),
            _ => MSG_GENERIC.to_string(),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ChipError>;
