use std::time::Duration;

use thiserror::Error;

use crate::normalize::NormalizationError;

/// Classified failure of a single external write attempt.
///
/// Classification drives the queue's retry loop: retryable errors are
/// re-attempted under the backoff policy, fatal ones fail the task on the
/// spot. HTTP 429 carries the server's retry-after hint when one was given.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteError {
    RateLimited { retry_after_secs: Option<u64> },
    Server { status: u16, message: String },
    Client { status: u16, message: String },
    Network(String),
    Timeout { duration_secs: u64 },
}

impl WriteError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Client { .. })
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    pub fn code(&self) -> String {
        match self {
            Self::RateLimited { .. } => "HTTP_429".into(),
            Self::Server { status, .. } | Self::Client { status, .. } => format!("HTTP_{status}"),
            Self::Network(_) => "NETWORK".into(),
            Self::Timeout { .. } => "TIMEOUT".into(),
        }
    }

    /// Classify an HTTP status into the matching variant.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        match status {
            429 => Self::RateLimited { retry_after_secs },
            s if s >= 500 => Self::Server {
                status: s,
                message: message.into(),
            },
            s => Self::Client {
                status: s,
                message: message.into(),
            },
        }
    }
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "Rate limited, retry after {}s", secs),
                None => write!(f, "Rate limited"),
            },
            Self::Server { status, message } => write!(f, "Server error {}: {}", status, message),
            Self::Client { status, message } => write!(f, "Client error {}: {}", status, message),
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Timeout { duration_secs } => write!(f, "Timed out after {}s", duration_secs),
        }
    }
}

impl std::error::Error for WriteError {}

/// Failure to turn a human-entered assignee identifier into a canonical
/// platform user id. Any of these aborts the apply.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssigneeResolutionError {
    #[error("Assignee identifier is empty")]
    Empty,

    #[error("No platform user matches '{0}'")]
    NotFound(String),

    #[error("Identifier '{identifier}' matches {count} platform users")]
    Ambiguous { identifier: String, count: usize },
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("Invalid proposal transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{} required field(s) failed normalization", .errors.len())]
    RequiredFields { errors: Vec<NormalizationError> },

    #[error("Item {item_id} not found on board {board_id}")]
    ItemNotFound { board_id: String, item_id: String },

    #[error("No writeback target configured for {0}")]
    MissingWritebackTarget(&'static str),

    #[error(transparent)]
    Resolution(#[from] AssigneeResolutionError),

    #[error("Writeback failed after {attempts} attempt(s) [{code}]: {message}")]
    Writeback {
        message: String,
        code: String,
        retryable: bool,
        attempts: u32,
    },

    #[error("Write queue unavailable: {0}")]
    QueueClosed(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;
