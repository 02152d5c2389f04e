use crate::step::ExecutionStep;
use crate::types::SessionStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The request never completed (connect, timeout, broken body).
    #[error("Transport error during {step}: {source}")]
    Transport {
        step: ExecutionStep,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered, but reported a failure.
    #[error("Backend reported failure during {step}: {message}")]
    Backend {
        step: ExecutionStep,
        status: Option<u16>,
        message: String,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {id} is not accepting commands (status: {status})")]
    SessionInactive { id: String, status: SessionStatus },

    #[error("Already running: {0}")]
    AlreadyRunning(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reporting error: {0}")]
    Reporting(String),
}

impl ScanError {
    pub fn transport(step: ExecutionStep, source: reqwest::Error) -> Self {
        ScanError::Transport { step, source }
    }

    pub fn backend(step: ExecutionStep, status: Option<u16>, message: impl Into<String>) -> Self {
        ScanError::Backend {
            step,
            status,
            message: message.into(),
        }
    }

    /// True when the request itself failed to complete.
    pub fn is_transport(&self) -> bool {
        matches!(self, ScanError::Transport { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, ScanError::Precondition(_))
    }
}
