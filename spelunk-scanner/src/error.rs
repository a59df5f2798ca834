use crate::endpoint::Endpoint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Browser unreachable: {0}")]
    FatalConnection(String),

    #[error("Login field not found: {0}")]
    LoginFieldNotFound(String),

    #[error("Stale locator: {0}")]
    StaleLocator(String),

    #[error("Click failed on {locator}: {reason}")]
    ClickFailed { locator: String, reason: String },

    #[error("Intercepted exchange for {url} could not be completed: {reason}")]
    InterceptLoadFailed { url: String, reason: String },

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Scan aborted after capturing {} endpoints: {source}", .endpoints.len())]
    Aborted {
        source: Box<ScanError>,
        endpoints: Vec<Endpoint>,
    },

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

impl ScanError {
    /// Whether the error must abort the whole run rather than a single unit of work.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::FatalConnection(_) | ScanError::InvalidUrl(_) | ScanError::Aborted { .. }
        )
    }

    pub(crate) fn driver(err: impl std::fmt::Display) -> Self {
        ScanError::Driver(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
