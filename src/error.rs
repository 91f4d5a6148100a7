use thiserror::Error;

/// Error taxonomy for the collection core.
///
/// `Connection` covers transport-level failures and is the only variant
/// the retry policy will spend attempts on. `ToolInvocation` is a
/// remote-reported tool error and fails immediately. `Validation` is
/// raised per record during normalization and is counted, not
/// propagated, by the collectors.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("connection to MCP server failed: {0}")]
    Connection(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    Validation(String),

    #[error("cache write failed: {0}")]
    Storage(String),
}

pub type HarvestResult<T> = Result<T, HarvestError>;

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        HarvestError::Connection(err.to_string())
    }
}

impl From<sqlx::Error> for HarvestError {
    fn from(err: sqlx::Error) -> Self {
        HarvestError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        HarvestError::Validation(err.to_string())
    }
}
