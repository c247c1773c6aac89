// Error taxonomy for the calculator core.
//
// None of these are fatal: InvalidInput blocks a single computation,
// SourceUnavailable degrades rate provenance, PersistenceFailure only
// costs the history entry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalculatorError {
    /// Non-positive or unparseable weight/rate. The user must correct it.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Live price quote could not be obtained.
    #[error("Price source unavailable: {0}")]
    SourceUnavailable(String),

    /// Local or remote history store failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl CalculatorError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        CalculatorError::InvalidInput(msg.into())
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        CalculatorError::SourceUnavailable(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        CalculatorError::PersistenceFailure(msg.into())
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, CalculatorError::InvalidInput(_))
    }
}

impl From<rusqlite::Error> for CalculatorError {
    fn from(err: rusqlite::Error) -> Self {
        CalculatorError::PersistenceFailure(format!("sqlite: {}", err))
    }
}

impl From<serde_json::Error> for CalculatorError {
    fn from(err: serde_json::Error) -> Self {
        CalculatorError::PersistenceFailure(format!("json: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CalculatorError>;
