use crate::model::TimeRange;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Comparisons need complete calendar months, but {range} is a partial month. Try naming whole months, e.g. \"compare August vs September\".")]
    IncompleteMonth { range: TimeRange },

    #[error("Classification ambiguous: {0}")]
    ClassificationAmbiguous(String),

    #[error("Explanation generation failed: {0}")]
    ExplanationFailed(String),

    #[error("Cost data request failed: {0}")]
    CostData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single provider attempt did not produce parameters.
///
/// These are recovered by advancing the provider chain and never reach the
/// caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderFailure {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider response does not match schema: {0}")]
    SchemaInvalid(String),
}

impl From<QueryError> for ProviderFailure {
    fn from(err: QueryError) -> Self {
        ProviderFailure::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
