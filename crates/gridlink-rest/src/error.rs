//! REST error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("Token authentication failed with status {status}: {body}")]
    AuthenticationFailure { status: u16, body: String },

    #[error("Area {area} is not part of configuration {configuration}")]
    AreaNotFound { area: String, configuration: String },

    #[error("Missing credentials: {0} not set")]
    MissingCredentials(&'static str),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        Self::HttpClient(e.to_string())
    }
}

pub type RestResult<T> = Result<T, RestError>;
