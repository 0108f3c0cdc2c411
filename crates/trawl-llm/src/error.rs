#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("embedding config is incomplete: missing {0}")]
    Configuration(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider request failed (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding provider response is invalid: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// `true` when the failure comes from local settings rather than the provider.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
