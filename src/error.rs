use thiserror::Error;

/// Failures of a single submission.
///
/// Every variant is terminal for the submission that produced it only; the
/// conversation returns to a state that accepts a new submit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Session missing or expired, or the credential exchange was rejected.
    #[error("Failed to initialize inference client: {0}")]
    Auth(String),

    /// Network failure or non-success response from the inference endpoint.
    #[error("{0}")]
    Transport(String),

    /// A chunk was not UTF-8 or not a JSON event.
    #[error("{0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth(reason.into())
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode(reason.into())
    }

    pub fn session_unavailable() -> Self {
        Self::Auth("session unavailable".to_string())
    }
}
