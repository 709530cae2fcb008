use parley_shared::{BackendError, ModelError};
use thiserror::Error;

/// Every failure a client operation can report. `Display` is the
/// user-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Input rejected before anything was sent.
    #[error("{0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The backend could not be reached or did not answer in time.
    #[error("Network error: {0}")]
    Network(String),

    /// The request clashed with existing data.
    #[error("{0}")]
    Conflict(String),

    /// The backend answered with data the client could not interpret.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the operation may succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<BackendError> for ClientError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => Self::Network(msg),
            BackendError::Timeout => Self::Network("request timed out".into()),
            BackendError::Unauthorized(msg) => Self::Auth(msg),
            BackendError::Duplicate(msg) => Self::Conflict(msg),
            BackendError::Rejected(msg) => Self::Validation(msg),
            BackendError::Malformed(msg) => Self::Decode(msg),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<ModelError> for ClientError {
    fn from(err: ModelError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_onto_the_client_taxonomy() {
        assert!(ClientError::from(BackendError::Timeout).is_transient());
        assert_eq!(
            ClientError::from(BackendError::Duplicate("Username is already taken".into()))
                .to_string(),
            "Username is already taken"
        );
        assert!(matches!(
            ClientError::from(BackendError::Unauthorized("x".into())),
            ClientError::Auth(_)
        ));
        assert!(!ClientError::validation("empty").is_transient());
    }
}
