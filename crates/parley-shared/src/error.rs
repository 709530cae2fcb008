use thiserror::Error;

/// Failures reported by the hosted backend (auth, record store, change feed).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The service could not be reached or dropped the request.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out")]
    Timeout,

    /// Missing or invalid credentials, or no session for a protected call.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Duplicate(String),

    /// The request was well-formed but refused (bad column, constraint, ...).
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The service answered with something that could not be interpreted.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Direct chat must have exactly two participants, found {0}")]
    DirectParticipants(usize),

    #[error("Group chat requires a name")]
    GroupWithoutName,
}
