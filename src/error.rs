//! Error taxonomy shared by every session operation

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while driving a session.
///
/// Data-integrity errors (`NotFound`, `Conflict`, `PreconditionFailed`) are always
/// surfaced to the caller. `TransportDegraded` is masked by polling fallbacks and
/// only logged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("transport degraded: {0}")]
    TransportDegraded(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SessionError {
    /// Stable code sent to clients in error messages
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "NOT_FOUND",
            SessionError::Conflict(_) => "CONFLICT",
            SessionError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            SessionError::TransportDegraded(_) => "TRANSPORT_DEGRADED",
            SessionError::PermissionDenied(_) => "PERMISSION_DENIED",
            SessionError::Unauthorized(_) => "UNAUTHORIZED",
            SessionError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        SessionError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        SessionError::Conflict(what.into())
    }

    pub fn precondition(what: impl Into<String>) -> Self {
        SessionError::PreconditionFailed(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SessionError::not_found("game").code(), "NOT_FOUND");
        assert_eq!(SessionError::conflict("avatar").code(), "CONFLICT");
        assert_eq!(
            SessionError::precondition("need players").code(),
            "PRECONDITION_FAILED"
        );
        assert_eq!(
            SessionError::not_found("Question q1").to_string(),
            "not found: Question q1"
        );
    }
}
