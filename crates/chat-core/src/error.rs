use thiserror::Error;

/// Persistence failure. Deliberately opaque: callers only ever retry or
/// surface it, never branch on the backend's own error taxonomy.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository backend: {0}")]
    Backend(String),
}

impl RepoError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// The closed set of error kinds the core surfaces.
///
/// Connection tasks answer `BadRequest`/`Forbidden`/`Blocked`/`NotFound`/
/// `Conflict` with a typed error frame and stay live; `Transport` is
/// terminal for the connection; HTTP callers receive every kind unchanged
/// and translate at their edge.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("blocked")]
    Blocked,
    #[error("transport: {0}")]
    Transport(String),
    #[error("transient: {0}")]
    Transient(#[from] RepoError),
}

impl ChatError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Frozen code string carried on WS error frames and HTTP envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Blocked => "BLOCKED",
            Self::Transport(_) | Self::Transient(_) => "TRANSIENT",
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Whether a client may reasonably retry the same request unchanged.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_and_transport_are_retryable() {
        assert!(ChatError::Transient(RepoError::backend("down")).retryable());
        assert!(ChatError::Transport("broken pipe".to_owned()).retryable());
        assert!(!ChatError::Blocked.retryable());
        assert!(!ChatError::bad_request("empty").retryable());
        assert!(!ChatError::NotFound("message").retryable());
    }

    #[test]
    fn repo_errors_lift_into_transient() {
        let err: ChatError = RepoError::backend("pool timeout").into();
        assert!(matches!(err, ChatError::Transient(_)));
    }
}
