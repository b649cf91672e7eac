//! Error types shared by the Convoy engines and platform collaborators.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors raised by a remote collaborator (stack deployer, container
/// platform, scaling groups, introspection).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("api error: {0}")]
    Api(String),
}

/// Result type alias for engine operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that abort a release.
///
/// Every variant is fatal: callers treat any propagated `DeployError` as
/// "release failed". `Timeout` is a bounded wait running out; the others
/// are remote signals of failure or local misconfiguration.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("timed out after {}s waiting for {what}", waited.as_secs())]
    Timeout { what: String, waited: Duration },

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("release of {failed} failed; service rolled back to {restored}")]
    RolledBack { failed: String, restored: String },

    #[error("interrupted while waiting for {0}")]
    Interrupted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl DeployError {
    /// Whether this error came from an exhausted wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeployError::Timeout { .. })
    }

    pub fn unrecoverable(msg: impl Into<String>) -> Self {
        DeployError::Unrecoverable(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_wait() {
        let err = DeployError::Timeout {
            what: "stack prod-shared".to_string(),
            waited: Duration::from_secs(600),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "timed out after 600s waiting for stack prod-shared"
        );
    }

    #[test]
    fn platform_errors_convert() {
        let err: DeployError = PlatformError::NotFound("service api".into()).into();
        assert!(matches!(err, DeployError::Platform(PlatformError::NotFound(_))));
        assert!(!err.is_timeout());
    }
}
