//! Errors raised while driving kubectl.

use thiserror::Error;

/// Result type alias for kubectl operations.
pub type Result<T> = std::result::Result<T, KubectlError>;

/// Errors that can occur while running kubectl.
#[derive(Error, Debug)]
pub enum KubectlError {
    /// kubectl could not be found in any known location.
    #[error("kubectl not found; install it or pass its path explicitly")]
    KubectlNotFound,

    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The cluster could not be reached or no configuration is set up.
    #[error("cluster not reachable: {0}")]
    ClusterNotConnected(String),

    /// The credentials in use lack permission for the request.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// kubectl exited with an error not covered above.
    #[error("kubectl failed: {0}")]
    CommandFailed(String),

    /// kubectl output could not be parsed.
    #[error("failed to parse kubectl output: {0}")]
    ParsingFailed(String),

    /// kubectl did not finish in time.
    #[error("kubectl timed out")]
    Timeout,

    /// A kubectl child process could not be managed.
    #[error("process error: {0}")]
    ProcessError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubectlError {
    /// Classifies kubectl's stderr.
    pub fn from_kubectl_error(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        if lower.contains("connection refused")
            || lower.contains("no configuration has been provided")
            || lower.contains("dial tcp")
            || lower.contains("unable to connect to the server")
            || lower.contains("context was not found")
        {
            Self::ClusterNotConnected(message)
        } else if lower.contains("forbidden") || lower.contains("unauthorized") {
            Self::Forbidden(message)
        } else if lower.contains("notfound") || lower.contains("not found") {
            Self::NotFound(message)
        } else {
            Self::CommandFailed(message)
        }
    }

    /// Returns true if the object asked for does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubectl_error_detection() {
        let connection_refused = KubectlError::from_kubectl_error("connection refused");
        assert!(matches!(connection_refused, KubectlError::ClusterNotConnected(_)));

        let no_config = KubectlError::from_kubectl_error("no configuration has been provided");
        assert!(matches!(no_config, KubectlError::ClusterNotConnected(_)));

        let dial_error = KubectlError::from_kubectl_error("dial tcp 127.0.0.1:6443: connect");
        assert!(matches!(dial_error, KubectlError::ClusterNotConnected(_)));

        let missing = KubectlError::from_kubectl_error(
            r#"Error from server (NotFound): services "cm" not found"#,
        );
        assert!(missing.is_not_found());

        let forbidden = KubectlError::from_kubectl_error(
            r#"Error from server (Forbidden): pods is forbidden: User "dev" cannot list"#,
        );
        assert!(matches!(forbidden, KubectlError::Forbidden(_)));

        let other_error = KubectlError::from_kubectl_error("some other error");
        assert!(matches!(other_error, KubectlError::CommandFailed(_)));
        assert!(!other_error.is_not_found());
    }
}
