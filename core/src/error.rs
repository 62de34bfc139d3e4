//! Error types for the churl-core library.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::domain::ApiError;
use crate::kubernetes::errors::KubectlError;

/// Result type alias for churl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The phase of a chart lookup an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Config,
    Locate,
    Resolve,
    Dial,
    Forward,
    Request,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Locate => "locate",
            Self::Resolve => "resolve",
            Self::Dial => "dial",
            Self::Forward => "forward",
            Self::Request => "request",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while opening a tunnel or querying a chart museum.
#[derive(Error, Debug)]
pub enum Error {
    /// A port or object could not be mapped onto an attachable workload.
    #[error("{0}")]
    Resolution(String),

    /// No attachable instance showed up before the attach timeout.
    #[error("timed out after {timeout:?} waiting for an attachable pod for {object}")]
    LocatorTimeout { object: String, timeout: Duration },

    /// Opening or relaying over the forward channel failed.
    #[error("{0}")]
    Transport(String),

    /// The chart museum answered with a structured error.
    #[error("{error} (HTTP {status})")]
    Api { status: u16, error: ApiError },

    /// A response body was not the JSON we expected.
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP request never got a response.
    #[error("failed to perform request: {0}")]
    Connection(#[from] reqwest::Error),

    /// Invalid session options or manifest.
    #[error("{0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes/kubectl error.
    #[error("{0}")]
    Kubernetes(#[from] KubectlError),
}

impl Error {
    /// Returns the phase this error should be reported under.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Resolution(_) => Phase::Resolve,
            Self::LocatorTimeout { .. } | Self::Kubernetes(_) => Phase::Locate,
            Self::Transport(_) => Phase::Dial,
            Self::Io(_) => Phase::Forward,
            Self::Api { .. } | Self::Decode { .. } | Self::Connection(_) => Phase::Request,
            Self::Config(_) => Phase::Config,
        }
    }

    /// Returns the structured chart museum error, if this is one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Returns true if the chart museum reported the chart as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(Error::Resolution("x".into()).phase().as_str(), "resolve");
        assert_eq!(Error::Transport("x".into()).phase().to_string(), "dial");
        assert_eq!(
            Error::LocatorTimeout {
                object: "svc/cm".into(),
                timeout: Duration::from_secs(2)
            }
            .phase(),
            Phase::Locate
        );
    }

    #[test]
    fn test_api_error_is_not_found() {
        let err = Error::Api {
            status: 404,
            error: ApiError::new("chart not found"),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("chart not found"));
        assert_eq!(err.api_error().map(|e| e.message()), Some("chart not found"));
    }
}
