//! Error types for the timeline engine and its collaborators

use thiserror::Error;

/// Errors produced by feed sources, caches, post actions and the engine
#[derive(Debug, Error)]
pub enum Error {
    /// The request never got a response (DNS, TLS, timeout, reset)
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("{endpoint} failed ({status}): {message}")]
    Api {
        /// XRPC method that failed
        endpoint: String,
        /// HTTP status code
        status: u16,
        /// Body or error message returned by the server
        message: String,
    },

    /// The server answered but the payload could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Local persistence failed
    #[error("storage error: {0}")]
    Storage(String),

    /// A post cannot be liked or reposted without its CID
    #[error("post {0} is missing its CID")]
    MissingCid(String),

    /// No session is available for the request
    #[error("not authenticated")]
    NotAuthenticated,

    /// The request was superseded or its owner went away
    #[error("request cancelled")]
    Cancelled,

    /// The timeline engine task is no longer running
    #[error("timeline engine has shut down")]
    EngineClosed,
}

impl Error {
    /// Whether this error is a cancellation rather than a real failure.
    ///
    /// Cancellations are never surfaced to the user.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::EngineClosed)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

/// Result alias used across the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_failure() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::EngineClosed.is_cancelled());
        assert!(!Error::Network("reset".into()).is_cancelled());
    }

    #[test]
    fn test_api_error_message() {
        let err = Error::Api {
            endpoint: "app.bsky.feed.getTimeline".into(),
            status: 502,
            message: "Bad Gateway".into(),
        };
        assert_eq!(
            err.to_string(),
            "app.bsky.feed.getTimeline failed (502): Bad Gateway"
        );
    }
}
