//! Sink abstraction over the remote file endpoint.
//!
//! A sink owns one session to the endpoint and exposes a serialized
//! `send`. Implementations decide how a session is established and kept
//! alive; the worker only sees this trait.

pub mod ftp;

use async_trait::async_trait;
use thiserror::Error;

use crate::transform::Artifact;

pub use ftp::{FtpConnection, FtpDialer, FtpSink, SuppaftpDialer};

/// Errors surfaced by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u128),

    #[error("login failed: {0}")]
    Login(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("reconnect failed: {0}")]
    Reconnect(String),
}

impl SinkError {
    /// A fatal error means the session cannot be re-established; the
    /// process must not keep consuming against a dead endpoint.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Reconnect(_))
    }

    /// Whether the underlying error indicates a torn connection that a
    /// full reconnect may repair.
    pub fn is_broken_pipe(&self) -> bool {
        self.to_string().contains("broken pipe")
    }
}

/// A named-object sink. `send` transfers the whole artifact as a single
/// object; `status` is a non-intrusive liveness probe.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, artifact: &Artifact) -> Result<(), SinkError>;

    async fn status(&self) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_pipe_detection() {
        let err = SinkError::Transfer("write: broken pipe".to_string());
        assert!(err.is_broken_pipe());
        assert!(!err.is_fatal());

        let err = SinkError::Transfer("550 permission denied".to_string());
        assert!(!err.is_broken_pipe());
    }

    #[test]
    fn test_reconnect_errors_are_fatal() {
        assert!(SinkError::Reconnect("no route to host".to_string()).is_fatal());
        assert!(!SinkError::Connect("refused".to_string()).is_fatal());
    }
}
