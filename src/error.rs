// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use aws_sdk_s3::error::DisplayErrorContext;
use std::fmt;
use thiserror::Error;
use tokio::task::JoinError;

/// Error enum to wrap the failures that can end an upload.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing size, part size, or concurrency arguments.
    /// Raised before any remote call is made.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid target `{uri}`: {reason}")]
    Target { uri: String, reason: &'static str },

    /// The input stream failed or ended before the declared size was read.
    #[error("input failed after {consumed} of {expected} bytes: {source}")]
    Input {
        consumed: u64,
        expected: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of part {part_number} failed: {source}")]
    Upload {
        part_number: u32,
        #[source]
        source: BackendError,
    },

    #[error("failed to {stage} multipart session: {source}")]
    Session {
        stage: SessionStage,
        #[source]
        source: BackendError,
    },

    #[error("upload worker failed: {0}")]
    Join(#[from] JoinError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// The four failure classes an upload can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Input,
    Upload,
    Session,
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: &str) -> Self {
        Self::Internal(message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Target { .. } => ErrorKind::Config,
            Self::Input { .. } => ErrorKind::Input,
            Self::Upload { .. } | Self::Join(_) => ErrorKind::Upload,
            Self::Session { .. } | Self::Internal(_) => ErrorKind::Session,
        }
    }
}

/// Which session call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Open,
    Complete,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// Opaque failure reported by the storage backend.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn sdk<E>(err: E) -> Self
    where
        E: std::error::Error,
    {
        Self::new(DisplayErrorContext(err).to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
