//! Error types for vmstate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Operation;

/// Provider error code returned by a dry-run call that would have succeeded.
pub const DRY_RUN_OPERATION: &str = "DryRunOperation";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Desired state unavailable at {}: {source}", path.display())]
    ConfigUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Desired state malformed at {}: {reason}", path.display())]
    ConfigMalformed { path: PathBuf, reason: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single call against the cloud provider API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered with an error code.
    #[error("{operation} rejected ({code}): {message}")]
    Api {
        operation: Operation,
        code: String,
        message: String,
    },

    /// The request never produced a provider answer.
    #[error("{operation} failed: {message}")]
    Transport { operation: Operation, message: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: Operation,
        timeout: Duration,
    },
}

impl ProviderError {
    pub fn api(operation: Operation, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Api { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Timeout { operation, .. } => *operation,
        }
    }

    /// Provider error code, if the provider answered at all.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// True when a dry-run call reports that the real call would be permitted.
    pub fn is_dry_run_operation(&self) -> bool {
        self.code() == Some(DRY_RUN_OPERATION)
    }
}
