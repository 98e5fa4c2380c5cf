//! Plugin error types.

use converge_core::{ErrorKind, ReconcileError};
use serde::Serialize;
use thiserror::Error;

use crate::validation::ValidationError;

/// Errors that end a plugin invocation.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Malformed parameter record.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Structured context for a failed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: &'static str,
    pub key: Option<String>,
}

impl PluginError {
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::InvalidParams(_) | Self::Validation(_) => ErrorInfo {
                kind: "invalid_params",
                key: None,
            },
            Self::Reconcile(err) => ErrorInfo {
                kind: match err.kind() {
                    ErrorKind::Precondition => "precondition",
                    ErrorKind::Remote => "remote",
                    ErrorKind::Timeout => "timeout",
                },
                key: err.key().map(str::to_string),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
