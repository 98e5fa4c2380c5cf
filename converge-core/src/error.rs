//! Reconciliation error types.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::plan::OperationKind;

/// Errors that terminate a reconciliation pass.
///
/// None of these are retried and none trigger a rollback of operations that
/// were already applied. The caller re-invokes to continue converging.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Ambiguous or missing input, detected before any remote mutation.
    #[error("precondition violated: {reason}")]
    Precondition { key: Option<String>, reason: String },

    /// An accessor call failed.
    #[error("{op} of {key} failed: {source:#}")]
    Remote {
        op: OperationKind,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A created resource did not become ready in time.
    #[error("timed out after {}s waiting for {key} to become ready", waited.as_secs())]
    Timeout { key: String, waited: Duration },
}

/// Coarse classification of a [`ReconcileError`], reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Precondition,
    Remote,
    Timeout,
}

impl ReconcileError {
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            key: None,
            reason: reason.into(),
        }
    }

    pub fn precondition_for(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Precondition {
            key: Some(key.to_string()),
            reason: reason.into(),
        }
    }

    pub fn remote(op: OperationKind, key: impl ToString, source: anyhow::Error) -> Self {
        Self::Remote {
            op,
            key: key.to_string(),
            source,
        }
    }

    /// The natural key of the offending resource, if one is known.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Precondition { key, .. } => key.as_deref(),
            Self::Remote { key, .. } | Self::Timeout { key, .. } => Some(key),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;
