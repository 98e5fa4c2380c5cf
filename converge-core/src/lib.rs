//! converge-core: declarative reconciliation primitive.
//!
//! Compares a declared target state against a freshly observed remote state
//! and applies the minimal create/update/delete operations to converge:
//!
//! - A [`ResourceKind`] names the natural key and attribute predicates of
//!   one resource type.
//! - An [`Accessor`] lists and mutates those resources remotely.
//! - The [`Reconciler`] diffs, orders (creates, updates, deletes) and
//!   applies, stopping at the first failure without rolling back.

pub mod error;
pub mod kind;
pub mod plan;
pub mod reconciler;
pub mod state;
pub mod wait;

pub use error::{ErrorKind, ReconcileError, Result};
pub use kind::{Accessor, ResourceKind};
pub use plan::{Operation, OperationKind, OperationSummary, Plan};
pub use reconciler::{ReconciliationResult, Reconciler, ReconcilerConfig};
pub use state::{DesiredState, ObservedState};
pub use wait::{WaitPolicy, wait_for_ready};
