//! Diffing desired against observed state into an ordered operation list.

use std::fmt;

use serde::Serialize;

use crate::error::{ReconcileError, Result};
use crate::kind::ResourceKind;
use crate::state::{DesiredState, ObservedState};

/// Which accessor call an operation (or a failure) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    List,
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A single corrective call against the remote system.
pub enum Operation<K: ResourceKind> {
    Create(K::Spec),
    Update {
        existing: K::Observed,
        desired: K::Spec,
    },
    Delete(K::Observed),
}

impl<K: ResourceKind> Operation<K> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create(_) => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete(_) => OperationKind::Delete,
        }
    }

    pub fn key(&self) -> K::Key {
        match self {
            Self::Create(spec) => K::spec_key(spec),
            Self::Update { desired, .. } => K::spec_key(desired),
            Self::Delete(existing) => K::observed_key(existing),
        }
    }

    pub fn summary(&self) -> OperationSummary {
        OperationSummary {
            op: self.kind(),
            resource: K::NAME,
            key: self.key().to_string(),
        }
    }
}

impl<K: ResourceKind> Clone for Operation<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Create(spec) => Self::Create(spec.clone()),
            Self::Update { existing, desired } => Self::Update {
                existing: existing.clone(),
                desired: desired.clone(),
            },
            Self::Delete(existing) => Self::Delete(existing.clone()),
        }
    }
}

impl<K: ResourceKind> fmt::Debug for Operation<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} {})", self.kind(), K::NAME, self.key())
    }
}

/// Serializable record of an operation, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    pub op: OperationKind,
    pub resource: &'static str,
    pub key: String,
}

/// Ordered operations for one pass: creates, then updates, then deletes.
pub struct Plan<K: ResourceKind> {
    operations: Vec<Operation<K>>,
    skipped_protected: Vec<K::Key>,
}

impl<K: ResourceKind> Plan<K> {
    pub fn operations(&self) -> &[Operation<K>] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation<K>> {
        self.operations
    }

    /// Observed objects absent from the desired state that were left alone
    /// because they are protected.
    pub fn skipped_protected(&self) -> &[K::Key] {
        &self.skipped_protected
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn summaries(&self) -> Vec<OperationSummary> {
        self.operations.iter().map(Operation::summary).collect()
    }
}

impl<K: ResourceKind> fmt::Debug for Plan<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("operations", &self.operations)
            .field("skipped_protected", &self.skipped_protected)
            .finish()
    }
}

/// Compute the operations that move `observed` to `desired`.
///
/// With `prune` unset, observed objects missing from the desired state are
/// left alone instead of being deleted.
pub fn diff<K: ResourceKind>(
    desired: &DesiredState<K>,
    observed: &ObservedState<K>,
    prune: bool,
) -> Result<Plan<K>> {
    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    let mut skipped_protected = Vec::new();

    for spec in desired.specs() {
        let key = K::spec_key(spec);
        match observed.get(&key) {
            None => creates.push(Operation::Create(spec.clone())),
            Some(existing) => {
                if let Some(conflict) = K::immutable_conflict(spec, existing) {
                    return Err(ReconcileError::precondition_for(
                        &key,
                        format!("{} {}: {}", K::NAME, key, conflict),
                    ));
                }
                if K::needs_update(spec, existing) {
                    updates.push(Operation::Update {
                        existing: existing.clone(),
                        desired: spec.clone(),
                    });
                }
            }
        }
    }

    if prune {
        for existing in observed.objects() {
            let key = K::observed_key(existing);
            if desired.contains_key(&key) {
                continue;
            }
            if K::is_protected(existing) {
                skipped_protected.push(key);
            } else {
                deletes.push(Operation::Delete(existing.clone()));
            }
        }
    }

    let mut operations = creates;
    operations.append(&mut updates);
    operations.append(&mut deletes);

    Ok(Plan {
        operations,
        skipped_protected,
    })
}
