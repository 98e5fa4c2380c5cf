//! Reconciler implementation.

use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::kind::{Accessor, ResourceKind};
use crate::plan::{self, Operation, OperationKind, OperationSummary, Plan};
use crate::state::{DesiredState, ObservedState};
use crate::wait::{self, WaitPolicy};

/// Configuration for a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delete unprotected observed objects that are not desired.
    pub prune: bool,
    /// Compute the plan but do not call any mutator.
    pub check_mode: bool,
    /// Block after each create until the new object reports ready.
    pub wait: Option<WaitPolicy>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            prune: true,
            check_mode: false,
            wait: None,
        }
    }
}

/// Outcome of one reconciliation pass. Immutable once produced.
pub struct ReconciliationResult<K: ResourceKind> {
    changed: bool,
    final_state: Vec<K::Observed>,
    operations: Vec<OperationSummary>,
    skipped_protected: Vec<String>,
    errors: Vec<ReconcileError>,
}

impl<K: ResourceKind> ReconciliationResult<K> {
    fn failed(error: ReconcileError, final_state: Vec<K::Observed>) -> Self {
        Self {
            changed: false,
            final_state,
            operations: Vec::new(),
            skipped_protected: Vec::new(),
            errors: vec![error],
        }
    }

    /// True iff at least one operation was applied, or in check mode,
    /// would have been.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Remote objects as observed after the pass.
    pub fn final_state(&self) -> &[K::Observed] {
        &self.final_state
    }

    /// Operations applied in order, or planned in check mode.
    pub fn operations(&self) -> &[OperationSummary] {
        &self.operations
    }

    pub fn skipped_protected(&self) -> &[String] {
        &self.skipped_protected
    }

    pub fn errors(&self) -> &[ReconcileError] {
        &self.errors
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_parts(self) -> (bool, Vec<K::Observed>, Vec<ReconcileError>) {
        (self.changed, self.final_state, self.errors)
    }
}

impl<K: ResourceKind> std::fmt::Debug for ReconciliationResult<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationResult")
            .field("changed", &self.changed)
            .field("final_state", &self.final_state)
            .field("operations", &self.operations)
            .field("skipped_protected", &self.skipped_protected)
            .field("errors", &self.errors)
            .finish()
    }
}

/// Converges one resource type at a time: diff desired against observed,
/// then apply creates, updates and deletes in that order.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Compute the ordered operation list without touching the remote system.
    pub fn plan<K: ResourceKind>(
        &self,
        desired: &DesiredState<K>,
        observed: &ObservedState<K>,
    ) -> Result<Plan<K>> {
        plan::diff(desired, observed, self.config.prune)
    }

    /// Fetch the observed state through `accessor`, then reconcile.
    pub fn converge<K, A>(
        &self,
        desired: &DesiredState<K>,
        accessor: &mut A,
        filter: &A::Filter,
    ) -> ReconciliationResult<K>
    where
        K: ResourceKind,
        A: Accessor<K>,
    {
        let objects = match accessor.list(filter) {
            Ok(objects) => objects,
            Err(e) => {
                let err = ReconcileError::remote(OperationKind::List, K::NAME, e);
                warn!(resource = K::NAME, error = %err, "Failed to fetch observed state");
                return ReconciliationResult::failed(err, Vec::new());
            }
        };

        match ObservedState::new(objects) {
            Ok(observed) => self.reconcile(desired, observed, accessor, filter),
            Err(err) => {
                warn!(resource = K::NAME, error = %err, "Observed state is ambiguous");
                ReconciliationResult::failed(err, Vec::new())
            }
        }
    }

    /// Reconcile `observed` towards `desired`.
    ///
    /// The first failing call aborts the pass. Operations applied before it
    /// stay applied and are reported through `changed`.
    pub fn reconcile<K, A>(
        &self,
        desired: &DesiredState<K>,
        observed: ObservedState<K>,
        accessor: &mut A,
        filter: &A::Filter,
    ) -> ReconciliationResult<K>
    where
        K: ResourceKind,
        A: Accessor<K>,
    {
        info!(
            resource = K::NAME,
            desired = desired.len(),
            observed = observed.len(),
            "Starting reconciliation"
        );

        let plan = match self.plan(desired, &observed) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(resource = K::NAME, error = %err, "Cannot plan reconciliation");
                return ReconciliationResult::failed(err, observed.into_objects());
            }
        };

        let skipped_protected: Vec<String> = plan
            .skipped_protected()
            .iter()
            .map(ToString::to_string)
            .collect();
        for key in &skipped_protected {
            debug!(resource = K::NAME, key = %key, "Leaving protected resource in place");
        }

        if self.config.check_mode {
            info!(resource = K::NAME, operations = plan.len(), "Check mode, not applying");
            return ReconciliationResult {
                changed: !plan.is_empty(),
                final_state: observed.into_objects(),
                operations: plan.summaries(),
                skipped_protected,
                errors: Vec::new(),
            };
        }

        let mut operations = Vec::new();
        let mut created = Vec::new();
        let mut deleted = Vec::new();
        let mut errors = Vec::new();

        for op in plan.into_operations() {
            let summary = op.summary();
            let key = op.key();

            match self.apply(op, accessor) {
                Ok(Applied::Created(object)) => {
                    operations.push(summary);
                    let object = match self.config.wait {
                        Some(policy) if !K::is_ready(&object) => {
                            match wait::wait_for_ready::<K, A>(accessor, filter, &key, policy) {
                                Ok(ready) => ready,
                                Err(err) => {
                                    warn!(resource = K::NAME, key = %key, error = %err, "Readiness wait failed");
                                    created.push(object);
                                    errors.push(err);
                                    break;
                                }
                            }
                        }
                        _ => object,
                    };
                    created.push(object);
                }
                Ok(Applied::Updated) => operations.push(summary),
                Ok(Applied::Deleted) => {
                    operations.push(summary);
                    deleted.push(key);
                }
                Err(err) => {
                    warn!(resource = K::NAME, key = %key, error = %err, "Operation failed, aborting pass");
                    errors.push(err);
                    break;
                }
            }
        }

        let changed = !operations.is_empty();

        let final_state = match accessor.list(filter) {
            Ok(objects) => objects,
            Err(e) => {
                let err = ReconcileError::remote(OperationKind::List, K::NAME, e);
                warn!(resource = K::NAME, error = %err, "Failed to refresh observed state");
                errors.push(err);
                let mut objects: Vec<K::Observed> = observed
                    .into_objects()
                    .into_iter()
                    .filter(|o| !deleted.contains(&K::observed_key(o)))
                    .collect();
                objects.extend(created);
                objects
            }
        };

        if errors.is_empty() {
            info!(
                resource = K::NAME,
                applied = operations.len(),
                changed,
                "Reconciliation complete"
            );
        }

        ReconciliationResult {
            changed,
            final_state,
            operations,
            skipped_protected,
            errors,
        }
    }

    fn apply<K, A>(&self, op: Operation<K>, accessor: &mut A) -> Result<Applied<K>>
    where
        K: ResourceKind,
        A: Accessor<K>,
    {
        match op {
            Operation::Create(spec) => {
                let key = K::spec_key(&spec);
                info!(resource = K::NAME, key = %key, "Creating");
                accessor
                    .create(&spec)
                    .map(Applied::Created)
                    .map_err(|e| ReconcileError::remote(OperationKind::Create, key, e))
            }
            Operation::Update { existing, desired } => {
                let key = K::spec_key(&desired);
                info!(resource = K::NAME, key = %key, "Updating");
                accessor
                    .update(&existing, &desired)
                    .map(|()| Applied::Updated)
                    .map_err(|e| ReconcileError::remote(OperationKind::Update, key, e))
            }
            Operation::Delete(existing) => {
                let key = K::observed_key(&existing);
                info!(resource = K::NAME, key = %key, "Deleting");
                accessor
                    .delete(&existing)
                    .map(|()| Applied::Deleted)
                    .map_err(|e| ReconcileError::remote(OperationKind::Delete, key, e))
            }
        }
    }
}

enum Applied<K: ResourceKind> {
    Created(K::Observed),
    Updated,
    Deleted,
}
