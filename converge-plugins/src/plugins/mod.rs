//! Plugins: one idempotent resource each.
//!
//! Every plugin splits its resource into resource kinds and runs one
//! reconciliation pass per kind, in dependency order. The first failing
//! pass ends the invocation; `changed` accumulates across passes.

pub mod cron;
pub mod dns;
pub mod vpc;

use converge_core::{
    ReconciliationResult, Reconciler, ReconcilerConfig, ResourceKind, WaitPolicy,
};
use tracing::warn;

use crate::error::Result;
use crate::output::Outcome;

/// Bookkeeping for one plugin invocation.
pub(crate) struct Run {
    changed: bool,
    check_mode: bool,
}

impl Run {
    pub(crate) fn new(check_mode: bool) -> Self {
        Self {
            changed: false,
            check_mode,
        }
    }

    pub(crate) fn check_mode(&self) -> bool {
        self.check_mode
    }

    pub(crate) fn reconciler(&self, prune: bool, wait: Option<WaitPolicy>) -> Reconciler {
        Reconciler::new(ReconcilerConfig {
            prune,
            check_mode: self.check_mode,
            wait,
        })
    }

    /// Fold a pass into the invocation: accumulate `changed` and surface
    /// the first error.
    pub(crate) fn absorb<K: ResourceKind>(
        &mut self,
        result: ReconciliationResult<K>,
    ) -> Result<Vec<K::Observed>> {
        let (changed, final_state, errors) = result.into_parts();
        self.changed |= changed;

        let mut errors = errors.into_iter();
        match errors.next() {
            None => Ok(final_state),
            Some(first) => {
                for extra in errors {
                    warn!(resource = K::NAME, error = %extra, "Additional reconciliation error");
                }
                Err(first.into())
            }
        }
    }

    pub(crate) fn finish<T>(self, data: T, status: Result<()>) -> Outcome<T> {
        Outcome {
            changed: self.changed,
            data,
            error: status.err(),
        }
    }
}
