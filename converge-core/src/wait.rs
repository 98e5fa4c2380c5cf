//! Blocking readiness wait for freshly created resources.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::kind::{Accessor, ResourceKind};
use crate::plan::OperationKind;

/// Bounds for [`wait_for_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Give up once this much time has passed since the first poll.
    pub timeout: Duration,
    /// Fixed sleep between polls.
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(5),
        }
    }
}

impl WaitPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Poll the remote system until the object with `key` exists and reports
/// ready. Running out of time is fatal; there is no retry.
pub fn wait_for_ready<K, A>(
    accessor: &mut A,
    filter: &A::Filter,
    key: &K::Key,
    policy: WaitPolicy,
) -> Result<K::Observed>
where
    K: ResourceKind,
    A: Accessor<K>,
{
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        polls += 1;
        let objects = accessor
            .list(filter)
            .map_err(|e| ReconcileError::remote(OperationKind::List, key, e))?;

        match objects.into_iter().find(|o| &K::observed_key(o) == key) {
            Some(object) if K::is_ready(&object) => {
                debug!(resource = K::NAME, key = %key, polls, "Resource is ready");
                return Ok(object);
            }
            Some(_) => debug!(resource = K::NAME, key = %key, polls, "Resource not ready yet"),
            None => debug!(resource = K::NAME, key = %key, polls, "Resource not visible yet"),
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(ReconcileError::Timeout {
                key: key.to_string(),
                waited,
            });
        }
        thread::sleep(policy.interval.min(policy.timeout - waited));
    }
}
