//! Per-resource-type descriptors and the accessor contract.
//!
//! A [`ResourceKind`] says how to identify and compare one type of remote
//! object. An [`Accessor`] reads and mutates those objects in the remote
//! system. The reconciler is generic over both.

use std::fmt::{Debug, Display};

/// Identity and comparison rules for one resource type.
pub trait ResourceKind {
    /// Natural key, e.g. a CIDR block, a domain name or a job name.
    type Key: Ord + Clone + Display + Debug;
    /// Caller-declared target configuration for one object.
    type Spec: Clone + Debug;
    /// A live object as reported by the remote system.
    type Observed: Clone + Debug;

    /// Human-readable resource type, used in logs.
    const NAME: &'static str;

    fn spec_key(spec: &Self::Spec) -> Self::Key;

    fn observed_key(observed: &Self::Observed) -> Self::Key;

    /// Whether the attributes relevant to this type differ.
    fn needs_update(spec: &Self::Spec, observed: &Self::Observed) -> bool;

    /// Protected objects are never deleted, even when absent from the
    /// desired state.
    fn is_protected(_observed: &Self::Observed) -> bool {
        false
    }

    /// Describes an attribute that differs but cannot be changed in place.
    fn immutable_conflict(_spec: &Self::Spec, _observed: &Self::Observed) -> Option<String> {
        None
    }

    /// Whether a freshly created object has finished provisioning.
    fn is_ready(_observed: &Self::Observed) -> bool {
        true
    }
}

/// Read/mutate access to the remote objects of one resource type.
///
/// Every call is synchronous and may fail on its own. Errors are passed
/// through to the caller unchanged.
pub trait Accessor<K: ResourceKind> {
    /// Scope of a `list` call, e.g. the parent VPC.
    type Filter;

    fn list(&mut self, filter: &Self::Filter) -> anyhow::Result<Vec<K::Observed>>;

    fn create(&mut self, spec: &K::Spec) -> anyhow::Result<K::Observed>;

    fn update(&mut self, existing: &K::Observed, desired: &K::Spec) -> anyhow::Result<()>;

    fn delete(&mut self, existing: &K::Observed) -> anyhow::Result<()>;
}
