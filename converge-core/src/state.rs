//! Desired and observed state collections.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;

use crate::error::{ReconcileError, Result};
use crate::kind::ResourceKind;

/// Caller-declared target configuration: an ordered collection of specs
/// with unique natural keys.
pub struct DesiredState<K: ResourceKind> {
    specs: Vec<K::Spec>,
}

impl<K: ResourceKind> DesiredState<K> {
    /// Build a desired state, rejecting duplicate keys.
    pub fn new(specs: Vec<K::Spec>) -> Result<Self> {
        let mut seen = BTreeMap::new();
        for spec in &specs {
            let key = K::spec_key(spec);
            if seen.insert(key.clone(), ()).is_some() {
                return Err(ReconcileError::precondition_for(
                    &key,
                    format!("{} {} is declared more than once", K::NAME, key),
                ));
            }
        }
        Ok(Self { specs })
    }

    /// A desired state with no objects. Every unprotected observed object
    /// becomes a delete candidate.
    pub fn empty() -> Self {
        Self { specs: Vec::new() }
    }

    pub fn specs(&self) -> &[K::Spec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub(crate) fn contains_key(&self, key: &K::Key) -> bool {
        self.specs.iter().any(|s| &K::spec_key(s) == key)
    }
}

impl<K: ResourceKind> Clone for DesiredState<K> {
    fn clone(&self) -> Self {
        Self {
            specs: self.specs.clone(),
        }
    }
}

impl<K: ResourceKind> fmt::Debug for DesiredState<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesiredState")
            .field("kind", &K::NAME)
            .field("specs", &self.specs)
            .finish()
    }
}

/// Snapshot of the remote objects that currently exist, keyed by natural
/// identity. Always fetched fresh; never cached across passes.
pub struct ObservedState<K: ResourceKind> {
    objects: Vec<K::Observed>,
    index: BTreeMap<K::Key, usize>,
}

impl<K: ResourceKind> ObservedState<K> {
    /// Build a snapshot. Two remote objects sharing one natural key make
    /// the key ambiguous, which is fatal.
    pub fn new(objects: Vec<K::Observed>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (pos, object) in objects.iter().enumerate() {
            match index.entry(K::observed_key(object)) {
                Entry::Vacant(slot) => {
                    slot.insert(pos);
                }
                Entry::Occupied(slot) => {
                    let key = slot.key();
                    return Err(ReconcileError::precondition_for(
                        key,
                        format!("more than one existing {} matches {}", K::NAME, key),
                    ));
                }
            }
        }
        Ok(Self { objects, index })
    }

    pub fn empty() -> Self {
        Self {
            objects: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &K::Key) -> Option<&K::Observed> {
        self.index.get(key).and_then(|&pos| self.objects.get(pos))
    }

    pub fn objects(&self) -> &[K::Observed] {
        &self.objects
    }

    pub fn into_objects(self) -> Vec<K::Observed> {
        self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<K: ResourceKind> Clone for ObservedState<K> {
    fn clone(&self) -> Self {
        Self {
            objects: self.objects.clone(),
            index: self.index.clone(),
        }
    }
}

impl<K: ResourceKind> fmt::Debug for ObservedState<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedState")
            .field("kind", &K::NAME)
            .field("objects", &self.objects)
            .finish()
    }
}
