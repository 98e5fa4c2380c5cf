//! In-memory remote system used by the integration tests.

#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use converge_core::{Accessor, OperationKind, ResourceKind};

/// Test resource: a subnet keyed by CIDR with a single mutable attribute.
pub struct SubnetKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetSpec {
    pub cidr: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub cidr: String,
    pub name: String,
    /// Platform default, never deletable.
    pub default: bool,
    /// Remaining list calls before the subnet reports ready.
    pub pending_polls: u32,
}

impl ResourceKind for SubnetKind {
    type Key = String;
    type Spec = SubnetSpec;
    type Observed = Subnet;

    const NAME: &'static str = "subnet";

    fn spec_key(spec: &SubnetSpec) -> String {
        spec.cidr.clone()
    }

    fn observed_key(observed: &Subnet) -> String {
        observed.cidr.clone()
    }

    fn needs_update(spec: &SubnetSpec, observed: &Subnet) -> bool {
        spec.name != observed.name
    }

    fn is_protected(observed: &Subnet) -> bool {
        observed.default
    }

    fn is_ready(observed: &Subnet) -> bool {
        observed.pending_polls == 0
    }
}

pub fn spec(cidr: &str, name: &str) -> SubnetSpec {
    SubnetSpec {
        cidr: cidr.to_string(),
        name: name.to_string(),
    }
}

pub fn subnet(cidr: &str, name: &str) -> Subnet {
    Subnet {
        id: format!("subnet-{}", cidr.replace(['.', '/'], "-")),
        cidr: cidr.to_string(),
        name: name.to_string(),
        default: false,
        pending_polls: 0,
    }
}

pub fn default_subnet(cidr: &str) -> Subnet {
    Subnet {
        default: true,
        ..subnet(cidr, "default")
    }
}

/// Records every mutating call and can be told to fail one of them.
#[derive(Debug, Default)]
pub struct MemoryAccessor {
    pub objects: Vec<Subnet>,
    pub calls: Vec<(OperationKind, String)>,
    pub lists: u32,
    pub fail_on: Option<(OperationKind, String)>,
    pub fail_list_after: Option<u32>,
    /// Polls a newly created subnet needs before it is ready.
    pub provision_polls: u32,
}

impl MemoryAccessor {
    pub fn with(objects: Vec<Subnet>) -> Self {
        Self {
            objects,
            ..Self::default()
        }
    }

    fn check_fault(&self, op: OperationKind, key: &str) -> Result<()> {
        match &self.fail_on {
            Some((fail_op, fail_key)) if *fail_op == op && fail_key == key => {
                bail!("injected {} failure for {}", op, key)
            }
            _ => Ok(()),
        }
    }

    pub fn mutations(&self) -> Vec<OperationKind> {
        self.calls.iter().map(|(op, _)| *op).collect()
    }
}

impl Accessor<SubnetKind> for MemoryAccessor {
    type Filter = ();

    fn list(&mut self, _filter: &()) -> Result<Vec<Subnet>> {
        self.lists += 1;
        if let Some(limit) = self.fail_list_after {
            if self.lists > limit {
                bail!("describe subnets: connection reset");
            }
        }
        for object in &mut self.objects {
            object.pending_polls = object.pending_polls.saturating_sub(1);
        }
        Ok(self.objects.clone())
    }

    fn create(&mut self, spec: &SubnetSpec) -> Result<Subnet> {
        self.check_fault(OperationKind::Create, &spec.cidr)?;
        self.calls.push((OperationKind::Create, spec.cidr.clone()));
        let created = Subnet {
            pending_polls: self.provision_polls,
            ..subnet(&spec.cidr, &spec.name)
        };
        self.objects.push(created.clone());
        Ok(created)
    }

    fn update(&mut self, existing: &Subnet, desired: &SubnetSpec) -> Result<()> {
        self.check_fault(OperationKind::Update, &existing.cidr)?;
        self.calls.push((OperationKind::Update, existing.cidr.clone()));
        let object = self
            .objects
            .iter_mut()
            .find(|o| o.id == existing.id)
            .ok_or_else(|| anyhow!("subnet {} not found", existing.id))?;
        object.name = desired.name.clone();
        Ok(())
    }

    fn delete(&mut self, existing: &Subnet) -> Result<()> {
        self.check_fault(OperationKind::Delete, &existing.cidr)?;
        self.calls.push((OperationKind::Delete, existing.cidr.clone()));
        let before = self.objects.len();
        self.objects.retain(|o| o.id != existing.id);
        if self.objects.len() == before {
            bail!("subnet {} not found", existing.id);
        }
        Ok(())
    }
}
