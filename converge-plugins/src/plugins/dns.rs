//! `dns` plugin: a hosted domain and its records.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use converge_core::{Accessor, DesiredState, ReconcileError, ResourceKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clients::cloud::{DnsApi, Domain, NewRecord, Record};
use crate::error::{PluginError, Result};
use crate::output::Outcome;
use crate::params::State;
use crate::plugins::Run;
use crate::validation::{self, ValidationError};

/// Relative name of the zone apex.
pub const APEX: &str = "@";

const RECORD_TYPES: &[&str] = &["A", "AAAA", "CAA", "CNAME", "MX", "NS", "SRV", "TXT"];

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsParams {
    pub name: String,
    #[serde(default)]
    pub state: State,
    /// Address for an apex `A` record.
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub records: Vec<RecordParams>,
    #[serde(default)]
    pub purge_records: bool,
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,
}

fn default_ttl() -> u32 {
    1800
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordParams {
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default = "apex")]
    pub name: String,
    pub data: String,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub state: State,
}

fn apex() -> String {
    APEX.to_string()
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Default, Serialize)]
pub struct DnsOutput {
    pub domain: Option<DomainInfo>,
    pub records: Vec<RecordInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainInfo {
    pub id: String,
    pub name: String,
}

impl From<&Domain> for DomainInfo {
    fn from(domain: &Domain) -> Self {
        Self {
            id: domain.id.clone(),
            name: domain.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub data: String,
    pub ttl: u32,
}

impl From<&Record> for RecordInfo {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            record_type: record.record_type.clone(),
            name: record.name.clone(),
            data: record.data.clone(),
            ttl: record.ttl,
        }
    }
}

// =============================================================================
// Resource kinds
// =============================================================================

pub struct DomainKind;

#[derive(Debug, Clone)]
pub struct DomainSpec {
    pub name: String,
}

impl ResourceKind for DomainKind {
    type Key = String;
    type Spec = DomainSpec;
    type Observed = Domain;

    const NAME: &'static str = "domain";

    fn spec_key(spec: &DomainSpec) -> String {
        spec.name.clone()
    }

    fn observed_key(observed: &Domain) -> String {
        observed.name.clone()
    }

    fn needs_update(_spec: &DomainSpec, _observed: &Domain) -> bool {
        false
    }
}

struct DomainAccessor<'a, C> {
    api: &'a mut C,
}

impl<C: DnsApi> Accessor<DomainKind> for DomainAccessor<'_, C> {
    /// Domain name to look up.
    type Filter = String;

    fn list(&mut self, name: &String) -> anyhow::Result<Vec<Domain>> {
        Ok(self
            .api
            .list_domains()?
            .into_iter()
            .filter(|d| &d.name == name)
            .collect())
    }

    fn create(&mut self, spec: &DomainSpec) -> anyhow::Result<Domain> {
        self.api.create_domain(&spec.name)
    }

    fn update(&mut self, _existing: &Domain, _desired: &DomainSpec) -> anyhow::Result<()> {
        Ok(())
    }

    fn delete(&mut self, existing: &Domain) -> anyhow::Result<()> {
        self.api.delete_domain(&existing.id)
    }
}

/// Records are identified by type, name and data together, so several
/// records may share a name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordKey {
    pub record_type: String,
    pub name: String,
    pub data: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.record_type, self.name, self.data)
    }
}

pub struct RecordKind;

#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub key: RecordKey,
    pub ttl: u32,
}

impl ResourceKind for RecordKind {
    type Key = RecordKey;
    type Spec = RecordSpec;
    type Observed = Record;

    const NAME: &'static str = "record";

    fn spec_key(spec: &RecordSpec) -> RecordKey {
        spec.key.clone()
    }

    fn observed_key(observed: &Record) -> RecordKey {
        RecordKey {
            record_type: normalize_type(&observed.record_type),
            name: normalize_name(&observed.name),
            data: observed.data.trim().to_string(),
        }
    }

    fn needs_update(spec: &RecordSpec, observed: &Record) -> bool {
        spec.ttl != observed.ttl
    }

    fn is_protected(observed: &Record) -> bool {
        is_provider_record(
            &normalize_type(&observed.record_type),
            &normalize_name(&observed.name),
        )
    }
}

fn is_provider_record(record_type: &str, name: &str) -> bool {
    name == APEX && (record_type == "SOA" || record_type == "NS")
}

fn normalize_type(record_type: &str) -> String {
    record_type.trim().to_ascii_uppercase()
}

/// Relative, lowercase, no trailing dot; the bare zone is [`APEX`].
fn normalize_name(name: &str) -> String {
    match name.trim().trim_end_matches('.').to_ascii_lowercase() {
        n if n.is_empty() => APEX.to_string(),
        n => n,
    }
}

/// Which records a pass may see, and therefore delete.
#[derive(Debug, Clone)]
pub enum RecordScope {
    All,
    Keys(BTreeSet<RecordKey>),
}

impl RecordScope {
    fn admits(&self, key: &RecordKey) -> bool {
        match self {
            Self::All => true,
            Self::Keys(keys) => keys.contains(key),
        }
    }
}

struct RecordAccessor<'a, C> {
    api: &'a mut C,
    domain_id: String,
}

impl<C: DnsApi> Accessor<RecordKind> for RecordAccessor<'_, C> {
    type Filter = RecordScope;

    fn list(&mut self, scope: &RecordScope) -> anyhow::Result<Vec<Record>> {
        Ok(self
            .api
            .list_records(&self.domain_id)?
            .into_iter()
            .filter(|r| scope.admits(&RecordKind::observed_key(r)))
            .collect())
    }

    fn create(&mut self, spec: &RecordSpec) -> anyhow::Result<Record> {
        self.api.create_record(
            &self.domain_id,
            &NewRecord {
                record_type: spec.key.record_type.clone(),
                name: spec.key.name.clone(),
                data: spec.key.data.clone(),
                ttl: spec.ttl,
            },
        )
    }

    fn update(&mut self, existing: &Record, desired: &RecordSpec) -> anyhow::Result<()> {
        self.api.update_record_ttl(&existing.id, desired.ttl)
    }

    fn delete(&mut self, existing: &Record) -> anyhow::Result<()> {
        self.api.delete_record(&existing.id)
    }
}

// =============================================================================
// Plugin
// =============================================================================

fn record_key(record_type: &str, name: &str, data: &str) -> Result<RecordKey> {
    let record_type = normalize_type(record_type);
    let name = normalize_name(name);

    if is_provider_record(&record_type, &name) || record_type == "SOA" {
        return Err(ValidationError::ProviderRecord(format!("{} {}", record_type, name)).into());
    }
    if !RECORD_TYPES.contains(&record_type.as_str()) {
        return Err(ValidationError::InvalidRecordType(record_type).into());
    }

    let data = data.trim().to_string();
    if data.is_empty() {
        return Err(ValidationError::Required("records[].data").into());
    }
    let valid = match record_type.as_str() {
        "A" => data.parse::<Ipv4Addr>().is_ok(),
        "AAAA" => data.parse::<Ipv6Addr>().is_ok(),
        _ => true,
    };
    if !valid {
        return Err(PluginError::InvalidParams(format!(
            "{} record {} has invalid data {:?}",
            record_type, name, data
        )));
    }

    Ok(RecordKey {
        record_type,
        name,
        data,
    })
}

/// Desired records and the scope of the record pass.
fn declare_records(params: &DnsParams) -> Result<(Vec<RecordSpec>, RecordScope)> {
    let mut present = Vec::new();
    let mut absent = BTreeSet::new();

    if let Some(ip) = &params.ip {
        present.push(RecordSpec {
            key: record_key("A", APEX, ip)?,
            ttl: params.default_ttl,
        });
    }
    for record in &params.records {
        let key = record_key(&record.record_type, &record.name, &record.data)?;
        match record.state {
            State::Present => present.push(RecordSpec {
                key,
                ttl: record.ttl.unwrap_or(params.default_ttl),
            }),
            State::Absent => {
                absent.insert(key);
            }
        }
    }

    if let Some(spec) = present.iter().find(|s| absent.contains(&s.key)) {
        return Err(ReconcileError::precondition_for(
            &spec.key,
            "record is declared both present and absent",
        )
        .into());
    }

    let scope = if params.purge_records {
        RecordScope::All
    } else {
        let mut keys = absent;
        keys.extend(present.iter().map(|s| s.key.clone()));
        RecordScope::Keys(keys)
    };
    Ok((present, scope))
}

/// Ensure the domain described by `params` exists (or not) in `api`.
pub fn run<C: DnsApi>(api: &mut C, params: DnsParams, check_mode: bool) -> Outcome<DnsOutput> {
    let mut run = Run::new(check_mode);
    let mut out = DnsOutput::default();
    let status = ensure(api, &params, &mut run, &mut out);
    run.finish(out, status)
}

fn ensure<C: DnsApi>(
    api: &mut C,
    params: &DnsParams,
    run: &mut Run,
    out: &mut DnsOutput,
) -> Result<()> {
    let name = validation::normalize_domain(&params.name)?;

    if params.state == State::Absent {
        // Deleting the domain takes its records with it.
        let result = run.reconciler(true, None).converge(
            &DesiredState::<DomainKind>::empty(),
            &mut DomainAccessor { api: &mut *api },
            &name,
        );
        out.domain = result.final_state().first().map(DomainInfo::from);
        run.absorb(result)?;
        return Ok(());
    }

    let (records, scope) = declare_records(params)?;

    // Prune stays off: other domains in the account are not ours.
    let result = run.reconciler(false, None).converge(
        &DesiredState::<DomainKind>::new(vec![DomainSpec { name: name.clone() }])?,
        &mut DomainAccessor { api: &mut *api },
        &name,
    );
    out.domain = result.final_state().first().map(DomainInfo::from);
    let Some(domain) = run.absorb(result)?.into_iter().next() else {
        if run.check_mode() {
            debug!(domain = %name, "Domain would be created, skipping records");
            return Ok(());
        }
        return Err(
            ReconcileError::precondition_for(&name, "domain is not visible after creation").into(),
        );
    };
    info!(domain = %name, id = %domain.id, "Domain in place");

    let result = run.reconciler(true, None).converge(
        &DesiredState::<RecordKind>::new(records)?,
        &mut RecordAccessor {
            api: &mut *api,
            domain_id: domain.id.clone(),
        },
        &scope,
    );
    out.records = result.final_state().iter().map(RecordInfo::from).collect();
    run.absorb(result)?;

    Ok(())
}
