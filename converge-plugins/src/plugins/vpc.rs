//! `vpc` plugin: a virtual network with its subnets, internet gateway and
//! route tables.
//!
//! Passes run in dependency order: VPC, subnets, gateway, route tables.
//! Removal runs the same passes in reverse with nothing desired. The VPC's
//! main route table is protected and goes away with the VPC itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use converge_core::{
    Accessor, DesiredState, ObservedState, OperationKind, ReconcileError, ResourceKind,
    WaitPolicy,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clients::cloud::{
    CreateVpc, InternetGateway, NAME_TAG, Route, RouteTable, Subnet, Tags, Vpc, VpcApi,
    VpcFilter, VpcState,
};
use crate::error::Result;
use crate::output::Outcome;
use crate::params::{State, default_true};
use crate::plugins::Run;
use crate::validation::{self, ValidationError};

/// Route target that stands for the VPC's own internet gateway.
pub const GATEWAY_ALIAS: &str = "igw";

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VpcParams {
    pub name: String,
    pub cidr_block: String,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default = "default_true")]
    pub dns_support: bool,
    #[serde(default = "default_true")]
    pub dns_hostnames: bool,
    #[serde(default)]
    pub subnets: Vec<SubnetParams>,
    #[serde(default)]
    pub internet_gateway: bool,
    #[serde(default)]
    pub route_tables: Vec<RouteTableParams>,
    #[serde(default = "default_true")]
    pub purge_subnets: bool,
    #[serde(default = "default_true")]
    pub purge_route_tables: bool,
    #[serde(default = "default_true")]
    pub wait: bool,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,
}

fn default_wait_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetParams {
    pub cidr: String,
    #[serde(default)]
    pub az: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTableParams {
    pub name: String,
    /// CIDR blocks of declared subnets to associate.
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RouteParams>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteParams {
    pub dest: String,
    pub gateway_id: String,
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Default, Serialize)]
pub struct VpcOutput {
    pub vpc: Option<VpcInfo>,
    pub subnets: Vec<SubnetInfo>,
    pub internet_gateway: Option<GatewayInfo>,
    pub route_tables: Vec<RouteTableInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VpcInfo {
    pub id: String,
    pub name: Option<String>,
    pub cidr_block: String,
    pub state: VpcState,
    pub dns_support: bool,
    pub dns_hostnames: bool,
    pub tags: Tags,
}

impl From<&Vpc> for VpcInfo {
    fn from(vpc: &Vpc) -> Self {
        Self {
            id: vpc.id.clone(),
            name: vpc.tags.get(NAME_TAG).cloned(),
            cidr_block: vpc.cidr_block.clone(),
            state: vpc.state,
            dns_support: vpc.dns_support,
            dns_hostnames: vpc.dns_hostnames,
            tags: vpc.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubnetInfo {
    pub id: String,
    pub cidr: String,
    pub az: String,
    pub tags: Tags,
}

impl From<&Subnet> for SubnetInfo {
    fn from(subnet: &Subnet) -> Self {
        Self {
            id: subnet.id.clone(),
            cidr: subnet.cidr.clone(),
            az: subnet.az.clone(),
            tags: subnet.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayInfo {
    pub id: String,
}

impl From<&InternetGateway> for GatewayInfo {
    fn from(gateway: &InternetGateway) -> Self {
        Self {
            id: gateway.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteTableInfo {
    pub id: String,
    pub name: Option<String>,
    pub main: bool,
    pub subnets: Vec<String>,
    pub routes: Vec<Route>,
}

impl From<&RouteTable> for RouteTableInfo {
    fn from(table: &RouteTable) -> Self {
        Self {
            id: table.id.clone(),
            name: table.tags.get(NAME_TAG).cloned(),
            main: table.main,
            subnets: table.subnet_ids.clone(),
            routes: table.routes.clone(),
        }
    }
}

// =============================================================================
// Resource kinds
// =============================================================================

/// A VPC is identified by its `Name` tag together with its CIDR block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VpcKey {
    pub name: String,
    pub cidr_block: String,
}

impl fmt::Display for VpcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.cidr_block)
    }
}

pub struct VpcKind;

#[derive(Debug, Clone)]
pub struct VpcSpec {
    pub name: String,
    pub cidr_block: String,
    pub dns_support: bool,
    pub dns_hostnames: bool,
    /// Full tag set, `Name` included.
    pub tags: Tags,
}

impl ResourceKind for VpcKind {
    type Key = VpcKey;
    type Spec = VpcSpec;
    type Observed = Vpc;

    const NAME: &'static str = "vpc";

    fn spec_key(spec: &VpcSpec) -> VpcKey {
        VpcKey {
            name: spec.name.clone(),
            cidr_block: spec.cidr_block.clone(),
        }
    }

    fn observed_key(observed: &Vpc) -> VpcKey {
        VpcKey {
            name: observed.tags.get(NAME_TAG).cloned().unwrap_or_default(),
            cidr_block: observed.cidr_block.clone(),
        }
    }

    fn needs_update(spec: &VpcSpec, observed: &Vpc) -> bool {
        spec.dns_support != observed.dns_support
            || spec.dns_hostnames != observed.dns_hostnames
            || spec.tags != observed.tags
    }

    fn is_ready(observed: &Vpc) -> bool {
        observed.state == VpcState::Available
    }
}

struct VpcAccessor<'a, C> {
    api: &'a mut C,
}

impl<C: VpcApi> Accessor<VpcKind> for VpcAccessor<'_, C> {
    type Filter = VpcFilter;

    fn list(&mut self, filter: &VpcFilter) -> anyhow::Result<Vec<Vpc>> {
        self.api.describe_vpcs(filter)
    }

    fn create(&mut self, spec: &VpcSpec) -> anyhow::Result<Vpc> {
        self.api.create_vpc(&CreateVpc {
            cidr_block: spec.cidr_block.clone(),
            dns_support: spec.dns_support,
            dns_hostnames: spec.dns_hostnames,
            tags: spec.tags.clone(),
        })
    }

    fn update(&mut self, existing: &Vpc, desired: &VpcSpec) -> anyhow::Result<()> {
        if existing.dns_support != desired.dns_support
            || existing.dns_hostnames != desired.dns_hostnames
        {
            self.api.modify_vpc_attributes(
                &existing.id,
                desired.dns_support,
                desired.dns_hostnames,
            )?;
        }
        if existing.tags != desired.tags {
            self.api.set_tags(&existing.id, &desired.tags)?;
        }
        Ok(())
    }

    fn delete(&mut self, existing: &Vpc) -> anyhow::Result<()> {
        self.api.delete_vpc(&existing.id)
    }
}

/// Subnets are keyed by CIDR block. The zone is fixed at creation.
pub struct SubnetKind;

#[derive(Debug, Clone)]
pub struct SubnetSpec {
    pub cidr: String,
    pub az: Option<String>,
    pub tags: Tags,
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
        spec.tags != observed.tags
    }

    fn immutable_conflict(spec: &SubnetSpec, observed: &Subnet) -> Option<String> {
        match &spec.az {
            Some(az) if az != &observed.az => Some(format!(
                "exists in zone {}, cannot move it to {}",
                observed.az, az
            )),
            _ => None,
        }
    }
}

struct SubnetAccessor<'a, C> {
    api: &'a mut C,
    vpc_id: String,
}

impl<C: VpcApi> Accessor<SubnetKind> for SubnetAccessor<'_, C> {
    type Filter = ();

    fn list(&mut self, _filter: &()) -> anyhow::Result<Vec<Subnet>> {
        self.api.describe_subnets(&self.vpc_id)
    }

    fn create(&mut self, spec: &SubnetSpec) -> anyhow::Result<Subnet> {
        self.api
            .create_subnet(&self.vpc_id, &spec.cidr, spec.az.as_deref(), &spec.tags)
    }

    fn update(&mut self, existing: &Subnet, desired: &SubnetSpec) -> anyhow::Result<()> {
        self.api.set_tags(&existing.id, &desired.tags)
    }

    fn delete(&mut self, existing: &Subnet) -> anyhow::Result<()> {
        self.api.delete_subnet(&existing.id)
    }
}

/// At most one internet gateway per VPC, keyed by the VPC it is attached to.
pub struct GatewayKind;

#[derive(Debug, Clone)]
pub struct GatewaySpec {
    pub vpc_id: String,
}

impl ResourceKind for GatewayKind {
    type Key = String;
    type Spec = GatewaySpec;
    type Observed = InternetGateway;

    const NAME: &'static str = "internet gateway";

    fn spec_key(spec: &GatewaySpec) -> String {
        spec.vpc_id.clone()
    }

    fn observed_key(observed: &InternetGateway) -> String {
        observed
            .vpc_id
            .clone()
            .unwrap_or_else(|| observed.id.clone())
    }

    fn needs_update(_spec: &GatewaySpec, _observed: &InternetGateway) -> bool {
        false
    }
}

struct GatewayAccessor<'a, C> {
    api: &'a mut C,
    vpc_id: String,
}

impl<C: VpcApi> Accessor<GatewayKind> for GatewayAccessor<'_, C> {
    type Filter = ();

    fn list(&mut self, _filter: &()) -> anyhow::Result<Vec<InternetGateway>> {
        self.api.describe_internet_gateways(&self.vpc_id)
    }

    fn create(&mut self, spec: &GatewaySpec) -> anyhow::Result<InternetGateway> {
        self.api.create_internet_gateway(&spec.vpc_id)
    }

    fn update(&mut self, _existing: &InternetGateway, _desired: &GatewaySpec) -> anyhow::Result<()> {
        Ok(())
    }

    fn delete(&mut self, existing: &InternetGateway) -> anyhow::Result<()> {
        self.api.delete_internet_gateway(&existing.id)
    }
}

/// Route tables are keyed by their `Name` tag. The main table has none and
/// falls back to its id; it is protected.
pub struct RouteTableKind;

#[derive(Debug, Clone)]
pub struct RouteTableSpec {
    pub name: String,
    /// Sorted subnet ids.
    pub subnet_ids: Vec<String>,
    /// Sorted routes, excluding the implicit local route.
    pub routes: Vec<Route>,
    pub tags: Tags,
}

fn custom_routes(table: &RouteTable) -> Vec<Route> {
    let mut routes: Vec<Route> = table
        .routes
        .iter()
        .filter(|r| r.target != "local")
        .cloned()
        .collect();
    routes.sort();
    routes
}

fn sorted_associations(table: &RouteTable) -> Vec<String> {
    let mut ids = table.subnet_ids.clone();
    ids.sort();
    ids
}

impl ResourceKind for RouteTableKind {
    type Key = String;
    type Spec = RouteTableSpec;
    type Observed = RouteTable;

    const NAME: &'static str = "route table";

    fn spec_key(spec: &RouteTableSpec) -> String {
        spec.name.clone()
    }

    fn observed_key(observed: &RouteTable) -> String {
        observed
            .tags
            .get(NAME_TAG)
            .cloned()
            .unwrap_or_else(|| observed.id.clone())
    }

    fn needs_update(spec: &RouteTableSpec, observed: &RouteTable) -> bool {
        spec.tags != observed.tags
            || spec.routes != custom_routes(observed)
            || spec.subnet_ids != sorted_associations(observed)
    }

    fn is_protected(observed: &RouteTable) -> bool {
        observed.main
    }
}

struct RouteTableAccessor<'a, C> {
    api: &'a mut C,
    vpc_id: String,
}

impl<C: VpcApi> Accessor<RouteTableKind> for RouteTableAccessor<'_, C> {
    type Filter = ();

    fn list(&mut self, _filter: &()) -> anyhow::Result<Vec<RouteTable>> {
        self.api.describe_route_tables(&self.vpc_id)
    }

    fn create(&mut self, spec: &RouteTableSpec) -> anyhow::Result<RouteTable> {
        let mut table = self.api.create_route_table(&self.vpc_id, &spec.tags)?;
        if !spec.routes.is_empty() {
            self.api.replace_routes(&table.id, &spec.routes)?;
            table.routes.extend(spec.routes.iter().cloned());
        }
        if !spec.subnet_ids.is_empty() {
            self.api.set_associations(&table.id, &spec.subnet_ids)?;
            table.subnet_ids = spec.subnet_ids.clone();
        }
        Ok(table)
    }

    fn update(&mut self, existing: &RouteTable, desired: &RouteTableSpec) -> anyhow::Result<()> {
        if custom_routes(existing) != desired.routes {
            self.api.replace_routes(&existing.id, &desired.routes)?;
        }
        if sorted_associations(existing) != desired.subnet_ids {
            self.api.set_associations(&existing.id, &desired.subnet_ids)?;
        }
        if existing.tags != desired.tags {
            self.api.set_tags(&existing.id, &desired.tags)?;
        }
        Ok(())
    }

    fn delete(&mut self, existing: &RouteTable) -> anyhow::Result<()> {
        if !existing.subnet_ids.is_empty() {
            self.api.set_associations(&existing.id, &[])?;
        }
        self.api.delete_route_table(&existing.id)
    }
}

// =============================================================================
// Plugin
// =============================================================================

/// Validated, normalized form of the parameters.
struct Declared {
    vpc: VpcSpec,
    subnets: Vec<SubnetSpec>,
    route_tables: Vec<DeclaredTable>,
}

struct DeclaredTable {
    name: String,
    subnet_cidrs: Vec<String>,
    routes: Vec<Route>,
    tags: Tags,
}

impl DeclaredTable {
    /// Swap CIDRs and the gateway alias for ids. Anything still missing can
    /// only be a resource that check mode did not create.
    fn resolve(&self, subnet_ids: &BTreeMap<String, String>, gateway_id: Option<&str>) -> RouteTableSpec {
        let mut ids: Vec<String> = self
            .subnet_cidrs
            .iter()
            .map(|cidr| {
                subnet_ids
                    .get(cidr)
                    .cloned()
                    .unwrap_or_else(|| format!("pending:{}", cidr))
            })
            .collect();
        ids.sort();

        let mut routes: Vec<Route> = self
            .routes
            .iter()
            .map(|route| Route {
                destination: route.destination.clone(),
                target: if route.target == GATEWAY_ALIAS {
                    gateway_id
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("pending:{}", GATEWAY_ALIAS))
                } else {
                    route.target.clone()
                },
            })
            .collect();
        routes.sort();

        RouteTableSpec {
            name: self.name.clone(),
            subnet_ids: ids,
            routes,
            tags: self.tags.clone(),
        }
    }
}

fn vpc_filter(params: &VpcParams) -> Result<VpcFilter> {
    if params.name.trim().is_empty() {
        return Err(ValidationError::Required("name").into());
    }
    Ok(VpcFilter {
        name: params.name.clone(),
        cidr_block: validation::parse_ipv4_cidr(&params.cidr_block)?.to_string(),
    })
}

fn declare(params: &VpcParams, filter: &VpcFilter) -> Result<Declared> {
    if params.wait && params.wait_timeout == 0 {
        return Err(ValidationError::InvalidWaitTimeout.into());
    }

    let vpc_net = validation::parse_ipv4_cidr(&filter.cidr_block)?;
    let mut tags = params.tags.clone();
    tags.insert(NAME_TAG.to_string(), params.name.clone());
    let vpc = VpcSpec {
        name: params.name.clone(),
        cidr_block: filter.cidr_block.clone(),
        dns_support: params.dns_support,
        dns_hostnames: params.dns_hostnames,
        tags,
    };

    let mut nets = Vec::new();
    let mut subnets = Vec::new();
    for subnet in &params.subnets {
        let net = validation::parse_ipv4_cidr(&subnet.cidr)?;
        if !vpc_net.contains(&net) {
            return Err(
                ValidationError::SubnetOutsideVpc(net.to_string(), vpc_net.to_string()).into(),
            );
        }
        for other in &nets {
            if *other != net && validation::ipv4_subnets_overlap(other, &net) {
                return Err(ValidationError::SubnetOverlap(other.to_string(), net.to_string()).into());
            }
        }
        nets.push(net);
        subnets.push(SubnetSpec {
            cidr: net.to_string(),
            az: subnet.az.clone(),
            tags: subnet.tags.clone(),
        });
    }

    let declared_cidrs: BTreeSet<String> = subnets.iter().map(|s| s.cidr.clone()).collect();
    let mut associated: BTreeMap<String, String> = BTreeMap::new();
    let mut route_tables = Vec::new();
    for table in &params.route_tables {
        if table.name.trim().is_empty() {
            return Err(ValidationError::Required("route_tables[].name").into());
        }

        let mut subnet_cidrs = Vec::new();
        for cidr in &table.subnets {
            let cidr = validation::parse_ipv4_cidr(cidr)?.to_string();
            if !declared_cidrs.contains(&cidr) {
                return Err(ReconcileError::precondition_for(
                    &table.name,
                    format!(
                        "route table {} references undeclared subnet {}",
                        table.name, cidr
                    ),
                )
                .into());
            }
            if let Some(owner) = associated.insert(cidr.clone(), table.name.clone()) {
                return Err(ReconcileError::precondition_for(
                    &table.name,
                    format!(
                        "subnet {} is associated with both {} and {}",
                        cidr, owner, table.name
                    ),
                )
                .into());
            }
            subnet_cidrs.push(cidr);
        }

        let mut routes = Vec::new();
        for route in &table.routes {
            if route.gateway_id == GATEWAY_ALIAS && !params.internet_gateway {
                return Err(ReconcileError::precondition_for(
                    &table.name,
                    format!(
                        "route table {} routes {} via the internet gateway, but internet_gateway is false",
                        table.name, route.dest
                    ),
                )
                .into());
            }
            routes.push(Route {
                destination: validation::parse_ipv4_cidr(&route.dest)?.to_string(),
                target: route.gateway_id.clone(),
            });
        }

        let mut tags = table.tags.clone();
        tags.insert(NAME_TAG.to_string(), table.name.clone());
        route_tables.push(DeclaredTable {
            name: table.name.clone(),
            subnet_cidrs,
            routes,
            tags,
        });
    }

    Ok(Declared {
        vpc,
        subnets,
        route_tables,
    })
}

/// Ensure the VPC described by `params` exists (or not) in `api`.
pub fn run<C: VpcApi>(api: &mut C, params: VpcParams, check_mode: bool) -> Outcome<VpcOutput> {
    let mut run = Run::new(check_mode);
    let mut out = VpcOutput::default();
    let status = match params.state {
        State::Present => ensure_present(api, &params, &mut run, &mut out),
        State::Absent => ensure_absent(api, &params, &mut run, &mut out),
    };
    run.finish(out, status)
}

fn ensure_present<C: VpcApi>(
    api: &mut C,
    params: &VpcParams,
    run: &mut Run,
    out: &mut VpcOutput,
) -> Result<()> {
    let filter = vpc_filter(params)?;
    let declared = declare(params, &filter)?;
    let key = VpcKind::spec_key(&declared.vpc);

    // Never prune here: other VPCs matching nothing we declared are not ours.
    let wait = params
        .wait
        .then(|| WaitPolicy::with_timeout(Duration::from_secs(params.wait_timeout)));
    let result = run.reconciler(false, wait).converge(
        &DesiredState::<VpcKind>::new(vec![declared.vpc])?,
        &mut VpcAccessor { api: &mut *api },
        &filter,
    );
    out.vpc = result
        .final_state()
        .iter()
        .find(|v| VpcKind::observed_key(v) == key)
        .map(VpcInfo::from);
    let vpcs = run.absorb(result)?;

    let Some(vpc) = vpcs.into_iter().find(|v| VpcKind::observed_key(v) == key) else {
        if run.check_mode() {
            debug!(vpc = %key, "VPC would be created, skipping child resources");
            return Ok(());
        }
        return Err(
            ReconcileError::precondition_for(&key, "VPC is not visible after creation").into(),
        );
    };
    info!(vpc = %key, id = %vpc.id, "VPC in place");

    let result = run.reconciler(params.purge_subnets, None).converge(
        &DesiredState::<SubnetKind>::new(declared.subnets)?,
        &mut SubnetAccessor {
            api: &mut *api,
            vpc_id: vpc.id.clone(),
        },
        &(),
    );
    out.subnets = result.final_state().iter().map(SubnetInfo::from).collect();
    let subnet_ids: BTreeMap<String, String> = run
        .absorb(result)?
        .into_iter()
        .map(|s| (s.cidr, s.id))
        .collect();

    let gateways = if params.internet_gateway {
        vec![GatewaySpec {
            vpc_id: vpc.id.clone(),
        }]
    } else {
        Vec::new()
    };
    let result = run.reconciler(true, None).converge(
        &DesiredState::<GatewayKind>::new(gateways)?,
        &mut GatewayAccessor {
            api: &mut *api,
            vpc_id: vpc.id.clone(),
        },
        &(),
    );
    out.internet_gateway = result.final_state().first().map(GatewayInfo::from);
    let gateway_id = run.absorb(result)?.into_iter().next().map(|g| g.id);

    let tables: Vec<RouteTableSpec> = declared
        .route_tables
        .iter()
        .map(|t| t.resolve(&subnet_ids, gateway_id.as_deref()))
        .collect();
    let result = run.reconciler(params.purge_route_tables, None).converge(
        &DesiredState::<RouteTableKind>::new(tables)?,
        &mut RouteTableAccessor {
            api: &mut *api,
            vpc_id: vpc.id.clone(),
        },
        &(),
    );
    out.route_tables = result
        .final_state()
        .iter()
        .map(RouteTableInfo::from)
        .collect();
    run.absorb(result)?;

    Ok(())
}

fn ensure_absent<C: VpcApi>(
    api: &mut C,
    params: &VpcParams,
    run: &mut Run,
    out: &mut VpcOutput,
) -> Result<()> {
    let filter = vpc_filter(params)?;

    let found = VpcAccessor { api: &mut *api }.list(&filter).map_err(|e| {
        ReconcileError::remote(OperationKind::List, VpcKind::NAME, e)
    })?;
    let observed = ObservedState::<VpcKind>::new(found)?;
    let Some(vpc) = observed.objects().first().cloned() else {
        debug!(name = %params.name, "VPC already absent");
        return Ok(());
    };
    out.vpc = Some(VpcInfo::from(&vpc));

    let result = run.reconciler(true, None).converge(
        &DesiredState::<RouteTableKind>::empty(),
        &mut RouteTableAccessor {
            api: &mut *api,
            vpc_id: vpc.id.clone(),
        },
        &(),
    );
    out.route_tables = result
        .final_state()
        .iter()
        .map(RouteTableInfo::from)
        .collect();
    run.absorb(result)?;

    let result = run.reconciler(true, None).converge(
        &DesiredState::<SubnetKind>::empty(),
        &mut SubnetAccessor {
            api: &mut *api,
            vpc_id: vpc.id.clone(),
        },
        &(),
    );
    out.subnets = result.final_state().iter().map(SubnetInfo::from).collect();
    run.absorb(result)?;

    let result = run.reconciler(true, None).converge(
        &DesiredState::<GatewayKind>::empty(),
        &mut GatewayAccessor {
            api: &mut *api,
            vpc_id: vpc.id.clone(),
        },
        &(),
    );
    out.internet_gateway = result.final_state().first().map(GatewayInfo::from);
    run.absorb(result)?;

    let result = run.reconciler(true, None).reconcile(
        &DesiredState::empty(),
        observed,
        &mut VpcAccessor { api: &mut *api },
        &filter,
    );
    out.vpc = result.final_state().first().map(VpcInfo::from);
    run.absorb(result)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(subnets: &[&str]) -> VpcParams {
        VpcParams {
            name: "web".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            state: State::Present,
            tags: Tags::new(),
            dns_support: true,
            dns_hostnames: true,
            subnets: subnets
                .iter()
                .map(|cidr| SubnetParams {
                    cidr: cidr.to_string(),
                    az: None,
                    tags: Tags::new(),
                })
                .collect(),
            internet_gateway: false,
            route_tables: Vec::new(),
            purge_subnets: true,
            purge_route_tables: true,
            wait: true,
            wait_timeout: 300,
        }
    }

    fn table(name: &str, subnets: &[&str], routes: &[(&str, &str)]) -> RouteTableParams {
        RouteTableParams {
            name: name.to_string(),
            subnets: subnets.iter().map(|s| s.to_string()).collect(),
            routes: routes
                .iter()
                .map(|(dest, gw)| RouteParams {
                    dest: dest.to_string(),
                    gateway_id: gw.to_string(),
                })
                .collect(),
            tags: Tags::new(),
        }
    }

    fn declare_params(params: &VpcParams) -> Result<Declared> {
        let filter = vpc_filter(params)?;
        declare(params, &filter)
    }

    #[test]
    fn name_tag_is_managed() {
        let declared = declare_params(&params(&[])).unwrap();
        assert_eq!(declared.vpc.tags.get(NAME_TAG), Some(&"web".to_string()));
    }

    #[test]
    fn subnet_outside_vpc_is_rejected() {
        let err = declare_params(&params(&["192.168.1.0/24"])).err().unwrap();
        assert!(err.to_string().contains("not within VPC"));
    }

    #[test]
    fn overlapping_subnets_are_rejected() {
        let err = declare_params(&params(&["10.0.0.0/24", "10.0.0.128/25"]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn gateway_route_requires_gateway() {
        let mut p = params(&["10.0.1.0/24"]);
        p.route_tables = vec![table("public", &["10.0.1.0/24"], &[("0.0.0.0/0", "igw")])];
        let err = declare_params(&p).err().unwrap();
        assert_eq!(err.info().kind, "precondition");
        assert_eq!(err.info().key.as_deref(), Some("public"));
    }

    #[test]
    fn undeclared_subnet_in_route_table_is_rejected() {
        let mut p = params(&["10.0.1.0/24"]);
        p.route_tables = vec![table("public", &["10.0.2.0/24"], &[])];
        let err = declare_params(&p).err().unwrap();
        assert!(err.to_string().contains("undeclared subnet 10.0.2.0/24"));
    }

    #[test]
    fn subnet_in_two_tables_is_rejected() {
        let mut p = params(&["10.0.1.0/24"]);
        p.route_tables = vec![
            table("a", &["10.0.1.0/24"], &[]),
            table("b", &["10.0.1.0/24"], &[]),
        ];
        let err = declare_params(&p).err().unwrap();
        assert!(err.to_string().contains("associated with both a and b"));
    }

    #[test]
    fn resolve_substitutes_ids_and_sorts() {
        let declared = DeclaredTable {
            name: "public".to_string(),
            subnet_cidrs: vec!["10.0.2.0/24".to_string(), "10.0.1.0/24".to_string()],
            routes: vec![Route {
                destination: "0.0.0.0/0".to_string(),
                target: GATEWAY_ALIAS.to_string(),
            }],
            tags: Tags::new(),
        };
        let mut ids = BTreeMap::new();
        ids.insert("10.0.1.0/24".to_string(), "subnet-b".to_string());
        ids.insert("10.0.2.0/24".to_string(), "subnet-a".to_string());

        let spec = declared.resolve(&ids, Some("igw-1"));
        assert_eq!(spec.subnet_ids, vec!["subnet-a", "subnet-b"]);
        assert_eq!(spec.routes[0].target, "igw-1");

        let pending = declared.resolve(&BTreeMap::new(), None);
        assert_eq!(pending.routes[0].target, "pending:igw");
        assert!(pending.subnet_ids.contains(&"pending:10.0.1.0/24".to_string()));
    }

    #[test]
    fn main_route_table_is_protected() {
        let main = RouteTable {
            id: "rtb-1".to_string(),
            vpc_id: "vpc-1".to_string(),
            main: true,
            routes: Vec::new(),
            subnet_ids: Vec::new(),
            tags: Tags::new(),
        };
        assert!(RouteTableKind::is_protected(&main));
        assert_eq!(RouteTableKind::observed_key(&main), "rtb-1");
    }

    #[test]
    fn subnet_zone_is_immutable() {
        let spec = SubnetSpec {
            cidr: "10.0.1.0/24".to_string(),
            az: Some("local-1b".to_string()),
            tags: Tags::new(),
        };
        let observed = Subnet {
            id: "subnet-1".to_string(),
            vpc_id: "vpc-1".to_string(),
            cidr: "10.0.1.0/24".to_string(),
            az: "local-1a".to_string(),
            tags: Tags::new(),
        };
        let conflict = SubnetKind::immutable_conflict(&spec, &observed).unwrap();
        assert!(conflict.contains("local-1a"));
    }
}
