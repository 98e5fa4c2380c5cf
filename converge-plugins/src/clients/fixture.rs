//! Cloud collaborator backed by a local JSON state file.
//!
//! The file plays the part of the remote provider: every call loads it,
//! applies the request and writes it back, so separate invocations observe
//! each other's effects exactly as they would against a live API. Useful
//! for exercising playbooks without credentials, and for tests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::cloud::{
    CreateVpc, DnsApi, Domain, InternetGateway, NAME_TAG, NewRecord, Record, Route, RouteTable,
    Subnet, Tags, Vpc, VpcApi, VpcFilter, VpcState,
};

/// Nameservers the fixture provider assigns to every hosted domain.
pub const FIXTURE_NAMESERVERS: [&str; 2] = ["ns1.fixture.invalid.", "ns2.fixture.invalid."];

/// Behaviour knobs stored alongside the simulated resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureSettings {
    /// Describe calls a new VPC stays `pending` for.
    pub ready_after_polls: u32,
    /// Operation names (e.g. `create_subnet`) that fail unconditionally.
    pub fail_operations: Vec<String>,
    /// Zone suffixes appended to the region name.
    pub zones: Vec<String>,
}

impl Default for FixtureSettings {
    fn default() -> Self {
        Self {
            ready_after_polls: 1,
            fail_operations: Vec::new(),
            zones: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        }
    }
}

/// Everything the simulated provider knows about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudState {
    pub settings: FixtureSettings,
    pub vpcs: Vec<Vpc>,
    pub subnets: Vec<Subnet>,
    pub internet_gateways: Vec<InternetGateway>,
    pub route_tables: Vec<RouteTable>,
    pub domains: Vec<Domain>,
    pub records: Vec<Record>,
}

impl CloudState {
    fn vpc(&self, vpc_id: &str) -> Result<&Vpc> {
        self.vpcs
            .iter()
            .find(|v| v.id == vpc_id)
            .ok_or_else(|| anyhow!("InvalidVpcID.NotFound: {}", vpc_id))
    }

    fn route_table_mut(&mut self, route_table_id: &str) -> Result<&mut RouteTable> {
        self.route_tables
            .iter_mut()
            .find(|t| t.id == route_table_id)
            .ok_or_else(|| anyhow!("InvalidRouteTableID.NotFound: {}", route_table_id))
    }

    fn domain(&self, domain_id: &str) -> Result<&Domain> {
        self.domains
            .iter()
            .find(|d| d.id == domain_id)
            .ok_or_else(|| anyhow!("domain {} not found", domain_id))
    }
}

/// File-backed implementation of [`VpcApi`] and [`DnsApi`].
pub struct FixtureCloud {
    path: PathBuf,
    region: String,
}

impl FixtureCloud {
    pub fn new(path: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            region: region.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current provider state. A missing file is an empty provider.
    pub fn load(&self) -> Result<CloudState> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CloudState::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse fixture state {}", self.path.display()))
    }

    pub fn save(&self, state: &CloudState) -> Result<()> {
        let raw = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn call<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut CloudState, &str) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.load()?;
        if state.settings.fail_operations.iter().any(|o| o == operation) {
            bail!("{}: injected failure", operation);
        }
        debug!(operation, region = %self.region, "Fixture call");
        let value = f(&mut state, &self.region)?;
        self.save(&state)?;
        Ok(value)
    }
}

fn new_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8.min(id.len())])
}

fn parse_cidr(cidr: &str) -> Result<Ipv4Net> {
    cidr.parse()
        .map_err(|_| anyhow!("InvalidParameterValue: bad CIDR block {}", cidr))
}

impl VpcApi for FixtureCloud {
    fn describe_vpcs(&mut self, filter: &VpcFilter) -> Result<Vec<Vpc>> {
        self.call("describe_vpcs", |state, region| {
            for vpc in state.vpcs.iter_mut().filter(|v| v.region == region) {
                if vpc.state == VpcState::Pending {
                    vpc.pending_polls = vpc.pending_polls.saturating_sub(1);
                    if vpc.pending_polls == 0 {
                        vpc.state = VpcState::Available;
                    }
                }
            }
            Ok(state
                .vpcs
                .iter()
                .filter(|v| {
                    v.region == region
                        && v.cidr_block == filter.cidr_block
                        && v.tags.get(NAME_TAG) == Some(&filter.name)
                })
                .cloned()
                .collect())
        })
    }

    fn create_vpc(&mut self, request: &CreateVpc) -> Result<Vpc> {
        self.call("create_vpc", |state, region| {
            let net = parse_cidr(&request.cidr_block)?;
            let polls = state.settings.ready_after_polls;
            let vpc = Vpc {
                id: new_id("vpc"),
                region: region.to_string(),
                cidr_block: net.to_string(),
                state: if polls == 0 {
                    VpcState::Available
                } else {
                    VpcState::Pending
                },
                dns_support: request.dns_support,
                dns_hostnames: request.dns_hostnames,
                tags: request.tags.clone(),
                created_at: Utc::now(),
                pending_polls: polls,
            };
            state.route_tables.push(RouteTable {
                id: new_id("rtb"),
                vpc_id: vpc.id.clone(),
                main: true,
                routes: vec![Route {
                    destination: vpc.cidr_block.clone(),
                    target: "local".to_string(),
                }],
                subnet_ids: Vec::new(),
                tags: Tags::new(),
            });
            state.vpcs.push(vpc.clone());
            Ok(vpc)
        })
    }

    fn modify_vpc_attributes(
        &mut self,
        vpc_id: &str,
        dns_support: bool,
        dns_hostnames: bool,
    ) -> Result<()> {
        self.call("modify_vpc_attributes", |state, _| {
            let vpc = state
                .vpcs
                .iter_mut()
                .find(|v| v.id == vpc_id)
                .ok_or_else(|| anyhow!("InvalidVpcID.NotFound: {}", vpc_id))?;
            vpc.dns_support = dns_support;
            vpc.dns_hostnames = dns_hostnames;
            Ok(())
        })
    }

    fn delete_vpc(&mut self, vpc_id: &str) -> Result<()> {
        self.call("delete_vpc", |state, _| {
            state.vpc(vpc_id)?;
            if state.subnets.iter().any(|s| s.vpc_id == vpc_id) {
                bail!("DependencyViolation: {} still has subnets", vpc_id);
            }
            if state
                .internet_gateways
                .iter()
                .any(|g| g.vpc_id.as_deref() == Some(vpc_id))
            {
                bail!("DependencyViolation: {} still has an internet gateway", vpc_id);
            }
            if state
                .route_tables
                .iter()
                .any(|t| t.vpc_id == vpc_id && !t.main)
            {
                bail!("DependencyViolation: {} still has route tables", vpc_id);
            }
            state.route_tables.retain(|t| t.vpc_id != vpc_id);
            state.vpcs.retain(|v| v.id != vpc_id);
            Ok(())
        })
    }

    fn set_tags(&mut self, resource_id: &str, tags: &Tags) -> Result<()> {
        self.call("set_tags", |state, _| {
            if let Some(vpc) = state.vpcs.iter_mut().find(|v| v.id == resource_id) {
                vpc.tags = tags.clone();
            } else if let Some(subnet) = state.subnets.iter_mut().find(|s| s.id == resource_id) {
                subnet.tags = tags.clone();
            } else if let Some(table) = state.route_tables.iter_mut().find(|t| t.id == resource_id)
            {
                table.tags = tags.clone();
            } else {
                bail!("InvalidID: {} not found", resource_id);
            }
            Ok(())
        })
    }

    fn describe_subnets(&mut self, vpc_id: &str) -> Result<Vec<Subnet>> {
        self.call("describe_subnets", |state, _| {
            Ok(state
                .subnets
                .iter()
                .filter(|s| s.vpc_id == vpc_id)
                .cloned()
                .collect())
        })
    }

    fn create_subnet(
        &mut self,
        vpc_id: &str,
        cidr: &str,
        az: Option<&str>,
        tags: &Tags,
    ) -> Result<Subnet> {
        self.call("create_subnet", |state, region| {
            let vpc_net = parse_cidr(&state.vpc(vpc_id)?.cidr_block)?;
            let net = parse_cidr(cidr)?;
            if !vpc_net.contains(&net) {
                bail!("InvalidSubnet.Range: {} is outside {}", net, vpc_net);
            }
            for existing in state.subnets.iter().filter(|s| s.vpc_id == vpc_id) {
                let other = parse_cidr(&existing.cidr)?;
                if other.contains(&net.network()) || net.contains(&other.network()) {
                    bail!("InvalidSubnet.Conflict: {} overlaps {}", net, other);
                }
            }
            let az = match az {
                Some(az) => az.to_string(),
                None => {
                    let zone = state.settings.zones.first().map(String::as_str).unwrap_or("a");
                    format!("{}{}", region, zone)
                }
            };
            let subnet = Subnet {
                id: new_id("subnet"),
                vpc_id: vpc_id.to_string(),
                cidr: net.to_string(),
                az,
                tags: tags.clone(),
            };
            state.subnets.push(subnet.clone());
            Ok(subnet)
        })
    }

    fn delete_subnet(&mut self, subnet_id: &str) -> Result<()> {
        self.call("delete_subnet", |state, _| {
            let before = state.subnets.len();
            state.subnets.retain(|s| s.id != subnet_id);
            if state.subnets.len() == before {
                bail!("InvalidSubnetID.NotFound: {}", subnet_id);
            }
            for table in &mut state.route_tables {
                table.subnet_ids.retain(|id| id != subnet_id);
            }
            Ok(())
        })
    }

    fn describe_internet_gateways(&mut self, vpc_id: &str) -> Result<Vec<InternetGateway>> {
        self.call("describe_internet_gateways", |state, _| {
            Ok(state
                .internet_gateways
                .iter()
                .filter(|g| g.vpc_id.as_deref() == Some(vpc_id))
                .cloned()
                .collect())
        })
    }

    fn create_internet_gateway(&mut self, vpc_id: &str) -> Result<InternetGateway> {
        self.call("create_internet_gateway", |state, _| {
            state.vpc(vpc_id)?;
            if state
                .internet_gateways
                .iter()
                .any(|g| g.vpc_id.as_deref() == Some(vpc_id))
            {
                bail!("Resource.AlreadyAssociated: {} already has a gateway", vpc_id);
            }
            let gateway = InternetGateway {
                id: new_id("igw"),
                vpc_id: Some(vpc_id.to_string()),
            };
            state.internet_gateways.push(gateway.clone());
            Ok(gateway)
        })
    }

    fn delete_internet_gateway(&mut self, gateway_id: &str) -> Result<()> {
        self.call("delete_internet_gateway", |state, _| {
            let before = state.internet_gateways.len();
            state.internet_gateways.retain(|g| g.id != gateway_id);
            if state.internet_gateways.len() == before {
                bail!("InvalidInternetGatewayID.NotFound: {}", gateway_id);
            }
            Ok(())
        })
    }

    fn describe_route_tables(&mut self, vpc_id: &str) -> Result<Vec<RouteTable>> {
        self.call("describe_route_tables", |state, _| {
            Ok(state
                .route_tables
                .iter()
                .filter(|t| t.vpc_id == vpc_id)
                .cloned()
                .collect())
        })
    }

    fn create_route_table(&mut self, vpc_id: &str, tags: &Tags) -> Result<RouteTable> {
        self.call("create_route_table", |state, _| {
            let cidr = state.vpc(vpc_id)?.cidr_block.clone();
            let table = RouteTable {
                id: new_id("rtb"),
                vpc_id: vpc_id.to_string(),
                main: false,
                routes: vec![Route {
                    destination: cidr,
                    target: "local".to_string(),
                }],
                subnet_ids: Vec::new(),
                tags: tags.clone(),
            };
            state.route_tables.push(table.clone());
            Ok(table)
        })
    }

    fn replace_routes(&mut self, route_table_id: &str, routes: &[Route]) -> Result<()> {
        self.call("replace_routes", |state, _| {
            for route in routes {
                parse_cidr(&route.destination)?;
                if !state.internet_gateways.iter().any(|g| g.id == route.target) {
                    bail!("InvalidGatewayID.NotFound: {}", route.target);
                }
            }
            let table = state.route_table_mut(route_table_id)?;
            table.routes.retain(|r| r.target == "local");
            table.routes.extend(routes.iter().cloned());
            Ok(())
        })
    }

    fn set_associations(&mut self, route_table_id: &str, subnet_ids: &[String]) -> Result<()> {
        self.call("set_associations", |state, _| {
            let vpc_id = state.route_table_mut(route_table_id)?.vpc_id.clone();
            for subnet_id in subnet_ids {
                if !state
                    .subnets
                    .iter()
                    .any(|s| &s.id == subnet_id && s.vpc_id == vpc_id)
                {
                    bail!("InvalidSubnetID.NotFound: {}", subnet_id);
                }
            }
            for table in state.route_tables.iter_mut().filter(|t| t.id != route_table_id) {
                table.subnet_ids.retain(|id| !subnet_ids.contains(id));
            }
            state.route_table_mut(route_table_id)?.subnet_ids = subnet_ids.to_vec();
            Ok(())
        })
    }

    fn delete_route_table(&mut self, route_table_id: &str) -> Result<()> {
        self.call("delete_route_table", |state, _| {
            let table = state.route_table_mut(route_table_id)?;
            if table.main {
                bail!("InvalidParameterValue: cannot delete main route table {}", route_table_id);
            }
            if !table.subnet_ids.is_empty() {
                bail!(
                    "DependencyViolation: {} still has subnet associations",
                    route_table_id
                );
            }
            state.route_tables.retain(|t| t.id != route_table_id);
            Ok(())
        })
    }
}

impl DnsApi for FixtureCloud {
    fn list_domains(&mut self) -> Result<Vec<Domain>> {
        self.call("list_domains", |state, _| Ok(state.domains.clone()))
    }

    fn create_domain(&mut self, name: &str) -> Result<Domain> {
        self.call("create_domain", |state, _| {
            if state.domains.iter().any(|d| d.name == name) {
                bail!("domain {} already exists", name);
            }
            let domain = Domain {
                id: new_id("dom"),
                name: name.to_string(),
                created_at: Utc::now(),
            };
            let soa = format!(
                "{} hostmaster.{}. 1 7200 3600 1209600 300",
                FIXTURE_NAMESERVERS[0], name
            );
            state.records.push(Record {
                id: new_id("rec"),
                domain_id: domain.id.clone(),
                record_type: "SOA".to_string(),
                name: "@".to_string(),
                data: soa,
                ttl: 1800,
            });
            for ns in FIXTURE_NAMESERVERS {
                state.records.push(Record {
                    id: new_id("rec"),
                    domain_id: domain.id.clone(),
                    record_type: "NS".to_string(),
                    name: "@".to_string(),
                    data: ns.to_string(),
                    ttl: 1800,
                });
            }
            state.domains.push(domain.clone());
            Ok(domain)
        })
    }

    fn delete_domain(&mut self, domain_id: &str) -> Result<()> {
        self.call("delete_domain", |state, _| {
            state.domain(domain_id)?;
            state.records.retain(|r| r.domain_id != domain_id);
            state.domains.retain(|d| d.id != domain_id);
            Ok(())
        })
    }

    fn list_records(&mut self, domain_id: &str) -> Result<Vec<Record>> {
        self.call("list_records", |state, _| {
            state.domain(domain_id)?;
            Ok(state
                .records
                .iter()
                .filter(|r| r.domain_id == domain_id)
                .cloned()
                .collect())
        })
    }

    fn create_record(&mut self, domain_id: &str, record: &NewRecord) -> Result<Record> {
        self.call("create_record", |state, _| {
            state.domain(domain_id)?;
            if state.records.iter().any(|r| {
                r.domain_id == domain_id
                    && r.record_type == record.record_type
                    && r.name == record.name
                    && r.data == record.data
            }) {
                bail!(
                    "record {} {} {} already exists",
                    record.record_type,
                    record.name,
                    record.data
                );
            }
            let created = Record {
                id: new_id("rec"),
                domain_id: domain_id.to_string(),
                record_type: record.record_type.clone(),
                name: record.name.clone(),
                data: record.data.clone(),
                ttl: record.ttl,
            };
            state.records.push(created.clone());
            Ok(created)
        })
    }

    fn update_record_ttl(&mut self, record_id: &str, ttl: u32) -> Result<()> {
        self.call("update_record_ttl", |state, _| {
            let record = state
                .records
                .iter_mut()
                .find(|r| r.id == record_id)
                .ok_or_else(|| anyhow!("record {} not found", record_id))?;
            record.ttl = ttl;
            Ok(())
        })
    }

    fn delete_record(&mut self, record_id: &str) -> Result<()> {
        self.call("delete_record", |state, _| {
            let before = state.records.len();
            state.records.retain(|r| r.id != record_id);
            if state.records.len() == before {
                bail!("record {} not found", record_id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (FixtureCloud, TempDir) {
        let dir = TempDir::new().unwrap();
        let cloud = FixtureCloud::new(dir.path().join("cloud.json"), "local-1");
        (cloud, dir)
    }

    fn create_vpc(cloud: &mut FixtureCloud, name: &str) -> Vpc {
        let mut tags = Tags::new();
        tags.insert(NAME_TAG.to_string(), name.to_string());
        cloud
            .create_vpc(&CreateVpc {
                cidr_block: "10.0.0.0/16".to_string(),
                dns_support: true,
                dns_hostnames: true,
                tags,
            })
            .unwrap()
    }

    #[test]
    fn missing_file_is_empty_provider() {
        let (cloud, _dir) = setup();
        assert_eq!(cloud.load().unwrap(), CloudState::default());
    }

    #[test]
    fn vpc_turns_available_after_describe() {
        let (mut cloud, _dir) = setup();
        let vpc = create_vpc(&mut cloud, "web");
        assert_eq!(vpc.state, VpcState::Pending);

        let filter = VpcFilter {
            name: "web".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
        };
        let found = cloud.describe_vpcs(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state, VpcState::Available);
    }

    #[test]
    fn create_vpc_adds_main_route_table() {
        let (mut cloud, _dir) = setup();
        let vpc = create_vpc(&mut cloud, "web");
        let tables = cloud.describe_route_tables(&vpc.id).unwrap();
        assert_eq!(tables.len(), 1);
        assert!(tables[0].main);
        assert!(cloud.delete_route_table(&tables[0].id).is_err());
    }

    #[test]
    fn subnet_must_fit_and_not_overlap() {
        let (mut cloud, _dir) = setup();
        let vpc = create_vpc(&mut cloud, "web");

        let subnet = cloud
            .create_subnet(&vpc.id, "10.0.1.0/24", None, &Tags::new())
            .unwrap();
        assert_eq!(subnet.az, "local-1a");

        let err = cloud
            .create_subnet(&vpc.id, "10.0.1.128/25", None, &Tags::new())
            .unwrap_err();
        assert!(err.to_string().contains("Conflict"));

        let err = cloud
            .create_subnet(&vpc.id, "192.168.0.0/24", None, &Tags::new())
            .unwrap_err();
        assert!(err.to_string().contains("Range"));
    }

    #[test]
    fn vpc_delete_blocked_by_dependencies() {
        let (mut cloud, _dir) = setup();
        let vpc = create_vpc(&mut cloud, "web");
        let subnet = cloud
            .create_subnet(&vpc.id, "10.0.1.0/24", None, &Tags::new())
            .unwrap();

        assert!(cloud.delete_vpc(&vpc.id).is_err());
        cloud.delete_subnet(&subnet.id).unwrap();
        cloud.delete_vpc(&vpc.id).unwrap();

        let state = cloud.load().unwrap();
        assert!(state.vpcs.is_empty());
        assert!(state.route_tables.is_empty());
    }

    #[test]
    fn associations_move_between_tables() {
        let (mut cloud, _dir) = setup();
        let vpc = create_vpc(&mut cloud, "web");
        let subnet = cloud
            .create_subnet(&vpc.id, "10.0.1.0/24", None, &Tags::new())
            .unwrap();
        let a = cloud.create_route_table(&vpc.id, &Tags::new()).unwrap();
        let b = cloud.create_route_table(&vpc.id, &Tags::new()).unwrap();

        cloud.set_associations(&a.id, &[subnet.id.clone()]).unwrap();
        cloud.set_associations(&b.id, &[subnet.id.clone()]).unwrap();

        let tables = cloud.describe_route_tables(&vpc.id).unwrap();
        let a = tables.iter().find(|t| t.id == a.id).unwrap();
        let b = tables.iter().find(|t| t.id == b.id).unwrap();
        assert!(a.subnet_ids.is_empty());
        assert_eq!(b.subnet_ids, vec![subnet.id]);
    }

    #[test]
    fn injected_failure() {
        let (mut cloud, _dir) = setup();
        let mut state = CloudState::default();
        state.settings.fail_operations = vec!["create_domain".to_string()];
        cloud.save(&state).unwrap();

        let err = cloud.create_domain("example.com").unwrap_err();
        assert!(err.to_string().contains("injected failure"));
    }

    #[test]
    fn domain_gets_provider_records() {
        let (mut cloud, _dir) = setup();
        let domain = cloud.create_domain("example.com").unwrap();
        let records = cloud.list_records(&domain.id).unwrap();
        let types: Vec<_> = records.iter().map(|r| r.record_type.as_str()).collect();
        assert_eq!(types, vec!["SOA", "NS", "NS"]);

        cloud.delete_domain(&domain.id).unwrap();
        assert!(cloud.load().unwrap().records.is_empty());
    }
}
