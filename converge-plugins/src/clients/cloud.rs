//! Cloud collaborator contracts.
//!
//! These mirror the handful of calls the `vpc` and `dns` plugins make
//! against a cloud provider. Credentials and endpoint selection belong to
//! the implementation and are never interpreted by the plugins.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Tags = BTreeMap<String, String>;

/// Tag holding the user-facing name of a cloud object.
pub const NAME_TAG: &str = "Name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpcState {
    Pending,
    Available,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub region: String,
    pub cidr_block: String,
    pub state: VpcState,
    pub dns_support: bool,
    pub dns_hostnames: bool,
    #[serde(default)]
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
    /// Describe calls left before a pending VPC turns available.
    #[serde(default)]
    pub pending_polls: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub cidr: String,
    pub az: String,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetGateway {
    pub id: String,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    pub destination: String,
    /// Gateway id, or `local` for the VPC-internal route.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub vpc_id: String,
    pub main: bool,
    pub routes: Vec<Route>,
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct CreateVpc {
    pub cidr_block: String,
    pub dns_support: bool,
    pub dns_hostnames: bool,
    pub tags: Tags,
}

/// VPC lookup by `Name` tag and CIDR block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcFilter {
    pub name: String,
    pub cidr_block: String,
}

/// The compute-network calls used by the `vpc` plugin.
pub trait VpcApi {
    fn describe_vpcs(&mut self, filter: &VpcFilter) -> Result<Vec<Vpc>>;
    /// Also creates the VPC's main route table.
    fn create_vpc(&mut self, request: &CreateVpc) -> Result<Vpc>;
    fn modify_vpc_attributes(&mut self, vpc_id: &str, dns_support: bool, dns_hostnames: bool)
    -> Result<()>;
    fn delete_vpc(&mut self, vpc_id: &str) -> Result<()>;

    /// Replace the full tag set of any object.
    fn set_tags(&mut self, resource_id: &str, tags: &Tags) -> Result<()>;

    fn describe_subnets(&mut self, vpc_id: &str) -> Result<Vec<Subnet>>;
    fn create_subnet(
        &mut self,
        vpc_id: &str,
        cidr: &str,
        az: Option<&str>,
        tags: &Tags,
    ) -> Result<Subnet>;
    fn delete_subnet(&mut self, subnet_id: &str) -> Result<()>;

    fn describe_internet_gateways(&mut self, vpc_id: &str) -> Result<Vec<InternetGateway>>;
    /// Create a gateway and attach it to the VPC.
    fn create_internet_gateway(&mut self, vpc_id: &str) -> Result<InternetGateway>;
    /// Detach the gateway and delete it.
    fn delete_internet_gateway(&mut self, gateway_id: &str) -> Result<()>;

    fn describe_route_tables(&mut self, vpc_id: &str) -> Result<Vec<RouteTable>>;
    fn create_route_table(&mut self, vpc_id: &str, tags: &Tags) -> Result<RouteTable>;
    /// Replace every non-local route.
    fn replace_routes(&mut self, route_table_id: &str, routes: &[Route]) -> Result<()>;
    /// Make `subnet_ids` exactly the table's associations. Subnets taken
    /// from another table move; subnets dropped fall back to the main table.
    fn set_associations(&mut self, route_table_id: &str, subnet_ids: &[String]) -> Result<()>;
    fn delete_route_table(&mut self, route_table_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub domain_id: String,
    pub record_type: String,
    /// Relative name, `@` for the apex.
    pub name: String,
    pub data: String,
    pub ttl: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub record_type: String,
    pub name: String,
    pub data: String,
    pub ttl: u32,
}

/// The DNS hosting calls used by the `dns` plugin.
pub trait DnsApi {
    fn list_domains(&mut self) -> Result<Vec<Domain>>;
    /// Also creates the provider's apex SOA and NS records.
    fn create_domain(&mut self, name: &str) -> Result<Domain>;
    /// Deletes the domain together with all its records.
    fn delete_domain(&mut self, domain_id: &str) -> Result<()>;

    fn list_records(&mut self, domain_id: &str) -> Result<Vec<Record>>;
    fn create_record(&mut self, domain_id: &str, record: &NewRecord) -> Result<Record>;
    fn update_record_ttl(&mut self, record_id: &str, ttl: u32) -> Result<()>;
    fn delete_record(&mut self, record_id: &str) -> Result<()>;
}
