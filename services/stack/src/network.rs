//! Network Lookup
//!
//! Resolves existing provider state the stack builds on: the default VPC, one
//! subnet per availability zone, the VPC's `default` security group and the
//! hosted zone for the deployment domain. Every query must match exactly one
//! record; zero or several matches fail rather than guessing.

use std::path::Path;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LookupError;

/// Name of the security group every VPC is created with
pub const DEFAULT_SECURITY_GROUP: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub id: String,
    pub name: String,
}

/// Read-only queries against existing provider state
#[async_trait]
pub trait NetworkLookup: Send + Sync {
    /// VPCs, optionally restricted to the account's default VPC
    async fn vpcs(&self, default_only: bool) -> Result<Vec<Vpc>, LookupError>;

    async fn subnets(&self, vpc_id: &str, availability_zone: &str)
        -> Result<Vec<Subnet>, LookupError>;

    async fn security_groups(
        &self,
        vpc_id: &str,
        name: &str,
    ) -> Result<Vec<SecurityGroupRecord>, LookupError>;

    async fn hosted_zones(&self, name: &str) -> Result<Vec<HostedZone>, LookupError>;
}

/// Everything the stack reads but does not create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub vpc: Vpc,
    /// One subnet per requested availability zone, in request order
    pub subnets: Vec<Subnet>,
    pub default_security_group: SecurityGroupRecord,
    pub hosted_zone: HostedZone,
}

impl Network {
    /// Subnet ids in availability-zone order
    pub fn subnet_ids(&self) -> Vec<String> {
        self.subnets.iter().map(|s| s.id.clone()).collect()
    }
}

fn exactly_one<T>(kind: &str, query: String, mut found: Vec<T>) -> Result<T, LookupError> {
    match found.len() {
        0 => Err(LookupError::NotFound {
            kind: kind.to_string(),
            query,
        }),
        1 => Ok(found.remove(0)),
        count => Err(LookupError::Ambiguous {
            kind: kind.to_string(),
            query,
            count,
        }),
    }
}

/// The account's single default VPC
pub async fn lookup_default_vpc(lookup: &dyn NetworkLookup) -> Result<Vpc, LookupError> {
    let vpcs = lookup.vpcs(true).await?;
    exactly_one("vpc", "default=true".to_string(), vpcs)
}

/// The single subnet of `vpc_id` in `availability_zone`
pub async fn lookup_subnet(
    lookup: &dyn NetworkLookup,
    vpc_id: &str,
    availability_zone: &str,
) -> Result<Subnet, LookupError> {
    let subnets = lookup.subnets(vpc_id, availability_zone).await?;
    exactly_one(
        "subnet",
        format!("vpc_id={} availability_zone={}", vpc_id, availability_zone),
        subnets,
    )
}

/// The single security group called `name` in `vpc_id`
pub async fn lookup_security_group(
    lookup: &dyn NetworkLookup,
    vpc_id: &str,
    name: &str,
) -> Result<SecurityGroupRecord, LookupError> {
    let groups = lookup.security_groups(vpc_id, name).await?;
    exactly_one(
        "security group",
        format!("vpc_id={} name={}", vpc_id, name),
        groups,
    )
}

/// The single hosted zone for `domain`, trailing dot and case ignored
pub async fn lookup_hosted_zone(
    lookup: &dyn NetworkLookup,
    domain: &str,
) -> Result<HostedZone, LookupError> {
    let zones = lookup.hosted_zones(domain).await?;
    exactly_one("hosted zone", format!("name={}", domain), zones)
}

/// Resolve the VPC first, then its subnets, default security group and the
/// hosted zone for `domain`.
pub async fn lookup_network(
    lookup: &dyn NetworkLookup,
    availability_zones: &[String],
    domain: &str,
) -> Result<Network, LookupError> {
    let vpc = lookup_default_vpc(lookup).await?;
    debug!(vpc_id = %vpc.id, "Resolved default VPC");

    let subnets = try_join_all(
        availability_zones
            .iter()
            .map(|zone| lookup_subnet(lookup, &vpc.id, zone)),
    )
    .await?;

    let default_security_group =
        lookup_security_group(lookup, &vpc.id, DEFAULT_SECURITY_GROUP).await?;
    let hosted_zone = lookup_hosted_zone(lookup, domain).await?;

    info!(
        vpc_id = %vpc.id,
        subnets = subnets.len(),
        hosted_zone = %hosted_zone.id,
        "Network lookup complete"
    );

    Ok(Network {
        vpc,
        subnets,
        default_security_group,
        hosted_zone,
    })
}

fn normalize_zone(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Snapshot of existing provider state, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticInventory {
    #[serde(default)]
    pub vpcs: Vec<Vpc>,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupRecord>,
    #[serde(default)]
    pub hosted_zones: Vec<HostedZone>,
}

impl StaticInventory {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let backend = |message: String| LookupError::Backend {
            kind: "inventory".to_string(),
            message,
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| backend(format!("{}: {}", path.display(), e)))?;
        let inventory: Self = serde_json::from_str(&contents)
            .map_err(|e| backend(format!("{}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            vpcs = inventory.vpcs.len(),
            subnets = inventory.subnets.len(),
            "Loaded network inventory"
        );
        Ok(inventory)
    }
}

#[async_trait]
impl NetworkLookup for StaticInventory {
    async fn vpcs(&self, default_only: bool) -> Result<Vec<Vpc>, LookupError> {
        Ok(self
            .vpcs
            .iter()
            .filter(|v| !default_only || v.is_default)
            .cloned()
            .collect())
    }

    async fn subnets(
        &self,
        vpc_id: &str,
        availability_zone: &str,
    ) -> Result<Vec<Subnet>, LookupError> {
        Ok(self
            .subnets
            .iter()
            .filter(|s| s.vpc_id == vpc_id && s.availability_zone == availability_zone)
            .cloned()
            .collect())
    }

    async fn security_groups(
        &self,
        vpc_id: &str,
        name: &str,
    ) -> Result<Vec<SecurityGroupRecord>, LookupError> {
        Ok(self
            .security_groups
            .iter()
            .filter(|g| g.vpc_id == vpc_id && g.name == name)
            .cloned()
            .collect())
    }

    async fn hosted_zones(&self, name: &str) -> Result<Vec<HostedZone>, LookupError> {
        let wanted = normalize_zone(name);
        Ok(self
            .hosted_zones
            .iter()
            .filter(|z| normalize_zone(&z.name) == wanted)
            .cloned()
            .collect())
    }
}
