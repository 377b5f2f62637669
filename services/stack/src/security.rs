//! Security Boundary Declarations
//!
//! A boundary is a named set of ingress rules for one exposed surface. The
//! effective policy is the union of every attached rule; there are no deny
//! rules, so the only way to refuse traffic is to not allow it.

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::GraphError;
use crate::graph::{ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::provider::ProviderBinding;

/// Port the API container listens on
pub const API_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// One (protocol, port range, sources) tuple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr_blocks: Vec<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IngressRule {
    /// Single TCP port from the given sources
    pub fn tcp(port: u16, cidr_blocks: impl IntoIterator<Item = IpNet>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            cidr_blocks: cidr_blocks.into_iter().collect(),
            description: None,
        }
    }

    /// Attach a description to the rule
    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// True when `port` falls in the rule's range for `protocol`
    pub fn covers(&self, protocol: Protocol, port: u16) -> bool {
        self.protocol == protocol && (self.from_port..=self.to_port).contains(&port)
    }

    pub fn allows(&self, protocol: Protocol, port: u16, source: IpAddr) -> bool {
        self.covers(protocol, port) && self.cidr_blocks.iter().any(|c| c.contains(&source))
    }
}

/// Everywhere
pub fn anywhere() -> IpNet {
    IpNet::V4(ipnet::Ipv4Net::default())
}

/// Named ingress policy for one surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityBoundary {
    pub name: String,
    pub rules: Vec<IngressRule>,
}

impl SecurityBoundary {
    /// Boundary with no rules, which admits nothing
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
        }
    }

    /// Add an ingress rule; rules only ever widen access
    pub fn with_rule(mut self, rule: IngressRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// True when any attached rule admits `source` on `port`
    pub fn allows(&self, protocol: Protocol, port: u16, source: IpAddr) -> bool {
        self.rules.iter().any(|r| r.allows(protocol, port, source))
    }

    /// Union of the sources of every rule covering `port`
    pub fn effective_sources(&self, protocol: Protocol, port: u16) -> BTreeSet<IpNet> {
        self.rules
            .iter()
            .filter(|r| r.covers(protocol, port))
            .flat_map(|r| r.cidr_blocks.iter().copied())
            .collect()
    }

    /// Provider-shaped security group. IPv6 ranges go under `ipv6CidrBlocks`.
    pub fn to_properties(&self, vpc_id: &str) -> Value {
        let ingress: Vec<Value> = self
            .rules
            .iter()
            .map(|r| {
                let (v4, v6): (Vec<&IpNet>, Vec<&IpNet>) =
                    r.cidr_blocks.iter().partition(|c| matches!(c, IpNet::V4(_)));
                let mut rule = json!({
                    "protocol": r.protocol,
                    "fromPort": r.from_port,
                    "toPort": r.to_port,
                    "cidrBlocks": v4.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                });
                if !v6.is_empty() {
                    rule["ipv6CidrBlocks"] =
                        json!(v6.iter().map(|c| c.to_string()).collect::<Vec<_>>());
                }
                if let Some(description) = &r.description {
                    rule["description"] = json!(description);
                }
                rule
            })
            .collect();
        json!({
            "name": self.name,
            "vpcId": vpc_id,
            "ingress": ingress,
        })
    }

    pub fn declare(
        &self,
        graph: &mut StackGraph,
        provider: &ProviderBinding,
        vpc_id: &str,
    ) -> Result<ResourceHandle, GraphError> {
        debug!(boundary = %self.name, rules = self.rules.len(), "Declaring security boundary");
        graph.declare(ResourceDescriptor::new(
            &self.name,
            ResourceKind::SecurityGroup,
            provider,
            self.to_properties(vpc_id),
        ))
    }
}

/// Public HTTP and HTTPS into the load balancer
pub fn load_balancer_boundary() -> SecurityBoundary {
    SecurityBoundary::new("albSecurityGroup")
        .with_rule(IngressRule::tcp(80, [anywhere()]))
        .with_rule(IngressRule::tcp(443, [anywhere()]))
}

/// Operator-only access to the API container port
pub fn api_service_boundary(operators: &[IpNet]) -> SecurityBoundary {
    SecurityBoundary::new("eneftea-api-security-group").with_rule(
        IngressRule::tcp(API_PORT, operators.iter().copied()).describe("operator access"),
    )
}

/// Direct access: port 80 for the first operator, the API port for everyone.
/// Two independent ingress sets on one boundary.
pub fn direct_access_boundary(operators: &[IpNet]) -> SecurityBoundary {
    SecurityBoundary::new("apiSecurityGroup")
        .with_rule(
            IngressRule::tcp(80, operators.first().copied()).describe("operator direct access"),
        )
        .with_rule(IngressRule::tcp(API_PORT, [anywhere()]))
}
