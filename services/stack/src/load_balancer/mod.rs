//! Load Balancer Stack
//!
//! Application load balancer in front of the API service.
//!
//! ## Architecture
//!
//! ```text
//! certificate -> validation record -> https-listener -> albApiListenerRule
//!                                          |                  |
//! albSecurityGroup -> eneftea-lb ----------+---- api-tg <-----+
//!                          |
//!                          +-> http-listener (redirect only)
//!                          +-> DOMAIN alias record
//! ```
//!
//! The routing tables are kept beside the declared descriptors so the same
//! [`Listener`] values that render the provider properties also answer
//! routing questions.

pub mod certificate;
pub mod listener;
pub mod target_group;

pub use certificate::{
    declare_certificate, CertificateError, CertificateLifecycle, CertificateState, ObservedRecord,
    ValidatedCertificate, ValidationToken,
};
pub use listener::{Listener, ListenerAction, ListenerProtocol, ListenerRule, RouteOutcome};
pub use target_group::{HealthCheck, HealthState, TargetGroupSpec, TargetHealth};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::DeploymentSettings;
use crate::dns::declare_alias_record;
use crate::error::StackResult;
use crate::graph::{attr, ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::network::Network;
use crate::pattern::PathPattern;
use crate::provider::Providers;
use crate::security::load_balancer_boundary;

pub const LOAD_BALANCER_NAME: &str = "eneftea-lb";
pub const HTTP_LISTENER_NAME: &str = "http-listener";
pub const HTTPS_LISTENER_NAME: &str = "https-listener";
pub const API_RULE_NAME: &str = "albApiListenerRule";
pub const API_RULE_PRIORITY: u16 = 10;
pub const API_PATH_PATTERN: &str = "/api/*";

/// Both listeners' routing tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub http: Listener,
    pub https: Listener,
}

impl Routing {
    pub fn api(target_group: &str) -> StackResult<Self> {
        let mut https = Listener::https_not_found(HTTPS_LISTENER_NAME);
        https.add_rule(ListenerRule {
            name: API_RULE_NAME.to_string(),
            priority: API_RULE_PRIORITY,
            path_patterns: vec![PathPattern::new(API_PATH_PATTERN)?],
            action: ListenerAction::forward(target_group),
        })?;
        Ok(Self {
            http: Listener::http_redirect(HTTP_LISTENER_NAME),
            https,
        })
    }

    pub fn listener(&self, protocol: ListenerProtocol) -> &Listener {
        match protocol {
            ListenerProtocol::Http => &self.http,
            ListenerProtocol::Https => &self.https,
        }
    }
}

/// Handles for everything the load balancer stack declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerStack {
    pub security_group: ResourceHandle,
    pub certificate: ValidatedCertificate,
    pub load_balancer: ResourceHandle,
    pub target_group: ResourceHandle,
    pub http_listener: ResourceHandle,
    pub https_listener: ResourceHandle,
    /// HTTPS listener rules, by ascending priority
    pub rules: Vec<ResourceHandle>,
    pub alias: ResourceHandle,
    pub routing: Routing,
}

impl LoadBalancerStack {
    pub fn declare(
        graph: &mut StackGraph,
        providers: &Providers,
        settings: &DeploymentSettings,
        network: &Network,
    ) -> StackResult<Self> {
        let provider = &providers.primary;
        let zone_id = network.hosted_zone.id.as_str();

        let security_group = load_balancer_boundary().declare(graph, provider, &network.vpc.id)?;

        let certificate = declare_certificate(
            graph,
            "certificate",
            &settings.domain,
            provider,
            provider,
            zone_id,
        )?;

        let load_balancer = graph.declare(
            ResourceDescriptor::new(
                LOAD_BALANCER_NAME,
                ResourceKind::LoadBalancer,
                provider,
                json!({
                    "internal": false,
                    "loadBalancerType": "application",
                    "securityGroups": [network.default_security_group.id, security_group.id()],
                    "subnets": network.subnet_ids(),
                }),
            )
            .depends_on(&security_group),
        )?;

        let spec = TargetGroupSpec::api();
        let target_group = graph.declare(
            ResourceDescriptor::new(
                &spec.name,
                ResourceKind::TargetGroup,
                provider,
                spec.to_properties(&network.vpc.id),
            )
            .depends_on(&load_balancer),
        )?;

        let routing = Routing::api(&target_group.name)?;

        let http_listener = graph.declare(ResourceDescriptor::new(
            HTTP_LISTENER_NAME,
            ResourceKind::Listener,
            provider,
            json!({
                "loadBalancerArn": load_balancer.arn(),
                "port": routing.http.port,
                "protocol": routing.http.protocol,
                "defaultActions": [routing.http.default_action.to_properties()],
            }),
        ))?;

        // the listener cannot serve the certificate before it validates
        let https_listener = graph.declare(
            ResourceDescriptor::new(
                HTTPS_LISTENER_NAME,
                ResourceKind::Listener,
                provider,
                json!({
                    "loadBalancerArn": load_balancer.arn(),
                    "port": routing.https.port,
                    "protocol": routing.https.protocol,
                    "certificateArn": certificate.certificate.arn(),
                    "defaultActions": [routing.https.default_action.to_properties()],
                }),
            )
            .depends_on(&certificate.validation_record),
        )?;

        let mut rules = Vec::with_capacity(routing.https.rules().len());
        for rule in routing.https.rules() {
            let handle = graph.declare(
                ResourceDescriptor::new(
                    &rule.name,
                    ResourceKind::ListenerRule,
                    provider,
                    json!({
                        "listenerArn": https_listener.arn(),
                        "tags": { "Name": rule.name },
                        "priority": rule.priority,
                        "actions": [rule.action.to_properties()],
                        "conditions": rule.conditions(),
                    }),
                )
                .depends_on(&https_listener)
                .depends_on(&target_group),
            )?;
            rules.push(handle);
        }

        let alias = declare_alias_record(
            graph,
            provider,
            &settings.domain,
            zone_id,
            &load_balancer,
            attr::DNS_NAME,
            attr::ZONE_ID,
        )?;

        info!(
            load_balancer = %load_balancer.name,
            domain = %settings.domain,
            rules = routing.https.rules().len(),
            "Declared load balancer stack"
        );

        Ok(Self {
            security_group,
            certificate,
            load_balancer,
            target_group,
            http_listener,
            https_listener,
            rules,
            alias,
            routing,
        })
    }
}
