//! Composition Root
//!
//! Wires every stack into one [`Deployment`]. Evaluation order:
//!
//! 1. Validate settings. A missing key stops here, before any lookup or
//!    declaration.
//! 2. Resolve the existing network.
//! 3. Declare shared resources, then the load balancer, distribution and
//!    compute stacks, each consuming the handles of the ones before it.
//! 4. Validate the finished graph.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::cdn::DistributionStack;
use crate::compute::ComputeStack;
use crate::config::{DeploymentSettings, StackConfig};
use crate::error::{GraphError, StackResult};
use crate::graph::{attr, ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::load_balancer::LoadBalancerStack;
use crate::network::{lookup_network, Network, NetworkLookup};
use crate::provider::{ProviderBinding, Providers};
use crate::security::direct_access_boundary;
use crate::template::Export;

/// Managed policy granting Systems Manager access
pub const SSM_MANAGED_POLICY_ARN: &str = "arn:aws:iam::aws:policy/service-role/AmazonEC2RoleforSSM";

/// Operator access resources. Declared for later wiring; nothing in this
/// deployment assumes the role or uses the profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAccess {
    pub role: ResourceHandle,
    pub policy_attachment: ResourceHandle,
    pub instance_profile: ResourceHandle,
}

impl OperatorAccess {
    pub fn declare(graph: &mut StackGraph, provider: &ProviderBinding) -> Result<Self, GraphError> {
        let role = graph.declare(ResourceDescriptor::new(
            "ssmRole",
            ResourceKind::IamRole,
            provider,
            json!({
                "assumeRolePolicy": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Sid": "",
                        "Principal": { "Service": "ec2.amazonaws.com" },
                    }],
                },
            }),
        ))?;

        let policy_attachment = graph.declare(ResourceDescriptor::new(
            "ssmPolicyAttachment",
            ResourceKind::IamRolePolicyAttachment,
            provider,
            json!({
                "role": role.attr(attr::NAME),
                "policyArn": SSM_MANAGED_POLICY_ARN,
            }),
        ))?;

        let instance_profile = graph.declare(ResourceDescriptor::new(
            "instanceProfile",
            ResourceKind::IamInstanceProfile,
            provider,
            json!({ "role": role.attr(attr::NAME) }),
        ))?;

        Ok(Self {
            role,
            policy_attachment,
            instance_profile,
        })
    }
}

/// The assembled deployment: settings, resolved network, the validated graph
/// and a handle to every declared resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub region: String,
    pub providers: Providers,
    pub network: Network,
    pub operator_access: OperatorAccess,
    pub service_discovery: ResourceHandle,
    pub log_group: ResourceHandle,
    pub direct_access: ResourceHandle,
    pub load_balancer: LoadBalancerStack,
    pub cdn: DistributionStack,
    pub compute: ComputeStack,
    pub graph: StackGraph,
}

impl Deployment {
    /// Evaluate the whole stack. Nothing is created; the returned graph is
    /// ready to hand to a provisioning engine.
    pub async fn compose(config: &StackConfig, lookup: &dyn NetworkLookup) -> StackResult<Self> {
        let settings = DeploymentSettings::from_config(config)?;
        let providers = Providers::from_settings(&settings);

        let network =
            lookup_network(lookup, &settings.availability_zones(), &settings.domain).await?;

        Self::assemble(&settings, providers, network)
    }

    /// Synchronous graph construction from already-resolved inputs
    pub fn assemble(
        settings: &DeploymentSettings,
        providers: Providers,
        network: Network,
    ) -> StackResult<Self> {
        let mut graph = StackGraph::new();
        let provider = &providers.primary;

        let operator_access = OperatorAccess::declare(&mut graph, provider)?;

        let service_discovery = graph.declare(ResourceDescriptor::new(
            "eneftea-dns",
            ResourceKind::PrivateDnsNamespace,
            provider,
            json!({
                "description": "service discovery namespace for eneftea",
                "vpc": network.vpc.id,
            }),
        ))?;

        let log_group = graph.declare(ResourceDescriptor::new(
            "loggroup",
            ResourceKind::LogGroup,
            provider,
            json!({}),
        ))?;

        let direct_access = direct_access_boundary(&settings.operator_cidrs).declare(
            &mut graph,
            provider,
            &network.vpc.id,
        )?;

        let load_balancer = LoadBalancerStack::declare(&mut graph, &providers, settings, &network)?;
        let cdn = DistributionStack::declare(&mut graph, &providers, settings, &network)?;
        let compute = ComputeStack::declare(
            &mut graph,
            &providers,
            settings,
            &network,
            &load_balancer,
            &cdn,
        )?;

        graph.validate()?;
        info!(
            resources = graph.len(),
            region = %settings.region,
            domain = %settings.domain,
            "Deployment composed"
        );

        Ok(Self {
            region: settings.region.clone(),
            providers,
            network,
            operator_access,
            service_discovery,
            log_group,
            direct_access,
            load_balancer,
            cdn,
            compute,
            graph,
        })
    }

    /// Every declared handle, in declaration order
    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.graph
            .descriptors()
            .iter()
            .map(|d| ResourceHandle {
                name: d.name.clone(),
                kind: d.kind,
            })
            .collect()
    }

    /// Outputs published with the rendered template
    pub fn exports(&self) -> Vec<Export> {
        let export = |key: &str, description: &str, value| Export {
            key: key.to_string(),
            description: description.to_string(),
            value,
        };
        vec![
            export(
                "LoadBalancerDnsName",
                "Public DNS name of the API load balancer",
                self.load_balancer.load_balancer.attr(attr::DNS_NAME),
            ),
            export(
                "ApiAlias",
                "API alias record",
                self.load_balancer.alias.attr(attr::FQDN),
            ),
            export(
                "DistributionDomainName",
                "CloudFront domain name of the content distribution",
                self.cdn.distribution.attr(attr::DOMAIN_NAME),
            ),
            export(
                "CdnAlias",
                "CDN alias record",
                self.cdn.alias.attr(attr::FQDN),
            ),
            export(
                "ServiceName",
                "Name of the API service",
                self.compute.service.attr(attr::NAME),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::complete_config;
    use crate::error::{ConfigError, LookupError, StackError};
    use crate::network::tests::inventory;

    #[tokio::test]
    async fn test_compose_full_deployment() {
        let deployment = Deployment::compose(&complete_config(), &inventory())
            .await
            .unwrap();

        assert_eq!(deployment.graph.len(), deployment.handles().len());
        for name in [
            "ssmRole",
            "ssmPolicyAttachment",
            "instanceProfile",
            "eneftea-dns",
            "loggroup",
            "apiSecurityGroup",
            "eneftea-lb",
            "cdn-cf",
            "eneftea-svc",
        ] {
            assert!(deployment.graph.contains(name), "missing {}", name);
        }
        assert_eq!(deployment.compute.service.name, "eneftea-svc");
        assert_eq!(deployment.region, "eu-west-2");
    }

    #[tokio::test]
    async fn test_instance_profile_is_not_attached() {
        let deployment = Deployment::compose(&complete_config(), &inventory())
            .await
            .unwrap();
        let dependents = deployment.graph.transitive_dependents("instanceProfile");
        assert!(dependents.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_declaring() {
        let mut config = complete_config();
        config.remove("AWS_PROFILE");
        let err = Deployment::compose(&config, &inventory()).await.unwrap_err();
        assert!(matches!(err, StackError::Config(ConfigError::Missing(ref keys)) if keys == &["AWS_PROFILE"]));
    }

    #[tokio::test]
    async fn test_lookup_failure_surfaces() {
        let mut inv = inventory();
        inv.hosted_zones.clear();
        let err = Deployment::compose(&complete_config(), &inv).await.unwrap_err();
        assert!(matches!(err, StackError::Lookup(LookupError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_exports_reference_declared_resources() {
        let deployment = Deployment::compose(&complete_config(), &inventory())
            .await
            .unwrap();
        for export in deployment.exports() {
            assert!(deployment.graph.contains(&export.value.resource), "{}", export.key);
        }
    }

    #[tokio::test]
    async fn test_service_discovery_bound_to_vpc() {
        let deployment = Deployment::compose(&complete_config(), &inventory())
            .await
            .unwrap();
        let namespace = deployment.graph.get("eneftea-dns").unwrap();
        assert_eq!(namespace.properties["vpc"], "vpc-0a1b2c");
    }
}
