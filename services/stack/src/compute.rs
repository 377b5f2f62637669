//! Compute Stack
//!
//! One Fargate service running the API container behind the load balancer's
//! target group.
//!
//! ## Architecture
//!
//! ```text
//! eneftea-cluster --+
//! api sg -----------+-> eneftea-svc-task -> eneftea-svc
//! api-tg + rules ---+
//! ```
//!
//! The container environment always carries the same keys in the same order.
//! Values come from configuration, except `NFT_STORAGE_BUCKET`, which is
//! derived from the content bucket's regional domain name and is the empty
//! string when that bucket is not part of the deployment.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cdn::{ContentBucket, DistributionStack};
use crate::config::DeploymentSettings;
use crate::error::StackResult;
use crate::graph::{attr, first_segment, ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::load_balancer::LoadBalancerStack;
use crate::network::Network;
use crate::provider::Providers;
use crate::security::{api_service_boundary, API_PORT};

pub const CLUSTER_NAME: &str = "eneftea-cluster";
pub const SERVICE_NAME: &str = "eneftea-svc";
pub const CONTAINER_NAME: &str = "api";
pub const DESIRED_COUNT: u32 = 1;

/// Bucket whose identifier the API reads media from
pub const NFT_STORAGE_BUCKET: &str = "nft-media";

/// Container environment keys, in the order they are passed
pub const ENVIRONMENT_KEYS: &[&str] = &[
    "MOLECULER_NAMESPACE",
    "CACHER",
    "TRANSPORTER",
    "KAFKA_URL",
    "REDIS_URL",
    "DATABASE_URL",
    "PORT",
    "IPFS_GATEWAY",
    "CDN_HOST",
    "NFT_STORAGE_BUCKET",
    "NFT_STORAGE_REGION",
    "S3_KEY_ID",
    "S3_SECRET_ACCESS_KEY",
];

/// One container environment entry. `value` is a string or a deferred
/// output expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: Value,
}

impl EnvironmentVariable {
    fn new(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// Build the API container environment
pub fn task_environment(
    settings: &DeploymentSettings,
    storage_bucket: Option<&ContentBucket>,
) -> Vec<EnvironmentVariable> {
    let api = &settings.api;
    let storage_bucket = match storage_bucket {
        Some(bucket) => first_segment(bucket.bucket.attr(attr::REGIONAL_DOMAIN_NAME), "."),
        None => {
            warn!(bucket = NFT_STORAGE_BUCKET, "Storage bucket not declared, passing empty value");
            json!("")
        }
    };

    vec![
        EnvironmentVariable::new("MOLECULER_NAMESPACE", api.moleculer_namespace.as_str()),
        EnvironmentVariable::new("CACHER", api.redis_url.as_str()),
        EnvironmentVariable::new("TRANSPORTER", api.redis_url.as_str()),
        EnvironmentVariable::new("KAFKA_URL", api.kafka_url.as_str()),
        EnvironmentVariable::new("REDIS_URL", api.redis_url.as_str()),
        EnvironmentVariable::new("DATABASE_URL", api.database_url.as_str()),
        EnvironmentVariable::new("PORT", API_PORT.to_string()),
        EnvironmentVariable::new("IPFS_GATEWAY", api.ipfs_gateway.as_str()),
        EnvironmentVariable::new("CDN_HOST", format!("https://{}", settings.cdn_domain)),
        EnvironmentVariable::new("NFT_STORAGE_BUCKET", storage_bucket),
        EnvironmentVariable::new("NFT_STORAGE_REGION", settings.region.as_str()),
        EnvironmentVariable::new("S3_KEY_ID", api.s3_key_id.as_str()),
        EnvironmentVariable::new("S3_SECRET_ACCESS_KEY", api.s3_secret_access_key.as_str()),
    ]
}

/// Handles for everything the compute stack declares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeStack {
    pub cluster: ResourceHandle,
    pub security_group: ResourceHandle,
    pub task_definition: ResourceHandle,
    pub service: ResourceHandle,
    pub environment: Vec<EnvironmentVariable>,
}

impl ComputeStack {
    pub fn declare(
        graph: &mut StackGraph,
        providers: &Providers,
        settings: &DeploymentSettings,
        network: &Network,
        load_balancer: &LoadBalancerStack,
        cdn: &DistributionStack,
    ) -> StackResult<Self> {
        let provider = &providers.primary;

        let cluster = graph.declare(ResourceDescriptor::new(
            CLUSTER_NAME,
            ResourceKind::EcsCluster,
            provider,
            json!({}),
        ))?;

        let security_group = api_service_boundary(&settings.operator_cidrs).declare(
            graph,
            provider,
            &network.vpc.id,
        )?;

        let environment = task_environment(settings, cdn.bucket_named(NFT_STORAGE_BUCKET));
        let api = &settings.api;
        let task_definition = graph.declare(ResourceDescriptor::new(
            format!("{}-task", SERVICE_NAME),
            ResourceKind::TaskDefinition,
            provider,
            json!({
                "family": SERVICE_NAME,
                "requiresCompatibilities": ["FARGATE"],
                "networkMode": "awsvpc",
                "cpu": api.cpu.to_string(),
                "memory": api.memory.to_string(),
                "containerDefinitions": [{
                    "name": CONTAINER_NAME,
                    "image": api.image,
                    "memory": api.memory,
                    "cpu": api.cpu,
                    "essential": true,
                    "portMappings": [{ "containerPort": API_PORT }],
                    "environment": environment,
                }],
            }),
        ))?;

        // the target group must be attached to a listener before a service
        // can register into it
        let mut descriptor = ResourceDescriptor::new(
            SERVICE_NAME,
            ResourceKind::EcsService,
            provider,
            json!({
                "name": SERVICE_NAME,
                "cluster": cluster.arn(),
                "taskDefinition": task_definition.arn(),
                "launchType": "FARGATE",
                "desiredCount": DESIRED_COUNT,
                "networkConfiguration": {
                    "assignPublicIp": true,
                    "subnets": network.subnet_ids(),
                    "securityGroups": [network.default_security_group.id, security_group.id()],
                },
                "loadBalancers": [{
                    "targetGroupArn": load_balancer.target_group.arn(),
                    "containerName": CONTAINER_NAME,
                    "containerPort": API_PORT,
                }],
            }),
        )
        .depends_on(&security_group)
        .depends_on(&cluster)
        .depends_on(&load_balancer.target_group);
        for rule in &load_balancer.rules {
            descriptor = descriptor.depends_on(rule);
        }
        let service = graph.declare(descriptor)?;

        info!(
            service = %service.name,
            image = %api.image,
            desired_count = DESIRED_COUNT,
            "Declared compute stack"
        );

        Ok(Self {
            cluster,
            security_group,
            task_definition,
            service,
            environment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::complete_config;
    use crate::graph::{resolve, OutputStore, ResourceOutputs};
    use crate::provider::ProviderBinding;
    use std::collections::BTreeMap;

    fn settings() -> DeploymentSettings {
        DeploymentSettings::from_config(&complete_config()).unwrap()
    }

    fn names(env: &[EnvironmentVariable]) -> Vec<&str> {
        env.iter().map(|v| v.name.as_str()).collect()
    }

    fn nft_bucket(graph: &mut StackGraph) -> ContentBucket {
        let provider = ProviderBinding::new("eu-west-2", "eneftea");
        let oai = graph
            .declare(ResourceDescriptor::new(
                "cdn-oai",
                ResourceKind::OriginAccessIdentity,
                &provider,
                json!({}),
            ))
            .unwrap();
        ContentBucket::declare(graph, &provider, NFT_STORAGE_BUCKET, &oai).unwrap()
    }

    #[test]
    fn test_key_set_is_constant() {
        let mut graph = StackGraph::new();
        let bucket = nft_bucket(&mut graph);

        let with_bucket = task_environment(&settings(), Some(&bucket));
        let without_bucket = task_environment(&settings(), None);

        assert_eq!(names(&with_bucket), ENVIRONMENT_KEYS);
        assert_eq!(names(&without_bucket), ENVIRONMENT_KEYS);
        assert_eq!(without_bucket[9].value, json!(""));
    }

    #[test]
    fn test_values_from_configuration() {
        let env = task_environment(&settings(), None);
        let value = |key: &str| env.iter().find(|v| v.name == key).unwrap().value.clone();

        assert_eq!(value("CACHER"), value("REDIS_URL"));
        assert_eq!(value("TRANSPORTER"), json!("redis://cache.internal:6379"));
        assert_eq!(value("PORT"), json!("3000"));
        assert_eq!(value("CDN_HOST"), json!("https://cdn.eneftea.com"));
        assert_eq!(value("NFT_STORAGE_REGION"), json!("eu-west-2"));
    }

    #[test]
    fn test_bucket_identifier_resolves_from_regional_domain() {
        let mut graph = StackGraph::new();
        let bucket = nft_bucket(&mut graph);
        let env = task_environment(&settings(), Some(&bucket));

        let domain = "nft-media-cdn-s3-8f2e1a.s3.eu-west-2.amazonaws.com";
        let mut outputs = OutputStore::new();
        outputs.insert(
            "nft-media-cdn-s3".to_string(),
            ResourceOutputs {
                id: "nft-media-cdn-s3-8f2e1a".to_string(),
                attributes: BTreeMap::from([(
                    attr::REGIONAL_DOMAIN_NAME.to_string(),
                    domain.to_string(),
                )]),
            },
        );

        let resolved = resolve(SERVICE_NAME, &env[9].value, &outputs).unwrap();
        assert_eq!(resolved, json!("nft-media-cdn-s3-8f2e1a"));
    }
}
