//! Provisioning Engine Seam
//!
//! The crate describes resources; something else creates them. A
//! [`ProvisioningEngine`] receives one descriptor at a time with every output
//! reference already resolved, and returns the outputs it produced.
//!
//! ## Architecture
//!
//! ```text
//! StackGraph --topological order--> apply() --resolved props--> ProvisioningEngine
//!                                      ^                               |
//!                                      +--------- ResourceOutputs -----+
//! ```
//!
//! A failed resource does not stop the run: its transitive dependents are
//! skipped and reported against the failing resource, and independent
//! resources still go ahead. Nothing is retried here.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{StackError, StackResult};
use crate::graph::{attr, resolve, OutputStore, ResourceDescriptor, ResourceKind, ResourceOutputs, StackGraph};

/// External creator of resources
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Engine name for reports and logs
    fn name(&self) -> &str;

    /// Create or update one resource. `properties` contains no intrinsics.
    /// Provider-side rejections come back as [`StackError::Reconciliation`].
    async fn materialize(
        &self,
        descriptor: &ResourceDescriptor,
        properties: &Value,
    ) -> StackResult<ResourceOutputs>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
    Created,
    Failed { message: String },
    /// Not attempted because `predecessor` failed
    Skipped { predecessor: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(flatten)]
    pub status: ResourceStatus,
    pub duration_ms: u64,
}

/// Result of one apply run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In the order resources were visited
    pub outcomes: Vec<ResourceOutcome>,
    pub outputs: OutputStore,
}

impl DeployReport {
    /// True when every resource was created
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == ResourceStatus::Created)
    }

    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == ResourceStatus::Created)
            .count()
    }

    pub fn outcome(&self, name: &str) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Every failure and skip as an error naming the resource
    pub fn errors(&self) -> Vec<StackError> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                ResourceStatus::Created => None,
                ResourceStatus::Failed { message } => Some(StackError::Reconciliation {
                    resource: o.name.clone(),
                    message: message.clone(),
                }),
                ResourceStatus::Skipped { predecessor } => Some(StackError::DependencyFailure {
                    resource: o.name.clone(),
                    predecessor: predecessor.clone(),
                }),
            })
            .collect()
    }
}

/// Hand every descriptor to `engine` in dependency order.
///
/// Fails only when the graph itself is invalid; per-resource failures are
/// recorded in the report.
pub async fn apply(graph: &StackGraph, engine: &dyn ProvisioningEngine) -> StackResult<DeployReport> {
    let order = graph.topological_order()?;
    let started_at = Utc::now();
    info!(engine = engine.name(), resources = order.len(), "Starting apply");

    let mut outputs = OutputStore::new();
    // resource -> failing resource that caused it not to exist
    let mut failed: HashMap<String, String> = HashMap::new();
    let mut outcomes = Vec::with_capacity(order.len());

    for descriptor in order {
        let start = Instant::now();

        let blocked_by = descriptor
            .predecessors()
            .into_iter()
            .find_map(|p| failed.get(&p).cloned());
        let status = if let Some(root) = blocked_by {
            warn!(resource = %descriptor.name, predecessor = %root, "Skipping resource");
            failed.insert(descriptor.name.clone(), root.clone());
            ResourceStatus::Skipped { predecessor: root }
        } else {
            match materialize_one(engine, descriptor, &outputs).await {
                Ok(produced) => {
                    debug!(resource = %descriptor.name, id = %produced.id, "Resource materialized");
                    outputs.insert(descriptor.name.clone(), produced);
                    ResourceStatus::Created
                }
                Err(e) => {
                    error!(resource = %descriptor.name, error = %e, "Resource failed");
                    failed.insert(descriptor.name.clone(), descriptor.name.clone());
                    ResourceStatus::Failed {
                        message: failure_message(e),
                    }
                }
            }
        };

        outcomes.push(ResourceOutcome {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }

    let report = DeployReport {
        engine: engine.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        outcomes,
        outputs,
    };
    info!(
        engine = engine.name(),
        created = report.created(),
        failed = report.outcomes.len() - report.created(),
        "Apply finished"
    );
    Ok(report)
}

async fn materialize_one(
    engine: &dyn ProvisioningEngine,
    descriptor: &ResourceDescriptor,
    outputs: &OutputStore,
) -> StackResult<ResourceOutputs> {
    let properties = resolve(&descriptor.name, &descriptor.properties, outputs)?;
    engine.materialize(descriptor, &properties).await
}

fn failure_message(err: StackError) -> String {
    match err {
        StackError::Reconciliation { message, .. } => message,
        other => other.to_string(),
    }
}

/// One call seen by [`RecordingEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCall {
    pub name: String,
    pub kind: ResourceKind,
    pub provider: String,
    pub properties: Value,
}

/// Dry-run engine: records every call and fabricates plausible outputs.
/// Resources registered with [`RecordingEngine::fail_on`] are rejected.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
    failures: BTreeMap<String, String>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `resource` with `message` instead of creating it
    pub fn fail_on(mut self, resource: &str, message: &str) -> Self {
        self.failures.insert(resource.to_string(), message.to_string());
        self
    }

    /// Number of `materialize` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().await.clone()
    }
}

#[async_trait]
impl ProvisioningEngine for RecordingEngine {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn materialize(
        &self,
        descriptor: &ResourceDescriptor,
        properties: &Value,
    ) -> StackResult<ResourceOutputs> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().await.push(RecordedCall {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            provider: descriptor.provider.clone(),
            properties: properties.clone(),
        });

        if let Some(message) = self.failures.get(&descriptor.name) {
            return Err(StackError::Reconciliation {
                resource: descriptor.name.clone(),
                message: message.clone(),
            });
        }
        Ok(fabricate_outputs(descriptor, properties))
    }
}

/// Outputs shaped like the provider's, with random physical ids
pub fn fabricate_outputs(descriptor: &ResourceDescriptor, properties: &Value) -> ResourceOutputs {
    let token = Uuid::new_v4().simple().to_string();
    let short = &token[..8];
    let id = format!("{}-{}", descriptor.name, short);
    let region = descriptor
        .provider
        .strip_prefix("aws_")
        .unwrap_or(&descriptor.provider);
    let service = descriptor
        .kind
        .type_token()
        .split(|c: char| c == '/' || c == ':')
        .nth(1)
        .unwrap_or("resource");
    let text = |key: &str| properties.get(key).and_then(Value::as_str).unwrap_or("");

    let mut attributes = BTreeMap::new();
    for &attribute in descriptor.kind.attributes() {
        let value = match attribute {
            attr::ARN => format!("arn:aws:{}:{}:000000000000:{}", service, region, id),
            attr::NAME => descriptor.name.clone(),
            attr::DNS_NAME => format!("{}.{}.elb.amazonaws.com", id, region),
            attr::ZONE_ID | attr::HOSTED_ZONE_ID => format!("Z{}", token[..13].to_ascii_uppercase()),
            attr::DOMAIN_NAME => format!("{}.cloudfront.net", short),
            attr::REGIONAL_DOMAIN_NAME => format!("{}.s3.{}.amazonaws.com", id, region),
            attr::IAM_ARN => format!(
                "arn:aws:iam::cloudfront:user/CloudFront Origin Access Identity {}",
                short
            ),
            attr::ACCESS_IDENTITY_PATH => format!("origin-access-identity/cloudfront/{}", short),
            attr::VALIDATION_RECORD_NAME => format!("_{}.{}.", short, text("domainName")),
            attr::VALIDATION_RECORD_TYPE => "CNAME".to_string(),
            attr::VALIDATION_RECORD_VALUE => format!("_{}.acm-validations.aws.", &token[8..16]),
            attr::FQDN => text("name").to_string(),
            other => format!("{}-{}", other, short),
        };
        attributes.insert(attribute.to_string(), value);
    }

    ResourceOutputs { id, attributes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputRef;
    use crate::provider::ProviderBinding;
    use serde_json::json;

    fn graph() -> StackGraph {
        let p = ProviderBinding::new("eu-west-2", "eneftea");
        let mut graph = StackGraph::new();
        let cert = graph
            .declare(ResourceDescriptor::new(
                "certificate",
                ResourceKind::Certificate,
                &p,
                json!({"domainName": "api.eneftea.com"}),
            ))
            .unwrap();
        let record = graph
            .declare(ResourceDescriptor::new(
                "certificateValidationDomain",
                ResourceKind::DnsRecord,
                &p,
                json!({"name": cert.attr(attr::VALIDATION_RECORD_NAME)}),
            ))
            .unwrap();
        graph
            .declare(
                ResourceDescriptor::new(
                    "https-listener",
                    ResourceKind::Listener,
                    &p,
                    json!({"certificateArn": cert.arn()}),
                )
                .depends_on(&record),
            )
            .unwrap();
        graph
            .declare(ResourceDescriptor::new(
                "eneftea-cluster",
                ResourceKind::EcsCluster,
                &p,
                json!({}),
            ))
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_apply_resolves_references() {
        let engine = RecordingEngine::new();
        let report = apply(&graph(), &engine).await.unwrap();

        assert!(report.is_success());
        assert_eq!(engine.calls(), 4);

        let calls = engine.recorded().await;
        let record = calls
            .iter()
            .find(|c| c.name == "certificateValidationDomain")
            .unwrap();
        let name = record.properties["name"].as_str().unwrap();
        assert!(name.ends_with(".api.eneftea.com."));

        let listener = calls.iter().find(|c| c.name == "https-listener").unwrap();
        assert_eq!(
            listener.properties["certificateArn"],
            json!(report.outputs["certificate"].attributes["Arn"])
        );
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let engine = RecordingEngine::new().fail_on("certificate", "LimitExceededException");
        let report = apply(&graph(), &engine).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(engine.calls(), 2);
        assert_eq!(
            report.outcome("certificate").unwrap().status,
            ResourceStatus::Failed {
                message: "LimitExceededException".to_string()
            }
        );
        for name in ["certificateValidationDomain", "https-listener"] {
            assert_eq!(
                report.outcome(name).unwrap().status,
                ResourceStatus::Skipped {
                    predecessor: "certificate".to_string()
                }
            );
        }
        assert_eq!(
            report.outcome("eneftea-cluster").unwrap().status,
            ResourceStatus::Created
        );

        let errors = report.errors();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].to_string().contains("certificate"));
    }

    #[tokio::test]
    async fn test_unresolved_output_fails_the_resource() {
        struct Empty;

        #[async_trait]
        impl ProvisioningEngine for Empty {
            fn name(&self) -> &str {
                "empty"
            }

            async fn materialize(
                &self,
                _descriptor: &ResourceDescriptor,
                _properties: &Value,
            ) -> StackResult<ResourceOutputs> {
                Ok(ResourceOutputs::default())
            }
        }

        let report = apply(&graph(), &Empty).await.unwrap();
        match &report.outcome("certificateValidationDomain").unwrap().status {
            ResourceStatus::Failed { message } => {
                assert!(message.contains("DomainValidationRecordName"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(
            report.outcome("https-listener").unwrap().status,
            ResourceStatus::Skipped {
                predecessor: "certificateValidationDomain".to_string()
            }
        );
    }

    #[test]
    fn test_fabricated_outputs_cover_kind_attributes() {
        let p = ProviderBinding::new("eu-west-2", "eneftea");
        let bucket = ResourceDescriptor::new("nft-media-cdn-s3", ResourceKind::Bucket, &p, json!({}));
        let outputs = fabricate_outputs(&bucket, &json!({}));

        assert!(outputs.id.starts_with("nft-media-cdn-s3-"));
        let domain = &outputs.attributes[attr::REGIONAL_DOMAIN_NAME];
        assert!(domain.starts_with(&outputs.id));
        assert!(domain.ends_with(".s3.eu-west-2.amazonaws.com"));
        assert!(outputs.attributes[attr::ARN].starts_with("arn:aws:s3:eu-west-2:"));

        let reference = OutputRef::new("nft-media-cdn-s3", attr::ARN);
        assert_eq!(reference.attribute.as_deref(), Some("Arn"));
    }
}
