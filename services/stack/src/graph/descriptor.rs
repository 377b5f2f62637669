//! Resource descriptors and handles

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::output::{references, OutputRef};
use crate::provider::ProviderBinding;

/// Output attribute names produced by materialized resources
pub mod attr {
    pub const ARN: &str = "Arn";
    pub const NAME: &str = "Name";
    pub const DNS_NAME: &str = "DnsName";
    pub const ZONE_ID: &str = "ZoneId";
    pub const DOMAIN_NAME: &str = "DomainName";
    pub const HOSTED_ZONE_ID: &str = "HostedZoneId";
    pub const REGIONAL_DOMAIN_NAME: &str = "BucketRegionalDomainName";
    pub const IAM_ARN: &str = "IamArn";
    pub const ACCESS_IDENTITY_PATH: &str = "CloudfrontAccessIdentityPath";
    pub const VALIDATION_RECORD_NAME: &str = "DomainValidationRecordName";
    pub const VALIDATION_RECORD_TYPE: &str = "DomainValidationRecordType";
    pub const VALIDATION_RECORD_VALUE: &str = "DomainValidationRecordValue";
    pub const FQDN: &str = "Fqdn";
}

/// Kind of managed resource, serialized as the provider's type token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "aws:iam/role:Role")]
    IamRole,
    #[serde(rename = "aws:iam/rolePolicyAttachment:RolePolicyAttachment")]
    IamRolePolicyAttachment,
    #[serde(rename = "aws:iam/instanceProfile:InstanceProfile")]
    IamInstanceProfile,
    #[serde(rename = "aws:servicediscovery/privateDnsNamespace:PrivateDnsNamespace")]
    PrivateDnsNamespace,
    #[serde(rename = "aws:cloudwatch/logGroup:LogGroup")]
    LogGroup,
    #[serde(rename = "aws:ec2/securityGroup:SecurityGroup")]
    SecurityGroup,
    #[serde(rename = "aws:acm/certificate:Certificate")]
    Certificate,
    #[serde(rename = "aws:route53/record:Record")]
    DnsRecord,
    #[serde(rename = "aws:lb/loadBalancer:LoadBalancer")]
    LoadBalancer,
    #[serde(rename = "aws:lb/targetGroup:TargetGroup")]
    TargetGroup,
    #[serde(rename = "aws:lb/listener:Listener")]
    Listener,
    #[serde(rename = "aws:lb/listenerRule:ListenerRule")]
    ListenerRule,
    #[serde(rename = "aws:ecs/cluster:Cluster")]
    EcsCluster,
    #[serde(rename = "aws:ecs/taskDefinition:TaskDefinition")]
    TaskDefinition,
    #[serde(rename = "aws:ecs/service:Service")]
    EcsService,
    #[serde(rename = "aws:s3/bucketV2:BucketV2")]
    Bucket,
    #[serde(rename = "aws:s3/bucketCorsConfigurationV2:BucketCorsConfigurationV2")]
    BucketCors,
    #[serde(rename = "aws:s3/bucketPolicy:BucketPolicy")]
    BucketPolicy,
    #[serde(rename = "aws:cloudfront/originAccessIdentity:OriginAccessIdentity")]
    OriginAccessIdentity,
    #[serde(rename = "aws:cloudfront/function:Function")]
    EdgeFunction,
    #[serde(rename = "aws:cloudfront/distribution:Distribution")]
    Distribution,
}

impl ResourceKind {
    pub fn type_token(&self) -> &'static str {
        match self {
            ResourceKind::IamRole => "aws:iam/role:Role",
            ResourceKind::IamRolePolicyAttachment => {
                "aws:iam/rolePolicyAttachment:RolePolicyAttachment"
            }
            ResourceKind::IamInstanceProfile => "aws:iam/instanceProfile:InstanceProfile",
            ResourceKind::PrivateDnsNamespace => {
                "aws:servicediscovery/privateDnsNamespace:PrivateDnsNamespace"
            }
            ResourceKind::LogGroup => "aws:cloudwatch/logGroup:LogGroup",
            ResourceKind::SecurityGroup => "aws:ec2/securityGroup:SecurityGroup",
            ResourceKind::Certificate => "aws:acm/certificate:Certificate",
            ResourceKind::DnsRecord => "aws:route53/record:Record",
            ResourceKind::LoadBalancer => "aws:lb/loadBalancer:LoadBalancer",
            ResourceKind::TargetGroup => "aws:lb/targetGroup:TargetGroup",
            ResourceKind::Listener => "aws:lb/listener:Listener",
            ResourceKind::ListenerRule => "aws:lb/listenerRule:ListenerRule",
            ResourceKind::EcsCluster => "aws:ecs/cluster:Cluster",
            ResourceKind::TaskDefinition => "aws:ecs/taskDefinition:TaskDefinition",
            ResourceKind::EcsService => "aws:ecs/service:Service",
            ResourceKind::Bucket => "aws:s3/bucketV2:BucketV2",
            ResourceKind::BucketCors => {
                "aws:s3/bucketCorsConfigurationV2:BucketCorsConfigurationV2"
            }
            ResourceKind::BucketPolicy => "aws:s3/bucketPolicy:BucketPolicy",
            ResourceKind::OriginAccessIdentity => {
                "aws:cloudfront/originAccessIdentity:OriginAccessIdentity"
            }
            ResourceKind::EdgeFunction => "aws:cloudfront/function:Function",
            ResourceKind::Distribution => "aws:cloudfront/distribution:Distribution",
        }
    }

    /// Attributes (besides the id) a materialized resource of this kind exposes
    pub fn attributes(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::IamRole => &[attr::ARN, attr::NAME],
            ResourceKind::IamInstanceProfile => &[attr::ARN, attr::NAME],
            ResourceKind::PrivateDnsNamespace => &[attr::ARN, attr::HOSTED_ZONE_ID],
            ResourceKind::LogGroup => &[attr::ARN, attr::NAME],
            ResourceKind::SecurityGroup => &[attr::ARN],
            ResourceKind::Certificate => &[
                attr::ARN,
                attr::VALIDATION_RECORD_NAME,
                attr::VALIDATION_RECORD_TYPE,
                attr::VALIDATION_RECORD_VALUE,
            ],
            ResourceKind::DnsRecord => &[attr::FQDN],
            ResourceKind::LoadBalancer => &[attr::ARN, attr::DNS_NAME, attr::ZONE_ID],
            ResourceKind::TargetGroup => &[attr::ARN],
            ResourceKind::Listener => &[attr::ARN],
            ResourceKind::ListenerRule => &[attr::ARN],
            ResourceKind::EcsCluster => &[attr::ARN],
            ResourceKind::TaskDefinition => &[attr::ARN],
            ResourceKind::EcsService => &[attr::NAME],
            ResourceKind::Bucket => &[attr::ARN, attr::REGIONAL_DOMAIN_NAME],
            ResourceKind::OriginAccessIdentity => &[attr::IAM_ARN, attr::ACCESS_IDENTITY_PATH],
            ResourceKind::EdgeFunction => &[attr::ARN],
            ResourceKind::Distribution => &[attr::ARN, attr::DOMAIN_NAME, attr::HOSTED_ZONE_ID],
            ResourceKind::IamRolePolicyAttachment
            | ResourceKind::BucketCors
            | ResourceKind::BucketPolicy => &[],
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_token())
    }
}

/// Desired state of one managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Logical name, unique within the stack
    pub name: String,
    pub kind: ResourceKind,
    /// Name of the provider binding the resource is created through
    pub provider: String,
    pub properties: Value,
    /// Explicitly declared predecessors
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

impl ResourceDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        provider: &ProviderBinding,
        properties: Value,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            provider: provider.name.clone(),
            properties,
            depends_on: BTreeSet::new(),
        }
    }

    /// Add an explicit ordering edge
    pub fn depends_on(mut self, handle: &ResourceHandle) -> Self {
        self.depends_on.insert(handle.name.clone());
        self
    }

    /// Predecessors implied by output references in the property bag
    pub fn implicit_predecessors(&self) -> BTreeSet<String> {
        references(&self.properties)
            .into_iter()
            .map(|r| r.resource)
            .collect()
    }

    /// Explicit and implicit predecessors together
    pub fn predecessors(&self) -> BTreeSet<String> {
        let mut all = self.implicit_predecessors();
        all.extend(self.depends_on.iter().cloned());
        all
    }
}

/// Forward reference to a declared resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub name: String,
    pub kind: ResourceKind,
}

impl ResourceHandle {
    /// The resource's physical id
    pub fn id(&self) -> OutputRef {
        OutputRef::id(&self.name)
    }

    pub fn attr(&self, attribute: &str) -> OutputRef {
        OutputRef::new(&self.name, attribute)
    }

    pub fn arn(&self) -> OutputRef {
        self.attr(attr::ARN)
    }
}
