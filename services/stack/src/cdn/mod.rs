//! Content Distribution Stack
//!
//! CloudFront distribution in front of private S3 buckets.
//!
//! ## Architecture
//!
//! ```text
//! cdn-certificate (us-east-1) -> validation record --+
//! cdn-oai -> per bucket: bucket, cors, policy, fn ---+-> cdn-cf -> CDN_DOMAIN alias
//! ```
//!
//! Buckets are readable only through the origin access identity. Each bucket
//! is published under `/<bucket>/*` with a viewer-request function stripping
//! that prefix; everything else falls through to the default behavior.

pub mod behavior;
pub mod bucket;
pub mod rewrite;

pub use behavior::{
    CacheBehavior, CacheBehaviors, FunctionAssociation, OriginRequest, TtlBounds,
    ViewerProtocolPolicy,
};
pub use bucket::{ContentBucket, CONTENT_BUCKETS};
pub use rewrite::{PathRewrite, FUNCTION_RUNTIME};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::config::DeploymentSettings;
use crate::dns::declare_alias_record;
use crate::error::{RoutingError, StackResult};
use crate::graph::{attr, ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::load_balancer::{declare_certificate, ValidatedCertificate};
use crate::network::Network;
use crate::provider::Providers;

pub const DISTRIBUTION_NAME: &str = "cdn-cf";
pub const PRICE_CLASS: &str = "PriceClass_200";

/// Handles for everything the distribution stack declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionStack {
    pub certificate: ValidatedCertificate,
    pub access_identity: ResourceHandle,
    pub buckets: Vec<ContentBucket>,
    pub distribution: ResourceHandle,
    pub alias: ResourceHandle,
    pub behaviors: CacheBehaviors,
}

impl DistributionStack {
    pub fn declare(
        graph: &mut StackGraph,
        providers: &Providers,
        settings: &DeploymentSettings,
        network: &Network,
    ) -> StackResult<Self> {
        Self::declare_with_buckets(graph, providers, settings, network, CONTENT_BUCKETS)
    }

    /// Declare with an explicit bucket list. The first bucket backs the
    /// default behavior, so the list must not be empty.
    pub fn declare_with_buckets(
        graph: &mut StackGraph,
        providers: &Providers,
        settings: &DeploymentSettings,
        network: &Network,
        bucket_names: &[&str],
    ) -> StackResult<Self> {
        let provider = &providers.primary;
        let zone_id = network.hosted_zone.id.as_str();

        let first = bucket_names
            .first()
            .ok_or_else(|| RoutingError::NoOrigins(DISTRIBUTION_NAME.to_string()))?;

        let certificate = declare_certificate(
            graph,
            "cdn-certificate",
            &settings.cdn_domain,
            &providers.certificates,
            provider,
            zone_id,
        )?;

        let access_identity = graph.declare(ResourceDescriptor::new(
            "cdn-oai",
            ResourceKind::OriginAccessIdentity,
            provider,
            json!({ "comment": "OAI for eneftea CDN" }),
        ))?;

        let mut buckets = Vec::with_capacity(bucket_names.len());
        for name in bucket_names {
            buckets.push(ContentBucket::declare(graph, provider, name, &access_identity)?);
        }

        let mut behaviors = CacheBehaviors::new(CacheBehavior::default_for(&format!(
            "{}-cdn-s3",
            first
        )));
        for bucket in &buckets {
            behaviors.add(CacheBehavior::for_bucket(
                &bucket.origin_id,
                &bucket.function.name,
                bucket.rewrite.clone(),
            )?)?;
        }

        let mut descriptor = ResourceDescriptor::new(
            DISTRIBUTION_NAME,
            ResourceKind::Distribution,
            provider,
            distribution_properties(settings, &access_identity, &buckets, &behaviors, &certificate),
        )
        .depends_on(&certificate.certificate)
        .depends_on(&certificate.validation_record);
        for bucket in &buckets {
            descriptor = descriptor.depends_on(&bucket.bucket);
        }
        let distribution = graph.declare(descriptor)?;

        let alias = declare_alias_record(
            graph,
            provider,
            &settings.cdn_domain,
            zone_id,
            &distribution,
            attr::DOMAIN_NAME,
            attr::HOSTED_ZONE_ID,
        )?;

        info!(
            distribution = %distribution.name,
            cdn_domain = %settings.cdn_domain,
            buckets = buckets.len(),
            "Declared content distribution stack"
        );

        Ok(Self {
            certificate,
            access_identity,
            buckets,
            distribution,
            alias,
            behaviors,
        })
    }

    pub fn bucket_named(&self, name: &str) -> Option<&ContentBucket> {
        self.buckets.iter().find(|b| b.name == name)
    }
}

fn distribution_properties(
    settings: &DeploymentSettings,
    access_identity: &ResourceHandle,
    buckets: &[ContentBucket],
    behaviors: &CacheBehaviors,
    certificate: &ValidatedCertificate,
) -> Value {
    let origins: Vec<Value> = buckets.iter().map(|b| b.origin(access_identity)).collect();
    let ordered: Vec<Value> = behaviors
        .ordered()
        .iter()
        .map(CacheBehavior::to_properties)
        .collect();

    json!({
        "origins": origins,
        "enabled": true,
        "isIpv6Enabled": true,
        "comment": "Eneftea CDN CloudFront distribution",
        "aliases": [settings.cdn_domain],
        "defaultCacheBehavior": behaviors.default_behavior().to_properties(),
        "orderedCacheBehaviors": ordered,
        "priceClass": PRICE_CLASS,
        "restrictions": {
            "geoRestriction": { "restrictionType": "none" },
        },
        "viewerCertificate": {
            "cloudfrontDefaultCertificate": false,
            "acmCertificateArn": certificate.certificate.arn(),
            "sslSupportMethod": "sni-only",
        },
    })
}
