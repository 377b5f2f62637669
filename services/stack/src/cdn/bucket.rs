//! Content buckets served through the distribution

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::rewrite::{PathRewrite, FUNCTION_RUNTIME};
use crate::error::GraphError;
use crate::graph::{attr, join, ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::provider::ProviderBinding;

/// Logical buckets published on the CDN
pub const CONTENT_BUCKETS: &[&str] = &["nft-media"];

pub const CORS_MAX_AGE_SECONDS: u32 = 3000;

/// Everything declared for one logical bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBucket {
    /// Logical bucket name, e.g. `nft-media`
    pub name: String,
    /// Origin id on the distribution, also the bucket's logical resource name
    pub origin_id: String,
    pub bucket: ResourceHandle,
    pub cors: ResourceHandle,
    pub policy: ResourceHandle,
    pub function: ResourceHandle,
    pub rewrite: PathRewrite,
}

impl ContentBucket {
    /// Declare the bucket, its CORS rules, a policy granting read only to
    /// `access_identity`, and the prefix-stripping edge function.
    pub fn declare(
        graph: &mut StackGraph,
        provider: &ProviderBinding,
        name: &str,
        access_identity: &ResourceHandle,
    ) -> Result<Self, GraphError> {
        let origin_id = format!("{}-cdn-s3", name);

        let bucket = graph.declare(ResourceDescriptor::new(
            &origin_id,
            ResourceKind::Bucket,
            provider,
            json!({ "tags": { "Name": origin_id } }),
        ))?;

        let cors = graph.declare(
            ResourceDescriptor::new(
                format!("{}-cors", origin_id),
                ResourceKind::BucketCors,
                provider,
                json!({
                    "bucket": bucket.id(),
                    "corsRules": [{
                        "allowedHeaders": ["*"],
                        "allowedMethods": ["GET"],
                        "allowedOrigins": ["*"],
                        "exposeHeaders": ["ETag"],
                        "maxAgeSeconds": CORS_MAX_AGE_SECONDS,
                    }],
                }),
            )
            .depends_on(&bucket),
        )?;

        let policy = graph.declare(
            ResourceDescriptor::new(
                format!("{}-policy", origin_id),
                ResourceKind::BucketPolicy,
                provider,
                json!({
                    "bucket": bucket.id(),
                    "policy": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": { "AWS": access_identity.attr(attr::IAM_ARN) },
                            "Action": "s3:GetObject",
                            "Resource": join([bucket.arn().to_value(), json!("/*")]),
                        }],
                    },
                }),
            )
            .depends_on(&bucket)
            .depends_on(access_identity),
        )?;

        let rewrite = PathRewrite::strip_bucket_prefix(name);
        let function_name = format!("cdn-cffn-{}", name);
        let function = graph.declare(ResourceDescriptor::new(
            &function_name,
            ResourceKind::EdgeFunction,
            provider,
            json!({
                "name": function_name,
                "runtime": FUNCTION_RUNTIME,
                "code": rewrite.function_code(),
            }),
        ))?;

        debug!(bucket = %name, origin_id = %origin_id, "Declared content bucket");
        Ok(Self {
            name: name.to_string(),
            origin_id,
            bucket,
            cors,
            policy,
            function,
            rewrite,
        })
    }

    /// Origin entry for the distribution
    pub fn origin(&self, access_identity: &ResourceHandle) -> serde_json::Value {
        json!({
            "originId": self.origin_id,
            "domainName": self.bucket.attr(attr::REGIONAL_DOMAIN_NAME),
            "s3OriginConfig": {
                "originAccessIdentity": access_identity.attr(attr::ACCESS_IDENTITY_PATH),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_grants_only_the_access_identity() {
        let provider = ProviderBinding::new("eu-west-2", "eneftea");
        let mut graph = StackGraph::new();
        let oai = graph
            .declare(ResourceDescriptor::new(
                "cdn-oai",
                ResourceKind::OriginAccessIdentity,
                &provider,
                json!({ "comment": "OAI for eneftea CDN" }),
            ))
            .unwrap();

        let bucket = ContentBucket::declare(&mut graph, &provider, "nft-media", &oai).unwrap();
        assert_eq!(bucket.origin_id, "nft-media-cdn-s3");
        assert_eq!(bucket.function.name, "cdn-cffn-nft-media");

        let policy = &graph.get("nft-media-cdn-s3-policy").unwrap().properties["policy"];
        let statement = &policy["Statement"][0];
        assert_eq!(statement["Action"], "s3:GetObject");
        assert_eq!(
            statement["Principal"]["AWS"],
            json!({"Fn::GetAtt": ["cdn-oai", "IamArn"]})
        );
        assert_eq!(
            statement["Resource"],
            json!({"Fn::Join": ["", [{"Fn::GetAtt": ["nft-media-cdn-s3", "Arn"]}, "/*"]]})
        );

        let cors = &graph.get("nft-media-cdn-s3-cors").unwrap().properties["corsRules"][0];
        assert_eq!(cors["allowedMethods"], json!(["GET"]));
        assert_eq!(cors["exposeHeaders"], json!(["ETag"]));
        assert_eq!(cors["maxAgeSeconds"], 3000);
    }
}
