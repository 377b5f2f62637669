//! Cache behaviors
//!
//! Ordered behaviors are kept most-specific-first and evaluated before the
//! default, so a request to `/<bucket>/x` lands on the bucket's behavior even
//! though the catch-all default matches it too.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::rewrite::PathRewrite;
use crate::error::RoutingError;
use crate::graph::{attr, OutputRef};
use crate::pattern::PathPattern;

pub const ALL_METHODS: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];
pub const READ_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
    AllowAll,
    RedirectToHttps,
    HttpsOnly,
}

impl std::fmt::Display for ViewerProtocolPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerProtocolPolicy::AllowAll => write!(f, "allow-all"),
            ViewerProtocolPolicy::RedirectToHttps => write!(f, "redirect-to-https"),
            ViewerProtocolPolicy::HttpsOnly => write!(f, "https-only"),
        }
    }
}

/// Cache lifetime bounds, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlBounds {
    pub min: u64,
    pub default: u64,
    pub max: u64,
}

impl TtlBounds {
    /// Bounds in seconds; requires `min <= default <= max`
    pub fn new(min: u64, default: u64, max: u64) -> Result<Self, RoutingError> {
        if min > default || default > max {
            return Err(RoutingError::InvalidTtl { min, default, max });
        }
        Ok(Self { min, default, max })
    }

    /// Mutable content: at most a day, an hour by default
    pub fn short() -> Self {
        Self {
            min: 0,
            default: 3_600,
            max: 86_400,
        }
    }

    /// Content-addressed objects: a day by default, up to a year
    pub fn long() -> Self {
        Self {
            min: 0,
            default: 86_400,
            max: 31_536_000,
        }
    }
}

/// Edge function run on viewer requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAssociation {
    /// Logical name of the function resource
    pub function: String,
    pub rewrite: PathRewrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBehavior {
    /// `None` for the default behavior
    pub path_pattern: Option<PathPattern>,
    pub target_origin_id: String,
    pub allowed_methods: Vec<String>,
    pub cached_methods: Vec<String>,
    pub forwarded_headers: Vec<String>,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub ttl: TtlBounds,
    pub compress: bool,
    pub function: Option<FunctionAssociation>,
}

fn methods(list: &[&str]) -> Vec<String> {
    list.iter().map(|m| m.to_string()).collect()
}

impl CacheBehavior {
    /// Catch-all behavior: any method, short TTLs, plain HTTP allowed
    pub fn default_for(origin_id: &str) -> Self {
        Self {
            path_pattern: None,
            target_origin_id: origin_id.to_string(),
            allowed_methods: methods(ALL_METHODS),
            cached_methods: methods(&["GET", "HEAD"]),
            forwarded_headers: vec!["Origin".to_string()],
            viewer_protocol_policy: ViewerProtocolPolicy::AllowAll,
            ttl: TtlBounds::short(),
            compress: false,
            function: None,
        }
    }

    /// `/<bucket>/*`: read-only, long TTLs, compressed, HTTPS, prefix stripped
    pub fn for_bucket(origin_id: &str, function: &str, rewrite: PathRewrite) -> Result<Self, RoutingError> {
        Ok(Self {
            path_pattern: Some(PathPattern::new(&format!("{}*", rewrite.prefix()))?),
            target_origin_id: origin_id.to_string(),
            allowed_methods: methods(READ_METHODS),
            cached_methods: methods(READ_METHODS),
            forwarded_headers: vec!["Origin".to_string()],
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            ttl: TtlBounds::long(),
            compress: true,
            function: Some(FunctionAssociation {
                function: function.to_string(),
                rewrite,
            }),
        })
    }

    /// The default behavior (no pattern) matches everything
    pub fn matches(&self, path: &str) -> bool {
        self.path_pattern.as_ref().map_or(true, |p| p.matches(path))
    }

    /// Provider-shaped behavior object
    pub fn to_properties(&self) -> Value {
        let mut props = json!({
            "allowedMethods": self.allowed_methods,
            "cachedMethods": self.cached_methods,
            "targetOriginId": self.target_origin_id,
            "forwardedValues": {
                "queryString": false,
                "cookies": { "forward": "none" },
                "headers": self.forwarded_headers,
            },
            "viewerProtocolPolicy": self.viewer_protocol_policy,
            "minTtl": self.ttl.min,
            "defaultTtl": self.ttl.default,
            "maxTtl": self.ttl.max,
        });
        if let Some(pattern) = &self.path_pattern {
            props["pathPattern"] = json!(pattern.as_str());
        }
        if self.compress {
            props["compress"] = json!(true);
        }
        if let Some(association) = &self.function {
            props["functionAssociations"] = json!([{
                "eventType": "viewer-request",
                "functionArn": OutputRef::new(association.function.as_str(), attr::ARN),
            }]);
        }
        props
    }
}

/// Where the origin sees a viewer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRequest {
    /// Pattern of the behavior that matched, `*` for the default
    pub behavior: String,
    pub origin_id: String,
    pub path: String,
    pub function: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBehaviors {
    default: CacheBehavior,
    /// Most specific first
    ordered: Vec<CacheBehavior>,
}

impl CacheBehaviors {
    /// Table holding only the default behavior
    pub fn new(default: CacheBehavior) -> Self {
        Self {
            default,
            ordered: Vec::new(),
        }
    }

    /// Insert keeping the most specific pattern first: longer literal prefix,
    /// then longer pattern; equal specificity keeps insertion order.
    pub fn add(&mut self, behavior: CacheBehavior) -> Result<(), RoutingError> {
        let pattern = behavior.path_pattern.clone().ok_or_else(|| RoutingError::InvalidPattern {
            pattern: String::new(),
            reason: "ordered behaviors need a path pattern".to_string(),
        })?;
        if self
            .ordered
            .iter()
            .any(|b| b.path_pattern.as_ref() == Some(&pattern))
        {
            return Err(RoutingError::DuplicatePattern(pattern.to_string()));
        }

        let key = specificity(&pattern);
        let at = self.ordered.partition_point(|b| {
            b.path_pattern
                .as_ref()
                .map_or(false, |p| specificity(p) >= key)
        });
        self.ordered.insert(at, behavior);
        Ok(())
    }

    /// Behavior used when no ordered behavior matches
    pub fn default_behavior(&self) -> &CacheBehavior {
        &self.default
    }

    /// Ordered behaviors, most specific first
    pub fn ordered(&self) -> &[CacheBehavior] {
        &self.ordered
    }

    /// First ordered behavior matching `path`, else the default
    pub fn resolve(&self, path: &str) -> &CacheBehavior {
        self.ordered
            .iter()
            .find(|b| b.matches(path))
            .unwrap_or(&self.default)
    }

    /// Resolve and apply the matched behavior's rewrite
    pub fn origin_request(&self, path: &str) -> OriginRequest {
        let behavior = self.resolve(path);
        let rewritten = match &behavior.function {
            Some(association) => association.rewrite.rewrite(path).into_owned(),
            None => path.to_string(),
        };
        OriginRequest {
            behavior: behavior
                .path_pattern
                .as_ref()
                .map_or_else(|| "*".to_string(), |p| p.to_string()),
            origin_id: behavior.target_origin_id.clone(),
            path: rewritten,
            function: behavior.function.as_ref().map(|f| f.function.clone()),
        }
    }
}

fn specificity(pattern: &PathPattern) -> (usize, usize) {
    (pattern.literal_prefix().len(), pattern.as_str().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(name: &str) -> CacheBehavior {
        CacheBehavior::for_bucket(
            &format!("{}-cdn-s3", name),
            &format!("cdn-cffn-{}", name),
            PathRewrite::strip_bucket_prefix(name),
        )
        .unwrap()
    }

    fn behaviors() -> CacheBehaviors {
        let mut behaviors = CacheBehaviors::new(CacheBehavior::default_for("nft-media-cdn-s3"));
        behaviors.add(bucket("nft-media")).unwrap();
        behaviors
    }

    #[test]
    fn test_bucket_behavior_beats_default() {
        let behaviors = behaviors();
        let matched = behaviors.resolve("/nft-media/x");
        assert_eq!(matched.path_pattern.as_ref().unwrap().as_str(), "/nft-media/*");
        assert!(behaviors.default_behavior().matches("/nft-media/x"));

        let request = behaviors.origin_request("/nft-media/x");
        assert_eq!(request.path, "/x");
        assert_eq!(request.function.as_deref(), Some("cdn-cffn-nft-media"));
    }

    #[test]
    fn test_unmatched_paths_use_default_unchanged() {
        let request = behaviors().origin_request("/index.html");
        assert_eq!(request.behavior, "*");
        assert_eq!(request.path, "/index.html");
        assert_eq!(request.function, None);
    }

    #[test]
    fn test_more_specific_pattern_sorted_first() {
        let mut behaviors = behaviors();
        behaviors.add(bucket("nft-media/thumbs")).unwrap();
        behaviors.add(bucket("a")).unwrap();

        let order: Vec<&str> = behaviors
            .ordered()
            .iter()
            .map(|b| b.path_pattern.as_ref().unwrap().as_str())
            .collect();
        assert_eq!(order, vec!["/nft-media/thumbs/*", "/nft-media/*", "/a/*"]);

        assert_eq!(
            behaviors.origin_request("/nft-media/thumbs/1.png").path,
            "/1.png"
        );
        assert_eq!(behaviors.origin_request("/nft-media/full/1.png").path, "/full/1.png");
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let mut behaviors = behaviors();
        assert_eq!(
            behaviors.add(bucket("nft-media")).unwrap_err(),
            RoutingError::DuplicatePattern("/nft-media/*".to_string())
        );
    }

    #[test]
    fn test_ttl_asymmetry() {
        let behaviors = behaviors();
        assert_eq!(behaviors.default_behavior().ttl.max, 86_400);
        assert_eq!(behaviors.ordered()[0].ttl.max, 31_536_000);
        assert!(behaviors.ordered()[0].compress);
        assert!(TtlBounds::new(10, 5, 20).is_err());
    }

    #[test]
    fn test_behavior_properties() {
        let behaviors = behaviors();
        let default = behaviors.default_behavior().to_properties();
        assert_eq!(default["viewerProtocolPolicy"], "allow-all");
        assert_eq!(default["allowedMethods"].as_array().unwrap().len(), 7);
        assert!(default.get("pathPattern").is_none());

        let ordered = behaviors.ordered()[0].to_properties();
        assert_eq!(ordered["pathPattern"], "/nft-media/*");
        assert_eq!(ordered["viewerProtocolPolicy"], "redirect-to-https");
        assert_eq!(
            ordered["functionAssociations"][0]["functionArn"],
            json!({"Fn::GetAtt": ["cdn-cffn-nft-media", "Arn"]})
        );
    }
}
