//! Stack configuration
//!
//! Keys come from a flat JSON file and/or the process environment. Every
//! required key is checked up front; a missing key aborts evaluation before a
//! single resource is declared.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use ipnet::IpNet;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Keys the deployment cannot be evaluated without
pub const REQUIRED_KEYS: &[&str] = &[
    "AWS_PROFILE",
    "DOMAIN",
    "CDN_DOMAIN",
    "API_IMAGE",
    "API_MEMORY",
    "API_CPU",
    "MOLECULER_NAMESPACE",
    "REDIS_URL",
    "KAFKA_URL",
    "DATABASE_URL",
    "IPFS_GATEWAY",
    "S3_KEY_ID",
    "S3_SECRET_ACCESS_KEY",
];

/// Keys with defaults
pub const OPTIONAL_KEYS: &[&str] = &["AWS_REGION", "OPERATOR_CIDRS"];

/// Region everything except the CDN certificate lives in
pub const DEFAULT_REGION: &str = "eu-west-2";

/// Addresses allowed to reach the API directly
pub const DEFAULT_OPERATOR_CIDRS: &[&str] = &["82.41.129.141/32", "154.47.114.21/32"];

/// Raw key/value configuration store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackConfig {
    values: BTreeMap<String, String>,
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit pairs (tests, embedding)
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load a flat JSON object. Numbers and booleans are stored as their
    /// string form; nested values are rejected.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let raw: BTreeMap<String, Value> =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: shown.clone(),
                source,
            })?;

        let mut values = BTreeMap::new();
        for (key, value) in raw {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => continue,
                other => {
                    return Err(ConfigError::Invalid {
                        key,
                        reason: format!("expected a scalar, found {}", other),
                    })
                }
            };
            values.insert(key, text);
        }

        info!(path = %shown, keys = values.len(), "Loaded stack configuration file");
        Ok(Self { values })
    }

    /// Read every known key from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read every known key through `lookup`. Blank values are dropped.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let values = REQUIRED_KEYS
            .iter()
            .chain(OPTIONAL_KEYS.iter())
            .filter_map(|key| {
                lookup(key)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (key.to_string(), v))
            })
            .collect();
        Self { values }
    }

    /// Overlay `other` on top of `self`; non-blank keys in `other` win
    pub fn merge(mut self, other: StackConfig) -> Self {
        for (key, value) in other.values {
            if value.trim().is_empty() {
                continue;
            }
            debug!(key = %key, "Configuration key overridden");
            self.values.insert(key, value);
        }
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Value of `key` when present and non-blank
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(vec![key.to_string()]))
    }

    /// Required key parsed as an unsigned integer
    pub fn require_number(&self, key: &str) -> Result<u32, ConfigError> {
        let value = self.require(key)?;
        value
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::NotANumber {
                key: key.to_string(),
                value: value.to_string(),
            })
    }

    /// Every required key that is absent, in declaration order
    pub fn missing_required(&self) -> Vec<String> {
        REQUIRED_KEYS
            .iter()
            .filter(|key| self.get(key).is_none())
            .map(|key| key.to_string())
            .collect()
    }
}

/// Container settings for the API service
#[derive(Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub image: String,
    pub memory: u32,
    pub cpu: u32,
    pub moleculer_namespace: String,
    pub redis_url: String,
    pub kafka_url: String,
    pub database_url: String,
    pub ipfs_gateway: String,
    pub s3_key_id: String,
    pub s3_secret_access_key: String,
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("image", &self.image)
            .field("memory", &self.memory)
            .field("cpu", &self.cpu)
            .field("moleculer_namespace", &self.moleculer_namespace)
            .field("s3_key_id", &self.s3_key_id)
            .field("s3_secret_access_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Validated settings for the whole deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSettings {
    pub aws_profile: String,
    pub region: String,
    pub domain: String,
    pub cdn_domain: String,
    pub operator_cidrs: Vec<IpNet>,
    pub api: ApiSettings,
}

impl DeploymentSettings {
    /// Validate the store. All missing required keys are reported together.
    pub fn from_config(config: &StackConfig) -> Result<Self, ConfigError> {
        let missing = config.missing_required();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let operator_cidrs = match config.get("OPERATOR_CIDRS") {
            Some(raw) => parse_cidrs("OPERATOR_CIDRS", raw)?,
            None => DEFAULT_OPERATOR_CIDRS
                .iter()
                .map(|c| parse_cidrs("OPERATOR_CIDRS", c))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect(),
        };
        if operator_cidrs.is_empty() {
            return Err(ConfigError::Invalid {
                key: "OPERATOR_CIDRS".to_string(),
                reason: "at least one CIDR is required".to_string(),
            });
        }

        let api = ApiSettings {
            image: config.require("API_IMAGE")?.to_string(),
            memory: config.require_number("API_MEMORY")?,
            cpu: config.require_number("API_CPU")?,
            moleculer_namespace: config.require("MOLECULER_NAMESPACE")?.to_string(),
            redis_url: config.require("REDIS_URL")?.to_string(),
            kafka_url: config.require("KAFKA_URL")?.to_string(),
            database_url: config.require("DATABASE_URL")?.to_string(),
            ipfs_gateway: config.require("IPFS_GATEWAY")?.to_string(),
            s3_key_id: config.require("S3_KEY_ID")?.to_string(),
            s3_secret_access_key: config.require("S3_SECRET_ACCESS_KEY")?.to_string(),
        };

        let settings = Self {
            aws_profile: config.require("AWS_PROFILE")?.to_string(),
            region: config.get("AWS_REGION").unwrap_or(DEFAULT_REGION).to_string(),
            domain: config.require("DOMAIN")?.to_string(),
            cdn_domain: config.require("CDN_DOMAIN")?.to_string(),
            operator_cidrs,
            api,
        };

        info!(
            region = %settings.region,
            domain = %settings.domain,
            cdn_domain = %settings.cdn_domain,
            "Deployment settings validated"
        );
        Ok(settings)
    }

    /// Availability zones the subnets are looked up in
    pub fn availability_zones(&self) -> Vec<String> {
        ["a", "b", "c"]
            .iter()
            .map(|suffix| format!("{}{}", self.region, suffix))
            .collect()
    }
}

fn parse_cidrs(key: &str, raw: &str) -> Result<Vec<IpNet>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<IpNet>() {
            Ok(IpNet::V4(net)) => Ok(IpNet::V4(net)),
            Ok(IpNet::V6(_)) => Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("{}: only IPv4 ranges are supported", s),
            }),
            Err(e) => Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("{}: {}", s, e),
            }),
        })
        .collect()
}
