//! Regional provider bindings
//!
//! The stack lives in one primary region, but certificates used by the CDN
//! must be issued in `us-east-1`, so two bindings share one credential profile.

use serde::{Deserialize, Serialize};

use crate::config::DeploymentSettings;

/// Region CDN certificates must be issued in
pub const CDN_CERTIFICATE_REGION: &str = "us-east-1";

/// Credential/endpoint context resources are created through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderBinding {
    /// Logical name, e.g. `aws_eu-west-2`
    pub name: String,
    pub region: String,
    pub profile: String,
}

impl ProviderBinding {
    pub fn new(region: &str, profile: &str) -> Self {
        Self {
            name: format!("aws_{}", region),
            region: region.to_string(),
            profile: profile.to_string(),
        }
    }
}

/// The two bindings a deployment needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Providers {
    pub primary: ProviderBinding,
    pub certificates: ProviderBinding,
}

impl Providers {
    pub fn from_settings(settings: &DeploymentSettings) -> Self {
        Self {
            primary: ProviderBinding::new(&settings.region, &settings.aws_profile),
            certificates: ProviderBinding::new(CDN_CERTIFICATE_REGION, &settings.aws_profile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::complete_config;

    #[test]
    fn test_bindings_share_profile() {
        let settings = DeploymentSettings::from_config(&complete_config()).unwrap();
        let providers = Providers::from_settings(&settings);

        assert_eq!(providers.primary.name, "aws_eu-west-2");
        assert_eq!(providers.certificates.name, "aws_us-east-1");
        assert_eq!(providers.primary.profile, providers.certificates.profile);
    }
}
