//! Target group health checking
//!
//! Membership follows consecutive probe results, not the latest one: a target
//! turns healthy after `healthy_threshold` successes in a row and unhealthy
//! after `unhealthy_threshold` failures in a row.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    /// Seconds between probes
    pub interval: u32,
    /// Seconds before a probe counts as failed
    pub timeout: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl HealthCheck {
    pub fn api() -> Self {
        Self {
            path: "/api/health".to_string(),
            interval: 30,
            timeout: 4,
            healthy_threshold: 3,
            unhealthy_threshold: 4,
        }
    }

    pub fn to_properties(&self) -> Value {
        json!({
            "enabled": true,
            "interval": self.interval,
            "path": self.path,
            "timeout": self.timeout,
            "healthyThreshold": self.healthy_threshold,
            "unhealthyThreshold": self.unhealthy_threshold,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Registered, not yet proven healthy
    Initial,
    Healthy,
    Unhealthy,
}

/// Per-target threshold counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHealth {
    check: HealthCheck,
    state: HealthState,
    successes: u32,
    failures: u32,
}

impl TargetHealth {
    /// Fresh target, not yet in service
    pub fn new(check: HealthCheck) -> Self {
        Self {
            check,
            state: HealthState::Initial,
            successes: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Only healthy targets receive traffic
    pub fn in_service(&self) -> bool {
        self.state == HealthState::Healthy
    }

    /// Record one probe. `latency_ms` above the timeout counts as a failure.
    pub fn observe(&mut self, status: u16, latency_ms: u64) -> HealthState {
        let passed = (200..300).contains(&status)
            && latency_ms <= u64::from(self.check.timeout) * 1000;

        if passed {
            self.successes = self.successes.saturating_add(1);
            self.failures = 0;
            if self.state != HealthState::Healthy && self.successes >= self.check.healthy_threshold {
                debug!(successes = self.successes, "Target became healthy");
                self.state = HealthState::Healthy;
            }
        } else {
            self.failures = self.failures.saturating_add(1);
            self.successes = 0;
            if self.state != HealthState::Unhealthy && self.failures >= self.check.unhealthy_threshold {
                debug!(failures = self.failures, "Target became unhealthy");
                self.state = HealthState::Unhealthy;
            }
        }
        self.state
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupSpec {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub target_type: String,
    pub health_check: HealthCheck,
}

impl TargetGroupSpec {
    pub fn api() -> Self {
        Self {
            name: "api-tg".to_string(),
            port: crate::security::API_PORT,
            protocol: "HTTP".to_string(),
            target_type: "ip".to_string(),
            health_check: HealthCheck::api(),
        }
    }

    pub fn to_properties(&self, vpc_id: &str) -> Value {
        json!({
            "port": self.port,
            "protocol": self.protocol,
            "vpcId": vpc_id,
            "targetType": self.target_type,
            "healthCheck": self.health_check.to_properties(),
        })
    }
}
