//! Listener routing
//!
//! Rules are evaluated by ascending priority; the first rule with a matching
//! path pattern decides the action, otherwise the listener's default action
//! applies. A listener with no rules always takes its default action.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::RoutingError;
use crate::graph::{attr, OutputRef};
use crate::pattern::PathPattern;

pub const MIN_RULE_PRIORITY: u16 = 1;
pub const MAX_RULE_PRIORITY: u16 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerProtocol {
    Http,
    Https,
}

impl std::fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerProtocol::Http => write!(f, "HTTP"),
            ListenerProtocol::Https => write!(f, "HTTPS"),
        }
    }
}

/// What a listener does with a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ListenerAction {
    /// Send to the target group with this logical name
    Forward { target_group: String },
    Redirect {
        protocol: ListenerProtocol,
        port: u16,
        status_code: u16,
    },
    FixedResponse {
        status_code: u16,
        content_type: String,
        body: String,
    },
}

impl ListenerAction {
    /// Permanent redirect to HTTPS on 443
    pub fn https_redirect() -> Self {
        ListenerAction::Redirect {
            protocol: ListenerProtocol::Https,
            port: 443,
            status_code: 301,
        }
    }

    /// Fixed `404` plain-text response
    pub fn not_found() -> Self {
        ListenerAction::FixedResponse {
            status_code: 404,
            content_type: "text/plain".to_string(),
            body: "404 - Not Found".to_string(),
        }
    }

    /// Forward to the target group with logical name `target_group`
    pub fn forward(target_group: &str) -> Self {
        ListenerAction::Forward {
            target_group: target_group.to_string(),
        }
    }

    /// Provider-shaped action object
    pub fn to_properties(&self) -> Value {
        match self {
            ListenerAction::Forward { target_group } => json!({
                "type": "forward",
                "targetGroupArn": OutputRef::new(target_group.as_str(), attr::ARN),
            }),
            ListenerAction::Redirect {
                protocol,
                port,
                status_code,
            } => json!({
                "type": "redirect",
                "redirect": {
                    "port": port.to_string(),
                    "protocol": protocol.to_string(),
                    "statusCode": format!("HTTP_{}", status_code),
                },
            }),
            ListenerAction::FixedResponse {
                status_code,
                content_type,
                body,
            } => json!({
                "type": "fixed-response",
                "fixedResponse": {
                    "contentType": content_type,
                    "messageBody": body,
                    "statusCode": status_code.to_string(),
                },
            }),
        }
    }

    /// Outcome for one request to `host` at `path`
    pub fn outcome(&self, host: &str, path: &str) -> RouteOutcome {
        match self {
            ListenerAction::Forward { target_group } => RouteOutcome::Forwarded {
                target_group: target_group.clone(),
            },
            ListenerAction::Redirect {
                protocol,
                port,
                status_code,
            } => RouteOutcome::Redirected {
                status_code: *status_code,
                location: format!(
                    "{}://{}:{}{}",
                    protocol.to_string().to_ascii_lowercase(),
                    host,
                    port,
                    path
                ),
            },
            ListenerAction::FixedResponse {
                status_code,
                content_type,
                body,
            } => RouteOutcome::Fixed {
                status_code: *status_code,
                content_type: content_type.clone(),
                body: body.clone(),
            },
        }
    }
}

/// Observable result of routing one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum RouteOutcome {
    Forwarded { target_group: String },
    Redirected { status_code: u16, location: String },
    Fixed {
        status_code: u16,
        content_type: String,
        body: String,
    },
}

/// Path-conditioned rule on one listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRule {
    pub name: String,
    pub priority: u16,
    pub path_patterns: Vec<PathPattern>,
    pub action: ListenerAction,
}

impl ListenerRule {
    /// True when any of the rule's path patterns matches
    pub fn matches(&self, path: &str) -> bool {
        self.path_patterns.iter().any(|p| p.matches(path))
    }

    /// Provider-shaped `pathPattern` condition list
    pub fn conditions(&self) -> Value {
        let values: Vec<&str> = self.path_patterns.iter().map(PathPattern::as_str).collect();
        json!([{ "pathPattern": { "values": values } }])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub port: u16,
    pub protocol: ListenerProtocol,
    pub default_action: ListenerAction,
    /// Kept sorted by priority
    rules: Vec<ListenerRule>,
}

impl Listener {
    /// Listener with no rules; every request gets `default_action`
    pub fn new(name: &str, port: u16, protocol: ListenerProtocol, default_action: ListenerAction) -> Self {
        Self {
            name: name.to_string(),
            port,
            protocol,
            default_action,
            rules: Vec::new(),
        }
    }

    /// Plain HTTP listener whose only behavior is the HTTPS redirect
    pub fn http_redirect(name: &str) -> Self {
        Self::new(name, 80, ListenerProtocol::Http, ListenerAction::https_redirect())
    }

    /// HTTPS listener answering 404 unless a rule matches
    pub fn https_not_found(name: &str) -> Self {
        Self::new(name, 443, ListenerProtocol::Https, ListenerAction::not_found())
    }

    /// Insert `rule` in priority order. Priorities must be unique on the
    /// listener and within `1..=50000`.
    pub fn add_rule(&mut self, rule: ListenerRule) -> Result<(), RoutingError> {
        if !(MIN_RULE_PRIORITY..=MAX_RULE_PRIORITY).contains(&rule.priority) {
            return Err(RoutingError::PriorityOutOfRange(rule.priority));
        }
        if self.rules.iter().any(|r| r.priority == rule.priority) {
            return Err(RoutingError::DuplicatePriority {
                listener: self.name.clone(),
                priority: rule.priority,
            });
        }
        let at = self.rules.partition_point(|r| r.priority < rule.priority);
        self.rules.insert(at, rule);
        Ok(())
    }

    /// Rules by ascending priority
    pub fn rules(&self) -> &[ListenerRule] {
        &self.rules
    }

    /// Action chosen for `path`
    pub fn route(&self, path: &str) -> &ListenerAction {
        self.rules
            .iter()
            .find(|r| r.matches(path))
            .map(|r| &r.action)
            .unwrap_or(&self.default_action)
    }

    /// What a client sending `path` to `host` observes
    pub fn handle(&self, host: &str, path: &str) -> RouteOutcome {
        self.route(path).outcome(host, path)
    }
}
