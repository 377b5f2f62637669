//! Error taxonomy for stack evaluation
//!
//! Every failure carries enough context (a config key, a lookup query or a
//! logical resource name) for an operator to find the failing declaration.

use thiserror::Error;

/// Configuration errors. Raised before any resource is declared.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required keys are absent
    #[error("Missing required configuration keys: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// A key that must be numeric is not
    #[error("Configuration key {key} must be a number, got {value:?}")]
    NotANumber { key: String, value: String },

    /// A key has a value that cannot be used
    #[error("Invalid value for configuration key {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// The configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not a flat JSON object of strings
    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from existence queries against provider state
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    /// Nothing matched where exactly one match is required
    #[error("No {kind} found matching {query}")]
    NotFound { kind: String, query: String },

    /// More than one match where exactly one is required
    #[error("Lookup for {kind} matching {query} is ambiguous: {count} matches")]
    Ambiguous {
        kind: String,
        query: String,
        count: usize,
    },

    /// The lookup backend itself failed
    #[error("Lookup backend failed while querying {kind}: {message}")]
    Backend { kind: String, message: String },
}

/// Errors in the shape of the resource graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate logical resource name: {0}")]
    DuplicateName(String),

    #[error("Resource {resource} depends on {missing}, which is not declared")]
    UnknownPredecessor { resource: String, missing: String },

    #[error("Dependency cycle among resources: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Output {attribute} of {resource} is not resolved")]
    Unresolved { resource: String, attribute: String },

    #[error("Malformed intrinsic in {resource}: {reason}")]
    MalformedIntrinsic { resource: String, reason: String },
}

/// Errors in listener and cache-behavior routing tables
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// Two rules on one listener share a priority
    #[error("Listener {listener} already has a rule at priority {priority}")]
    DuplicatePriority { listener: String, priority: u16 },

    #[error("Rule priority {0} is outside 1..=50000")]
    PriorityOutOfRange(u16),

    /// Two cache behaviors share a path pattern
    #[error("Duplicate cache behavior path pattern {0}")]
    DuplicatePattern(String),

    #[error("Invalid path pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// TTL bounds must satisfy min <= default <= max
    #[error("Invalid TTL bounds {min}/{default}/{max}")]
    InvalidTtl { min: u64, default: u64, max: u64 },

    /// A distribution needs at least one origin for its default behavior
    #[error("Distribution {0} has no origins")]
    NoOrigins(String),
}

/// Top-level error for building and applying a stack
#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A predecessor failed, so this resource was never handed to the engine
    #[error("Resource {resource} skipped: predecessor {predecessor} failed")]
    DependencyFailure {
        resource: String,
        predecessor: String,
    },

    /// The provider rejected the resource; surfaced verbatim
    #[error("Provider rejected {resource}: {message}")]
    Reconciliation { resource: String, message: String },
}

pub type StackResult<T> = std::result::Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_are_listed() {
        let err = ConfigError::Missing(vec!["AWS_PROFILE".to_string(), "DOMAIN".to_string()]);
        assert_eq!(
            err.to_string(),
            "Missing required configuration keys: AWS_PROFILE, DOMAIN"
        );
    }

    #[test]
    fn test_stack_error_is_transparent() {
        let err: StackError = LookupError::Ambiguous {
            kind: "vpc".to_string(),
            query: "default=true".to_string(),
            count: 2,
        }
        .into();
        assert!(err.to_string().contains("ambiguous: 2 matches"));
    }

    #[test]
    fn test_cycle_message() {
        let err = GraphError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency cycle among resources: a -> b -> a");
    }
}
