//! Eneftea Infrastructure Library
//!
//! Declares the Eneftea deployment (API service, load balancer, content
//! distribution) as a typed resource graph. Evaluation resolves the existing
//! network, declares every resource with explicit and implicit dependencies,
//! and validates the result. Creating the resources is delegated to a
//! [`engine::ProvisioningEngine`].

pub mod cdn;
pub mod composition;
pub mod compute;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod graph;
pub mod load_balancer;
pub mod network;
pub mod pattern;
pub mod provider;
pub mod security;
pub mod template;

pub use composition::Deployment;
pub use config::{DeploymentSettings, StackConfig};
pub use engine::{apply, DeployReport, ProvisioningEngine, RecordingEngine};
pub use error::{ConfigError, GraphError, LookupError, RoutingError, StackError, StackResult};
pub use graph::{OutputRef, ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
pub use network::{lookup_network, Network, NetworkLookup, StaticInventory};
pub use template::StackTemplate;
