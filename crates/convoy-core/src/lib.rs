//! convoy-core — shared vocabulary for Convoy.
//!
//! Holds the domain types exchanged with the container platform (task
//! definitions, services, container instances, stacks, scaling groups),
//! the `convoy.toml` release configuration, release classification, and
//! the error type every engine propagates.

pub mod config;
pub mod error;
pub mod release;
pub mod types;

pub use config::ReleaseConfig;
pub use error::{DeployError, DeployResult, PlatformError, PlatformResult};
pub use release::ReleaseKind;
pub use types::*;
