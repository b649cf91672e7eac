//! convoy-cli — the release pipeline behind the `convoy` binary.
//!
//! A release converges the cluster fleet when `convoy.toml` carries a
//! `[cluster]` section, then deploys the application. Embedders supply a
//! [`convoy_platform::Platform`] backed by a real cloud; the binary only
//! rehearses against `SimulatedCloud`.

pub mod release;

pub use release::{ReleaseOptions, ReleaseReport, ReleaseScope, run_release};
