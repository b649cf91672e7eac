//! convoy-rollout — deploy one application version.
//!
//! Registers a new task-definition revision, then either runs it once
//! (task releases) or binds a service to it and waits for the platform
//! to converge. A service that fails to stabilize is rolled back to the
//! revision it ran before; the release is reported as failed either way.
//!
//! ```text
//! Registering ─┬─ Task ──── RunningTask ──► Stopped{Success|Failed}
//!              └─ Service ─ Creating|Updating ─► AwaitingAck ─► Stabilizing
//!                                                  │               ├─► Stable
//!                                                  │               └─► RollingBack ─► RolledBack | Unrecoverable
//!                                                  └─► Unrecoverable (no acknowledgment)
//! ```
//!
//! # Components
//!
//! - **`task_definition`** — registration requests and revision pruning
//! - **`task`** — run-once tasks and the essential-container verdict
//! - **`service`** — create/update, acknowledgment, stabilization, scale-to-zero
//! - **`engine`** — the deployment state machine tying them together

pub mod engine;
pub mod service;
pub mod task;
pub mod task_definition;

pub use engine::{DeployPhase, ServiceDeployer};
pub use task_definition::{build_request, prune_revisions};
