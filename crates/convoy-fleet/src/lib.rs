//! convoy-fleet — keeps a cluster's compute fleet on its current templates.
//!
//! When the instance template or its parameters drift, a complete new
//! instance stack is provisioned next to the old one, health-gated, and
//! only then is the old fleet drained in batches and deleted. Any failure
//! between pre-drain and the end of draining restores the old fleet.
//!
//! ```text
//! Probing ─┬─► NewCluster ─► Done
//!          ├─► NoChange
//!          └─► PreDrain ─► ProvisioningNew ─► AwaitingNewCapacity ─► AwaitingNewRegistration
//!                 ─► PausingOldScaling ─► Draining (batched) ─► DeletingOld ─► Done
//!              (any error before DeletingOld) ─► Recovering ─► Failed
//! ```
//!
//! # Components
//!
//! - **`desired`** — the fleet a release asks for, templates loaded
//! - **`probe`** — current stacks and registered instances
//! - **`drift`** — deployed vs desired instance stack
//! - **`capacity`** — autoscaling capacity and registration gates
//! - **`drain`** — batched draining
//! - **`recovery`** — restoring the old fleet after a failure
//! - **`engine`** — the replacement state machine

pub mod capacity;
pub mod desired;
pub mod drain;
pub mod drift;
pub mod engine;
pub mod probe;
pub mod recovery;

pub use desired::DesiredFleet;
pub use drain::DrainBatch;
pub use drift::TemplateDrift;
pub use engine::{ClusterReplacer, ConvergeOutcome, ReplacePhase};
pub use recovery::ReplacementGuard;
