//! convoy-platform — the remote collaborators Convoy drives.
//!
//! The engines never talk to a cloud API directly. They go through four
//! narrow traits:
//!
//! - **`StackDeployer`** — push/delete/describe infrastructure stacks
//! - **`ContainerPlatformClient`** — task definitions, services, tasks,
//!   container instances
//! - **`ScalingGroupClient`** — autoscaling group inspection and control
//! - **`ClusterIntrospector`** — one-shot read of cluster network facts
//!
//! `SimulatedCloud` implements all four in memory. It backs the test
//! suites and `convoy rehearse`.

pub mod clients;
pub mod simulated;

pub use clients::{ClusterIntrospector, ContainerPlatformClient, ScalingGroupClient, StackDeployer};
pub use simulated::{CloudEvent, SimulatedCloud};

use std::sync::Arc;

/// The full set of collaborators an engine run needs.
#[derive(Clone)]
pub struct Platform {
    pub stacks: Arc<dyn StackDeployer>,
    pub containers: Arc<dyn ContainerPlatformClient>,
    pub scaling: Arc<dyn ScalingGroupClient>,
    pub introspector: Arc<dyn ClusterIntrospector>,
}

impl Platform {
    /// Back every collaborator with one simulated cloud.
    pub fn simulated(cloud: &SimulatedCloud) -> Self {
        Self {
            stacks: Arc::new(cloud.clone()),
            containers: Arc::new(cloud.clone()),
            scaling: Arc::new(cloud.clone()),
            introspector: Arc::new(cloud.clone()),
        }
    }
}
