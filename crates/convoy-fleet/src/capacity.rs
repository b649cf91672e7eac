//! Health gates for a freshly provisioned fleet: autoscaling capacity,
//! then cluster registration.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use convoy_core::{ContainerInstance, DeployError, DeployResult, ScalingGroup};
use convoy_platform::{ContainerPlatformClient, ScalingGroupClient};
use convoy_waiter::{Progress, Waiter};

/// Wait until the group has as many healthy in-service instances as it wants.
pub async fn wait_for_capacity(
    waiter: &Waiter,
    scaling: &dyn ScalingGroupClient,
    group: &str,
) -> DeployResult<ScalingGroup> {
    let what = format!("capacity of {group}");
    waiter
        .until(
            &what,
            move || async move { scaling.describe_group(group).await.map_err(DeployError::from) },
            ScalingGroup::has_capacity,
            |_| false,
        )
        .await
}

/// One registration poll: the group and which of its instances joined.
#[derive(Debug, Clone)]
pub struct Registration {
    pub group: ScalingGroup,
    /// Container instances backed by this group.
    pub registered: Vec<ContainerInstance>,
    /// In-service instance ids not yet registered.
    pub pending: Vec<String>,
}

impl Registration {
    pub fn is_complete(&self) -> bool {
        self.group.has_capacity() && self.pending.is_empty()
    }
}

impl Progress for Registration {
    fn progress(&self) -> String {
        format!(
            "{}: {}/{} registered, {} pending",
            self.group.name,
            self.registered.len(),
            self.group.desired_capacity,
            self.pending.len()
        )
    }
}

/// Wait until every in-service instance of `group` registered with `cluster`.
///
/// An instance in service for longer than `per_instance` without
/// registering is marked unhealthy so the group replaces it; the
/// replacement is waited for within the same budget.
pub async fn wait_for_registration(
    waiter: &Waiter,
    platform: &dyn ContainerPlatformClient,
    scaling: &dyn ScalingGroupClient,
    cluster: &str,
    group: &str,
    per_instance: Duration,
) -> DeployResult<Registration> {
    let first_seen: Mutex<BTreeMap<String, Instant>> = Mutex::new(BTreeMap::new());
    let first_seen = &first_seen;

    let what = format!("registration of {group} with {cluster}");
    waiter
        .until(
            &what,
            move || async move {
                let snapshot = scaling.describe_group(group).await?;
                let members: Vec<String> =
                    snapshot.instances.iter().map(|i| i.instance_id.clone()).collect();
                let registered: Vec<ContainerInstance> = platform
                    .list_container_instances(cluster)
                    .await?
                    .into_iter()
                    .filter(|ci| members.contains(&ci.instance_id))
                    .collect();
                let pending: Vec<String> = snapshot
                    .in_service_ids()
                    .into_iter()
                    .filter(|id| !registered.iter().any(|ci| ci.instance_id == *id))
                    .collect();

                let now = Instant::now();
                let overdue: Vec<String> = {
                    let mut seen = first_seen.lock().unwrap_or_else(PoisonError::into_inner);
                    seen.retain(|id, _| pending.contains(id));
                    for id in &pending {
                        seen.entry(id.clone()).or_insert(now);
                    }
                    let overdue: Vec<String> = seen
                        .iter()
                        .filter(|(_, since)| now.duration_since(**since) >= per_instance)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in &overdue {
                        seen.remove(id);
                    }
                    overdue
                };
                for id in overdue {
                    warn!(instance = %id, cluster, "instance never registered, marking unhealthy");
                    scaling.set_instance_unhealthy(&id).await?;
                }

                Ok::<_, DeployError>(Registration {
                    group: snapshot,
                    registered,
                    pending,
                })
            },
            Registration::is_complete,
            |_| false,
        )
        .await
}
