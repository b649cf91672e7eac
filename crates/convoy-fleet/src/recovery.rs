//! Undoing a failed replacement.
//!
//! A [`ReplacementGuard`] is created once the engine starts mutating the
//! old fleet. It records everything needed to put that fleet back, and
//! [`ReplacementGuard::recover`] runs the restore sequence exactly once
//! when any step of the replacement fails.

use tracing::{error, warn};

use convoy_core::{ContainerInstance, InstanceStatus, PlacementState, STATE_ATTRIBUTE};
use convoy_platform::Platform;
use convoy_waiter::{Waiter, wait_for_stack_deletion};

/// State captured before the old fleet was touched.
#[derive(Debug, Clone)]
pub struct ReplacementGuard {
    pub cluster: String,
    /// The old set: container instances registered before replacement.
    pub old: Vec<ContainerInstance>,
    /// Scaling group behind the old instance stack.
    pub old_group: String,
    /// Instance stack the replacement was creating.
    pub new_stack: String,
}

impl ReplacementGuard {
    pub fn new(
        cluster: &str,
        old: Vec<ContainerInstance>,
        old_group: String,
        new_stack: String,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            old,
            old_group,
            new_stack,
        }
    }

    fn old_ids(&self) -> Vec<String> {
        self.old.iter().map(|ci| ci.id.clone()).collect()
    }

    /// Put the old fleet back in service.
    ///
    /// In order: old instances ACTIVE, a pause of one interval, every
    /// instance outside the old set DRAINING, the `state` attribute back to
    /// `active`, old group scaling resumed, the new instance stack deleted.
    /// Every step runs even if an earlier one failed; failures are logged,
    /// never returned. `deletion` bounds the wait for the new stack to go.
    pub async fn recover(&self, platform: &Platform, pause: &Waiter, deletion: &Waiter) {
        let scaling = platform.scaling.as_ref();
        let stacks = platform.stacks.as_ref();
        let containers = platform.containers.as_ref();
        let cluster = self.cluster.as_str();
        let old_ids = self.old_ids();
        warn!(cluster, old = old_ids.len(), "recovering old fleet");

        if !old_ids.is_empty() {
            warn!(cluster, "restoring old instances to ACTIVE");
            if let Err(e) = containers
                .set_instance_status(cluster, &old_ids, InstanceStatus::Active)
                .await
            {
                error!(cluster, error = %e, "failed to restore old instances");
            }
        }

        if let Err(e) = pause.pause("recovery settle").await {
            error!(cluster, error = %e, "recovery pause cut short");
        }

        match containers.list_container_instances(cluster).await {
            Ok(instances) => {
                let new_ids: Vec<String> = instances
                    .into_iter()
                    .filter(|ci| !old_ids.contains(&ci.id))
                    .map(|ci| ci.id)
                    .collect();
                if !new_ids.is_empty() {
                    warn!(cluster, new = new_ids.len(), "draining provisioned new instances");
                    if let Err(e) = containers
                        .set_instance_status(cluster, &new_ids, InstanceStatus::Draining)
                        .await
                    {
                        error!(cluster, error = %e, "failed to drain new instances");
                    }
                }
            }
            Err(e) => error!(cluster, error = %e, "failed to list instances during recovery"),
        }

        if !old_ids.is_empty() {
            warn!(cluster, "resetting placement state to active");
            if let Err(e) = containers
                .put_attribute(
                    cluster,
                    &old_ids,
                    STATE_ATTRIBUTE,
                    &PlacementState::Active.to_string(),
                )
                .await
            {
                error!(cluster, error = %e, "failed to reset placement state");
            }
        }

        warn!(cluster, group = %self.old_group, "resuming old group scaling");
        if let Err(e) = scaling.resume_scaling(&self.old_group).await {
            error!(cluster, group = %self.old_group, error = %e, "failed to resume scaling");
        }

        let stack = self.new_stack.as_str();
        match stacks.describe(stack).await {
            Ok(Some(_)) => {
                warn!(cluster, stack, "deleting new instance stack");
                if let Err(e) = stacks.delete(stack).await {
                    error!(cluster, stack, error = %e, "failed to delete new instance stack");
                } else if let Err(e) = wait_for_stack_deletion(deletion, stacks, stack).await {
                    error!(cluster, stack, error = %e, "new instance stack not deleted");
                }
            }
            Ok(None) => {}
            Err(e) => error!(cluster, stack, error = %e, "failed to describe new instance stack"),
        }
    }
}
