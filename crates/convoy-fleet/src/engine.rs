//! Replacement engine — converges a cluster's instance fleet to its templates.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use convoy_core::{
    ContainerInstance, DeployResult, InstanceStackName, PlacementState, STATE_ATTRIBUTE,
    StackDescription, StackSpec, shared_stack_name,
};
use convoy_platform::Platform;
use convoy_waiter::waiter::DEFAULT_INTERVAL;
use convoy_waiter::{Waiter, wait_for_stack, wait_for_stack_deletion};

use crate::capacity::{wait_for_capacity, wait_for_registration};
use crate::desired::DesiredFleet;
use crate::drain::{DrainBatch, drain_in_batches};
use crate::drift::TemplateDrift;
use crate::probe::{ClusterProbe, probe_cluster, scaling_group_of};
use crate::recovery::ReplacementGuard;

/// Phase of a convergence run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePhase {
    Probing,
    RemovingAbandoned,
    NewCluster,
    NoChange,
    PreDrain,
    ProvisioningNew,
    AwaitingNewCapacity,
    AwaitingNewRegistration,
    PausingOldScaling,
    Draining,
    DeletingOld,
    Recovering,
    Done,
}

/// How a convergence run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConvergeOutcome {
    /// The cluster did not exist (or had no fleet) and was built.
    NewCluster {
        instance_stack: String,
        instances: usize,
    },
    /// The instance template and parameters already match.
    NoChange { instance_stack: String },
    /// A new fleet replaced the old one.
    Replaced {
        old_stack: String,
        new_stack: String,
        drift: TemplateDrift,
        new_instances: usize,
        batches: Vec<DrainBatch>,
    },
}

/// Drives blue-green replacement of a cluster's instance fleet.
///
/// Budgets from the configuration are expressed against the nominal
/// 10 s poll interval and converted to poll counts, so a shortened
/// interval shortens every wait proportionally.
pub struct ClusterReplacer {
    platform: Platform,
    interval: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ClusterReplacer {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            interval: DEFAULT_INTERVAL,
            shutdown: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Option<watch::Receiver<bool>>) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn polls(budget: Duration) -> u32 {
        u32::try_from(budget.as_secs() / DEFAULT_INTERVAL.as_secs())
            .unwrap_or(u32::MAX)
            .max(1)
    }

    fn waiter(&self, budget: Duration) -> Waiter {
        Waiter::with_polls(self.interval, Self::polls(budget)).with_shutdown(self.shutdown.clone())
    }

    fn enter(&self, phase: ReplacePhase, cluster: &str) {
        info!(?phase, cluster, "fleet phase");
    }

    /// Bring the cluster's stacks and fleet in line with `desired`.
    pub async fn converge(&self, desired: &DesiredFleet) -> DeployResult<ConvergeOutcome> {
        let cluster = desired.cluster.as_str();
        self.enter(ReplacePhase::Probing, cluster);
        let mut probe = probe_cluster(
            self.platform.stacks.as_ref(),
            self.platform.containers.as_ref(),
            self.platform.scaling.as_ref(),
            cluster,
        )
        .await?;

        if probe.is_new_cluster() {
            self.enter(ReplacePhase::NewCluster, cluster);
            self.ensure_cluster(desired).await?;
            self.push_and_wait(desired, &desired.shared_stack()).await?;
            return self.provision_first(desired, &probe.next).await;
        }

        self.ensure_cluster(desired).await?;
        self.remove_abandoned(desired, &mut probe).await?;
        self.push_shared_if_changed(desired).await?;

        let Some(current) = probe.current.as_ref() else {
            warn!(cluster, "shared stack present without an instance stack");
            self.enter(ReplacePhase::NewCluster, cluster);
            return self.provision_first(desired, &probe.next).await;
        };

        let next = desired.instance_stack(&probe.next, Some(current));
        let drift = TemplateDrift::between(current, &next);
        if drift.is_empty() {
            self.enter(ReplacePhase::NoChange, cluster);
            return Ok(ConvergeOutcome::NoChange {
                instance_stack: current.name.clone(),
            });
        }

        info!(cluster, from = %current.name, to = %next.name, %drift, "instance template drifted");
        self.replace(desired, &probe, current, next, drift).await
    }

    /// Create the cluster if missing and refresh its tags.
    async fn ensure_cluster(&self, desired: &DesiredFleet) -> DeployResult<()> {
        let containers = self.platform.containers.as_ref();
        if !containers.cluster_exists(&desired.cluster).await? {
            containers.create_cluster(&desired.cluster).await?;
            info!(cluster = %desired.cluster, "created cluster");
        }
        if !desired.tags.is_empty() {
            containers.tag_cluster(&desired.cluster, &desired.tags).await?;
        }
        Ok(())
    }

    /// Delete instance stacks a recovered replacement could not remove,
    /// then refresh the probed instances their deletion deregistered.
    async fn remove_abandoned(
        &self,
        desired: &DesiredFleet,
        probe: &mut ClusterProbe,
    ) -> DeployResult<()> {
        if probe.abandoned.is_empty() {
            return Ok(());
        }
        self.enter(ReplacePhase::RemovingAbandoned, &desired.cluster);
        let stacks = self.platform.stacks.as_ref();
        for stack in &probe.abandoned {
            warn!(
                cluster = %desired.cluster,
                stack = %stack.name,
                "deleting abandoned instance stack"
            );
            stacks.delete(&stack.name).await?;
            wait_for_stack_deletion(&self.waiter(desired.stack_timeout), stacks, &stack.name)
                .await?;
        }
        probe.state.instances = self
            .platform
            .containers
            .list_container_instances(&desired.cluster)
            .await?;
        Ok(())
    }

    async fn push_and_wait(
        &self,
        desired: &DesiredFleet,
        spec: &StackSpec,
    ) -> DeployResult<StackDescription> {
        let stacks = self.platform.stacks.as_ref();
        let handle = stacks.push(spec).await?;
        info!(stack = %spec.name, %handle, "pushed stack");
        wait_for_stack(&self.waiter(desired.stack_timeout), stacks, &spec.name).await
    }

    /// Push the shared stack unless it already matches.
    async fn push_shared_if_changed(&self, desired: &DesiredFleet) -> DeployResult<()> {
        let spec = desired.shared_stack();
        let current = self
            .platform
            .stacks
            .describe(&shared_stack_name(&desired.cluster))
            .await?;
        let unchanged = current.as_ref().is_some_and(|s| {
            s.template == spec.template && s.parameters == spec.parameters && s.tags == spec.tags
        });
        if unchanged {
            info!(stack = %spec.name, "shared stack unchanged");
            return Ok(());
        }
        self.push_and_wait(desired, &spec).await?;
        Ok(())
    }

    /// Push an instance stack and wait until its instances are in service
    /// and registered. Returns the registered instances.
    async fn provision(
        &self,
        desired: &DesiredFleet,
        spec: &StackSpec,
    ) -> DeployResult<Vec<ContainerInstance>> {
        let cluster = desired.cluster.as_str();
        self.enter(ReplacePhase::ProvisioningNew, cluster);
        let stack = self.push_and_wait(desired, spec).await?;
        let group = scaling_group_of(&stack)?;

        // Capacity and registration share one budget.
        let waiter = self.waiter(desired.capacity_timeout);
        let started = Instant::now();
        self.enter(ReplacePhase::AwaitingNewCapacity, cluster);
        wait_for_capacity(&waiter, self.platform.scaling.as_ref(), &group).await?;

        self.enter(ReplacePhase::AwaitingNewRegistration, cluster);
        let remaining = waiter.with_timeout(waiter.timeout().saturating_sub(started.elapsed()));
        let per_instance = self.interval * Self::polls(desired.registration_timeout);
        let registration = wait_for_registration(
            &remaining,
            self.platform.containers.as_ref(),
            self.platform.scaling.as_ref(),
            cluster,
            &group,
            per_instance,
        )
        .await?;
        Ok(registration.registered)
    }

    async fn mark(
        &self,
        cluster: &str,
        instances: &[ContainerInstance],
        state: PlacementState,
    ) -> DeployResult<()> {
        if instances.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = instances.iter().map(|ci| ci.id.clone()).collect();
        self.platform
            .containers
            .put_attribute(cluster, &ids, STATE_ATTRIBUTE, &state.to_string())
            .await?;
        Ok(())
    }

    async fn provision_first(
        &self,
        desired: &DesiredFleet,
        name: &InstanceStackName,
    ) -> DeployResult<ConvergeOutcome> {
        let spec = desired.instance_stack(name, None);
        let registered = self.provision(desired, &spec).await?;
        self.mark(&desired.cluster, &registered, PlacementState::Active).await?;
        self.enter(ReplacePhase::Done, &desired.cluster);
        Ok(ConvergeOutcome::NewCluster {
            instance_stack: spec.name,
            instances: registered.len(),
        })
    }

    async fn replace(
        &self,
        desired: &DesiredFleet,
        probe: &ClusterProbe,
        current: &StackDescription,
        next: StackSpec,
        drift: TemplateDrift,
    ) -> DeployResult<ConvergeOutcome> {
        let cluster = desired.cluster.as_str();
        let old_group = scaling_group_of(current)?;
        let old = probe.state.instances.clone();
        let guard =
            ReplacementGuard::new(cluster, old.clone(), old_group.clone(), next.name.clone());

        let swapped = self.swap_fleets(desired, &old, &old_group, &next).await;
        let (new_instances, batches) = match swapped {
            Ok(swapped) => swapped,
            Err(err) => {
                warn!(cluster, error = %err, "replacement failed");
                self.enter(ReplacePhase::Recovering, cluster);
                // Not interruptible: recovery must finish even on shutdown.
                let pause = Waiter::with_polls(self.interval, 1);
                let deletion =
                    Waiter::with_polls(self.interval, Self::polls(desired.stack_timeout));
                guard.recover(&self.platform, &pause, &deletion).await;
                return Err(err);
            }
        };

        self.enter(ReplacePhase::DeletingOld, cluster);
        let stacks = self.platform.stacks.as_ref();
        stacks.delete(&current.name).await?;
        wait_for_stack_deletion(&self.waiter(desired.stack_timeout), stacks, &current.name).await?;

        self.enter(ReplacePhase::Done, cluster);
        Ok(ConvergeOutcome::Replaced {
            old_stack: current.name.clone(),
            new_stack: next.name,
            drift,
            new_instances,
            batches,
        })
    }

    /// Pre-drain the old fleet, provision and gate the new one, pause the
    /// old group, drain. Every error here triggers recovery.
    async fn swap_fleets(
        &self,
        desired: &DesiredFleet,
        old: &[ContainerInstance],
        old_group: &str,
        next: &StackSpec,
    ) -> DeployResult<(usize, Vec<DrainBatch>)> {
        let cluster = desired.cluster.as_str();
        let containers = self.platform.containers.as_ref();

        self.enter(ReplacePhase::PreDrain, cluster);
        self.mark(cluster, old, PlacementState::PreDrain).await?;

        self.provision(desired, next).await?;

        let new: Vec<ContainerInstance> = containers
            .list_container_instances(cluster)
            .await?
            .into_iter()
            .filter(|ci| !old.iter().any(|o| o.id == ci.id))
            .collect();
        self.mark(cluster, &new, PlacementState::Active).await?;
        info!(cluster, old = old.len(), new = new.len(), "new fleet registered");

        self.enter(ReplacePhase::PausingOldScaling, cluster);
        self.platform.scaling.suspend_scaling(old_group).await?;

        let batches = if desired.drain.enabled && !old.is_empty() {
            self.enter(ReplacePhase::Draining, cluster);
            let waiter = self.waiter(Duration::from_secs(desired.drain.timeout_secs));
            drain_in_batches(containers, &waiter, cluster, old, desired.drain.batch_size).await?
        } else {
            info!(cluster, "draining skipped");
            Vec::new()
        };
        Ok((new.len(), batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use convoy_core::config::DrainConfig;
    use convoy_core::{DeployError, InstanceStatus};
    use convoy_platform::{CloudEvent, SimulatedCloud};

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fleet(instance_template: &str, parameters: BTreeMap<String, String>) -> DesiredFleet {
        DesiredFleet {
            cluster: "prod".into(),
            shared_template: "shared".into(),
            instance_template: instance_template.into(),
            parameters,
            tags: params(&[("team", "payments")]),
            drain: DrainConfig {
                enabled: true,
                batch_size: 3,
                timeout_secs: 60,
            },
            registration_timeout: Duration::from_secs(30),
            capacity_timeout: Duration::from_secs(20 * 60),
            stack_timeout: Duration::from_secs(30 * 60),
        }
    }

    fn replacer(cloud: &SimulatedCloud) -> ClusterReplacer {
        ClusterReplacer::new(Platform::simulated(cloud))
    }

    fn seed(cloud: &SimulatedCloud, instances: u32) -> Vec<ContainerInstance> {
        cloud.seed_cluster(
            "prod",
            "shared",
            "instances-v1",
            params(&[("InstanceType", "m5.large")]),
            instances,
        );
        cloud.container_instances("prod")
    }

    fn position(journal: &[CloudEvent], pred: impl Fn(&CloudEvent) -> bool) -> Vec<usize> {
        journal
            .iter()
            .enumerate()
            .filter(|(_, e)| pred(e))
            .map(|(i, _)| i)
            .collect()
    }

    fn is_stack_op(event: &CloudEvent) -> bool {
        matches!(event, CloudEvent::StackPushed(_) | CloudEvent::StackDeleted(_))
    }

    #[tokio::test(start_paused = true)]
    async fn builds_a_new_cluster() {
        let cloud = SimulatedCloud::new();
        let desired = fleet("instances-v1", params(&[("DesiredCapacity", "2")]));

        let outcome = replacer(&cloud).converge(&desired).await.unwrap();

        assert_eq!(
            outcome,
            ConvergeOutcome::NewCluster {
                instance_stack: "prod-instances-001".into(),
                instances: 2,
            }
        );
        assert!(cloud.journal().contains(&CloudEvent::ClusterCreated("prod".into())));
        assert_eq!(cloud.cluster_tags("prod")["team"], "payments");
        let instances = cloud.container_instances("prod");
        assert_eq!(instances.len(), 2);
        assert!(instances
            .iter()
            .all(|ci| ci.placement_state() == Some(PlacementState::Active)));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_template_performs_no_stack_operations() {
        let cloud = SimulatedCloud::new();
        let desired = fleet("instances-v1", params(&[("DesiredCapacity", "2")]));
        let replacer = replacer(&cloud);
        replacer.converge(&desired).await.unwrap();
        cloud.clear_journal();

        let outcome = replacer.converge(&desired).await.unwrap();

        assert_eq!(
            outcome,
            ConvergeOutcome::NoChange {
                instance_stack: "prod-instances-001".into()
            }
        );
        assert!(!cloud.journal().iter().any(is_stack_op));
    }

    #[tokio::test(start_paused = true)]
    async fn replaces_fleet_in_batches() {
        let cloud = SimulatedCloud::new();
        let old = seed(&cloud, 7);
        let desired = fleet("instances-v2", params(&[("InstanceType", "m5.large")]));

        let outcome = replacer(&cloud).converge(&desired).await.unwrap();

        let ConvergeOutcome::Replaced {
            old_stack,
            new_stack,
            drift,
            new_instances,
            batches,
        } = outcome
        else {
            panic!("expected replacement, got {outcome:?}");
        };
        assert_eq!(old_stack, "prod-instances-001");
        assert_eq!(new_stack, "prod-instances-002");
        assert!(drift.template_changed);
        assert_eq!(new_instances, 7);
        let sizes: Vec<usize> = batches.iter().map(|b| b.instances.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        // Old stack gone only after every batch drained.
        let journal = cloud.journal();
        let draining = position(&journal, |e| {
            matches!(e, CloudEvent::InstanceStatusSet { status: InstanceStatus::Draining, .. })
        });
        let deleted = position(&journal, |e| *e == CloudEvent::StackDeleted(old_stack.clone()));
        assert_eq!(draining.len(), 7);
        assert_eq!(deleted.len(), 1);
        assert!(draining.iter().all(|d| *d < deleted[0]));
        assert!(cloud.stack("prod-instances-001").is_none());

        // Draining starts only after the whole new fleet registered.
        let registered = position(&journal, |e| matches!(e, CloudEvent::InstanceRegistered(_)));
        assert_eq!(registered.len(), 7);
        assert!(registered.iter().all(|r| *r < draining[0]));

        // Only the new fleet is left, placeable.
        let remaining = cloud.container_instances("prod");
        assert_eq!(remaining.len(), 7);
        assert!(remaining.iter().all(|ci| !old.iter().any(|o| o.id == ci.id)));
        assert!(remaining
            .iter()
            .all(|ci| ci.placement_state() == Some(PlacementState::Active)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_new_stack_restores_old_fleet() {
        let cloud = SimulatedCloud::new();
        seed(&cloud, 3);
        cloud.fail_stack("prod-instances-002");
        let desired = fleet("instances-v2", BTreeMap::new());

        let err = replacer(&cloud).converge(&desired).await.unwrap_err();

        assert!(matches!(err, DeployError::Unrecoverable(_)));
        for ci in cloud.container_instances("prod") {
            assert_eq!(ci.status, InstanceStatus::Active);
            assert_eq!(ci.placement_state(), Some(PlacementState::Active));
        }
        assert!(cloud.stack("prod-instances-001").is_some());
        assert!(cloud.stack("prod-instances-002").is_none());
        assert!(cloud
            .journal()
            .contains(&CloudEvent::ScalingResumed("prod-instances-001-asg".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_registration_drains_new_instances() {
        let cloud = SimulatedCloud::new();
        let old = seed(&cloud, 2);
        cloud.fail_once("suspend_scaling");
        let desired = fleet("instances-v2", BTreeMap::new());

        let err = replacer(&cloud).converge(&desired).await.unwrap_err();

        assert!(matches!(err, DeployError::Platform(_)));
        let instances = cloud.container_instances("prod");
        assert_eq!(instances.len(), 2);
        for ci in instances {
            assert!(old.iter().any(|o| o.id == ci.id));
            assert_eq!(ci.status, InstanceStatus::Active);
            assert_eq!(ci.placement_state(), Some(PlacementState::Active));
        }
        assert!(!cloud.group("prod-instances-001-asg").unwrap().is_scaling_paused());

        // New instances drained before their stack was deleted.
        let journal = cloud.journal();
        let draining = position(&journal, |e| {
            matches!(e, CloudEvent::InstanceStatusSet { status: InstanceStatus::Draining, .. })
        });
        let deleted = position(&journal, |e| {
            *e == CloudEvent::StackDeleted("prod-instances-002".into())
        });
        assert_eq!(draining.len(), 2);
        assert_eq!(deleted.len(), 1);
        assert!(draining.iter().all(|d| *d < deleted[0]));
        assert!(cloud.stack("prod-instances-002").is_none());
        assert!(cloud.stack("prod-instances-001").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn converge_after_recovery_replaces_again() {
        let cloud = SimulatedCloud::new();
        let old = seed(&cloud, 2);
        cloud.fail_once("suspend_scaling");
        let desired = fleet("instances-v2", BTreeMap::new());
        let replacer = replacer(&cloud);

        replacer.converge(&desired).await.unwrap_err();
        let outcome = replacer.converge(&desired).await.unwrap();

        let ConvergeOutcome::Replaced {
            old_stack,
            new_stack,
            new_instances,
            ..
        } = outcome
        else {
            panic!("expected replacement, got {outcome:?}");
        };
        assert_eq!(old_stack, "prod-instances-001");
        assert_eq!(new_stack, "prod-instances-002");
        assert_eq!(new_instances, 2);
        assert_eq!(cloud.stack_names(), vec![
            "prod-instances-002".to_string(),
            "prod-shared".to_string(),
        ]);
        let remaining = cloud.container_instances("prod");
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|ci| !old.iter().any(|o| o.id == ci.id)));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_stack_is_removed_before_replacing() {
        let cloud = SimulatedCloud::new();
        let old = seed(&cloud, 2);
        cloud.fail_once("suspend_scaling");
        cloud.fail_once("delete_stack");
        let desired = fleet("instances-v2", BTreeMap::new());
        let replacer = replacer(&cloud);

        replacer.converge(&desired).await.unwrap_err();
        // Recovery could not delete the new stack; it lingers fully drained.
        assert!(cloud.stack("prod-instances-002").is_some());
        cloud.clear_journal();

        let outcome = replacer.converge(&desired).await.unwrap();

        let ConvergeOutcome::Replaced {
            old_stack,
            new_stack,
            ..
        } = outcome
        else {
            panic!("expected replacement, got {outcome:?}");
        };
        assert_eq!(old_stack, "prod-instances-001");
        assert_eq!(new_stack, "prod-instances-003");

        let journal = cloud.journal();
        let abandoned = position(&journal, |e| {
            *e == CloudEvent::StackDeleted("prod-instances-002".into())
        });
        let pushed = position(&journal, |e| {
            *e == CloudEvent::StackPushed("prod-instances-003".into())
        });
        assert_eq!(abandoned.len(), 1);
        assert!(abandoned[0] < pushed[0]);
        assert!(cloud.stack("prod-instances-001").is_none());
        assert!(cloud.stack("prod-instances-002").is_none());
        assert!(cloud.stack("prod-instances-003").is_some());
        let remaining = cloud.container_instances("prod");
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|ci| !old.iter().any(|o| o.id == ci.id)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_drain_restores_old_fleet() {
        let cloud = SimulatedCloud::new();
        let old = seed(&cloud, 2);
        cloud.stall_draining(&old[0].instance_id);
        let desired = fleet("instances-v2", BTreeMap::new());
        let (tx, rx) = watch::channel(false);
        let replacer = replacer(&cloud).with_shutdown(Some(rx));

        let (result, signalled) = tokio::join!(replacer.converge(&desired), async {
            for _ in 0..600 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let draining = cloud.journal().iter().any(|e| {
                    matches!(e, CloudEvent::InstanceStatusSet { status: InstanceStatus::Draining, .. })
                });
                if draining {
                    tx.send(true).unwrap();
                    return true;
                }
            }
            false
        });

        assert!(signalled);
        let err = result.unwrap_err();
        assert!(matches!(err, DeployError::Interrupted(_)), "got {err:?}");

        let instances = cloud.container_instances("prod");
        assert_eq!(instances.len(), 2);
        for ci in instances {
            assert!(old.iter().any(|o| o.id == ci.id));
            assert_eq!(ci.status, InstanceStatus::Active);
            assert_eq!(ci.placement_state(), Some(PlacementState::Active));
        }
        assert!(cloud
            .journal()
            .contains(&CloudEvent::ScalingResumed("prod-instances-001-asg".into())));
        assert!(!cloud.group("prod-instances-001-asg").unwrap().is_scaling_paused());
        assert!(cloud.stack("prod-instances-001").is_some());
        assert!(cloud.stack("prod-instances-002").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_instance_is_replaced_during_provisioning() {
        let cloud = SimulatedCloud::new();
        seed(&cloud, 2);
        cloud.withhold_registration(1);
        let desired = fleet("instances-v2", BTreeMap::new());

        let outcome = replacer(&cloud).converge(&desired).await.unwrap();

        assert!(matches!(outcome, ConvergeOutcome::Replaced { new_instances: 2, .. }));
        assert!(cloud
            .journal()
            .iter()
            .any(|e| matches!(e, CloudEvent::InstanceMarkedUnhealthy(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_drain_is_not_fatal() {
        let cloud = SimulatedCloud::new();
        let old = seed(&cloud, 4);
        cloud.stall_draining(&old[0].instance_id);
        let desired = fleet("instances-v2", BTreeMap::new());

        let outcome = replacer(&cloud).converge(&desired).await.unwrap();

        let ConvergeOutcome::Replaced { batches, .. } = outcome else {
            panic!("expected replacement");
        };
        assert_eq!(batches.len(), 2);
        assert!(!batches[0].drained);
        assert!(batches[1].drained);
        assert!(cloud.stack("prod-instances-001").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn draining_can_be_disabled() {
        let cloud = SimulatedCloud::new();
        seed(&cloud, 2);
        let mut desired = fleet("instances-v2", BTreeMap::new());
        desired.drain.enabled = false;

        let outcome = replacer(&cloud).converge(&desired).await.unwrap();

        assert!(matches!(outcome, ConvergeOutcome::Replaced { ref batches, .. } if batches.is_empty()));
        assert!(!cloud.journal().iter().any(|e| matches!(
            e,
            CloudEvent::InstanceStatusSet { status: InstanceStatus::Draining, .. }
        )));
    }
}
