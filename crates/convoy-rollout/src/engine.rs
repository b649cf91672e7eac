//! Deployment engine — drives one release through the deployment state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use convoy_core::config::{DeploySettings, ReleaseConfig};
use convoy_core::{
    ClusterFacts, DeployError, DeployResult, DeploymentConfiguration, DeploymentOutcome,
    LoadBalancerRef, NetworkConfiguration, NetworkMode, ReleaseKind, ServiceRequest,
    TaskDefinitionRef,
};
use convoy_platform::ContainerPlatformClient;
use convoy_waiter::Waiter;

use crate::service::{ServiceHandle, event_baseline};
use crate::task::run_to_completion;
use crate::task_definition::{build_request, prune_revisions};

/// Current phase of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Registering,
    /// Run-once task started, waiting for it to stop.
    RunningTask,
    Creating,
    Updating,
    /// Waiting for the platform to react to the create/update.
    AwaitingAck,
    Stabilizing,
    RollingBack,
    Stable,
    /// Prior revision restored; the release still failed.
    RolledBack,
    /// Service forced to zero tasks.
    Unrecoverable,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployPhase::Registering => "registering",
            DeployPhase::RunningTask => "running-task",
            DeployPhase::Creating => "creating",
            DeployPhase::Updating => "updating",
            DeployPhase::AwaitingAck => "awaiting-ack",
            DeployPhase::Stabilizing => "stabilizing",
            DeployPhase::RollingBack => "rolling-back",
            DeployPhase::Stable => "stable",
            DeployPhase::RolledBack => "rolled-back",
            DeployPhase::Unrecoverable => "unrecoverable",
        };
        f.write_str(name)
    }
}

/// Deploys one application version onto its cluster.
pub struct ServiceDeployer {
    platform: Arc<dyn ContainerPlatformClient>,
    settings: DeploySettings,
    interval: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ServiceDeployer {
    pub fn new(platform: Arc<dyn ContainerPlatformClient>, settings: DeploySettings) -> Self {
        let interval = settings.poll_interval();
        Self {
            platform,
            settings,
            interval,
            shutdown: None,
        }
    }

    /// Override the poll interval. Budgets stay expressed in polls.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Option<watch::Receiver<bool>>) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn waiter(&self, polls: u32) -> Waiter {
        Waiter::with_polls(self.interval, polls).with_shutdown(self.shutdown.clone())
    }

    fn enter(&self, phase: DeployPhase, revision: &TaskDefinitionRef) {
        info!(%phase, %revision, "deployment phase");
    }

    /// Deploy and report failure for anything short of a stable release.
    ///
    /// A completed rollback is still a failed release and surfaces as
    /// [`DeployError::RolledBack`].
    pub async fn deploy(
        &self,
        config: &ReleaseConfig,
        facts: &ClusterFacts,
    ) -> DeployResult<DeploymentOutcome> {
        let outcome = self.attempt(config, facts).await?;
        if outcome.rolled_back {
            return Err(DeployError::RolledBack {
                failed: outcome.revision.to_string(),
                restored: outcome
                    .prior
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            });
        }
        Ok(outcome)
    }

    /// Deploy, returning the outcome of a completed rollback instead of
    /// an error.
    pub async fn attempt(
        &self,
        config: &ReleaseConfig,
        facts: &ClusterFacts,
    ) -> DeployResult<DeploymentOutcome> {
        let kind = ReleaseKind::classify(config);
        let cluster = config.application.cluster.as_str();
        let name = config.application.name.as_str();
        info!(application = name, cluster, kind = kind.label(), "starting deployment");

        // Reject a web release without a load balancer before registering anything.
        let load_balancer = load_balancer(config, &kind)?;

        let request = build_request(config, &kind, facts);
        let definition = self.platform.register_task_definition(&request).await?;
        let revision = definition.reference.clone();
        self.enter(DeployPhase::Registering, &revision);

        let handle = ServiceHandle::new(self.platform.as_ref(), cluster, name);
        let existing = match kind {
            ReleaseKind::Task => None,
            ReleaseKind::Daemon { .. } | ReleaseKind::Web { .. } => handle.describe().await?,
        };
        let prior = existing
            .as_ref()
            .map(|s| s.task_definition.clone())
            .filter(|p| *p != revision);

        let mut keep = vec![&revision];
        keep.extend(prior.as_ref());
        prune_revisions(self.platform.as_ref(), &request.family, &keep).await?;

        let Some(desired_count) = kind.desired_count() else {
            self.enter(DeployPhase::RunningTask, &revision);
            let waiter = self.waiter(self.settings.task_timeout_minutes * 6);
            run_to_completion(self.platform.as_ref(), &waiter, cluster, &definition).await?;
            return Ok(DeploymentOutcome {
                revision,
                prior: None,
                stabilized: true,
                rolled_back: false,
            });
        };

        let service_request = ServiceRequest {
            name: name.to_string(),
            cluster: cluster.to_string(),
            task_definition: revision.clone(),
            desired_count,
            deployment: deployment_configuration(config),
            load_balancer,
            network: (config.application.network_mode == NetworkMode::Awsvpc).then(|| {
                NetworkConfiguration {
                    subnets: facts.subnets.clone(),
                    security_groups: facts.security_groups.clone(),
                }
            }),
        };

        handle.purge_foreign().await?;
        let baseline = event_baseline(existing.as_ref());
        let phase = if existing.is_some() {
            DeployPhase::Updating
        } else {
            DeployPhase::Creating
        };
        self.enter(phase, &revision);
        handle.apply(&service_request, existing.is_some()).await?;

        let waiter = self.waiter(self.settings.stabilization_polls());
        let started = Instant::now();

        if desired_count > 0 {
            self.enter(DeployPhase::AwaitingAck, &revision);
            if let Err(err) = handle.await_acknowledgment(&waiter, &baseline).await {
                if matches!(err, DeployError::Interrupted(_)) {
                    return Err(err);
                }
                self.enter(DeployPhase::Unrecoverable, &revision);
                handle.scale_to_zero().await;
                return Err(DeployError::Unrecoverable(format!(
                    "platform never acknowledged {revision}: {err}"
                )));
            }
        }

        self.enter(DeployPhase::Stabilizing, &revision);
        let remaining = waiter.with_timeout(waiter.timeout().saturating_sub(started.elapsed()));
        match handle.await_stabilization(&remaining, &revision).await {
            Ok(service) => {
                self.enter(DeployPhase::Stable, &revision);
                info!(
                    service = name,
                    running = service.running_count,
                    "service stabilized"
                );
                // Only the live revision stays registered.
                let pruned =
                    prune_revisions(self.platform.as_ref(), &request.family, &[&revision]).await;
                if let Err(e) = pruned {
                    warn!(family = %request.family, error = %e, "failed to deregister superseded revision");
                }
                Ok(DeploymentOutcome {
                    revision,
                    prior,
                    stabilized: true,
                    rolled_back: false,
                })
            }
            Err(err @ DeployError::Interrupted(_)) => Err(err),
            Err(err) => {
                warn!(service = name, %revision, error = %err, "service failed to stabilize");
                self.roll_back(handle, &service_request, revision, prior, err).await
            }
        }
    }

    async fn roll_back(
        &self,
        handle: ServiceHandle<'_>,
        failed_request: &ServiceRequest,
        failed: TaskDefinitionRef,
        prior: Option<TaskDefinitionRef>,
        cause: DeployError,
    ) -> DeployResult<DeploymentOutcome> {
        let Some(prior) = prior else {
            self.enter(DeployPhase::Unrecoverable, &failed);
            handle.scale_to_zero().await;
            return Err(DeployError::Unrecoverable(format!(
                "{failed} did not stabilize and there is no revision to roll back to: {cause}"
            )));
        };

        self.enter(DeployPhase::RollingBack, &prior);
        let mut request = failed_request.clone();
        request.task_definition = prior.clone();

        match self.restore(handle, &request).await {
            Ok(()) => {
                self.enter(DeployPhase::RolledBack, &prior);
                warn!(%failed, restored = %prior, "rolled back to prior revision");
                Ok(DeploymentOutcome {
                    revision: failed,
                    prior: Some(prior),
                    stabilized: false,
                    rolled_back: true,
                })
            }
            Err(err @ DeployError::Interrupted(_)) => Err(err),
            Err(err) => {
                error!(%failed, %prior, error = %err, "rollback failed");
                self.enter(DeployPhase::Unrecoverable, &prior);
                handle.scale_to_zero().await;
                Err(DeployError::Unrecoverable(format!(
                    "{failed} did not stabilize ({cause}); rollback to {prior} failed: {err}"
                )))
            }
        }
    }

    /// Rebind the service to `request.task_definition` and wait it out
    /// with a fresh budget.
    async fn restore(
        &self,
        handle: ServiceHandle<'_>,
        request: &ServiceRequest,
    ) -> DeployResult<()> {
        let baseline = event_baseline(handle.describe().await?.as_ref());
        handle.apply(request, true).await?;

        let waiter = self.waiter(self.settings.stabilization_polls());
        let started = Instant::now();
        if request.desired_count > 0 {
            handle.await_acknowledgment(&waiter, &baseline).await?;
        }
        let remaining = waiter.with_timeout(waiter.timeout().saturating_sub(started.elapsed()));
        handle.await_stabilization(&remaining, &request.task_definition).await?;
        Ok(())
    }
}

fn load_balancer(
    config: &ReleaseConfig,
    kind: &ReleaseKind,
) -> DeployResult<Option<LoadBalancerRef>> {
    let ReleaseKind::Web { container_port, .. } = kind else {
        return Ok(None);
    };
    let target_group = config
        .service
        .as_ref()
        .and_then(|s| s.target_group.clone())
        .ok_or_else(|| {
            DeployError::Config(format!(
                "web service {} needs service.target_group",
                config.application.name
            ))
        })?;
    Ok(Some(LoadBalancerRef {
        target_group,
        container_name: config.application.name.clone(),
        container_port: *container_port,
    }))
}

fn deployment_configuration(config: &ReleaseConfig) -> DeploymentConfiguration {
    config
        .service
        .as_ref()
        .map(|s| DeploymentConfiguration {
            min_healthy_percent: s.min_healthy_percent,
            max_percent: s.max_percent,
        })
        .unwrap_or_default()
}
