//! Service operations: create/update, acknowledgment, stabilization.

use std::collections::HashSet;

use convoy_core::{
    DeployError, DeployResult, PlatformError, Service, ServiceRequest, TaskDefinitionRef,
};
use convoy_platform::ContainerPlatformClient;
use convoy_waiter::Waiter;
use tracing::{error, info, warn};

/// One named service on one cluster.
#[derive(Clone, Copy)]
pub struct ServiceHandle<'a> {
    pub platform: &'a dyn ContainerPlatformClient,
    pub cluster: &'a str,
    pub name: &'a str,
}

impl<'a> ServiceHandle<'a> {
    pub fn new(platform: &'a dyn ContainerPlatformClient, cluster: &'a str, name: &'a str) -> Self {
        Self {
            platform,
            cluster,
            name,
        }
    }

    /// The active service, if one exists.
    pub async fn describe(&self) -> DeployResult<Option<Service>> {
        let service = self.platform.describe_service(self.cluster, self.name).await?;
        Ok(service.filter(Service::is_active))
    }

    async fn describe_required(&self) -> DeployResult<Service> {
        self.describe().await?.ok_or_else(|| {
            DeployError::unrecoverable(format!("service {} vanished from {}", self.name, self.cluster))
        })
    }

    /// Remove same-named services from every other cluster.
    ///
    /// Handles an application that migrated between clusters. Returns the
    /// clusters the service was removed from.
    pub async fn purge_foreign(&self) -> DeployResult<Vec<String>> {
        let mut purged = Vec::new();
        for cluster in self.platform.list_clusters().await? {
            if cluster == self.cluster {
                continue;
            }
            let Some(service) = self.platform.describe_service(&cluster, self.name).await? else {
                continue;
            };
            if !service.is_active() {
                continue;
            }
            warn!(service = self.name, %cluster, "removing service from previous cluster");
            self.platform.set_desired_count(&cluster, self.name, 0).await?;
            self.platform.delete_service(&cluster, self.name).await?;
            purged.push(cluster);
        }
        Ok(purged)
    }

    /// Create the service, or update it in place if it already exists.
    pub async fn apply(&self, request: &ServiceRequest, exists: bool) -> DeployResult<Service> {
        if exists {
            info!(service = self.name, revision = %request.task_definition, "updating service");
            return Ok(self.platform.update_service(request).await?);
        }

        info!(service = self.name, revision = %request.task_definition, "creating service");
        match self.platform.create_service(request).await {
            Ok(service) => Ok(service),
            Err(PlatformError::AlreadyExists(_)) => {
                // Appeared between describe and create.
                info!(service = self.name, "service already exists, updating instead");
                Ok(self.platform.update_service(request).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for the platform to emit an event not in `baseline`.
    pub async fn await_acknowledgment(
        &self,
        waiter: &Waiter,
        baseline: &HashSet<String>,
    ) -> DeployResult<Service> {
        let what = format!("acknowledgment of service {}", self.name);
        let handle = *self;
        waiter
            .until(
                &what,
                move || async move { handle.describe_required().await },
                |service: &Service| service.events.iter().any(|e| !baseline.contains(&e.id)),
                |_| false,
            )
            .await
    }

    /// Wait until `revision` runs at the desired count in steady state.
    pub async fn await_stabilization(
        &self,
        waiter: &Waiter,
        revision: &TaskDefinitionRef,
    ) -> DeployResult<Service> {
        let what = format!("stabilization of service {} at {revision}", self.name);
        let handle = *self;
        waiter
            .until(
                &what,
                move || async move { handle.describe_required().await },
                |service: &Service| service.task_definition == *revision && service.is_steady(),
                |_| false,
            )
            .await
    }

    /// Force the desired count to zero. Best effort: failures are logged.
    pub async fn scale_to_zero(&self) {
        warn!(service = self.name, cluster = self.cluster, "scaling service to zero");
        if let Err(e) = self.platform.set_desired_count(self.cluster, self.name, 0).await {
            error!(service = self.name, error = %e, "failed to scale service to zero");
        }
    }
}

/// Ids of the events a service has already emitted.
pub fn event_baseline(service: Option<&Service>) -> HashSet<String> {
    service
        .map(|s| s.events.iter().map(|e| e.id.clone()).collect())
        .unwrap_or_default()
}
