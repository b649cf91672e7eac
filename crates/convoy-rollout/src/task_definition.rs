//! Task-definition registration requests and revision pruning.

use convoy_core::config::ReleaseConfig;
use convoy_core::{
    ClusterFacts, ContainerSpec, DeployResult, NetworkMode, PlacementConstraint, PortMapping,
    ReleaseKind, RevisionStatus, TaskDefinitionRef, TaskDefinitionRequest,
};
use convoy_platform::ContainerPlatformClient;
use tracing::{debug, info};

/// Build the registration request for a release.
///
/// The application container is always essential and named after the
/// application; sidecars keep their configured essential flag. Every
/// revision carries the placement constraint that keeps tasks off
/// instances being retired.
pub fn build_request(
    config: &ReleaseConfig,
    kind: &ReleaseKind,
    facts: &ClusterFacts,
) -> TaskDefinitionRequest {
    let app = &config.application;

    let port_mappings = match kind {
        ReleaseKind::Web { container_port, .. } => vec![PortMapping {
            container_port: *container_port,
            // Bridge mode gets a dynamic host port; awsvpc and host bind directly.
            host_port: match app.network_mode {
                NetworkMode::Bridge => None,
                NetworkMode::Awsvpc | NetworkMode::Host => Some(*container_port),
            },
        }],
        ReleaseKind::Task | ReleaseKind::Daemon { .. } => Vec::new(),
    };

    let mut containers = vec![ContainerSpec {
        name: app.name.clone(),
        image: app.image.clone(),
        essential: true,
        cpu: None,
        memory: None,
        command: app.command.clone(),
        environment: app.env.clone(),
        port_mappings,
    }];
    containers.extend(app.sidecars.iter().map(|sidecar| ContainerSpec {
        name: sidecar.name.clone(),
        image: sidecar.image.clone(),
        essential: sidecar.essential,
        cpu: None,
        memory: sidecar.memory,
        command: Vec::new(),
        environment: sidecar.env.clone(),
        port_mappings: Vec::new(),
    }));

    TaskDefinitionRequest {
        family: config.family(),
        containers,
        cpu: app.cpu,
        memory: app.memory,
        network_mode: app.network_mode,
        task_role: app
            .task_role
            .clone()
            .or_else(|| Some(facts.instance_role.clone()).filter(|r| !r.is_empty())),
        placement_constraints: vec![PlacementConstraint::avoid_pre_drain()],
    }
}

/// Deregister every active revision of `family` not listed in `keep`.
///
/// Returns the revisions that were deregistered.
pub async fn prune_revisions(
    platform: &dyn ContainerPlatformClient,
    family: &str,
    keep: &[&TaskDefinitionRef],
) -> DeployResult<Vec<TaskDefinitionRef>> {
    let active = platform
        .list_task_definitions(family, RevisionStatus::Active)
        .await?;

    let mut pruned = Vec::new();
    for revision in active {
        if keep.contains(&&revision) {
            continue;
        }
        platform.deregister_task_definition(&revision).await?;
        debug!(%revision, "deregistered stale revision");
        pruned.push(revision);
    }

    if !pruned.is_empty() {
        info!(family, count = pruned.len(), "pruned task definition revisions");
    }
    Ok(pruned)
}
