//! Reading the current shape of a cluster.

use convoy_core::{
    AUTOSCALING_GROUP_TYPE, ClusterState, ContainerInstance, DeployError, DeployResult,
    InstanceStackName, InstanceStatus, PlatformError, StackDescription, shared_stack_name,
};
use convoy_platform::{ContainerPlatformClient, ScalingGroupClient, StackDeployer};
use tracing::{debug, warn};

/// What the engine found before deciding how to converge.
#[derive(Debug, Clone)]
pub struct ClusterProbe {
    pub state: ClusterState,
    /// Newest usable instance stack whose fleet is still in service.
    pub current: Option<StackDescription>,
    /// Stacks newer than `current` left behind by a recovered
    /// replacement: every instance they registered is draining.
    pub abandoned: Vec<StackDescription>,
    /// Name the next instance stack will get.
    pub next: InstanceStackName,
}

impl ClusterProbe {
    pub fn is_new_cluster(&self) -> bool {
        self.state.shared_stack.is_none()
    }
}

pub async fn probe_cluster(
    stacks: &dyn StackDeployer,
    platform: &dyn ContainerPlatformClient,
    scaling: &dyn ScalingGroupClient,
    cluster: &str,
) -> DeployResult<ClusterProbe> {
    let shared_name = shared_stack_name(cluster);
    let shared_stack = stacks
        .describe(&shared_name)
        .await?
        .map(|_| shared_name);

    let mut instance_stacks: Vec<InstanceStackName> = stacks
        .list(&InstanceStackName::prefix(cluster))
        .await?
        .iter()
        .filter_map(|name| InstanceStackName::parse(cluster, name))
        .collect();
    instance_stacks.sort();

    let next = instance_stacks
        .last()
        .map(InstanceStackName::next)
        .unwrap_or_else(|| InstanceStackName::first(cluster));

    let instances = if platform.cluster_exists(cluster).await? {
        platform.list_container_instances(cluster).await?
    } else {
        Vec::new()
    };

    let mut current = None;
    let mut abandoned = Vec::new();
    for (position, name) in instance_stacks.iter().enumerate().rev() {
        let Some(description) = stacks.describe(&name.to_string()).await? else {
            continue;
        };
        if !description.status.is_usable() {
            warn!(stack = %name, status = %description.status, "skipping unusable instance stack");
            continue;
        }
        // The oldest stack is never retired: nothing would take over.
        if position > 0 && is_retired(scaling, &description, &instances).await? {
            warn!(stack = %name, "instance stack was retired by a recovered replacement");
            abandoned.push(description);
            continue;
        }
        current = Some(description);
        break;
    }

    debug!(
        cluster,
        shared = shared_stack.is_some(),
        instance_stacks = instance_stacks.len(),
        abandoned = abandoned.len(),
        instances = instances.len(),
        "probed cluster"
    );

    Ok(ClusterProbe {
        state: ClusterState {
            cluster: cluster.to_string(),
            shared_stack,
            instance_stacks,
            instances,
        },
        current,
        abandoned,
        next,
    })
}

/// Whether every cluster instance launched by `stack` is draining.
///
/// A stack with no registered instances is not retired.
async fn is_retired(
    scaling: &dyn ScalingGroupClient,
    stack: &StackDescription,
    instances: &[ContainerInstance],
) -> DeployResult<bool> {
    let Some(group) = stack.resource_of_type(AUTOSCALING_GROUP_TYPE) else {
        return Ok(false);
    };
    let group = match scaling.describe_group(group).await {
        Ok(group) => group,
        Err(PlatformError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let mut registered = instances
        .iter()
        .filter(|ci| group.instances.iter().any(|i| i.instance_id == ci.instance_id))
        .peekable();
    if registered.peek().is_none() {
        return Ok(false);
    }
    Ok(registered.all(|ci| ci.status == InstanceStatus::Draining))
}

/// The autoscaling group created by an instance stack.
pub fn scaling_group_of(stack: &StackDescription) -> DeployResult<String> {
    stack
        .resource_of_type(AUTOSCALING_GROUP_TYPE)
        .map(str::to_string)
        .ok_or_else(|| {
            DeployError::unrecoverable(format!("stack {} has no autoscaling group", stack.name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use convoy_core::StackSpec;
    use convoy_platform::SimulatedCloud;

    #[tokio::test]
    async fn empty_cloud_is_a_new_cluster() {
        let cloud = SimulatedCloud::new();
        let probe = probe_cluster(&cloud, &cloud, &cloud, "prod").await.unwrap();
        assert!(probe.is_new_cluster());
        assert!(probe.current.is_none());
        assert_eq!(probe.next.to_string(), "prod-instances-001");
        assert!(probe.state.instances.is_empty());
    }

    #[tokio::test]
    async fn seeded_cluster_reports_current_stack() {
        let cloud = SimulatedCloud::new();
        cloud.seed_cluster("prod", "shared", "instances", BTreeMap::new(), 3);

        let probe = probe_cluster(&cloud, &cloud, &cloud, "prod").await.unwrap();
        assert!(!probe.is_new_cluster());
        let current = probe.current.unwrap();
        assert_eq!(current.name, "prod-instances-001");
        assert_eq!(scaling_group_of(&current).unwrap(), "prod-instances-001-asg");
        assert_eq!(probe.next.to_string(), "prod-instances-002");
        assert_eq!(probe.state.instances.len(), 3);
    }

    #[tokio::test]
    async fn failed_stacks_are_skipped_but_keep_their_sequence() {
        let cloud = SimulatedCloud::new();
        cloud.seed_cluster("prod", "shared", "instances", BTreeMap::new(), 1);
        cloud.fail_stack("prod-instances-002");
        cloud
            .push(&StackSpec {
                name: "prod-instances-002".into(),
                template: "instances-v2".into(),
                parameters: BTreeMap::new(),
                tags: BTreeMap::new(),
            })
            .await
            .unwrap();
        // Settle into ROLLBACK_COMPLETE.
        cloud.describe("prod-instances-002").await.unwrap();

        let probe = probe_cluster(&cloud, &cloud, &cloud, "prod").await.unwrap();
        assert_eq!(probe.current.unwrap().name, "prod-instances-001");
        assert_eq!(probe.next.to_string(), "prod-instances-003");
    }

    #[tokio::test]
    async fn rolled_back_update_stays_current() {
        let cloud = SimulatedCloud::new();
        cloud.seed_cluster("prod", "shared", "instances", BTreeMap::new(), 2);
        let mut spec = StackSpec {
            name: "prod-instances-001".into(),
            template: "instances".into(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        };
        spec.parameters.insert("ClusterName".into(), "prod".into());
        cloud.fail_stack("prod-instances-001");
        cloud.push(&spec).await.unwrap();
        // Settle into UPDATE_ROLLBACK_COMPLETE.
        cloud.describe("prod-instances-001").await.unwrap();

        let probe = probe_cluster(&cloud, &cloud, &cloud, "prod").await.unwrap();
        let current = probe.current.unwrap();
        assert_eq!(current.status.as_str(), "UPDATE_ROLLBACK_COMPLETE");
        assert_eq!(current.name, "prod-instances-001");
        assert_eq!(probe.next.to_string(), "prod-instances-002");
    }

    #[tokio::test]
    async fn drained_newer_stack_is_abandoned() {
        let cloud = SimulatedCloud::new();
        cloud.seed_cluster("prod", "shared", "instances-v1", BTreeMap::new(), 2);
        let old: Vec<String> = cloud
            .container_instances("prod")
            .into_iter()
            .map(|ci| ci.id)
            .collect();

        let mut parameters = BTreeMap::new();
        parameters.insert("ClusterName".to_string(), "prod".to_string());
        parameters.insert("DesiredCapacity".to_string(), "2".to_string());
        cloud
            .push(&StackSpec {
                name: "prod-instances-002".into(),
                template: "instances-v2".into(),
                parameters,
                tags: BTreeMap::new(),
            })
            .await
            .unwrap();
        cloud.describe("prod-instances-002").await.unwrap();
        // Bring the new instances into service so they register.
        cloud.describe_group("prod-instances-002-asg").await.unwrap();
        let new: Vec<String> = cloud
            .list_container_instances("prod")
            .await
            .unwrap()
            .into_iter()
            .map(|ci| ci.id)
            .filter(|id| !old.contains(id))
            .collect();
        assert_eq!(new.len(), 2);
        cloud
            .set_instance_status("prod", &new, InstanceStatus::Draining)
            .await
            .unwrap();

        let probe = probe_cluster(&cloud, &cloud, &cloud, "prod").await.unwrap();
        assert_eq!(probe.current.unwrap().name, "prod-instances-001");
        let abandoned: Vec<&str> = probe.abandoned.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(abandoned, vec!["prod-instances-002"]);
        assert_eq!(probe.next.to_string(), "prod-instances-003");
    }

    #[tokio::test]
    async fn sole_draining_stack_stays_current() {
        let cloud = SimulatedCloud::new();
        cloud.seed_cluster("prod", "shared", "instances", BTreeMap::new(), 2);
        let ids: Vec<String> = cloud
            .container_instances("prod")
            .into_iter()
            .map(|ci| ci.id)
            .collect();
        cloud
            .set_instance_status("prod", &ids, InstanceStatus::Draining)
            .await
            .unwrap();

        let probe = probe_cluster(&cloud, &cloud, &cloud, "prod").await.unwrap();
        assert_eq!(probe.current.unwrap().name, "prod-instances-001");
        assert!(probe.abandoned.is_empty());
    }
}
