//! The fleet a release asks for.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use convoy_core::config::{ClusterConfig, DrainConfig, ReleaseConfig};
use convoy_core::{DeployError, DeployResult, InstanceStackName, StackDescription, StackSpec};

/// Stack parameter naming the cluster instances join.
pub const CLUSTER_NAME_PARAMETER: &str = "ClusterName";
/// Stack parameter sizing the autoscaling group.
pub const CAPACITY_PARAMETER: &str = "DesiredCapacity";
/// Capacity of a first instance stack when none is configured.
pub const DEFAULT_CAPACITY: u32 = 1;

/// Templates and knobs for one cluster, with template bodies loaded.
#[derive(Debug, Clone)]
pub struct DesiredFleet {
    pub cluster: String,
    pub shared_template: String,
    pub instance_template: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub drain: DrainConfig,
    pub registration_timeout: Duration,
    pub capacity_timeout: Duration,
    pub stack_timeout: Duration,
}

impl DesiredFleet {
    /// Load the `[cluster]` section, resolving template paths against `base`.
    ///
    /// Returns `None` when the release carries no cluster section.
    pub fn load(config: &ReleaseConfig, base: &Path) -> DeployResult<Option<Self>> {
        let Some(cluster) = &config.cluster else {
            return Ok(None);
        };
        let read = |path: &Path| {
            let path = base.join(path);
            std::fs::read_to_string(&path)
                .map_err(|e| DeployError::Config(format!("{}: {e}", path.display())))
        };
        Ok(Some(Self::new(
            &config.application.cluster,
            cluster,
            read(&cluster.shared_template)?,
            read(&cluster.instance_template)?,
        )))
    }

    pub fn new(
        cluster_name: &str,
        cluster: &ClusterConfig,
        shared_template: String,
        instance_template: String,
    ) -> Self {
        Self {
            cluster: cluster_name.to_string(),
            shared_template,
            instance_template,
            parameters: cluster.parameters.clone(),
            tags: cluster.tags.clone(),
            drain: cluster.drain.clone(),
            registration_timeout: Duration::from_secs(cluster.registration_timeout_secs),
            capacity_timeout: Duration::from_secs(cluster.capacity_timeout_minutes * 60),
            stack_timeout: Duration::from_secs(cluster.stack_timeout_minutes * 60),
        }
    }

    pub fn shared_stack(&self) -> StackSpec {
        let mut parameters = BTreeMap::new();
        parameters.insert(CLUSTER_NAME_PARAMETER.to_string(), self.cluster.clone());
        StackSpec {
            name: convoy_core::shared_stack_name(&self.cluster),
            template: self.shared_template.clone(),
            parameters,
            tags: self.tags.clone(),
        }
    }

    /// The instance stack to push under `name`.
    ///
    /// Without a configured capacity the fleet keeps the size of the stack
    /// it replaces.
    pub fn instance_stack(
        &self,
        name: &InstanceStackName,
        current: Option<&StackDescription>,
    ) -> StackSpec {
        let mut parameters = self.parameters.clone();
        parameters.insert(CLUSTER_NAME_PARAMETER.to_string(), self.cluster.clone());
        if !parameters.contains_key(CAPACITY_PARAMETER) {
            let capacity = current
                .and_then(|s| s.parameters.get(CAPACITY_PARAMETER).cloned())
                .unwrap_or_else(|| DEFAULT_CAPACITY.to_string());
            parameters.insert(CAPACITY_PARAMETER.to_string(), capacity);
        }
        StackSpec {
            name: name.to_string(),
            template: self.instance_template.clone(),
            parameters,
            tags: self.tags.clone(),
        }
    }
}
