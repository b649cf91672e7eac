//! Collaborator traits.
//!
//! Implementations are expected to be thin wrappers around a remote API.
//! Conflict handling is left to the remote side; callers serialize
//! releases of the same application or cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;

use convoy_core::{
    ClusterFacts, ContainerInstance, InstanceStatus, PlatformResult, RevisionStatus,
    ScalingGroup, Service, ServiceRequest, StackDescription, StackSpec, TaskDefinition,
    TaskDefinitionRef, TaskDefinitionRequest, TaskRun,
};

/// Pushes templates and reports on their convergence.
#[async_trait]
pub trait StackDeployer: Send + Sync {
    /// Create the stack, or update it in place if it exists. Returns the
    /// stack handle.
    async fn push(&self, spec: &StackSpec) -> PlatformResult<String>;

    async fn delete(&self, name: &str) -> PlatformResult<()>;

    /// `None` once the stack is gone.
    async fn describe(&self, name: &str) -> PlatformResult<Option<StackDescription>>;

    /// Names of live stacks starting with `prefix`.
    async fn list(&self, prefix: &str) -> PlatformResult<Vec<String>>;
}

/// Container orchestration API.
#[async_trait]
pub trait ContainerPlatformClient: Send + Sync {
    // ── Clusters ──
    async fn cluster_exists(&self, cluster: &str) -> PlatformResult<bool>;
    async fn create_cluster(&self, cluster: &str) -> PlatformResult<()>;
    async fn tag_cluster(&self, cluster: &str, tags: &BTreeMap<String, String>)
    -> PlatformResult<()>;
    async fn list_clusters(&self) -> PlatformResult<Vec<String>>;

    // ── Task definitions ──
    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> PlatformResult<TaskDefinition>;
    async fn describe_task_definition(
        &self,
        reference: &TaskDefinitionRef,
    ) -> PlatformResult<TaskDefinition>;
    /// Revisions of a family with the given status, ascending.
    async fn list_task_definitions(
        &self,
        family: &str,
        status: RevisionStatus,
    ) -> PlatformResult<Vec<TaskDefinitionRef>>;
    async fn deregister_task_definition(&self, reference: &TaskDefinitionRef)
    -> PlatformResult<()>;

    // ── Services ──
    async fn create_service(&self, request: &ServiceRequest) -> PlatformResult<Service>;
    async fn update_service(&self, request: &ServiceRequest) -> PlatformResult<Service>;
    async fn set_desired_count(&self, cluster: &str, service: &str, count: u32)
    -> PlatformResult<()>;
    /// `None` if no active service of that name exists on the cluster.
    async fn describe_service(&self, cluster: &str, service: &str)
    -> PlatformResult<Option<Service>>;
    async fn delete_service(&self, cluster: &str, service: &str) -> PlatformResult<()>;

    // ── Tasks ──
    async fn run_task(&self, cluster: &str, task_definition: &TaskDefinitionRef)
    -> PlatformResult<TaskRun>;
    async fn describe_task(&self, cluster: &str, task_id: &str) -> PlatformResult<TaskRun>;
    async fn stop_task(&self, cluster: &str, task_id: &str, reason: &str) -> PlatformResult<()>;

    // ── Container instances ──
    async fn list_container_instances(&self, cluster: &str)
    -> PlatformResult<Vec<ContainerInstance>>;
    /// Set ACTIVE or DRAINING on the given container-instance ids.
    async fn set_instance_status(
        &self,
        cluster: &str,
        ids: &[String],
        status: InstanceStatus,
    ) -> PlatformResult<()>;
    async fn put_attribute(
        &self,
        cluster: &str,
        ids: &[String],
        key: &str,
        value: &str,
    ) -> PlatformResult<()>;
}

/// Autoscaling group API.
#[async_trait]
pub trait ScalingGroupClient: Send + Sync {
    async fn describe_group(&self, name: &str) -> PlatformResult<ScalingGroup>;
    /// Stop the group from launching or terminating instances.
    async fn suspend_scaling(&self, name: &str) -> PlatformResult<()>;
    async fn resume_scaling(&self, name: &str) -> PlatformResult<()>;
    /// Flag an instance so the group replaces it.
    async fn set_instance_unhealthy(&self, instance_id: &str) -> PlatformResult<()>;
}

/// One-shot read of cluster metadata.
#[async_trait]
pub trait ClusterIntrospector: Send + Sync {
    async fn introspect(&self, cluster: &str) -> PlatformResult<ClusterFacts>;
}
