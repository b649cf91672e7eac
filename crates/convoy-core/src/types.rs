//! Domain types exchanged with the container platform.
//!
//! Remote objects (services, stacks, clusters) are externally owned and
//! addressed by name; these types are snapshots returned by a describe
//! call, never shared mutable state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Attribute key used to gate task placement on container instances.
pub const STATE_ATTRIBUTE: &str = "state";

/// CloudFormation-style type of the autoscaling group inside an instance stack.
pub const AUTOSCALING_GROUP_TYPE: &str = "AWS::AutoScaling::AutoScalingGroup";

/// Event text the platform emits once a service has converged.
pub const STEADY_STATE_MARKER: &str = "has reached a steady state";

// ── Task definitions ───────────────────────────────────────────────

/// Reference to one immutable task-definition revision (`family:revision`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskDefinitionRef {
    pub family: String,
    pub revision: u32,
}

impl TaskDefinitionRef {
    pub fn new(family: impl Into<String>, revision: u32) -> Self {
        Self {
            family: family.into(),
            revision,
        }
    }
}

impl fmt::Display for TaskDefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.revision)
    }
}

impl FromStr for TaskDefinitionRef {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (family, revision) = s
            .rsplit_once(':')
            .ok_or_else(|| PlatformError::Api(format!("malformed task definition ref: {s}")))?;
        let revision = revision
            .parse::<u32>()
            .map_err(|_| PlatformError::Api(format!("malformed revision in {s}")))?;
        Ok(Self::new(family, revision))
    }
}

/// Network mode of a task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Bridge,
    Awsvpc,
    Host,
}

/// Port exposed by a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    /// `None` lets the platform pick a dynamic host port.
    pub host_port: Option<u16>,
}

/// One container inside a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// A failing essential container fails the whole task.
    pub essential: bool,
    pub cpu: Option<u32>,
    pub memory: Option<u32>,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub port_mappings: Vec<PortMapping>,
}

/// Placement rule attached to a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    /// Only `memberOf` is used by Convoy.
    pub kind: String,
    pub expression: String,
}

impl PlacementConstraint {
    /// Keep tasks off instances that are being retired.
    pub fn avoid_pre_drain() -> Self {
        Self {
            kind: "memberOf".to_string(),
            expression: format!("attribute:{STATE_ATTRIBUTE} != {}", PlacementState::PreDrain),
        }
    }
}

/// Input to task-definition registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitionRequest {
    pub family: String,
    pub containers: Vec<ContainerSpec>,
    pub cpu: u32,
    pub memory: u32,
    pub network_mode: NetworkMode,
    pub task_role: Option<String>,
    pub placement_constraints: Vec<PlacementConstraint>,
}

/// Registration status of a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RevisionStatus {
    Active,
    Inactive,
}

/// A registered, immutable task-definition revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub reference: TaskDefinitionRef,
    pub containers: Vec<ContainerSpec>,
    pub cpu: u32,
    pub memory: u32,
    pub network_mode: NetworkMode,
    pub task_role: Option<String>,
    pub placement_constraints: Vec<PlacementConstraint>,
    pub status: RevisionStatus,
}

impl TaskDefinition {
    /// Materialize a registration request as the given revision.
    pub fn from_request(request: &TaskDefinitionRequest, revision: u32) -> Self {
        Self {
            reference: TaskDefinitionRef::new(&request.family, revision),
            containers: request.containers.clone(),
            cpu: request.cpu,
            memory: request.memory,
            network_mode: request.network_mode,
            task_role: request.task_role.clone(),
            placement_constraints: request.placement_constraints.clone(),
            status: RevisionStatus::Active,
        }
    }

    pub fn essential_containers(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.containers.iter().filter(|c| c.essential)
    }
}

// ── Services ───────────────────────────────────────────────────────

/// Lifecycle status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Active,
    Draining,
    Inactive,
}

/// Rolling-deployment bounds for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfiguration {
    pub min_healthy_percent: u32,
    pub max_percent: u32,
}

impl Default for DeploymentConfiguration {
    fn default() -> Self {
        Self {
            min_healthy_percent: 50,
            max_percent: 200,
        }
    }
}

/// Load-balancer attachment produced by the load-balancer provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRef {
    pub target_group: String,
    pub container_name: String,
    pub container_port: u16,
}

/// Subnets and security groups for `awsvpc` tasks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
}

/// One entry of a service's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub id: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    pub message: String,
}

/// Create/update input for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    pub cluster: String,
    pub task_definition: TaskDefinitionRef,
    pub desired_count: u32,
    pub deployment: DeploymentConfiguration,
    pub load_balancer: Option<LoadBalancerRef>,
    pub network: Option<NetworkConfiguration>,
}

/// Snapshot of a service as described by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub cluster: String,
    pub status: ServiceStatus,
    pub task_definition: TaskDefinitionRef,
    pub desired_count: u32,
    pub running_count: u32,
    pub pending_count: u32,
    pub deployment: DeploymentConfiguration,
    pub load_balancer: Option<LoadBalancerRef>,
    pub network: Option<NetworkConfiguration>,
    /// Newest first.
    pub events: Vec<ServiceEvent>,
}

impl Service {
    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }

    pub fn latest_event(&self) -> Option<&ServiceEvent> {
        self.events.first()
    }

    /// Desired equals running and the newest event reports steady state.
    pub fn is_steady(&self) -> bool {
        self.desired_count == self.running_count
            && self
                .latest_event()
                .is_some_and(|e| e.message.contains(STEADY_STATE_MARKER))
    }
}

// ── Tasks ──────────────────────────────────────────────────────────

/// Last reported status of a one-off task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Running,
    Stopped,
}

/// Exit state of one container in a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOutcome {
    pub name: String,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

/// Snapshot of a one-off task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub cluster: String,
    pub task_definition: TaskDefinitionRef,
    pub last_status: TaskStatus,
    pub containers: Vec<ContainerOutcome>,
    pub stopped_reason: Option<String>,
}

// ── Container instances ────────────────────────────────────────────

/// Platform-level status of a container instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Active,
    Draining,
}

/// Value of the `state` placement attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementState {
    Active,
    PreDrain,
}

impl fmt::Display for PlacementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementState::Active => f.write_str("active"),
            PlacementState::PreDrain => f.write_str("pre-drain"),
        }
    }
}

/// A compute instance registered with the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInstance {
    /// Platform id of the registration.
    pub id: String,
    /// Underlying compute instance id (what the scaling group knows).
    pub instance_id: String,
    pub status: InstanceStatus,
    pub agent_connected: bool,
    pub running_tasks: u32,
    pub pending_tasks: u32,
    pub attributes: BTreeMap<String, String>,
}

impl ContainerInstance {
    pub fn placement_state(&self) -> Option<PlacementState> {
        match self.attributes.get(STATE_ATTRIBUTE).map(String::as_str) {
            Some("active") => Some(PlacementState::Active),
            Some("pre-drain") => Some(PlacementState::PreDrain),
            _ => None,
        }
    }

    /// No running or pending tasks remain.
    pub fn is_idle(&self) -> bool {
        self.running_tasks == 0 && self.pending_tasks == 0
    }
}

// ── Clusters ───────────────────────────────────────────────────────

/// Network, security, and metadata facts about a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterFacts {
    pub cluster: String,
    pub vpc_id: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub instance_role: String,
    pub encryption_key: Option<String>,
    pub db_subnet_group: Option<String>,
}

/// Snapshot of a cluster and the stacks behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub cluster: String,
    pub shared_stack: Option<String>,
    /// Ascending by sequence; more than one only mid-replacement.
    pub instance_stacks: Vec<InstanceStackName>,
    pub instances: Vec<ContainerInstance>,
}

/// Name of an instance stack: `{cluster}-instances-{NNN}`.
///
/// The sequence suffix increases monotonically so "current" and "next"
/// are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceStackName {
    pub cluster: String,
    pub sequence: u32,
}

impl InstanceStackName {
    const INFIX: &'static str = "-instances-";

    pub fn first(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            sequence: 1,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            cluster: self.cluster.clone(),
            sequence: self.sequence + 1,
        }
    }

    /// Prefix shared by every instance stack of a cluster.
    pub fn prefix(cluster: &str) -> String {
        format!("{cluster}{}", Self::INFIX)
    }

    /// Parse a stack name, returning `None` for names of other clusters
    /// or other stack kinds.
    pub fn parse(cluster: &str, name: &str) -> Option<Self> {
        let suffix = name.strip_prefix(&Self::prefix(cluster))?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let sequence = suffix.parse().ok()?;
        Some(Self {
            cluster: cluster.to_string(),
            sequence,
        })
    }
}

impl fmt::Display for InstanceStackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:03}", self.cluster, Self::INFIX, self.sequence)
    }
}

/// Name of the shared-infrastructure stack of a cluster.
pub fn shared_stack_name(cluster: &str) -> String {
    format!("{cluster}-shared")
}

// ── Stacks ─────────────────────────────────────────────────────────

/// A template push: name, body, parameters, tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    pub name: String,
    pub template: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

/// Raw stack status string (`CREATE_COMPLETE`, `UPDATE_ROLLBACK_FAILED`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackStatus(pub String);

impl StackStatus {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Any failure or rollback, including a completed rollback.
    pub fn is_failed(&self) -> bool {
        self.0.contains("FAILED") || self.0.contains("ROLLBACK")
    }

    pub fn is_complete(&self) -> bool {
        self.0.ends_with("_COMPLETE")
    }

    /// Whether the stack still backs live resources.
    ///
    /// An update that rolled back (`UPDATE_ROLLBACK_COMPLETE`) left the
    /// previous resources in place; a create that rolled back, a failed
    /// operation, or a deletion did not.
    pub fn is_usable(&self) -> bool {
        let s = self.0.as_str();
        !(s.starts_with("ROLLBACK_") || s.starts_with("DELETE_") || s.contains("FAILED"))
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A physical resource created by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResource {
    pub logical_id: String,
    pub resource_type: String,
    pub physical_id: String,
}

/// Snapshot of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    pub name: String,
    pub status: StackStatus,
    pub template: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub resources: Vec<StackResource>,
}

impl StackDescription {
    /// Physical id of the first resource of the given type.
    pub fn resource_of_type(&self, resource_type: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type)
            .map(|r| r.physical_id.as_str())
    }
}

// ── Scaling groups ─────────────────────────────────────────────────

/// Lifecycle state of an instance inside a scaling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
}

/// Health as recorded by the scaling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceHealth {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingInstance {
    pub instance_id: String,
    pub lifecycle_state: LifecycleState,
    pub health: InstanceHealth,
}

/// Snapshot of an autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingGroup {
    pub name: String,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub instances: Vec<ScalingInstance>,
    pub suspended_processes: Vec<String>,
}

impl ScalingGroup {
    pub fn in_service_ids(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter(|i| {
                i.lifecycle_state == LifecycleState::InService
                    && i.health == InstanceHealth::Healthy
            })
            .map(|i| i.instance_id.clone())
            .collect()
    }

    pub fn has_capacity(&self) -> bool {
        self.in_service_ids().len() as u32 >= self.desired_capacity
    }

    pub fn is_scaling_paused(&self) -> bool {
        !self.suspended_processes.is_empty()
    }
}

// ── Deployment outcome ─────────────────────────────────────────────

/// Result of one deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub revision: TaskDefinitionRef,
    /// Revision bound to the service before this attempt (rollback target).
    pub prior: Option<TaskDefinitionRef>,
    pub stabilized: bool,
    pub rolled_back: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_definition_ref_parses_and_displays() {
        let r: TaskDefinitionRef = "billing-web:12".parse().unwrap();
        assert_eq!(r, TaskDefinitionRef::new("billing-web", 12));
        assert_eq!(r.to_string(), "billing-web:12");
        assert!("billing".parse::<TaskDefinitionRef>().is_err());
        assert!("billing:x".parse::<TaskDefinitionRef>().is_err());
    }

    #[test]
    fn stack_status_classification() {
        assert!(StackStatus::new("CREATE_COMPLETE").is_complete());
        assert!(!StackStatus::new("CREATE_COMPLETE").is_failed());
        assert!(StackStatus::new("UPDATE_ROLLBACK_COMPLETE").is_failed());
        assert!(StackStatus::new("CREATE_FAILED").is_failed());
        assert!(!StackStatus::new("UPDATE_IN_PROGRESS").is_complete());
    }

    #[test]
    fn rolled_back_update_is_still_usable() {
        assert!(StackStatus::new("CREATE_COMPLETE").is_usable());
        assert!(StackStatus::new("UPDATE_ROLLBACK_COMPLETE").is_usable());
        assert!(StackStatus::new("UPDATE_IN_PROGRESS").is_usable());
        assert!(!StackStatus::new("ROLLBACK_COMPLETE").is_usable());
        assert!(!StackStatus::new("UPDATE_ROLLBACK_FAILED").is_usable());
        assert!(!StackStatus::new("DELETE_IN_PROGRESS").is_usable());
    }

    #[test]
    fn instance_stack_names_are_ordered() {
        let first = InstanceStackName::first("prod");
        assert_eq!(first.to_string(), "prod-instances-001");
        let next = first.next();
        assert_eq!(next.to_string(), "prod-instances-002");
        assert!(next > first);

        assert_eq!(
            InstanceStackName::parse("prod", "prod-instances-014"),
            Some(InstanceStackName {
                cluster: "prod".into(),
                sequence: 14
            })
        );
        assert_eq!(InstanceStackName::parse("prod", "prod-shared"), None);
        assert_eq!(InstanceStackName::parse("prod", "prod-instances-"), None);
        assert_eq!(InstanceStackName::parse("prod", "staging-instances-001"), None);
    }

    #[test]
    fn service_steady_requires_count_and_event() {
        let mut svc = Service {
            name: "api".into(),
            cluster: "prod".into(),
            status: ServiceStatus::Active,
            task_definition: TaskDefinitionRef::new("api", 1),
            desired_count: 2,
            running_count: 2,
            pending_count: 0,
            deployment: DeploymentConfiguration::default(),
            load_balancer: None,
            network: None,
            events: vec![ServiceEvent {
                id: "e1".into(),
                created_at: 10,
                message: "(service api) has started 2 tasks".into(),
            }],
        };
        assert!(!svc.is_steady());

        svc.events.insert(
            0,
            ServiceEvent {
                id: "e2".into(),
                created_at: 20,
                message: "(service api) has reached a steady state.".into(),
            },
        );
        assert!(svc.is_steady());

        svc.running_count = 1;
        assert!(!svc.is_steady());
    }

    #[test]
    fn placement_state_reads_attribute() {
        let mut inst = ContainerInstance {
            id: "ci-1".into(),
            instance_id: "i-1".into(),
            status: InstanceStatus::Active,
            agent_connected: true,
            running_tasks: 0,
            pending_tasks: 0,
            attributes: BTreeMap::new(),
        };
        assert_eq!(inst.placement_state(), None);
        inst.attributes
            .insert(STATE_ATTRIBUTE.into(), PlacementState::PreDrain.to_string());
        assert_eq!(inst.placement_state(), Some(PlacementState::PreDrain));
        assert!(inst.is_idle());
    }

    #[test]
    fn scaling_group_capacity_counts_healthy_in_service() {
        let group = ScalingGroup {
            name: "asg".into(),
            desired_capacity: 2,
            min_size: 0,
            max_size: 4,
            instances: vec![
                ScalingInstance {
                    instance_id: "i-1".into(),
                    lifecycle_state: LifecycleState::InService,
                    health: InstanceHealth::Healthy,
                },
                ScalingInstance {
                    instance_id: "i-2".into(),
                    lifecycle_state: LifecycleState::Pending,
                    health: InstanceHealth::Healthy,
                },
            ],
            suspended_processes: vec![],
        };
        assert_eq!(group.in_service_ids(), vec!["i-1".to_string()]);
        assert!(!group.has_capacity());
    }
}
