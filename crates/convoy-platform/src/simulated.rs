//! SimulatedCloud — an in-memory container platform.
//!
//! Implements every collaborator trait against one shared world. Remote
//! progress is modelled as ticks: each describe/list call advances the
//! object it reads by one step (stack in progress → complete, service
//! announced → converged, task pending → running → stopped, instance
//! pending → in service → registered). Behaviour is scriptable so tests
//! and rehearsals can exercise failure paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use convoy_core::*;

use crate::clients::{
    ClusterIntrospector, ContainerPlatformClient, ScalingGroupClient, StackDeployer,
};

/// Running tasks placed on each seeded instance.
const SEEDED_TASKS_PER_INSTANCE: u32 = 2;

/// A mutation observed by the simulated cloud, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudEvent {
    ClusterCreated(String),
    StackPushed(String),
    StackDeleted(String),
    InstanceLaunched(String),
    InstanceRegistered(String),
    InstanceStatusSet { instance_id: String, status: InstanceStatus },
    AttributeSet { instance_id: String, key: String, value: String },
    InstanceMarkedUnhealthy(String),
    ScalingSuspended(String),
    ScalingResumed(String),
    TaskDefinitionRegistered(TaskDefinitionRef),
    TaskDefinitionDeregistered(TaskDefinitionRef),
    ServiceCreated { cluster: String, name: String, task_definition: TaskDefinitionRef },
    ServiceUpdated { cluster: String, name: String, task_definition: TaskDefinitionRef },
    DesiredCountSet { cluster: String, name: String, count: u32 },
    ServiceDeleted { cluster: String, name: String },
    TaskStarted(String),
}

/// Progress of a service towards its desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Convergence {
    Announce,
    Converge,
    Settled,
}

struct ServiceRecord {
    service: Service,
    convergence: Convergence,
}

struct TaskRecord {
    run: TaskRun,
}

struct StackRecord {
    description: StackDescription,
    /// Status reported from the next describe onwards.
    next_status: Option<StackStatus>,
}

struct GroupRecord {
    group: ScalingGroup,
    cluster: String,
}

#[derive(Default)]
struct ClusterRecord {
    tags: BTreeMap<String, String>,
    /// container-instance id → instance
    instances: BTreeMap<String, ContainerInstance>,
}

#[derive(Default)]
struct Behaviour {
    unstable: BTreeSet<TaskDefinitionRef>,
    silent: BTreeSet<TaskDefinitionRef>,
    exit_codes: BTreeMap<String, Option<i32>>,
    failing_stacks: BTreeSet<String>,
    unregistered_launches: u32,
    never_register: BTreeSet<String>,
    stuck_draining: BTreeSet<String>,
    fail_once: BTreeSet<String>,
    facts: BTreeMap<String, ClusterFacts>,
}

#[derive(Default)]
struct World {
    clusters: BTreeMap<String, ClusterRecord>,
    task_definitions: BTreeMap<String, Vec<TaskDefinition>>,
    services: BTreeMap<(String, String), ServiceRecord>,
    tasks: BTreeMap<String, TaskRecord>,
    stacks: BTreeMap<String, StackRecord>,
    groups: BTreeMap<String, GroupRecord>,
    behaviour: Behaviour,
    journal: Vec<CloudEvent>,
    next_id: u64,
}

impl World {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Consume an injected one-shot failure for `op`.
    fn check(&mut self, op: &str) -> PlatformResult<()> {
        if self.behaviour.fail_once.remove(op) {
            debug!(op, "simulated cloud injecting failure");
            return Err(PlatformError::Api(format!("injected failure in {op}")));
        }
        Ok(())
    }

    fn cluster_mut(&mut self, cluster: &str) -> PlatformResult<&mut ClusterRecord> {
        self.clusters
            .get_mut(cluster)
            .ok_or_else(|| PlatformError::NotFound(format!("cluster {cluster}")))
    }

    fn push_event(&mut self, cluster: &str, name: &str, message: String) {
        let id = format!("ev-{}", self.next_id());
        if let Some(record) = self.services.get_mut(&(cluster.to_string(), name.to_string())) {
            record.service.events.insert(
                0,
                ServiceEvent {
                    id,
                    created_at: epoch_secs(),
                    message,
                },
            );
        }
    }

    fn launch_instance(&mut self, group: &str) -> Option<String> {
        let id = format!("i-{:04}", self.next_id());
        let record = self.groups.get_mut(group)?;
        record.group.instances.push(ScalingInstance {
            instance_id: id.clone(),
            lifecycle_state: LifecycleState::Pending,
            health: InstanceHealth::Healthy,
        });
        if self.behaviour.unregistered_launches > 0 {
            self.behaviour.unregistered_launches -= 1;
            self.behaviour.never_register.insert(id.clone());
        }
        self.journal.push(CloudEvent::InstanceLaunched(id.clone()));
        Some(id)
    }

    fn register_instance(&mut self, cluster: &str, instance_id: &str, running_tasks: u32) -> String {
        let id = format!("ci-{}", self.next_id());
        let instance = ContainerInstance {
            id: id.clone(),
            instance_id: instance_id.to_string(),
            status: InstanceStatus::Active,
            agent_connected: true,
            running_tasks,
            pending_tasks: 0,
            attributes: BTreeMap::new(),
        };
        self.clusters
            .entry(cluster.to_string())
            .or_default()
            .instances
            .insert(id.clone(), instance);
        self.journal
            .push(CloudEvent::InstanceRegistered(instance_id.to_string()));
        id
    }

    fn deregister_instance(&mut self, instance_id: &str) {
        for record in self.clusters.values_mut() {
            record.instances.retain(|_, ci| ci.instance_id != instance_id);
        }
    }

    /// Create the autoscaling group behind an instance stack.
    fn provision_group(&mut self, stack: &str, cluster: &str, capacity: u32) -> String {
        let name = format!("{stack}-asg");
        self.groups.insert(
            name.clone(),
            GroupRecord {
                group: ScalingGroup {
                    name: name.clone(),
                    desired_capacity: capacity,
                    min_size: 0,
                    max_size: capacity * 2,
                    instances: Vec::new(),
                    suspended_processes: Vec::new(),
                },
                cluster: cluster.to_string(),
            },
        );
        for _ in 0..capacity {
            self.launch_instance(&name);
        }
        name
    }

    fn teardown_group(&mut self, name: &str) {
        if let Some(record) = self.groups.remove(name) {
            for inst in &record.group.instances {
                self.deregister_instance(&inst.instance_id);
            }
        }
    }

    fn tick_service(&mut self, cluster: &str, name: &str) {
        let key = (cluster.to_string(), name.to_string());
        let Some(record) = self.services.get(&key) else {
            return;
        };
        let revision = record.service.task_definition.clone();
        let desired = record.service.desired_count;
        let convergence = record.convergence;
        match convergence {
            Convergence::Settled => {}
            Convergence::Announce if desired == 0 => {
                if let Some(record) = self.services.get_mut(&key) {
                    record.service.running_count = 0;
                    record.service.pending_count = 0;
                    record.convergence = Convergence::Settled;
                }
                self.push_event(cluster, name, format!("(service {name}) {STEADY_STATE_MARKER}."));
            }
            Convergence::Announce => {
                if self.behaviour.silent.contains(&revision) {
                    return;
                }
                if let Some(record) = self.services.get_mut(&key) {
                    record.service.pending_count = desired;
                    record.convergence = Convergence::Converge;
                }
                self.push_event(
                    cluster,
                    name,
                    format!("(service {name}) has started {desired} tasks: ({revision})."),
                );
            }
            Convergence::Converge => {
                if self.behaviour.unstable.contains(&revision) {
                    if let Some(record) = self.services.get_mut(&key) {
                        record.service.running_count = desired.saturating_sub(1);
                    }
                    self.push_event(
                        cluster,
                        name,
                        format!("(service {name}) is unable to consistently start tasks successfully."),
                    );
                    return;
                }
                if let Some(record) = self.services.get_mut(&key) {
                    record.service.running_count = desired;
                    record.service.pending_count = 0;
                    record.convergence = Convergence::Settled;
                }
                self.push_event(cluster, name, format!("(service {name}) {STEADY_STATE_MARKER}."));
            }
        }
    }

    fn tick_cluster(&mut self, cluster: &str) {
        let in_service: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.cluster == cluster)
            .flat_map(|g| g.group.in_service_ids())
            .collect();
        let registered: BTreeSet<String> = self
            .clusters
            .get(cluster)
            .map(|c| c.instances.values().map(|i| i.instance_id.clone()).collect())
            .unwrap_or_default();
        for instance_id in in_service {
            if !registered.contains(&instance_id)
                && !self.behaviour.never_register.contains(&instance_id)
            {
                self.register_instance(cluster, &instance_id, 0);
            }
        }

        let stuck = self.behaviour.stuck_draining.clone();
        if let Some(record) = self.clusters.get_mut(cluster) {
            for ci in record.instances.values_mut() {
                if ci.status == InstanceStatus::Draining && !stuck.contains(&ci.instance_id) {
                    ci.running_tasks = 0;
                    ci.pending_tasks = 0;
                }
            }
        }
    }

    fn service_from_request(request: &ServiceRequest) -> Service {
        Service {
            name: request.name.clone(),
            cluster: request.cluster.clone(),
            status: ServiceStatus::Active,
            task_definition: request.task_definition.clone(),
            desired_count: request.desired_count,
            running_count: 0,
            pending_count: 0,
            deployment: request.deployment,
            load_balancer: request.load_balancer.clone(),
            network: request.network.clone(),
            events: Vec::new(),
        }
    }

    fn task_definition(&self, reference: &TaskDefinitionRef) -> PlatformResult<&TaskDefinition> {
        self.task_definitions
            .get(&reference.family)
            .and_then(|revs| revs.iter().find(|td| td.reference == *reference))
            .ok_or_else(|| PlatformError::NotFound(format!("task definition {reference}")))
    }
}

/// In-memory implementation of every platform collaborator.
#[derive(Clone, Default)]
pub struct SimulatedCloud {
    world: Arc<Mutex<World>>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ──────────────────────────────────────────────────

    /// Services running this revision never reach steady state.
    pub fn never_stabilize(&self, revision: TaskDefinitionRef) {
        self.world().behaviour.unstable.insert(revision);
    }

    /// Services moved to this revision emit no events at all.
    pub fn never_acknowledge(&self, revision: TaskDefinitionRef) {
        self.world().behaviour.silent.insert(revision);
    }

    /// Exit code reported for a container when a task stops. `None`
    /// models a container that never reported one.
    pub fn set_exit_code(&self, container: &str, code: Option<i32>) {
        self.world()
            .behaviour
            .exit_codes
            .insert(container.to_string(), code);
    }

    /// Pushes of this stack end in rollback.
    pub fn fail_stack(&self, name: &str) {
        self.world().behaviour.failing_stacks.insert(name.to_string());
    }

    /// The next `count` launched instances never register with a cluster.
    pub fn withhold_registration(&self, count: u32) {
        self.world().behaviour.unregistered_launches += count;
    }

    /// Tasks on this instance never finish draining.
    pub fn stall_draining(&self, instance_id: &str) {
        self.world()
            .behaviour
            .stuck_draining
            .insert(instance_id.to_string());
    }

    /// The next call of `op` fails with an API error.
    pub fn fail_once(&self, op: &str) {
        self.world().behaviour.fail_once.insert(op.to_string());
    }

    pub fn set_facts(&self, facts: ClusterFacts) {
        self.world()
            .behaviour
            .facts
            .insert(facts.cluster.clone(), facts);
    }

    // ── Seeding ────────────────────────────────────────────────────

    /// Stand up a cluster as a previous successful release would have left it.
    pub fn seed_cluster(
        &self,
        cluster: &str,
        shared_template: &str,
        instance_template: &str,
        parameters: BTreeMap<String, String>,
        instances: u32,
    ) {
        let mut world = self.world();
        world.clusters.entry(cluster.to_string()).or_default();

        let shared = shared_stack_name(cluster);
        world.stacks.insert(
            shared.clone(),
            StackRecord {
                description: StackDescription {
                    name: shared,
                    status: StackStatus::new("CREATE_COMPLETE"),
                    template: shared_template.to_string(),
                    parameters: BTreeMap::new(),
                    tags: BTreeMap::new(),
                    resources: Vec::new(),
                },
                next_status: None,
            },
        );

        let stack = InstanceStackName::first(cluster).to_string();
        let group = world.provision_group(&stack, cluster, instances);
        let launched: Vec<String> = world
            .groups
            .get_mut(&group)
            .map(|g| {
                for inst in &mut g.group.instances {
                    inst.lifecycle_state = LifecycleState::InService;
                }
                g.group.instances.iter().map(|i| i.instance_id.clone()).collect()
            })
            .unwrap_or_default();
        for instance_id in launched {
            let id = world.register_instance(cluster, &instance_id, SEEDED_TASKS_PER_INSTANCE);
            if let Some(ci) = world
                .clusters
                .get_mut(cluster)
                .and_then(|c| c.instances.get_mut(&id))
            {
                ci.attributes
                    .insert(STATE_ATTRIBUTE.to_string(), PlacementState::Active.to_string());
            }
        }

        let mut stack_params = parameters;
        stack_params.insert("ClusterName".to_string(), cluster.to_string());
        stack_params.insert("DesiredCapacity".to_string(), instances.to_string());
        world.stacks.insert(
            stack.clone(),
            StackRecord {
                description: StackDescription {
                    name: stack,
                    status: StackStatus::new("CREATE_COMPLETE"),
                    template: instance_template.to_string(),
                    parameters: stack_params,
                    tags: BTreeMap::new(),
                    resources: vec![StackResource {
                        logical_id: "AutoScalingGroup".to_string(),
                        resource_type: AUTOSCALING_GROUP_TYPE.to_string(),
                        physical_id: group,
                    }],
                },
                next_status: None,
            },
        );
        world.journal.clear();
    }

    /// Register a revision and bind a settled service to it.
    pub fn seed_service(
        &self,
        request: &TaskDefinitionRequest,
        cluster: &str,
        name: &str,
        desired_count: u32,
    ) -> TaskDefinitionRef {
        let mut world = self.world();
        world.clusters.entry(cluster.to_string()).or_default();
        let revisions = world
            .task_definitions
            .entry(request.family.clone())
            .or_default();
        let td = TaskDefinition::from_request(request, revisions.len() as u32 + 1);
        let reference = td.reference.clone();
        revisions.push(td);

        let mut service = World::service_from_request(&ServiceRequest {
            name: name.to_string(),
            cluster: cluster.to_string(),
            task_definition: reference.clone(),
            desired_count,
            deployment: DeploymentConfiguration::default(),
            load_balancer: None,
            network: None,
        });
        service.running_count = desired_count;
        world.services.insert(
            (cluster.to_string(), name.to_string()),
            ServiceRecord {
                service,
                convergence: Convergence::Settled,
            },
        );
        world.push_event(cluster, name, format!("(service {name}) {STEADY_STATE_MARKER}."));
        reference
    }

    // ── Inspection (no ticks) ──────────────────────────────────────

    pub fn service(&self, cluster: &str, name: &str) -> Option<Service> {
        self.world()
            .services
            .get(&(cluster.to_string(), name.to_string()))
            .map(|r| r.service.clone())
    }

    pub fn revisions(&self, family: &str) -> Vec<TaskDefinition> {
        self.world()
            .task_definitions
            .get(family)
            .cloned()
            .unwrap_or_default()
    }

    pub fn container_instances(&self, cluster: &str) -> Vec<ContainerInstance> {
        self.world()
            .clusters
            .get(cluster)
            .map(|c| c.instances.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stack(&self, name: &str) -> Option<StackDescription> {
        self.world()
            .stacks
            .get(name)
            .map(|s| s.description.clone())
    }

    pub fn stack_names(&self) -> Vec<String> {
        self.world().stacks.keys().cloned().collect()
    }

    pub fn group(&self, name: &str) -> Option<ScalingGroup> {
        self.world().groups.get(name).map(|g| g.group.clone())
    }

    pub fn cluster_tags(&self, cluster: &str) -> BTreeMap<String, String> {
        self.world()
            .clusters
            .get(cluster)
            .map(|c| c.tags.clone())
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<CloudEvent> {
        self.world().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.world().journal.clear();
    }
}

#[async_trait]
impl StackDeployer for SimulatedCloud {
    async fn push(&self, spec: &StackSpec) -> PlatformResult<String> {
        let mut world = self.world();
        world.check("push_stack")?;
        let failing = world.behaviour.failing_stacks.contains(&spec.name);

        let existing = world.stacks.contains_key(&spec.name);
        let (status, next) = match (existing, failing) {
            (false, false) => ("CREATE_IN_PROGRESS", "CREATE_COMPLETE"),
            (false, true) => ("CREATE_IN_PROGRESS", "ROLLBACK_COMPLETE"),
            (true, false) => ("UPDATE_IN_PROGRESS", "UPDATE_COMPLETE"),
            (true, true) => ("UPDATE_IN_PROGRESS", "UPDATE_ROLLBACK_COMPLETE"),
        };

        let mut resources = world
            .stacks
            .get(&spec.name)
            .map(|s| s.description.resources.clone())
            .unwrap_or_default();
        if !existing
            && !failing
            && let (Some(cluster), Some(capacity)) = (
                spec.parameters.get("ClusterName"),
                spec.parameters
                    .get("DesiredCapacity")
                    .and_then(|c| c.parse::<u32>().ok()),
            )
        {
            let group = world.provision_group(&spec.name, cluster, capacity);
            resources.push(StackResource {
                logical_id: "AutoScalingGroup".to_string(),
                resource_type: AUTOSCALING_GROUP_TYPE.to_string(),
                physical_id: group,
            });
        }

        world.stacks.insert(
            spec.name.clone(),
            StackRecord {
                description: StackDescription {
                    name: spec.name.clone(),
                    status: StackStatus::new(status),
                    template: spec.template.clone(),
                    parameters: spec.parameters.clone(),
                    tags: spec.tags.clone(),
                    resources,
                },
                next_status: Some(StackStatus::new(next)),
            },
        );
        world.journal.push(CloudEvent::StackPushed(spec.name.clone()));
        Ok(format!("stack/{}", spec.name))
    }

    async fn delete(&self, name: &str) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("delete_stack")?;
        let groups: Vec<String> = {
            let record = world
                .stacks
                .get_mut(name)
                .ok_or_else(|| PlatformError::NotFound(format!("stack {name}")))?;
            record.description.status = StackStatus::new("DELETE_IN_PROGRESS");
            record.next_status = Some(StackStatus::new("DELETE_COMPLETE"));
            record
                .description
                .resources
                .iter()
                .filter(|r| r.resource_type == AUTOSCALING_GROUP_TYPE)
                .map(|r| r.physical_id.clone())
                .collect()
        };
        for group in groups {
            world.teardown_group(&group);
        }
        world.journal.push(CloudEvent::StackDeleted(name.to_string()));
        Ok(())
    }

    async fn describe(&self, name: &str) -> PlatformResult<Option<StackDescription>> {
        let mut world = self.world();
        world.check("describe_stack")?;
        let Some(record) = world.stacks.get_mut(name) else {
            return Ok(None);
        };
        let snapshot = record.description.clone();
        if let Some(next) = record.next_status.take() {
            record.description.status = next;
        }
        if record.description.status.as_str() == "DELETE_COMPLETE" {
            world.stacks.remove(name);
        }
        Ok(Some(snapshot))
    }

    async fn list(&self, prefix: &str) -> PlatformResult<Vec<String>> {
        let world = self.world();
        Ok(world
            .stacks
            .iter()
            .filter(|(name, record)| {
                name.starts_with(prefix)
                    && !record.description.status.as_str().starts_with("DELETE")
            })
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[async_trait]
impl ContainerPlatformClient for SimulatedCloud {
    async fn cluster_exists(&self, cluster: &str) -> PlatformResult<bool> {
        Ok(self.world().clusters.contains_key(cluster))
    }

    async fn create_cluster(&self, cluster: &str) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("create_cluster")?;
        world.clusters.entry(cluster.to_string()).or_default();
        world
            .journal
            .push(CloudEvent::ClusterCreated(cluster.to_string()));
        Ok(())
    }

    async fn tag_cluster(
        &self,
        cluster: &str,
        tags: &BTreeMap<String, String>,
    ) -> PlatformResult<()> {
        let mut world = self.world();
        let record = world.cluster_mut(cluster)?;
        record
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn list_clusters(&self) -> PlatformResult<Vec<String>> {
        Ok(self.world().clusters.keys().cloned().collect())
    }

    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> PlatformResult<TaskDefinition> {
        let mut world = self.world();
        world.check("register_task_definition")?;
        let revisions = world
            .task_definitions
            .entry(request.family.clone())
            .or_default();
        let td = TaskDefinition::from_request(request, revisions.len() as u32 + 1);
        revisions.push(td.clone());
        world
            .journal
            .push(CloudEvent::TaskDefinitionRegistered(td.reference.clone()));
        Ok(td)
    }

    async fn describe_task_definition(
        &self,
        reference: &TaskDefinitionRef,
    ) -> PlatformResult<TaskDefinition> {
        self.world().task_definition(reference).cloned()
    }

    async fn list_task_definitions(
        &self,
        family: &str,
        status: RevisionStatus,
    ) -> PlatformResult<Vec<TaskDefinitionRef>> {
        Ok(self
            .world()
            .task_definitions
            .get(family)
            .map(|revs| {
                revs.iter()
                    .filter(|td| td.status == status)
                    .map(|td| td.reference.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn deregister_task_definition(
        &self,
        reference: &TaskDefinitionRef,
    ) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("deregister_task_definition")?;
        let td = world
            .task_definitions
            .get_mut(&reference.family)
            .and_then(|revs| revs.iter_mut().find(|td| td.reference == *reference))
            .ok_or_else(|| PlatformError::NotFound(format!("task definition {reference}")))?;
        td.status = RevisionStatus::Inactive;
        world
            .journal
            .push(CloudEvent::TaskDefinitionDeregistered(reference.clone()));
        Ok(())
    }

    async fn create_service(&self, request: &ServiceRequest) -> PlatformResult<Service> {
        let mut world = self.world();
        world.check("create_service")?;
        world.task_definition(&request.task_definition)?;
        let key = (request.cluster.clone(), request.name.clone());
        if world.services.contains_key(&key) {
            return Err(PlatformError::AlreadyExists(format!(
                "service {} on {}",
                request.name, request.cluster
            )));
        }
        world.clusters.entry(request.cluster.clone()).or_default();
        let service = World::service_from_request(request);
        world.services.insert(
            key,
            ServiceRecord {
                service: service.clone(),
                convergence: Convergence::Announce,
            },
        );
        world.journal.push(CloudEvent::ServiceCreated {
            cluster: request.cluster.clone(),
            name: request.name.clone(),
            task_definition: request.task_definition.clone(),
        });
        Ok(service)
    }

    async fn update_service(&self, request: &ServiceRequest) -> PlatformResult<Service> {
        let mut world = self.world();
        world.check("update_service")?;
        world.task_definition(&request.task_definition)?;
        let key = (request.cluster.clone(), request.name.clone());
        let record = world.services.get_mut(&key).ok_or_else(|| {
            PlatformError::NotFound(format!("service {} on {}", request.name, request.cluster))
        })?;
        record.service.task_definition = request.task_definition.clone();
        record.service.desired_count = request.desired_count;
        record.service.deployment = request.deployment;
        record.service.load_balancer = request.load_balancer.clone();
        record.service.network = request.network.clone();
        record.convergence = Convergence::Announce;
        let service = record.service.clone();
        world.journal.push(CloudEvent::ServiceUpdated {
            cluster: request.cluster.clone(),
            name: request.name.clone(),
            task_definition: request.task_definition.clone(),
        });
        Ok(service)
    }

    async fn set_desired_count(
        &self,
        cluster: &str,
        service: &str,
        count: u32,
    ) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("set_desired_count")?;
        let record = world
            .services
            .get_mut(&(cluster.to_string(), service.to_string()))
            .ok_or_else(|| PlatformError::NotFound(format!("service {service} on {cluster}")))?;
        record.service.desired_count = count;
        record.convergence = Convergence::Announce;
        world.journal.push(CloudEvent::DesiredCountSet {
            cluster: cluster.to_string(),
            name: service.to_string(),
            count,
        });
        Ok(())
    }

    async fn describe_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> PlatformResult<Option<Service>> {
        let mut world = self.world();
        world.check("describe_service")?;
        world.tick_service(cluster, service);
        Ok(world
            .services
            .get(&(cluster.to_string(), service.to_string()))
            .map(|r| r.service.clone()))
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("delete_service")?;
        world
            .services
            .remove(&(cluster.to_string(), service.to_string()))
            .ok_or_else(|| PlatformError::NotFound(format!("service {service} on {cluster}")))?;
        world.journal.push(CloudEvent::ServiceDeleted {
            cluster: cluster.to_string(),
            name: service.to_string(),
        });
        Ok(())
    }

    async fn run_task(
        &self,
        cluster: &str,
        task_definition: &TaskDefinitionRef,
    ) -> PlatformResult<TaskRun> {
        let mut world = self.world();
        world.check("run_task")?;
        world.task_definition(task_definition)?;
        let id = format!("task-{}", world.next_id());
        let run = TaskRun {
            id: id.clone(),
            cluster: cluster.to_string(),
            task_definition: task_definition.clone(),
            last_status: TaskStatus::Pending,
            containers: Vec::new(),
            stopped_reason: None,
        };
        world.tasks.insert(id.clone(), TaskRecord { run: run.clone() });
        world.journal.push(CloudEvent::TaskStarted(id));
        Ok(run)
    }

    async fn describe_task(&self, _cluster: &str, task_id: &str) -> PlatformResult<TaskRun> {
        let mut world = self.world();
        world.check("describe_task")?;
        let status = world
            .tasks
            .get(task_id)
            .map(|t| t.run.last_status)
            .ok_or_else(|| PlatformError::NotFound(format!("task {task_id}")))?;
        match status {
            TaskStatus::Provisioning | TaskStatus::Pending => {
                if let Some(task) = world.tasks.get_mut(task_id) {
                    task.run.last_status = TaskStatus::Running;
                }
            }
            TaskStatus::Running => {
                let reference = world
                    .tasks
                    .get(task_id)
                    .map(|t| t.run.task_definition.clone())
                    .ok_or_else(|| PlatformError::NotFound(format!("task {task_id}")))?;
                let containers: Vec<ContainerOutcome> = world
                    .task_definition(&reference)?
                    .containers
                    .iter()
                    .map(|c| {
                        let exit_code = world
                            .behaviour
                            .exit_codes
                            .get(&c.name)
                            .copied()
                            .unwrap_or(Some(0));
                        ContainerOutcome {
                            name: c.name.clone(),
                            exit_code,
                            reason: exit_code.is_none().then(|| "CannotPullContainerError".to_string()),
                        }
                    })
                    .collect();
                if let Some(task) = world.tasks.get_mut(task_id) {
                    task.run.last_status = TaskStatus::Stopped;
                    task.run.containers = containers;
                    task.run.stopped_reason = Some("Essential container in task exited".to_string());
                }
            }
            TaskStatus::Stopped => {}
        }
        world
            .tasks
            .get(task_id)
            .map(|t| t.run.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("task {task_id}")))
    }

    async fn stop_task(&self, _cluster: &str, task_id: &str, reason: &str) -> PlatformResult<()> {
        let mut world = self.world();
        let task = world
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| PlatformError::NotFound(format!("task {task_id}")))?;
        task.run.last_status = TaskStatus::Stopped;
        task.run.stopped_reason = Some(reason.to_string());
        Ok(())
    }

    async fn list_container_instances(
        &self,
        cluster: &str,
    ) -> PlatformResult<Vec<ContainerInstance>> {
        let mut world = self.world();
        world.check("list_container_instances")?;
        world.cluster_mut(cluster)?;
        world.tick_cluster(cluster);
        Ok(world
            .clusters
            .get(cluster)
            .map(|c| c.instances.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_instance_status(
        &self,
        cluster: &str,
        ids: &[String],
        status: InstanceStatus,
    ) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("set_instance_status")?;
        let record = world.cluster_mut(cluster)?;
        let mut changed = Vec::new();
        for id in ids {
            let ci = record
                .instances
                .get_mut(id)
                .ok_or_else(|| PlatformError::NotFound(format!("container instance {id}")))?;
            ci.status = status;
            changed.push(ci.instance_id.clone());
        }
        for instance_id in changed {
            world
                .journal
                .push(CloudEvent::InstanceStatusSet { instance_id, status });
        }
        Ok(())
    }

    async fn put_attribute(
        &self,
        cluster: &str,
        ids: &[String],
        key: &str,
        value: &str,
    ) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("put_attribute")?;
        let record = world.cluster_mut(cluster)?;
        let mut changed = Vec::new();
        for id in ids {
            let ci = record
                .instances
                .get_mut(id)
                .ok_or_else(|| PlatformError::NotFound(format!("container instance {id}")))?;
            ci.attributes.insert(key.to_string(), value.to_string());
            changed.push(ci.instance_id.clone());
        }
        for instance_id in changed {
            world.journal.push(CloudEvent::AttributeSet {
                instance_id,
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ScalingGroupClient for SimulatedCloud {
    async fn describe_group(&self, name: &str) -> PlatformResult<ScalingGroup> {
        let mut world = self.world();
        world.check("describe_group")?;
        let record = world
            .groups
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound(format!("scaling group {name}")))?;
        let snapshot = record.group.clone();
        for inst in &mut record.group.instances {
            if inst.lifecycle_state == LifecycleState::Pending {
                inst.lifecycle_state = LifecycleState::InService;
            }
        }
        Ok(snapshot)
    }

    async fn suspend_scaling(&self, name: &str) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("suspend_scaling")?;
        let record = world
            .groups
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound(format!("scaling group {name}")))?;
        record.group.suspended_processes = ["Launch", "Terminate", "HealthCheck", "ReplaceUnhealthy", "AZRebalance"]
            .iter()
            .map(|p| p.to_string())
            .collect();
        world
            .journal
            .push(CloudEvent::ScalingSuspended(name.to_string()));
        Ok(())
    }

    async fn resume_scaling(&self, name: &str) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("resume_scaling")?;
        let record = world
            .groups
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound(format!("scaling group {name}")))?;
        record.group.suspended_processes.clear();
        world
            .journal
            .push(CloudEvent::ScalingResumed(name.to_string()));
        Ok(())
    }

    async fn set_instance_unhealthy(&self, instance_id: &str) -> PlatformResult<()> {
        let mut world = self.world();
        world.check("set_instance_unhealthy")?;
        let group = world
            .groups
            .iter()
            .find(|(_, g)| g.group.instances.iter().any(|i| i.instance_id == instance_id))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("instance {instance_id}")))?;
        let suspended = world
            .groups
            .get_mut(&group)
            .map(|record| {
                record
                    .group
                    .instances
                    .retain(|i| i.instance_id != instance_id);
                record.group.is_scaling_paused()
            })
            .unwrap_or(true);
        world.deregister_instance(instance_id);
        world
            .journal
            .push(CloudEvent::InstanceMarkedUnhealthy(instance_id.to_string()));
        if !suspended {
            world.launch_instance(&group);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterIntrospector for SimulatedCloud {
    async fn introspect(&self, cluster: &str) -> PlatformResult<ClusterFacts> {
        let world = self.world();
        if let Some(facts) = world.behaviour.facts.get(cluster) {
            return Ok(facts.clone());
        }
        Ok(ClusterFacts {
            cluster: cluster.to_string(),
            vpc_id: format!("vpc-{cluster}"),
            subnets: vec![format!("subnet-{cluster}-a"), format!("subnet-{cluster}-b")],
            security_groups: vec![format!("sg-{cluster}")],
            instance_role: format!("arn:aws:iam::000000000000:role/{cluster}-instance"),
            encryption_key: None,
            db_subnet_group: None,
        })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
