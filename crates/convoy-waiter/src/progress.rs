//! Status summaries for poll logging.

use convoy_core::{ContainerInstance, ScalingGroup, Service, StackDescription, TaskRun};

/// A probed value that can describe itself in one log line.
pub trait Progress {
    fn progress(&self) -> String;
}

impl Progress for StackDescription {
    fn progress(&self) -> String {
        format!("{} {}", self.name, self.status)
    }
}

impl Progress for Option<StackDescription> {
    fn progress(&self) -> String {
        match self {
            Some(stack) => stack.progress(),
            None => "gone".to_string(),
        }
    }
}

impl Progress for ScalingGroup {
    fn progress(&self) -> String {
        format!(
            "{}: {}/{} in service",
            self.name,
            self.in_service_ids().len(),
            self.desired_capacity
        )
    }
}

impl Progress for Service {
    fn progress(&self) -> String {
        let event = self
            .latest_event()
            .map(|e| e.message.as_str())
            .unwrap_or("no events");
        format!(
            "{} running={} desired={} pending={}: {event}",
            self.task_definition, self.running_count, self.desired_count, self.pending_count
        )
    }
}

impl Progress for TaskRun {
    fn progress(&self) -> String {
        format!("{} {:?}", self.id, self.last_status)
    }
}

impl Progress for Vec<ContainerInstance> {
    fn progress(&self) -> String {
        let busy = self.iter().filter(|i| !i.is_idle()).count();
        format!("{} instances, {busy} with tasks", self.len())
    }
}
