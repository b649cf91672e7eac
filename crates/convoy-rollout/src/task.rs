//! Run-once tasks.

use convoy_core::{DeployError, DeployResult, TaskDefinition, TaskRun, TaskStatus};
use convoy_platform::ContainerPlatformClient;
use convoy_waiter::Waiter;
use tracing::{info, warn};

/// Run `definition` once on `cluster` and wait for it to stop.
///
/// A task that outlives the budget is stopped (best effort) before the
/// timeout propagates.
pub async fn run_to_completion(
    platform: &dyn ContainerPlatformClient,
    waiter: &Waiter,
    cluster: &str,
    definition: &TaskDefinition,
) -> DeployResult<TaskRun> {
    let run = platform.run_task(cluster, &definition.reference).await?;
    info!(task = %run.id, revision = %definition.reference, "task started");

    let what = format!("task {}", run.id);
    let task_id = run.id.as_str();
    let stopped = waiter
        .until(
            &what,
            move || async move {
                platform
                    .describe_task(cluster, task_id)
                    .await
                    .map_err(DeployError::from)
            },
            |task: &TaskRun| task.last_status == TaskStatus::Stopped,
            |_| false,
        )
        .await;

    match stopped {
        Ok(task) => {
            verify_essential(definition, &task)?;
            info!(task = %task.id, "task completed");
            Ok(task)
        }
        Err(err) => {
            if err.is_timeout()
                && let Err(stop_err) = platform
                    .stop_task(cluster, task_id, "release timed out")
                    .await
            {
                warn!(task = task_id, error = %stop_err, "failed to stop timed-out task");
            }
            Err(err)
        }
    }
}

/// Every essential container must report exit code zero.
///
/// Inessential containers are ignored; an essential container with no
/// exit code (never started, or missing from the report) is a failure.
pub fn verify_essential(definition: &TaskDefinition, task: &TaskRun) -> DeployResult<()> {
    let failures: Vec<String> = definition
        .essential_containers()
        .filter_map(|spec| {
            let outcome = task.containers.iter().find(|c| c.name == spec.name);
            match outcome.and_then(|c| c.exit_code) {
                Some(0) => None,
                Some(code) => Some(format!("{} exited with {code}", spec.name)),
                None => {
                    let reason = outcome
                        .and_then(|c| c.reason.as_deref())
                        .unwrap_or("no exit code");
                    Some(format!("{} missing ({reason})", spec.name))
                }
            }
        })
        .collect();

    if failures.is_empty() {
        return Ok(());
    }
    Err(DeployError::Unrecoverable(format!(
        "task {} failed: {}",
        task.id,
        failures.join(", ")
    )))
}
