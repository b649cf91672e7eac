//! Stack convergence probes.

use convoy_core::{DeployError, DeployResult, StackDescription};
use convoy_platform::StackDeployer;

use crate::waiter::Waiter;

/// Wait for a pushed stack to reach a `*_COMPLETE` status.
///
/// Any status mentioning `FAILED` or `ROLLBACK` is a failure, so a
/// completed rollback aborts the wait.
pub async fn wait_for_stack(
    waiter: &Waiter,
    deployer: &dyn StackDeployer,
    name: &str,
) -> DeployResult<StackDescription> {
    let what = format!("stack {name}");
    let stack = waiter
        .until(
            &what,
            move || async move { deployer.describe(name).await.map_err(DeployError::from) },
            |stack: &Option<StackDescription>| {
                stack.as_ref().is_some_and(|s| s.status.is_complete())
            },
            |stack| match stack {
                Some(s) => s.status.is_failed(),
                // A stack vanishing mid-push is as bad as a rollback.
                None => true,
            },
        )
        .await?;
    // The terminal predicate only accepts `Some`.
    stack.ok_or_else(|| DeployError::unrecoverable(format!("{what} disappeared")))
}

/// Wait for a deleted stack to disappear.
pub async fn wait_for_stack_deletion(
    waiter: &Waiter,
    deployer: &dyn StackDeployer,
    name: &str,
) -> DeployResult<()> {
    let what = format!("deletion of stack {name}");
    waiter
        .until(
            &what,
            move || async move { deployer.describe(name).await.map_err(DeployError::from) },
            |stack: &Option<StackDescription>| match stack {
                None => true,
                Some(s) => s.status.as_str() == "DELETE_COMPLETE",
            },
            |stack| stack.as_ref().is_some_and(|s| s.status.as_str().contains("FAILED")),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use convoy_core::StackSpec;
    use convoy_platform::SimulatedCloud;

    fn spec(name: &str) -> StackSpec {
        StackSpec {
            name: name.to_string(),
            template: "Resources: {}".to_string(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    fn waiter() -> Waiter {
        Waiter::with_polls(Duration::from_secs(10), 30)
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_create_complete() {
        let cloud = SimulatedCloud::new();
        cloud.push(&spec("prod-shared")).await.unwrap();

        let stack = wait_for_stack(&waiter(), &cloud, "prod-shared").await.unwrap();
        assert_eq!(stack.status.as_str(), "CREATE_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_is_fatal() {
        let cloud = SimulatedCloud::new();
        cloud.fail_stack("prod-shared");
        cloud.push(&spec("prod-shared")).await.unwrap();

        let err = wait_for_stack(&waiter(), &cloud, "prod-shared")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Unrecoverable(msg) if msg.contains("ROLLBACK_COMPLETE")));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_stack_is_fatal() {
        let cloud = SimulatedCloud::new();
        let err = wait_for_stack(&waiter(), &cloud, "nope").await.unwrap_err();
        assert!(matches!(err, DeployError::Unrecoverable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_completes_when_stack_is_gone() {
        let cloud = SimulatedCloud::new();
        cloud.push(&spec("prod-instances-001")).await.unwrap();
        wait_for_stack(&waiter(), &cloud, "prod-instances-001").await.unwrap();

        cloud.delete("prod-instances-001").await.unwrap();
        wait_for_stack_deletion(&waiter(), &cloud, "prod-instances-001")
            .await
            .unwrap();
        assert!(cloud.stack("prod-instances-001").is_none());
    }
}
