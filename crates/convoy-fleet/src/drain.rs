//! Batched draining of a retiring fleet.

use serde::Serialize;
use tracing::{info, warn};

use convoy_core::{ContainerInstance, DeployError, DeployResult, InstanceStatus};
use convoy_platform::ContainerPlatformClient;
use convoy_waiter::Waiter;

/// One drained batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainBatch {
    /// Compute instance ids in the batch.
    pub instances: Vec<String>,
    /// False when the drain wait ran out before tasks reached zero.
    pub drained: bool,
}

/// Number of batches needed to cover `total` instances.
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return total;
    }
    total.div_ceil(batch_size)
}

/// Drain `instances` `batch_size` at a time.
///
/// Each batch is set to DRAINING and waited on until none of its
/// instances runs tasks. A batch that does not empty within the waiter's
/// budget is logged and skipped; every other error aborts.
pub async fn drain_in_batches(
    platform: &dyn ContainerPlatformClient,
    waiter: &Waiter,
    cluster: &str,
    instances: &[ContainerInstance],
    batch_size: usize,
) -> DeployResult<Vec<DrainBatch>> {
    let total = batch_count(instances.len(), batch_size);
    let mut batches = Vec::with_capacity(total);

    for (index, batch) in instances.chunks(batch_size.max(1)).enumerate() {
        let ids: Vec<String> = batch.iter().map(|ci| ci.id.clone()).collect();
        info!(cluster, batch = index + 1, total, size = ids.len(), "draining batch");
        platform
            .set_instance_status(cluster, &ids, InstanceStatus::Draining)
            .await?;

        let what = format!("drain of batch {}/{total} on {cluster}", index + 1);
        let ids_ref = &ids;
        let result = waiter
            .until(
                &what,
                move || async move {
                    let listed = platform.list_container_instances(cluster).await?;
                    Ok::<_, DeployError>(
                        listed
                            .into_iter()
                            .filter(|ci| ids_ref.contains(&ci.id))
                            .collect::<Vec<_>>(),
                    )
                },
                |remaining: &Vec<ContainerInstance>| remaining.iter().all(ContainerInstance::is_idle),
                |_| false,
            )
            .await;

        let drained = match result {
            Ok(_) => true,
            Err(err) if err.is_timeout() => {
                warn!(cluster, batch = index + 1, error = %err, "batch did not drain in time, continuing");
                false
            }
            Err(err) => return Err(err),
        };
        batches.push(DrainBatch {
            instances: batch.iter().map(|ci| ci.instance_id.clone()).collect(),
            drained,
        });
    }
    Ok(batches)
}
