//! The release pipeline: converge the fleet, then deploy the service.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use convoy_core::{ClusterFacts, DeployResult, DeploymentOutcome, ReleaseConfig, ReleaseKind};
use convoy_fleet::{ClusterReplacer, ConvergeOutcome, DesiredFleet};
use convoy_platform::Platform;
use convoy_rollout::ServiceDeployer;

/// Which engines a release runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReleaseScope {
    #[default]
    Full,
    ClusterOnly,
    ServiceOnly,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseOptions {
    pub scope: ReleaseScope,
    /// Poll interval override; budgets keep their poll counts.
    pub interval: Option<Duration>,
    pub shutdown: Option<watch::Receiver<bool>>,
}

/// What one release did.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub application: String,
    pub cluster: String,
    pub kind: ReleaseKind,
    pub facts: ClusterFacts,
    pub fleet: Option<ConvergeOutcome>,
    pub deployment: Option<DeploymentOutcome>,
}

/// Run one release of `config`.
///
/// Template paths in the `[cluster]` section resolve against `base_dir`.
/// Any error aborts the release; nothing is retried.
pub async fn run_release(
    platform: &Platform,
    config: &ReleaseConfig,
    base_dir: &Path,
    options: &ReleaseOptions,
) -> DeployResult<ReleaseReport> {
    let cluster = config.application.cluster.as_str();
    let kind = ReleaseKind::classify(config);
    info!(application = %config.application.name, cluster, kind = kind.label(), "release started");

    let facts = platform.introspector.introspect(cluster).await?;

    let fleet = match (options.scope, DesiredFleet::load(config, base_dir)?) {
        (ReleaseScope::ServiceOnly, _) | (_, None) => None,
        (_, Some(desired)) => {
            let mut replacer = ClusterReplacer::new(platform.clone())
                .with_shutdown(options.shutdown.clone());
            if let Some(interval) = options.interval {
                replacer = replacer.with_interval(interval);
            }
            Some(replacer.converge(&desired).await?)
        }
    };

    let deployment = if options.scope == ReleaseScope::ClusterOnly {
        None
    } else {
        let mut deployer = ServiceDeployer::new(platform.containers.clone(), config.deploy.clone())
            .with_shutdown(options.shutdown.clone());
        if let Some(interval) = options.interval {
            deployer = deployer.with_interval(interval);
        }
        Some(deployer.deploy(config, &facts).await?)
    };

    info!(application = %config.application.name, "release finished");
    Ok(ReleaseReport {
        application: config.application.name.clone(),
        cluster: cluster.to_string(),
        kind,
        facts,
        fleet,
        deployment,
    })
}
