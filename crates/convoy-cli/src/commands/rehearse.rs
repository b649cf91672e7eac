use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use convoy_cli::{ReleaseOptions, ReleaseScope, run_release};
use convoy_core::ReleaseConfig;
use convoy_platform::{Platform, SimulatedCloud};

/// Run the release `revisions` times against an in-memory cloud.
pub async fn rehearse(
    path: &Path,
    scope: ReleaseScope,
    revisions: u32,
    poll: Duration,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let config = ReleaseConfig::from_file(path)?;
    let base = path.parent().unwrap_or(Path::new("."));

    let cloud = SimulatedCloud::new();
    let platform = Platform::simulated(&cloud);
    let options = ReleaseOptions {
        scope,
        interval: Some(poll),
        shutdown: Some(shutdown),
    };

    let mut reports = Vec::new();
    for revision in 1..=revisions.max(1) {
        info!(revision, "rehearsing release");
        match run_release(&platform, &config, base, &options).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                eprintln!("Release failed: {e}");
                return Err(e.into());
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
