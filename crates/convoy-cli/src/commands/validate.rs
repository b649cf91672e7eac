use std::path::Path;

use convoy_core::{ClusterFacts, ReleaseConfig, ReleaseKind};
use convoy_fleet::DesiredFleet;

pub fn validate(path: &Path) -> anyhow::Result<()> {
    let config = ReleaseConfig::from_file(path)?;
    let kind = ReleaseKind::classify(&config);

    // Offline: without an introspected instance role, task_role is only what the file sets.
    let facts = ClusterFacts {
        cluster: config.application.cluster.clone(),
        ..Default::default()
    };
    let request = convoy_rollout::build_request(&config, &kind, &facts);

    let base = path.parent().unwrap_or(Path::new("."));
    let fleet = DesiredFleet::load(&config, base)?.map(|fleet| {
        serde_json::json!({
            "shared_stack": fleet.shared_stack().name,
            "parameters": fleet.parameters,
            "tags": fleet.tags,
            "drain": fleet.drain,
        })
    });

    let summary = serde_json::json!({
        "application": config.application.name,
        "cluster": config.application.cluster,
        "release": kind,
        "task_definition": request,
        "fleet": fleet,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
