//! convoy.toml release configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::types::NetworkMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub application: ApplicationConfig,
    pub service: Option<ServiceConfig>,
    #[serde(default)]
    pub deploy: DeploySettings,
    pub cluster: Option<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    pub cluster: String,
    pub image: String,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory")]
    pub memory: u32,
    #[serde(default)]
    pub network_mode: NetworkMode,
    pub task_role: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub sidecars: Vec<SidecarConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub essential: bool,
    pub memory: Option<u32>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    /// Present for web services fronted by a load balancer.
    pub url_suffix: Option<String>,
    pub container_port: Option<u16>,
    #[serde(default = "default_min_healthy")]
    pub min_healthy_percent: u32,
    #[serde(default = "default_max_percent")]
    pub max_percent: u32,
    /// Target group handed over by the load-balancer provisioner.
    pub target_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Stabilization budget; one minute is six polls.
    pub timeout_minutes: u32,
    pub poll_interval_secs: u64,
    pub task_timeout_minutes: u32,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            timeout_minutes: 15,
            poll_interval_secs: 10,
            task_timeout_minutes: 30,
        }
    }
}

impl DeploySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Number of polls allowed for service stabilization.
    pub fn stabilization_polls(&self) -> u32 {
        self.timeout_minutes * 6
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub shared_template: PathBuf,
    pub instance_template: PathBuf,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub drain: DrainConfig,
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_secs: u64,
    #[serde(default = "default_capacity_timeout")]
    pub capacity_timeout_minutes: u64,
    #[serde(default = "default_stack_timeout")]
    pub stack_timeout_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 3,
            timeout_secs: 600,
        }
    }
}

fn default_cpu() -> u32 {
    256
}

fn default_memory() -> u32 {
    512
}

fn default_desired_count() -> u32 {
    1
}

fn default_min_healthy() -> u32 {
    50
}

fn default_max_percent() -> u32 {
    200
}

fn default_registration_timeout() -> u64 {
    300
}

fn default_capacity_timeout() -> u64 {
    20
}

fn default_stack_timeout() -> u64 {
    30
}

impl ReleaseConfig {
    pub fn from_file(path: &Path) -> DeployResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeployError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> DeployResult<Self> {
        let config: ReleaseConfig =
            toml::from_str(content).map_err(|e| DeployError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> DeployResult<String> {
        toml::to_string_pretty(self).map_err(|e| DeployError::Config(e.to_string()))
    }

    /// Reject configurations the engines cannot act on.
    pub fn validate(&self) -> DeployResult<()> {
        let app = &self.application;
        for (field, value) in [
            ("application.name", &app.name),
            ("application.cluster", &app.cluster),
            ("application.image", &app.image),
        ] {
            if value.trim().is_empty() {
                return Err(DeployError::Config(format!("{field} must not be empty")));
            }
        }
        if self.deploy.poll_interval_secs == 0 {
            return Err(DeployError::Config(
                "deploy.poll_interval_secs must be at least 1".into(),
            ));
        }
        if self.deploy.timeout_minutes == 0 {
            return Err(DeployError::Config(
                "deploy.timeout_minutes must be at least 1".into(),
            ));
        }
        if let Some(service) = &self.service
            && service.url_suffix.is_some()
            && service.container_port.is_none()
        {
            return Err(DeployError::Config(
                "service.container_port is required when url_suffix is set".into(),
            ));
        }
        if let Some(cluster) = &self.cluster
            && cluster.drain.batch_size == 0
        {
            return Err(DeployError::Config(
                "cluster.drain.batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Task-definition family for this application.
    pub fn family(&self) -> String {
        format!("{}-{}", self.application.cluster, self.application.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
[application]
name = "billing"
cluster = "prod"
image = "registry.local/billing:1.4.2"
memory = 1024
network_mode = "awsvpc"

[application.env]
DATABASE_URL = "postgres://db/billing"

[[application.sidecars]]
name = "log-router"
image = "fluent-bit:2"

[service]
desired_count = 2
url_suffix = "billing.example.com"
container_port = 8080
target_group = "tg-billing"

[deploy]
timeout_minutes = 5
poll_interval_secs = 10
task_timeout_minutes = 10

[cluster]
shared_template = "infra/shared.yml"
instance_template = "infra/instances.yml"

[cluster.parameters]
InstanceType = "m5.large"

[cluster.drain]
enabled = true
batch_size = 3
timeout_secs = 300
"#;

    #[test]
    fn parses_full_config() {
        let config = ReleaseConfig::from_toml(FULL).unwrap();
        assert_eq!(config.application.name, "billing");
        assert_eq!(config.application.cpu, 256);
        assert_eq!(config.application.network_mode, NetworkMode::Awsvpc);
        assert_eq!(config.application.sidecars.len(), 1);
        assert!(!config.application.sidecars[0].essential);
        assert_eq!(config.deploy.stabilization_polls(), 30);
        let cluster = config.cluster.unwrap();
        assert_eq!(cluster.drain.batch_size, 3);
        assert_eq!(cluster.registration_timeout_secs, 300);
        assert_eq!(cluster.parameters["InstanceType"], "m5.large");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ReleaseConfig::from_toml(
            r#"
[application]
name = "migrate"
cluster = "prod"
image = "registry.local/migrate:7"
"#,
        )
        .unwrap();
        assert!(config.service.is_none());
        assert!(config.cluster.is_none());
        assert_eq!(config.deploy.timeout_minutes, 15);
        assert_eq!(config.deploy.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.family(), "prod-migrate");
    }

    #[test]
    fn rejects_empty_image() {
        let err = ReleaseConfig::from_toml(
            r#"
[application]
name = "api"
cluster = "prod"
image = " "
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("application.image"));
    }

    #[test]
    fn rejects_web_service_without_port() {
        let err = ReleaseConfig::from_toml(
            r#"
[application]
name = "api"
cluster = "prod"
image = "api:1"

[service]
url_suffix = "api.example.com"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn rejects_zero_drain_batch() {
        let err = ReleaseConfig::from_toml(
            r#"
[application]
name = "api"
cluster = "prod"
image = "api:1"

[cluster]
shared_template = "s.yml"
instance_template = "i.yml"

[cluster.drain]
enabled = true
batch_size = 0
timeout_secs = 60
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = ReleaseConfig::from_file(file.path()).unwrap();
        assert_eq!(config.service.unwrap().desired_count, 2);

        let missing = ReleaseConfig::from_file(Path::new("/nonexistent/convoy.toml"));
        assert!(matches!(missing, Err(DeployError::Config(_))));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ReleaseConfig::from_toml(FULL).unwrap();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("billing.example.com"));
    }
}
