//! Release classification.
//!
//! A release is decided once from the static shape of `convoy.toml`:
//! no `[service]` block means a run-once task, a service without a URL
//! suffix is a daemon, and a service with one is a web service behind a
//! load balancer.

use serde::{Deserialize, Serialize};

use crate::config::ReleaseConfig;

/// What kind of workload a release deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReleaseKind {
    /// Run once to completion.
    Task,
    /// Long-running service without an endpoint.
    Daemon { desired_count: u32 },
    /// Long-running service registered with a load balancer.
    Web {
        desired_count: u32,
        url_suffix: String,
        container_port: u16,
    },
}

impl ReleaseKind {
    pub fn classify(config: &ReleaseConfig) -> Self {
        let Some(service) = &config.service else {
            return ReleaseKind::Task;
        };
        match (&service.url_suffix, service.container_port) {
            (Some(url_suffix), Some(container_port)) => ReleaseKind::Web {
                desired_count: service.desired_count,
                url_suffix: url_suffix.clone(),
                container_port,
            },
            _ => ReleaseKind::Daemon {
                desired_count: service.desired_count,
            },
        }
    }

    pub fn desired_count(&self) -> Option<u32> {
        match self {
            ReleaseKind::Task => None,
            ReleaseKind::Daemon { desired_count } | ReleaseKind::Web { desired_count, .. } => {
                Some(*desired_count)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReleaseKind::Task => "task",
            ReleaseKind::Daemon { .. } => "daemon",
            ReleaseKind::Web { .. } => "web",
        }
    }
}
