//! convoy — release applications onto a container cluster.
//!
//! ```text
//! convoy validate --config convoy.toml
//! convoy rehearse --config convoy.toml --revisions 3
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use convoy_cli::ReleaseScope;

mod commands;

#[derive(Parser)]
#[command(
    name = "convoy",
    about = "Convoy — cluster fleet replacement and service rollout",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Check a release file and print the task definition it produces.
    Validate {
        #[arg(short, long, default_value = "convoy.toml")]
        config: PathBuf,
    },
    /// Run the release against an in-memory cloud.
    ///
    /// Each revision is a full release; from the second one on the
    /// fleet reports no change and the service is updated in place.
    Rehearse {
        #[arg(short, long, default_value = "convoy.toml")]
        config: PathBuf,
        /// Only converge the cluster fleet.
        #[arg(long, conflicts_with = "service_only")]
        cluster_only: bool,
        /// Only deploy the application.
        #[arg(long)]
        service_only: bool,
        /// Number of consecutive releases.
        #[arg(long, default_value = "1")]
        revisions: u32,
        /// Simulated poll interval in milliseconds.
        #[arg(long, default_value = "20")]
        poll_millis: u64,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,convoy=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Validate { config } => commands::validate::validate(&config),
        Command::Rehearse {
            config,
            cluster_only,
            service_only,
            revisions,
            poll_millis,
        } => {
            let scope = if cluster_only {
                ReleaseScope::ClusterOnly
            } else if service_only {
                ReleaseScope::ServiceOnly
            } else {
                ReleaseScope::Full
            };

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping release");
                    let _ = shutdown_tx.send(true);
                }
            });

            commands::rehearse::rehearse(
                &config,
                scope,
                revisions,
                Duration::from_millis(poll_millis),
                shutdown_rx,
            )
            .await
        }
    }
}
