//! vmstate: keeps an EC2 instance group, selected by tag, on the instance
//! type named in a desired-state document, and restarts members that stop.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vmstate_core::{DesiredStateFile, ReconcilerSettings, TagFilter};
use vmstate_runtime::Reconciler;

const USAGE: &str = "You must supply a tag name and value (-n NAME -v VALUE)";

#[derive(Parser, Debug)]
#[command(name = "vmstate")]
#[command(about = "Keep a tagged instance group on its desired instance type", long_about = None)]
struct Cli {
    /// Tag key identifying the instance group
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Tag value identifying the instance group
    #[arg(short = 'v', long)]
    value: Option<String>,

    /// Desired-state document (JSON with `instance_type` and `image_id`)
    #[arg(
        long,
        env = "VMSTATE_DESIRED_STATE",
        default_value = vmstate_core::config::DEFAULT_DESIRED_STATE_PATH
    )]
    desired_state: PathBuf,

    /// Emit logs as JSON
    #[arg(long, env = "VMSTATE_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    /// The tag filter, if both halves were given and non-empty.
    fn tag_filter(&self) -> Option<TagFilter> {
        match (self.name.as_deref(), self.value.as_deref()) {
            (Some(name), Some(value)) if !name.is_empty() && !value.is_empty() => {
                Some(TagFilter::new(name, value))
            }
            _ => None,
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let Some(filter) = cli.tag_filter() else {
        println!("{}", USAGE);
        return Ok(ExitCode::SUCCESS);
    };

    init_tracing(cli.log_json);

    let desired = DesiredStateFile::new(&cli.desired_state);
    let initial = desired.read().map_err(|e| {
        error!(path = %cli.desired_state.display(), error = %e, "Could not load desired state");
        e
    })?;
    info!(
        instance_type = %initial.instance_type,
        image_id = %initial.image_id,
        "Loaded desired state"
    );

    let settings = ReconcilerSettings::from_env();
    let provider = vmstate_provider::create_provider().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut reconciler = Reconciler::new(provider, filter, desired, &initial, settings);
    reconciler.run(shutdown_rx).await?;

    Ok(ExitCode::SUCCESS)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_short_flags() {
        let cli = Cli::try_parse_from(["vmstate", "-n", "fleet", "-v", "blue"]).unwrap();
        let filter = cli.tag_filter().unwrap();
        assert_eq!(filter.key, "fleet");
        assert_eq!(filter.value, "blue");
        assert!(!cli.log_json);
    }

    #[test]
    fn test_missing_value_has_no_filter() {
        let cli = Cli::try_parse_from(["vmstate", "--name", "fleet"]).unwrap();
        assert!(cli.tag_filter().is_none());

        let cli = Cli::try_parse_from(["vmstate", "-n", "", "-v", "blue"]).unwrap();
        assert!(cli.tag_filter().is_none());
    }

    #[test]
    fn test_no_version_flag() {
        let err = Cli::try_parse_from(["vmstate", "-n", "fleet", "-v", "blue", "--version"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);

        assert!(Cli::try_parse_from(["vmstate", "-V"]).is_err());
    }

    #[test]
    fn test_desired_state_path_flag() {
        let cli = Cli::try_parse_from([
            "vmstate",
            "-n",
            "fleet",
            "-v",
            "blue",
            "--desired-state",
            "/etc/vmstate/config.json",
        ])
        .unwrap();
        assert_eq!(cli.desired_state, PathBuf::from("/etc/vmstate/config.json"));
    }
}
