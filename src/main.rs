use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use traffic_install::{install::DEFAULT_MANAGER_NAMESPACE, Env, KubeCluster, Resources, Scope};

/// Installs, upgrades or removes the traffic manager in the current cluster.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Namespace the traffic manager lives in.
    #[arg(long, short, env = "MANAGER_NAMESPACE", default_value = DEFAULT_MANAGER_NAMESPACE)]
    namespace: String,

    /// Release version the manager image is tagged with.
    #[arg(long)]
    image_version: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the traffic manager's resources, updating any that already exist.
    Install,
    /// Bring an existing installation up to this version.
    Upgrade,
    /// Remove all resources.
    Uninstall,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let env = Env::from_env().context("invalid environment")?;

    let cluster = KubeCluster::try_default()
        .await
        .context("unable to connect to the cluster")?;
    let cluster_id = if env.cluster_id.is_empty() {
        cluster
            .cluster_id()
            .await
            .context("unable to determine the cluster id")?
    } else {
        env.cluster_id.clone()
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, aborting");
                cancel.cancel();
            }
        }
    });

    let mut scope = Scope::new(cluster, &cli.namespace, cluster_id, env).with_cancellation(cancel);
    if let Some(version) = cli.image_version {
        scope = scope.with_version(version);
    }

    let mut resources = Resources::traffic_manager();
    match cli.command {
        Command::Install | Command::Upgrade => resources.ensure(&mut scope).await?,
        Command::Uninstall => resources.delete(&scope).await?,
    }
    Ok(())
}
