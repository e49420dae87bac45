//! Bifrost - desires Cloud Foundry workloads on Kubernetes

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use bifrost::controller::{build_lrp_controller, build_task_reporter};
use bifrost::crd::LRP;
use bifrost::{Bifrost, BifrostConfig};
use bifrost_common::kube_utils::create_client_with_timeout;
use bifrost_common::telemetry::init_logging;
use bifrost_common::FIELD_MANAGER;

/// Bifrost - run Cloud Foundry LRPs and tasks as Kubernetes workloads
#[derive(Parser, Debug)]
#[command(name = "bifrost", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, env = "BIFROST_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the LRP controller and the task reporter (default mode)
    Controller,
    /// Print the LRP CRD as YAML and exit
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd) => {
            let crd = serde_yaml::to_string(&LRP::crd())
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
            println!("{crd}");
            Ok(())
        }
        Some(Commands::Controller) | None => {
            let path = cli
                .config
                .ok_or_else(|| anyhow::anyhow!("--config or BIFROST_CONFIG is required"))?;
            run_controller(BifrostConfig::load(&path)?).await
        }
    }
}

/// Ensure the LRP CRD is installed
///
/// Installed with server-side apply on every start so the CRD always
/// matches the binary.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing LRP CRD...");
    crds.patch(
        "lrps.eirini.cloudfoundry.org",
        &params,
        &Patch::Apply(&LRP::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install LRP CRD: {}", e))?;
    Ok(())
}

async fn run_controller(config: BifrostConfig) -> anyhow::Result<()> {
    init_logging(config.log_format)?;

    let client = create_client_with_timeout(
        config.kubeconfig.as_deref(),
        config.connect_timeout(),
        config.read_timeout(),
    )
    .await?;

    ensure_crd_installed(&client).await?;

    let bifrost = Arc::new(Bifrost::from_config(&config, client.clone())?);

    tracing::info!(
        namespace = %config.namespace,
        registry = %config.registry_address,
        "Starting bifrost controllers"
    );
    let controllers = vec![
        build_lrp_controller(client.clone(), bifrost.clone()),
        build_task_reporter(client, bifrost),
    ];
    futures::future::join_all(controllers).await;

    tracing::info!("Bifrost shutting down");
    Ok(())
}
