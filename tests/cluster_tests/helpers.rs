//! Shared setup for the cluster stories
//!
//! One kind cluster serves every story; each story works in its own
//! namespace and talks to the cluster through the production desirers.

use std::process::{Command, Output};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};

use bifrost::lrp::statefulset::WorkloadSettings;
use bifrost::lrp::{LrpKubeClientImpl, StatefulSetDesirer};
use bifrost::task::job::TaskSettings;
use bifrost::task::{JobDesirer, TaskKubeClientImpl};

const KIND_CLUSTER: &str = "bifrost-stories";

static KIND_READY: OnceLock<Result<(), String>> = OnceLock::new();

fn kind(args: &[&str]) -> Result<Output, String> {
    Command::new("kind")
        .args(args)
        .output()
        .map_err(|e| format!("kind {}: {e}", args.join(" ")))
}

/// Start the story cluster unless a previous run left one behind
fn start_kind() -> Result<(), String> {
    if kind(&["get", "kubeconfig", "--name", KIND_CLUSTER])?.status.success() {
        return Ok(());
    }
    let created = kind(&["create", "cluster", "--name", KIND_CLUSTER, "--wait", "90s"])?;
    if created.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&created.stderr).into_owned())
    }
}

/// Client for the story cluster, starting it on first use
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    KIND_READY.get_or_init(start_kind).clone()?;

    let options = KubeConfigOptions {
        context: Some(format!("kind-{KIND_CLUSTER}")),
        ..Default::default()
    };
    let config = Config::from_kubeconfig(&options)
        .await
        .map_err(|e| e.to_string())?;
    Client::try_from(config).map_err(|e| e.to_string())
}

/// Create a fresh namespace for one story
pub async fn create_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    // A namespace from an earlier run may still be terminating
    for _ in 0..30 {
        if api.create(&PostParams::default(), &namespace).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    panic!("namespace {name} was not created");
}

/// Delete a story namespace and everything in it
pub async fn delete_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
}

pub fn lrp_desirer(client: &Client) -> StatefulSetDesirer {
    StatefulSetDesirer::new(
        Arc::new(LrpKubeClientImpl::new(client.clone())),
        WorkloadSettings::default(),
    )
}

pub fn task_desirer(client: &Client) -> JobDesirer {
    JobDesirer::new(
        Arc::new(TaskKubeClientImpl::new(client.clone())),
        TaskSettings::default(),
    )
}
