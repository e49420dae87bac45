//! LRP resource controller
//!
//! Each `LRP` resource is reconciled with the façade's get-or-create
//! [`Bifrost::reconcile`]; this is the canonical convergence path. A
//! finalizer keeps the resource until its workload has been stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bifrost_common::opi::InstanceState;
use bifrost_common::Error;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::ReconcileError;
use crate::bifrost::Bifrost;
use crate::crd::{LrpStatus, LRP};

/// Finalizer guarding workload cleanup
pub const LRP_FINALIZER: &str = "eirini.cloudfoundry.org/lrp-cleanup";

/// Requeue interval after a successful reconcile (drift detection)
const REQUEUE_SUCCESS_SECS: u64 = 300;
/// Requeue interval after a failed reconcile
const REQUEUE_ERROR_SECS: u64 = 30;

/// Writes to `LRP` resources the controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LrpResourceClient: Send + Sync {
    /// Replace the resource's finalizer list
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource
    async fn patch_status(&self, namespace: &str, name: &str, status: &LrpStatus)
        -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct LrpResourceClientImpl {
    client: Client,
}

impl LrpResourceClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LrpResourceClient for LrpResourceClientImpl {
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<LRP> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::cluster_api("patch lrp finalizers", e))?;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &LrpStatus,
    ) -> Result<(), Error> {
        let api: Api<LRP> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(status);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::cluster_api("patch lrp status", e))?;
        Ok(())
    }
}

/// Merge patch replacing an LRP's status; absent fields are sent as null
fn status_patch(status: &LrpStatus) -> serde_json::Value {
    json!({ "status": status })
}

/// Controller context
pub struct Context {
    bifrost: Arc<Bifrost>,
    kube: Arc<dyn LrpResourceClient>,
}

impl Context {
    /// Create a context
    pub fn new(bifrost: Arc<Bifrost>, kube: Arc<dyn LrpResourceClient>) -> Self {
        Self { bifrost, kube }
    }
}

fn has_finalizer(lrp: &LRP) -> bool {
    lrp.finalizers().iter().any(|f| f == LRP_FINALIZER)
}

fn namespace_of(lrp: &LRP) -> Result<String, ReconcileError> {
    lrp.namespace().ok_or_else(|| ReconcileError::MissingField {
        kind: "LRP",
        name: lrp.name_any(),
        field: "namespace",
    })
}

/// Reconcile an `LRP` resource
#[instrument(skip(lrp, ctx), fields(lrp = %lrp.name_any()))]
pub async fn reconcile(lrp: Arc<LRP>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let name = lrp.name_any();
    let namespace = namespace_of(&lrp)?;

    if lrp.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&lrp, &ctx, &namespace).await;
    }

    if !has_finalizer(&lrp) {
        info!("adding finalizer");
        let mut finalizers = lrp.finalizers().to_vec();
        finalizers.push(LRP_FINALIZER.to_string());
        ctx.kube
            .set_finalizers(&namespace, &name, finalizers)
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let request = lrp.desire_request();
    if let Err(e) = ctx.bifrost.reconcile(&request).await {
        if e.is_client_error() {
            // Retrying cannot help until the resource changes
            warn!(error = %e, "lrp rejected");
            let status = LrpStatus {
                message: Some(e.to_string()),
                ..lrp.status.clone().unwrap_or_default()
            };
            ctx.kube.patch_status(&namespace, &name, &status).await?;
            return Ok(Action::await_change());
        }
        return Err(e.into());
    }

    let running = ctx
        .bifrost
        .get_instances(&request.identifier())
        .await?
        .iter()
        .filter(|i| i.state == InstanceState::Running.as_cf_state())
        .count();
    let status = LrpStatus {
        replicas: i32::try_from(running).unwrap_or(i32::MAX),
        last_reconciled: Some(chrono::Utc::now().to_rfc3339()),
        message: None,
    };
    ctx.kube.patch_status(&namespace, &name, &status).await?;

    debug!(replicas = status.replicas, "lrp reconciled");
    Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
}

async fn handle_deletion(
    lrp: &LRP,
    ctx: &Context,
    namespace: &str,
) -> Result<Action, ReconcileError> {
    if !has_finalizer(lrp) {
        return Ok(Action::await_change());
    }

    let id = lrp.spec.request.identifier();
    if id.validate().is_ok() {
        ctx.bifrost.stop(&id).await?;
        info!(guid = %id.guid, version = %id.version, "stopped workload of deleted lrp");
    }

    let finalizers = lrp
        .finalizers()
        .iter()
        .filter(|f| *f != LRP_FINALIZER)
        .cloned()
        .collect();
    ctx.kube
        .set_finalizers(namespace, &lrp.name_any(), finalizers)
        .await?;
    Ok(Action::await_change())
}

/// Requeue failed reconciles
pub fn error_policy(lrp: Arc<LRP>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    warn!(
        ?error,
        lrp = %lrp.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}
