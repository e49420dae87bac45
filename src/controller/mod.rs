//! Controllers driving the façade from cluster watches
//!
//! - `lrp`: reconciles `LRP` resources through [`Bifrost::reconcile`]
//! - `task_reporter`: reports terminated task Jobs through
//!   [`Bifrost::complete_task`]
//!
//! kube-runtime serialises reconciles per object, so two events for the same
//! identity never race inside the engine.

pub mod lrp;
pub mod task_reporter;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bifrost_common::kube_utils::label_selector;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use thiserror::Error;

use crate::bifrost::Bifrost;
use crate::crd::LRP;
use crate::task::job::task_source_labels;

/// Watcher timeout (seconds); must stay below the client read timeout so
/// the API server closes idle watches first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Reconcile failure
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The engine failed
    #[error(transparent)]
    Bifrost(#[from] bifrost_common::Error),

    /// The watched object lacks something reconcile needs
    #[error("{kind} {name} has no {field}")]
    MissingField {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
        /// What is missing
        field: &'static str,
    },
}

/// A controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the LRP controller
pub fn build_lrp_controller(client: Client, bifrost: Arc<Bifrost>) -> ControllerFuture {
    let ctx = Arc::new(lrp::Context::new(
        bifrost,
        Arc::new(lrp::LrpResourceClientImpl::new(client.clone())),
    ));
    let lrps: Api<LRP> = Api::all(client);

    tracing::info!("- LRP controller");

    Box::pin(
        Controller::new(lrps, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(lrp::reconcile, lrp::error_policy, ctx)
            .for_each(log_reconcile_result("LRP")),
    )
}

/// Build the task completion reporter
pub fn build_task_reporter(client: Client, bifrost: Arc<Bifrost>) -> ControllerFuture {
    let ctx = Arc::new(task_reporter::Context::new(bifrost));
    let jobs: Api<Job> = Api::all(client);
    let selector = label_selector(&task_source_labels());

    tracing::info!("- task reporter");

    Box::pin(
        Controller::new(
            jobs,
            WatcherConfig::default()
                .labels(&selector)
                .timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(task_reporter::reconcile, task_reporter::error_policy, ctx)
        .for_each(log_reconcile_result("Task")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
