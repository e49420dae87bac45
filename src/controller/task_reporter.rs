//! Task completion reporter
//!
//! Watches task Jobs. When one reaches a terminal condition the control
//! plane is told through [`Bifrost::complete_task`], which also deletes
//! the Job and its registry secret.

use std::sync::Arc;
use std::time::Duration;

use bifrost_common::LABEL_GUID;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, instrument, warn};

use super::ReconcileError;
use crate::bifrost::Bifrost;

/// Requeue interval after a failed report
const REQUEUE_ERROR_SECS: u64 = 15;

/// Terminal result of a task Job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Job condition `Complete`
    Succeeded,
    /// Job condition `Failed`, with the condition's explanation
    Failed(String),
}

/// Reporter context
pub struct Context {
    bifrost: Arc<Bifrost>,
}

impl Context {
    /// Create a context
    pub fn new(bifrost: Arc<Bifrost>) -> Self {
        Self { bifrost }
    }
}

/// Terminal outcome of a Job, `None` while it is still running
pub fn outcome(job: &Job) -> Option<Outcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .filter(|c| c.status == "True")
        .find_map(|c| match c.type_.as_str() {
            "Complete" => Some(Outcome::Succeeded),
            "Failed" => Some(Outcome::Failed(
                c.message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .or_else(|| c.reason.clone())
                    .unwrap_or_else(|| "task failed".to_string()),
            )),
            _ => None,
        })
}

/// Report a terminated task Job
#[instrument(skip(job, ctx), fields(job = %job.name_any()))]
pub async fn reconcile(job: Arc<Job>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    if job.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    let Some(outcome) = outcome(&job) else {
        return Ok(Action::await_change());
    };
    let task_guid = job
        .labels()
        .get(LABEL_GUID)
        .cloned()
        .ok_or_else(|| ReconcileError::MissingField {
            kind: "Job",
            name: job.name_any(),
            field: LABEL_GUID,
        })?;

    let (failed, reason) = match &outcome {
        Outcome::Succeeded => (false, ""),
        Outcome::Failed(reason) => (true, reason.as_str()),
    };
    match ctx.bifrost.complete_task(&task_guid, failed, reason).await {
        Ok(()) => {}
        // Already reported and deleted by an earlier pass
        Err(e) if e.is_not_found() => debug!(%task_guid, "task already reported"),
        Err(e) => return Err(e.into()),
    }
    Ok(Action::await_change())
}

/// Retry failed reports
pub fn error_policy(job: Arc<Job>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    warn!(
        ?error,
        job = %job.name_any(),
        "task report failed"
    );
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}
