//! Orchestration façade
//!
//! The single entry point for transport handlers and controllers. Each
//! operation composes the [`Converter`] with a desirer and annotates any
//! failure with the operation name via [`Error::Operation`]. The façade never
//! talks to the cluster itself.

use std::sync::Arc;

use bifrost_common::cf::{
    self, DesireLrpRequest, DesiredLrp, DesiredLrpSchedulingInfo, DesiredLrpUpdate,
    TaskCompletedRequest, TaskRequest, UpdateDesiredLrpRequest,
};
use bifrost_common::opi::RunningLrp;
use bifrost_common::{Error, LrpIdentifier, Result};
use tracing::{debug, info, warn};

use crate::config::BifrostConfig;
use crate::convert::{routes_from_payload, routes_payload, Converter};
use crate::lrp::statefulset::WorkloadSettings;
use crate::lrp::{LrpDesirer, LrpKubeClientImpl, StatefulSetDesirer};
use crate::task::job::TaskSettings;
use crate::task::{HttpTaskCompleter, JobDesirer, TaskCompleter, TaskDesirer, TaskKubeClientImpl};

/// Façade over the LRP and task desirers
pub struct Bifrost {
    converter: Converter,
    lrp_desirer: Arc<dyn LrpDesirer>,
    task_desirer: Arc<dyn TaskDesirer>,
    completer: Arc<dyn TaskCompleter>,
}

fn desired_lrp(running: &RunningLrp) -> Result<DesiredLrp> {
    let lrp = &running.lrp;
    Ok(DesiredLrp {
        process_guid: lrp.identifier.process_guid(),
        instances: lrp.target_instances,
        annotation: lrp.last_updated.clone(),
        routes: routes_from_payload(&lrp.app_uris)?,
    })
}

impl Bifrost {
    /// Compose the façade from its collaborators
    pub fn new(
        converter: Converter,
        lrp_desirer: Arc<dyn LrpDesirer>,
        task_desirer: Arc<dyn TaskDesirer>,
        completer: Arc<dyn TaskCompleter>,
    ) -> Self {
        Self {
            converter,
            lrp_desirer,
            task_desirer,
            completer,
        }
    }

    /// Wire the cluster-backed desirers and the HTTP completer
    pub fn from_config(config: &BifrostConfig, client: kube::Client) -> Result<Self> {
        let converter = Converter::new(
            &config.registry_address,
            &config.namespace,
            config.require_task_completion_callback,
        );
        let lrp_desirer = StatefulSetDesirer::new(
            Arc::new(LrpKubeClientImpl::new(client.clone())),
            WorkloadSettings {
                registry_secret_name: config.registry_secret_name.clone(),
                service_account: config.application_service_account.clone(),
            },
        );
        let task_desirer = JobDesirer::new(
            Arc::new(TaskKubeClientImpl::new(client)),
            TaskSettings {
                registry_secret_name: config.registry_secret_name.clone(),
                service_account: config.application_service_account.clone(),
            },
        );
        let completer = HttpTaskCompleter::from_config(&config.completion)?;
        Ok(Self::new(
            converter,
            Arc::new(lrp_desirer),
            Arc::new(task_desirer),
            Arc::new(completer),
        ))
    }

    // =========================================================================
    // LRPs
    // =========================================================================

    /// Create a workload for a desire request
    pub async fn transfer(&self, request: &DesireLrpRequest) -> Result<()> {
        let lrp = self
            .converter
            .convert_lrp(request)
            .map_err(|e| Error::operation("convert lrp", e))?;
        self.lrp_desirer
            .desire(&lrp)
            .await
            .map_err(|e| Error::operation("desire lrp", e))
    }

    /// Apply an instance/route/annotation update to an existing workload
    ///
    /// Fields the update leaves unset keep their current value. The
    /// registry secret is left as it is.
    pub async fn update(&self, request: &UpdateDesiredLrpRequest) -> Result<()> {
        let id = request.identifier();
        let mut lrp = self
            .lrp_desirer
            .get(&id)
            .await
            .map_err(|e| Error::operation("get lrp", e))?
            .lrp;

        let DesiredLrpUpdate {
            instances,
            routes,
            annotation,
        } = &request.update;
        if let Some(instances) = instances {
            lrp.target_instances = *instances;
        }
        if let Some(routes) = routes {
            lrp.app_uris =
                routes_payload(routes).map_err(|e| Error::operation("update lrp", e))?;
        }
        if let Some(annotation) = annotation {
            lrp.last_updated = annotation.clone();
        }

        self.lrp_desirer
            .update(&lrp)
            .await
            .map_err(|e| Error::operation("update lrp", e))
    }

    /// Get-or-create: transfer when absent, converge instances, routes and
    /// last-updated marker otherwise
    pub async fn reconcile(&self, request: &DesireLrpRequest) -> Result<()> {
        let id = request.identifier();
        match self.get_app(&id).await {
            Err(e) if e.is_not_found() => {
                debug!(guid = %id.guid, version = %id.version, "lrp absent, creating");
                self.transfer(request).await
            }
            Err(e) => Err(e),
            Ok(_) => {
                debug!(guid = %id.guid, version = %id.version, "lrp present, updating");
                self.update(&UpdateDesiredLrpRequest {
                    guid: id.guid,
                    version: id.version,
                    update: DesiredLrpUpdate {
                        instances: Some(request.instances),
                        routes: Some(request.routes.clone()),
                        annotation: Some(request.last_updated.clone()),
                    },
                })
                .await
            }
        }
    }

    /// Declared shape of one workload
    pub async fn get_app(&self, id: &LrpIdentifier) -> Result<DesiredLrp> {
        let running = self
            .lrp_desirer
            .get(id)
            .await
            .map_err(|e| Error::operation("get app", e))?;
        desired_lrp(&running).map_err(|e| Error::operation("get app", e))
    }

    /// Scheduling info of every workload
    pub async fn list(&self) -> Result<Vec<DesiredLrpSchedulingInfo>> {
        let running = self
            .lrp_desirer
            .list()
            .await
            .map_err(|e| Error::operation("list lrps", e))?;
        Ok(running
            .into_iter()
            .map(|r| DesiredLrpSchedulingInfo {
                process_guid: r.lrp.identifier.process_guid(),
                guid: r.lrp.identifier.guid,
                version: r.lrp.identifier.version,
                annotation: r.lrp.last_updated,
            })
            .collect())
    }

    /// Delete a workload; absent workloads are not an error
    pub async fn stop(&self, id: &LrpIdentifier) -> Result<()> {
        self.lrp_desirer
            .stop(id)
            .await
            .map_err(|e| Error::operation("stop lrp", e))
    }

    /// Delete one instance by ordinal
    pub async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()> {
        self.lrp_desirer
            .stop_instance(id, index)
            .await
            .map_err(|e| Error::operation("stop lrp instance", e))
    }

    /// Per-instance status in control-plane terms
    pub async fn get_instances(&self, id: &LrpIdentifier) -> Result<Vec<cf::Instance>> {
        let running = self
            .lrp_desirer
            .get(id)
            .await
            .map_err(|e| Error::operation("get instances", e))?;
        Ok(running
            .instances
            .into_iter()
            .map(|i| cf::Instance {
                index: i.index,
                state: i.state.as_cf_state().to_string(),
                since: i.since,
                placement_error: i.placement_error,
            })
            .collect())
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Start a task
    pub async fn transfer_task(&self, task_guid: &str, request: &TaskRequest) -> Result<()> {
        let task = self
            .converter
            .convert_task(task_guid, request)
            .map_err(|e| Error::operation("convert task", e))?;
        self.task_desirer
            .desire(&task)
            .await
            .map_err(|e| Error::operation("desire task", e))
    }

    /// Delete a task and report it as cancelled
    ///
    /// Cancelling a task that is already gone is a no-op.
    pub async fn cancel_task(&self, task_guid: &str) -> Result<()> {
        let callback = self
            .task_desirer
            .delete(task_guid)
            .await
            .map_err(|e| Error::operation("cancel task", e))?;

        match callback {
            Some(url) if !url.is_empty() => {
                self.completer
                    .complete(&url, &TaskCompletedRequest::cancelled(task_guid))
                    .await
                    .map_err(|e| Error::operation("cancel task", e))?;
                info!(%task_guid, "cancelled task");
            }
            Some(_) => info!(%task_guid, "cancelled task without completion callback"),
            None => debug!(%task_guid, "task already gone"),
        }
        Ok(())
    }

    /// Report a terminated task to the control plane and delete it
    ///
    /// The task is deleted even when the callback fails; both failures are
    /// reported together. A task without a callback is only deleted.
    pub async fn complete_task(
        &self,
        task_guid: &str,
        failed: bool,
        failure_reason: &str,
    ) -> Result<()> {
        let callback = self
            .task_desirer
            .completion_callback(task_guid)
            .await
            .map_err(|e| Error::operation("complete task", e))?;

        let payload = if failed {
            TaskCompletedRequest::failed(task_guid, failure_reason)
        } else {
            TaskCompletedRequest::succeeded(task_guid)
        };

        let mut errors = Vec::new();
        match callback {
            Some(url) => {
                if let Err(e) = self.completer.complete(&url, &payload).await {
                    warn!(%task_guid, error = %e, "failed to report task completion");
                    errors.push(e);
                }
            }
            None => debug!(%task_guid, "task has no completion callback"),
        }
        if let Err(e) = self.task_desirer.delete(task_guid).await {
            errors.push(e);
        }

        match Error::combine(errors) {
            Some(e) => Err(Error::operation("complete task", e)),
            None => {
                info!(%task_guid, failed, "completed task");
                Ok(())
            }
        }
    }
}
