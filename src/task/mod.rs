//! Task desirer
//!
//! Runs one-off tasks as Jobs. A task moves Submitted -> Running ->
//! {Completed, Cancelled}; in both terminal states its Job and registry
//! secret are deleted. Deletion is idempotent.

pub mod client;
pub mod completion;
pub mod job;

use std::sync::Arc;

use async_trait::async_trait;
use bifrost_common::kube_utils::{is_valid_label_value, label_selector};
use bifrost_common::opi::Task;
use bifrost_common::{Error, Result, ANNOTATION_COMPLETION_CALLBACK, ANNOTATION_REGISTRY_SECRET};
use k8s_openapi::api::batch::v1::Job;
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::registry::registry_secret;
pub use client::{TaskKubeClient, TaskKubeClientImpl};
pub use completion::{HttpTaskCompleter, TaskCompleter};
use job::{build_job, task_secret_name, task_selector_labels, TaskSettings};

/// Capability the façade depends on for tasks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskDesirer: Send + Sync {
    /// Start a task
    async fn desire(&self, task: &Task) -> Result<()>;

    /// Completion callback URL of a task.
    ///
    /// A missing task is [`Error::NotFound`]; a task submitted without a
    /// callback is `None`.
    async fn completion_callback(&self, task_guid: &str) -> Result<Option<String>>;

    /// Delete a task's registry secret and Job.
    ///
    /// Returns the task's completion callback, or `None` if the task was
    /// already gone. The Job goes last: it records the secret name and the
    /// callback, so a failed delete can be retried.
    async fn delete(&self, task_guid: &str) -> Result<Option<String>>;
}

/// [`TaskDesirer`] backed by Jobs
pub struct JobDesirer {
    client: Arc<dyn TaskKubeClient>,
    settings: TaskSettings,
}

fn validate_task_guid(task_guid: &str) -> Result<()> {
    if task_guid.is_empty() || !is_valid_label_value(task_guid) {
        return Err(Error::invalid_identity(format!(
            "task guid '{}' is not a valid label value",
            task_guid
        )));
    }
    Ok(())
}

fn annotation(job: &Job, key: &str) -> Option<String> {
    job.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .filter(|v| !v.is_empty())
        .cloned()
}

impl JobDesirer {
    /// Create a desirer over the given cluster client
    pub fn new(client: Arc<dyn TaskKubeClient>, settings: TaskSettings) -> Self {
        Self { client, settings }
    }

    async fn find(&self, task_guid: &str) -> Result<Option<Job>> {
        validate_task_guid(task_guid)?;
        let selector = label_selector(&task_selector_labels(task_guid));
        Ok(self.client.find_jobs(&selector).await?.pop())
    }
}

#[async_trait]
impl TaskDesirer for JobDesirer {
    async fn desire(&self, task: &Task) -> Result<()> {
        validate_task_guid(&task.guid)?;
        let namespace = &task.namespace;

        let secret_name = match &task.private_registry {
            Some(registry) => {
                let name = task_secret_name(task);
                let secret =
                    registry_secret(&name, namespace, task_selector_labels(&task.guid), registry)?;
                self.client.apply_secret(namespace, &secret).await?;
                Some(name)
            }
            None => None,
        };

        let job = build_job(task, &self.settings, secret_name.as_deref())?;
        if let Err(e) = self.client.create_job(namespace, &job).await {
            // Nothing references the secret without the Job
            if let Some(name) = &secret_name {
                if let Err(cleanup) = self.client.delete_secret(namespace, name).await {
                    return Err(Error::Multiple(vec![e, cleanup]));
                }
            }
            return Err(e);
        }

        info!(
            task_guid = %task.guid,
            %namespace,
            name = job.metadata.name.as_deref().unwrap_or_default(),
            "desired task"
        );
        Ok(())
    }

    async fn completion_callback(&self, task_guid: &str) -> Result<Option<String>> {
        let job = self
            .find(task_guid)
            .await?
            .ok_or_else(|| Error::not_found("Task", task_guid))?;
        Ok(annotation(&job, ANNOTATION_COMPLETION_CALLBACK))
    }

    async fn delete(&self, task_guid: &str) -> Result<Option<String>> {
        let Some(job) = self.find(task_guid).await? else {
            return Ok(None);
        };
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let name = job.metadata.name.clone().unwrap_or_default();

        if let Some(secret) = annotation(&job, ANNOTATION_REGISTRY_SECRET) {
            if let Err(e) = self.client.delete_secret(&namespace, &secret).await {
                warn!(%task_guid, %secret, error = %e, "failed to delete task registry secret");
                return Err(e);
            }
        }

        self.client.delete_job(&namespace, &name).await?;

        info!(%task_guid, %namespace, %name, "deleted task");
        Ok(Some(annotation(&job, ANNOTATION_COMPLETION_CALLBACK).unwrap_or_default()))
    }
}
