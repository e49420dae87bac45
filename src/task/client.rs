//! Cluster access for the task desirer

use async_trait::async_trait;
use bifrost_common::error::{is_kube_conflict, is_kube_not_found};
use bifrost_common::{Error, FIELD_MANAGER};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;

/// Cluster operations the task desirer needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskKubeClient: Send + Sync {
    /// Create a Job; an existing name is [`Error::AlreadyExists`]
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error>;

    /// Find Jobs across all namespaces by label selector
    async fn find_jobs(&self, selector: &str) -> Result<Vec<Job>, Error>;

    /// Delete a Job and its pods; a missing Job is success
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create or update a Secret with server-side apply
    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Delete a Secret; a missing Secret is success
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct TaskKubeClientImpl {
    client: Client,
}

impl TaskKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskKubeClient for TaskKubeClientImpl {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), job).await {
            Ok(_) => Ok(()),
            Err(e) if is_kube_conflict(&e) => Err(Error::already_exists(
                "Job",
                job.metadata.name.clone().unwrap_or_default(),
            )),
            Err(e) => Err(Error::cluster_api("create job", e)),
        }
    }

    async fn find_jobs(&self, selector: &str) -> Result<Vec<Job>, Error> {
        let api: Api<Job> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster_api("list jobs", e))?;
        Ok(list.items)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::foreground()).await {
            Ok(_) => Ok(()),
            Err(e) if is_kube_not_found(&e) => Ok(()),
            Err(e) => Err(Error::cluster_api("delete job", e)),
        }
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let name = secret.metadata.name.clone().unwrap_or_default();
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(secret),
        )
        .await
        .map_err(|e| Error::cluster_api("apply secret", e))?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_kube_not_found(&e) => Ok(()),
            Err(e) => Err(Error::cluster_api("delete secret", e)),
        }
    }
}
