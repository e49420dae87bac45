//! Cluster access for the LRP desirer
//!
//! The trait is the seam between desirer logic and the Kubernetes API.
//! Implementations translate API status codes into the domain taxonomy:
//! 409 on create is [`Error::AlreadyExists`], 404 on get is `None`, 404 on
//! delete is success.

use async_trait::async_trait;
use bifrost_common::error::{is_kube_conflict, is_kube_not_found};
use bifrost_common::{Error, FIELD_MANAGER};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;

/// Cluster operations the LRP desirer needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LrpKubeClient: Send + Sync {
    /// Create a StatefulSet
    async fn create_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error>;

    /// Find StatefulSets across all namespaces by label selector
    async fn find_statefulsets(&self, selector: &str) -> Result<Vec<StatefulSet>, Error>;

    /// Merge-patch a StatefulSet
    async fn patch_statefulset(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Delete a StatefulSet and, in the background, its pods
    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List pods in a namespace by label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// List pods across all namespaces by label selector
    async fn list_all_pods(&self, selector: &str) -> Result<Vec<Pod>, Error>;

    /// Delete a single pod; a missing pod is [`Error::NotFound`]
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get a PodDisruptionBudget
    async fn get_pdb(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodDisruptionBudget>, Error>;

    /// Create a PodDisruptionBudget
    async fn create_pdb(&self, namespace: &str, pdb: &PodDisruptionBudget) -> Result<(), Error>;

    /// Delete a PodDisruptionBudget
    async fn delete_pdb(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Find PodDisruptionBudgets across all namespaces by label selector
    async fn find_pdbs(&self, selector: &str) -> Result<Vec<PodDisruptionBudget>, Error>;

    /// Create or update a Secret with server-side apply
    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Delete a Secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Find Secrets across all namespaces by label selector
    async fn find_secrets(&self, selector: &str) -> Result<Vec<Secret>, Error>;
}

/// Real Kubernetes client implementation
pub struct LrpKubeClientImpl {
    client: Client,
}

impl LrpKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn object_name(meta: &kube::api::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

/// Treat 404 on delete as success
fn ignore_not_found(
    result: Result<impl Sized, kube::Error>,
    operation: &str,
) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_kube_not_found(&e) => Ok(()),
        Err(e) => Err(Error::cluster_api(operation, e)),
    }
}

#[async_trait]
impl LrpKubeClient for LrpKubeClientImpl {
    async fn create_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), sts).await {
            Ok(_) => Ok(()),
            Err(e) if is_kube_conflict(&e) => {
                Err(Error::already_exists("StatefulSet", object_name(&sts.metadata)))
            }
            Err(e) => Err(Error::cluster_api("create statefulset", e)),
        }
    }

    async fn find_statefulsets(&self, selector: &str) -> Result<Vec<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster_api("list statefulsets", e))?;
        Ok(list.items)
    }

    async fn patch_statefulset(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_kube_not_found(&e) => Err(Error::not_found("StatefulSet", name)),
            Err(e) => Err(Error::cluster_api("patch statefulset", e)),
        }
    }

    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::background()).await,
            "delete statefulset",
        )
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster_api("list pods", e))?;
        Ok(list.items)
    }

    async fn list_all_pods(&self, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster_api("list pods", e))?;
        Ok(list.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_kube_not_found(&e) => Err(Error::not_found("Pod", name)),
            Err(e) => Err(Error::cluster_api("delete pod", e)),
        }
    }

    async fn get_pdb(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodDisruptionBudget>, Error> {
        let api: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(pdb) => Ok(Some(pdb)),
            Err(e) if is_kube_not_found(&e) => Ok(None),
            Err(e) => Err(Error::cluster_api("get pod disruption budget", e)),
        }
    }

    async fn create_pdb(&self, namespace: &str, pdb: &PodDisruptionBudget) -> Result<(), Error> {
        let api: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), pdb).await {
            Ok(_) => Ok(()),
            Err(e) if is_kube_conflict(&e) => Err(Error::already_exists(
                "PodDisruptionBudget",
                object_name(&pdb.metadata),
            )),
            Err(e) => Err(Error::cluster_api("create pod disruption budget", e)),
        }
    }

    async fn delete_pdb(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default()).await,
            "delete pod disruption budget",
        )
    }

    async fn find_pdbs(&self, selector: &str) -> Result<Vec<PodDisruptionBudget>, Error> {
        let api: Api<PodDisruptionBudget> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster_api("list pod disruption budgets", e))?;
        Ok(list.items)
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let name = object_name(&secret.metadata);
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
        ignore_not_found(
            api.delete(name, &DeleteParams::default()).await,
            "delete secret",
        )
    }

    async fn find_secrets(&self, selector: &str) -> Result<Vec<Secret>, Error> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster_api("list secrets", e))?;
        Ok(list.items)
    }
}
