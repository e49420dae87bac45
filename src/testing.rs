//! In-memory cluster for desirer tests
//!
//! Implements both cluster traits over a shared object store so tests can
//! assert on the resulting cluster state instead of on call sequences.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bifrost_common::Error;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::ObjectMeta;

use crate::lrp::LrpKubeClient;
use crate::task::TaskKubeClient;

type Key = (String, String);

#[derive(Default)]
struct Store {
    statefulsets: BTreeMap<Key, StatefulSet>,
    pods: BTreeMap<Key, Pod>,
    pdbs: BTreeMap<Key, PodDisruptionBudget>,
    secrets: BTreeMap<Key, Secret>,
    jobs: BTreeMap<Key, Job>,
    failing: BTreeSet<String>,
}

/// Fake cluster shared by the LRP and task desirer tests
#[derive(Default)]
pub struct FakeCluster {
    store: Mutex<Store>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(namespace: &str, meta: &ObjectMeta) -> Key {
    key(namespace, meta.name.as_deref().unwrap_or_default())
}

/// `k=v,k=v` selector against an object's labels
fn matches(selector: &str, meta: &ObjectMeta) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

/// JSON merge patch
fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(serde_json::Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn with_namespace(mut meta: ObjectMeta, namespace: &str) -> ObjectMeta {
    meta.namespace = Some(namespace.to_string());
    meta
}

fn server_error(operation: &str) -> Error {
    Error::cluster_api(
        operation,
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("injected failure in {}", operation),
            reason: "InternalError".to_string(),
            code: 500,
        }),
    )
}

impl FakeCluster {
    /// Make every later call of `operation` fail with a server error
    pub fn fail(&self, operation: &str) {
        self.lock().failing.insert(operation.to_string());
    }

    /// Stop injecting failures
    pub fn recover(&self) {
        self.lock().failing.clear();
    }

    /// Seed a pod
    pub fn add_pod(&self, pod: Pod) {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let k = meta_key(&namespace, &pod.metadata);
        self.lock().pods.insert(k, pod);
    }

    pub fn has_statefulset(&self, namespace: &str, name: &str) -> bool {
        self.lock().statefulsets.contains_key(&key(namespace, name))
    }

    pub fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.lock().pods.contains_key(&key(namespace, name))
    }

    pub fn has_pdb(&self, namespace: &str, name: &str) -> bool {
        self.lock().pdbs.contains_key(&key(namespace, name))
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.lock().secrets.contains_key(&key(namespace, name))
    }

    pub fn pdb_count(&self) -> usize {
        self.lock().pdbs.len()
    }

    pub fn secret_count(&self) -> usize {
        self.lock().secrets.len()
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.lock().secrets.keys().map(|(_, name)| name.clone()).collect()
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap()
    }

    fn check(&self, operation: &str) -> Result<std::sync::MutexGuard<'_, Store>, Error> {
        let store = self.lock();
        if store.failing.contains(operation) {
            return Err(server_error(operation));
        }
        Ok(store)
    }
}

#[async_trait]
impl LrpKubeClient for FakeCluster {
    async fn create_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error> {
        let mut store = self.check("create_statefulset")?;
        let k = meta_key(namespace, &sts.metadata);
        if store.statefulsets.contains_key(&k) {
            return Err(Error::already_exists("StatefulSet", k.1));
        }
        let mut sts = sts.clone();
        sts.metadata = with_namespace(sts.metadata, namespace);
        store.statefulsets.insert(k, sts);
        Ok(())
    }

    async fn find_statefulsets(&self, selector: &str) -> Result<Vec<StatefulSet>, Error> {
        let store = self.check("find_statefulsets")?;
        Ok(store
            .statefulsets
            .values()
            .filter(|s| matches(selector, &s.metadata))
            .cloned()
            .collect())
    }

    async fn patch_statefulset(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let mut store = self.check("patch_statefulset")?;
        let Some(existing) = store.statefulsets.get_mut(&key(namespace, name)) else {
            return Err(Error::not_found("StatefulSet", name));
        };
        let mut value = serde_json::to_value(&*existing)?;
        merge(&mut value, patch);
        *existing = serde_json::from_value(value)?;
        Ok(())
    }

    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut store = self.check("delete_statefulset")?;
        store.statefulsets.remove(&key(namespace, name));
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let store = self.check("list_pods")?;
        Ok(store
            .pods
            .iter()
            .filter(|((ns, _), p)| ns == namespace && matches(selector, &p.metadata))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn list_all_pods(&self, selector: &str) -> Result<Vec<Pod>, Error> {
        let store = self.check("list_all_pods")?;
        Ok(store
            .pods
            .values()
            .filter(|p| matches(selector, &p.metadata))
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut store = self.check("delete_pod")?;
        match store.pods.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(Error::not_found("Pod", name)),
        }
    }

    async fn get_pdb(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodDisruptionBudget>, Error> {
        let store = self.check("get_pdb")?;
        Ok(store.pdbs.get(&key(namespace, name)).cloned())
    }

    async fn create_pdb(&self, namespace: &str, pdb: &PodDisruptionBudget) -> Result<(), Error> {
        let mut store = self.check("create_pdb")?;
        let k = meta_key(namespace, &pdb.metadata);
        if store.pdbs.contains_key(&k) {
            return Err(Error::already_exists("PodDisruptionBudget", k.1));
        }
        let mut pdb = pdb.clone();
        pdb.metadata = with_namespace(pdb.metadata, namespace);
        store.pdbs.insert(k, pdb);
        Ok(())
    }

    async fn delete_pdb(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut store = self.check("delete_pdb")?;
        store.pdbs.remove(&key(namespace, name));
        Ok(())
    }

    async fn find_pdbs(&self, selector: &str) -> Result<Vec<PodDisruptionBudget>, Error> {
        let store = self.check("find_pdbs")?;
        Ok(store
            .pdbs
            .values()
            .filter(|p| matches(selector, &p.metadata))
            .cloned()
            .collect())
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let mut store = self.check("apply_secret")?;
        let mut secret = secret.clone();
        secret.metadata = with_namespace(secret.metadata, namespace);
        store
            .secrets
            .insert(meta_key(namespace, &secret.metadata), secret);
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut store = self.check("delete_secret")?;
        store.secrets.remove(&key(namespace, name));
        Ok(())
    }

    async fn find_secrets(&self, selector: &str) -> Result<Vec<Secret>, Error> {
        let store = self.check("find_secrets")?;
        Ok(store
            .secrets
            .values()
            .filter(|s| matches(selector, &s.metadata))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TaskKubeClient for FakeCluster {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error> {
        let mut store = self.check("create_job")?;
        let k = meta_key(namespace, &job.metadata);
        if store.jobs.contains_key(&k) {
            return Err(Error::already_exists("Job", k.1));
        }
        let mut job = job.clone();
        job.metadata = with_namespace(job.metadata, namespace);
        store.jobs.insert(k, job);
        Ok(())
    }

    async fn find_jobs(&self, selector: &str) -> Result<Vec<Job>, Error> {
        let store = self.check("find_jobs")?;
        Ok(store
            .jobs
            .values()
            .filter(|j| matches(selector, &j.metadata))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut store = self.check("delete_job")?;
        store.jobs.remove(&key(namespace, name));
        Ok(())
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        LrpKubeClient::apply_secret(self, namespace, secret).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        LrpKubeClient::delete_secret(self, namespace, name).await
    }
}
