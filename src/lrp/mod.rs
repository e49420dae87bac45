//! LRP desirer
//!
//! Reconciles canonical LRP descriptors against StatefulSets. Each identity
//! moves Absent -> Present(N) -> Absent:
//!
//! - `desire` creates; an existing identity is [`Error::AlreadyExists`]
//! - `update` patches; a missing identity is [`Error::NotFound`]
//! - `stop` deletes and is idempotent
//!
//! Dependent resources are a function of the current descriptor: a
//! PodDisruptionBudget exists iff `instances > 1`, a pull secret exists iff
//! the descriptor carries registry credentials. Both are re-asserted on
//! every call that can change them.

pub mod client;
pub mod instances;
pub mod statefulset;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bifrost_common::kube_utils::label_selector;
use bifrost_common::opi::{Lrp, RunningLrp};
use bifrost_common::{Error, LrpIdentifier, Result, LABEL_GUID, LABEL_VERSION};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::registry::registry_secret;
pub use client::{LrpKubeClient, LrpKubeClientImpl};
use statefulset::{
    app_source_labels, build_pdb, build_statefulset, identifier_of, lrp_from_statefulset,
    registry_secret_name, selector_labels, update_patch, WorkloadSettings,
};

/// Capability the façade depends on for long-running processes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LrpDesirer: Send + Sync {
    /// Create the workload and its dependent resources
    async fn desire(&self, lrp: &Lrp) -> Result<()>;

    /// Patch instance count, last-updated marker and routes of an existing workload
    ///
    /// The registry secret is re-applied only when `lrp` carries credentials;
    /// otherwise the existing secret is kept.
    async fn update(&self, lrp: &Lrp) -> Result<()>;

    /// Declared shape and live status of one workload
    async fn get(&self, id: &LrpIdentifier) -> Result<RunningLrp>;

    /// Every workload in scope; empty when there are none
    async fn list(&self) -> Result<Vec<RunningLrp>>;

    /// Delete the workload and its dependent resources
    async fn stop(&self, id: &LrpIdentifier) -> Result<()>;

    /// Delete the instance with the given ordinal
    async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()>;
}

/// [`LrpDesirer`] backed by StatefulSets
pub struct StatefulSetDesirer {
    client: Arc<dyn LrpKubeClient>,
    settings: WorkloadSettings,
}

impl StatefulSetDesirer {
    /// Create a desirer over the given cluster client
    pub fn new(client: Arc<dyn LrpKubeClient>, settings: WorkloadSettings) -> Self {
        Self { client, settings }
    }

    async fn find(&self, id: &LrpIdentifier) -> Result<Option<StatefulSet>> {
        let selector = label_selector(&selector_labels(id));
        let mut found = self.client.find_statefulsets(&selector).await?;
        Ok(found.pop())
    }

    async fn find_existing(&self, id: &LrpIdentifier) -> Result<StatefulSet> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::not_found("LRP", id.process_guid()))
    }

    /// Create the disruption budget if `instances > 1`, delete it otherwise
    async fn assert_pdb_policy(
        &self,
        id: &LrpIdentifier,
        namespace: &str,
        instances: i32,
    ) -> Result<()> {
        let name = id.object_name();
        let existing = self.client.get_pdb(namespace, &name).await?;
        match (instances > 1, existing.is_some()) {
            (true, false) => {
                match self.client.create_pdb(namespace, &build_pdb(id, namespace)?).await {
                    Err(e) if !e.is_already_exists() => return Err(e),
                    _ => {}
                }
                debug!(guid = %id.guid, version = %id.version, %namespace, "created pod disruption budget");
            }
            (false, true) => {
                self.client.delete_pdb(namespace, &name).await?;
                debug!(guid = %id.guid, version = %id.version, %namespace, "deleted pod disruption budget");
            }
            _ => {}
        }
        Ok(())
    }

    fn running_lrp(&self, statefulset: &StatefulSet, pods: &[&Pod]) -> RunningLrp {
        let (instances, running_instances) = instances::project_instances(pods.iter().copied());
        RunningLrp {
            lrp: lrp_from_statefulset(statefulset),
            running_instances,
            instances,
        }
    }
}

fn namespace_of(statefulset: &StatefulSet) -> String {
    statefulset.metadata.namespace.clone().unwrap_or_default()
}

fn name_of(statefulset: &StatefulSet) -> String {
    statefulset.metadata.name.clone().unwrap_or_default()
}

fn object_key(meta: &ObjectMeta) -> (&str, &str) {
    (
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

#[async_trait]
impl LrpDesirer for StatefulSetDesirer {
    async fn desire(&self, lrp: &Lrp) -> Result<()> {
        let id = &lrp.identifier;
        id.validate()?;

        if self.find(id).await?.is_some() {
            return Err(Error::already_exists("LRP", id.process_guid()));
        }

        let name = id.object_name();
        let namespace = &lrp.namespace;

        if let Some(registry) = &lrp.private_registry {
            let secret = registry_secret(
                &registry_secret_name(&name),
                namespace,
                selector_labels(id),
                registry,
            )?;
            self.client.apply_secret(namespace, &secret).await?;
        }

        let statefulset = build_statefulset(lrp, &self.settings)?;
        if let Err(e) = self.client.create_statefulset(namespace, &statefulset).await {
            // A conflicting create means the secret belongs to the existing workload
            if lrp.private_registry.is_some() && !e.is_already_exists() {
                let secret = registry_secret_name(&name);
                if let Err(cleanup) = self.client.delete_secret(namespace, &secret).await {
                    return Err(Error::Multiple(vec![e, cleanup]));
                }
            }
            return Err(e);
        }

        self.assert_pdb_policy(id, namespace, lrp.target_instances)
            .await?;

        info!(
            guid = %id.guid,
            version = %id.version,
            %namespace,
            %name,
            instances = lrp.target_instances,
            "desired lrp"
        );
        Ok(())
    }

    async fn update(&self, lrp: &Lrp) -> Result<()> {
        let id = &lrp.identifier;
        id.validate()?;

        let existing = self.find_existing(id).await?;
        let namespace = namespace_of(&existing);
        let name = name_of(&existing);

        let patch = update_patch(lrp.target_instances, &lrp.last_updated, &lrp.app_uris);
        self.client
            .patch_statefulset(&namespace, &name, &patch)
            .await?;

        self.assert_pdb_policy(id, &namespace, lrp.target_instances)
            .await?;

        if let Some(registry) = &lrp.private_registry {
            let secret = registry_secret(
                &registry_secret_name(&name),
                &namespace,
                selector_labels(id),
                registry,
            )?;
            self.client.apply_secret(&namespace, &secret).await?;
        }

        info!(
            guid = %id.guid,
            version = %id.version,
            %namespace,
            instances = lrp.target_instances,
            "updated lrp"
        );
        Ok(())
    }

    async fn get(&self, id: &LrpIdentifier) -> Result<RunningLrp> {
        id.validate()?;
        let statefulset = self.find_existing(id).await?;
        let pods = self
            .client
            .list_pods(
                &namespace_of(&statefulset),
                &label_selector(&selector_labels(id)),
            )
            .await?;
        let pods: Vec<&Pod> = pods.iter().collect();
        Ok(self.running_lrp(&statefulset, &pods))
    }

    async fn list(&self) -> Result<Vec<RunningLrp>> {
        let selector = label_selector(&app_source_labels());
        let statefulsets = self.client.find_statefulsets(&selector).await?;
        if statefulsets.is_empty() {
            return Ok(Vec::new());
        }

        let pods = self.client.list_all_pods(&selector).await?;
        let mut by_identity: BTreeMap<LrpIdentifier, Vec<&Pod>> = BTreeMap::new();
        for pod in &pods {
            let labels = pod.metadata.labels.as_ref();
            let guid = labels.and_then(|l| l.get(LABEL_GUID));
            let version = labels.and_then(|l| l.get(LABEL_VERSION));
            if let (Some(guid), Some(version)) = (guid, version) {
                by_identity
                    .entry(LrpIdentifier::new(guid, version))
                    .or_default()
                    .push(pod);
            }
        }

        let mut running = Vec::with_capacity(statefulsets.len());
        for statefulset in &statefulsets {
            let pods = identifier_of(statefulset)
                .and_then(|id| by_identity.get(&id))
                .cloned()
                .unwrap_or_default();
            running.push(self.running_lrp(statefulset, &pods));
        }
        Ok(running)
    }

    async fn stop(&self, id: &LrpIdentifier) -> Result<()> {
        id.validate()?;

        match self.find(id).await? {
            Some(existing) => {
                let namespace = namespace_of(&existing);
                let name = name_of(&existing);
                self.client.delete_statefulset(&namespace, &name).await?;
                info!(guid = %id.guid, version = %id.version, %namespace, %name, "stopped lrp");
            }
            None => debug!(guid = %id.guid, version = %id.version, "lrp already absent"),
        }

        // Dependents are found by label rather than through the StatefulSet,
        // so a stop retried after a failed cleanup still reaches them
        let selector = label_selector(&selector_labels(id));
        let mut cleanup_errors = Vec::new();
        match self.client.find_pdbs(&selector).await {
            Ok(pdbs) => {
                for pdb in &pdbs {
                    let (namespace, name) = object_key(&pdb.metadata);
                    if let Err(e) = self.client.delete_pdb(namespace, name).await {
                        cleanup_errors.push(e);
                    }
                }
            }
            Err(e) => cleanup_errors.push(e),
        }
        match self.client.find_secrets(&selector).await {
            Ok(secrets) => {
                for secret in &secrets {
                    let (namespace, name) = object_key(&secret.metadata);
                    if let Err(e) = self.client.delete_secret(namespace, name).await {
                        cleanup_errors.push(e);
                    }
                }
            }
            Err(e) => cleanup_errors.push(e),
        }

        match Error::combine(cleanup_errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()> {
        id.validate()?;
        let existing = self.find_existing(id).await?;
        let instances = existing
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or_default();
        if i64::from(index) >= i64::from(instances) {
            return Err(Error::InvalidInstanceIndex { index, instances });
        }

        let namespace = namespace_of(&existing);
        let pod_name = format!("{}-{}", name_of(&existing), index);
        self.client.delete_pod(&namespace, &pod_name).await?;

        info!(guid = %id.guid, version = %id.version, %namespace, index, "stopped lrp instance");
        Ok(())
    }
}
