//! Cluster objects for a long-running process
//!
//! An LRP becomes a StatefulSet (stable ordinal pod names give instance
//! indexes), a PodDisruptionBudget while it has more than one instance, and
//! a pull secret while it uses a private registry.

use std::collections::BTreeMap;

use bifrost_common::kube_utils::is_valid_label_value;
use bifrost_common::opi::{Healthcheck, HealthcheckType, Lrp};
use bifrost_common::{
    LrpIdentifier, Result, ANNOTATION_APP_ID, ANNOTATION_APP_NAME, ANNOTATION_LAST_UPDATED,
    ANNOTATION_ORG_GUID, ANNOTATION_ORG_NAME, ANNOTATION_ORIGINAL_REQUEST,
    ANNOTATION_PROCESS_GUID, ANNOTATION_ROUTES, ANNOTATION_SPACE_GUID, ANNOTATION_SPACE_NAME,
    ANNOTATION_VERSION, LABEL_APP_GUID, LABEL_GUID, LABEL_PROCESS_TYPE, LABEL_SOURCE_TYPE,
    LABEL_VERSION, SOURCE_TYPE_APP,
};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use serde_json::json;

/// Name of the single application container
pub const APP_CONTAINER_NAME: &str = "opi";

/// Topology key instances are spread across
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Millicores of CPU requested per unit of CPU weight
const MILLICPU_PER_WEIGHT: i64 = 10;

/// Cluster-wide settings applied to every LRP
#[derive(Clone, Debug, Default)]
pub struct WorkloadSettings {
    /// Pull secret every pod references, if any
    pub registry_secret_name: String,
    /// Service account pods run as, if any
    pub service_account: String,
}

/// Name of the per-LRP pull secret
pub fn registry_secret_name(statefulset_name: &str) -> String {
    format!("{}-registry-credentials", statefulset_name)
}

/// Labels selecting every LRP workload
pub fn app_source_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_SOURCE_TYPE.to_string(), SOURCE_TYPE_APP.to_string())])
}

/// Labels selecting the pods of one LRP
pub fn selector_labels(id: &LrpIdentifier) -> BTreeMap<String, String> {
    let mut labels = id.selector_labels();
    labels.extend(app_source_labels());
    labels
}

fn workload_labels(lrp: &Lrp) -> BTreeMap<String, String> {
    let mut labels = selector_labels(&lrp.identifier);
    for (key, value) in [
        (LABEL_APP_GUID, &lrp.app_guid),
        (LABEL_PROCESS_TYPE, &lrp.process_type),
    ] {
        if !value.is_empty() && is_valid_label_value(value) {
            labels.insert(key.to_string(), value.clone());
        }
    }
    labels
}

fn workload_annotations(lrp: &Lrp) -> BTreeMap<String, String> {
    let mut annotations = lrp.user_defined_annotations.clone();
    annotations.extend(
        [
            (ANNOTATION_PROCESS_GUID, lrp.identifier.process_guid()),
            (ANNOTATION_VERSION, lrp.identifier.version.clone()),
            (ANNOTATION_LAST_UPDATED, lrp.last_updated.clone()),
            (ANNOTATION_ROUTES, lrp.app_uris.clone()),
            (ANNOTATION_APP_NAME, lrp.app_name.clone()),
            (ANNOTATION_APP_ID, lrp.app_guid.clone()),
            (ANNOTATION_SPACE_NAME, lrp.space_name.clone()),
            (ANNOTATION_SPACE_GUID, lrp.space_guid.clone()),
            (ANNOTATION_ORG_NAME, lrp.org_name.clone()),
            (ANNOTATION_ORG_GUID, lrp.org_guid.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v)),
    );
    if !lrp.original_request.is_empty() {
        annotations.insert(
            ANNOTATION_ORIGINAL_REQUEST.to_string(),
            lrp.original_request.clone(),
        );
    }
    annotations
}

fn probe(health: &Healthcheck, failure_threshold: i32) -> Option<serde_json::Value> {
    let timeout_seconds = (health.timeout_ms.div_ceil(1000)).max(1);
    let action = match health.kind {
        HealthcheckType::Http => json!({
            "httpGet": { "path": health.endpoint, "port": health.port }
        }),
        HealthcheckType::Port => json!({
            "tcpSocket": { "port": health.port }
        }),
        HealthcheckType::Process => return None,
    };
    let mut probe = action;
    probe["timeoutSeconds"] = json!(timeout_seconds);
    probe["failureThreshold"] = json!(failure_threshold);
    Some(probe)
}

/// Resource block shared by LRP and task containers
pub(crate) fn resources(memory_mb: i64, disk_mb: i64, cpu_weight: u8) -> serde_json::Value {
    let mut limits = serde_json::Map::new();
    let mut requests = serde_json::Map::new();
    if memory_mb > 0 {
        limits.insert("memory".to_string(), json!(format!("{}M", memory_mb)));
        requests.insert("memory".to_string(), json!(format!("{}M", memory_mb)));
    }
    if disk_mb > 0 {
        limits.insert(
            "ephemeral-storage".to_string(),
            json!(format!("{}M", disk_mb)),
        );
    }
    if cpu_weight > 0 {
        requests.insert(
            "cpu".to_string(),
            json!(format!("{}m", i64::from(cpu_weight) * MILLICPU_PER_WEIGHT)),
        );
    }
    json!({ "limits": limits, "requests": requests })
}

/// Environment block shared by LRP and task containers, sorted by name
pub(crate) fn env_list(env: &BTreeMap<String, String>) -> Vec<serde_json::Value> {
    env.iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect()
}

/// Build the StatefulSet for an LRP
pub fn build_statefulset(lrp: &Lrp, settings: &WorkloadSettings) -> Result<StatefulSet> {
    let name = lrp.identifier.object_name();
    let labels = workload_labels(lrp);
    let annotations = workload_annotations(lrp);
    let selector = selector_labels(&lrp.identifier);

    let mut container = json!({
        "name": APP_CONTAINER_NAME,
        "image": lrp.image,
        "command": lrp.command,
        "env": env_list(&lrp.env),
        "ports": lrp.ports.iter().map(|p| json!({ "containerPort": p })).collect::<Vec<_>>(),
        "resources": resources(lrp.memory_mb, lrp.disk_mb, lrp.cpu_weight),
        "volumeMounts": lrp.volume_mounts.iter().map(|vm| json!({
            "name": vm.claim_name,
            "mountPath": vm.mount_path,
        })).collect::<Vec<_>>(),
    });
    if let Some(liveness) = probe(&lrp.health, 4) {
        container["livenessProbe"] = liveness;
    }
    if let Some(readiness) = probe(&lrp.health, 1) {
        container["readinessProbe"] = readiness;
    }

    let mut pull_secrets = Vec::new();
    if !settings.registry_secret_name.is_empty() {
        pull_secrets.push(json!({ "name": settings.registry_secret_name }));
    }
    if lrp.private_registry.is_some() {
        pull_secrets.push(json!({ "name": registry_secret_name(&name) }));
    }

    let mut pod_spec = json!({
        "containers": [container],
        "imagePullSecrets": pull_secrets,
        "automountServiceAccountToken": false,
        "volumes": lrp.volume_mounts.iter().map(|vm| json!({
            "name": vm.claim_name,
            "persistentVolumeClaim": { "claimName": vm.claim_name },
        })).collect::<Vec<_>>(),
        "affinity": {
            "podAntiAffinity": {
                "preferredDuringSchedulingIgnoredDuringExecution": [{
                    "weight": 100,
                    "podAffinityTerm": {
                        "topologyKey": HOSTNAME_TOPOLOGY_KEY,
                        "labelSelector": { "matchLabels": selector },
                    },
                }],
            },
        },
    });
    if !settings.service_account.is_empty() {
        pod_spec["serviceAccountName"] = json!(settings.service_account);
    }

    let statefulset = json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": {
            "name": name,
            "namespace": lrp.namespace,
            "labels": labels,
            "annotations": annotations,
        },
        "spec": {
            "replicas": lrp.target_instances,
            "podManagementPolicy": "Parallel",
            "selector": { "matchLabels": selector },
            "template": {
                "metadata": {
                    "labels": labels,
                    "annotations": {
                        (ANNOTATION_PROCESS_GUID): lrp.identifier.process_guid(),
                        (ANNOTATION_APP_NAME): lrp.app_name,
                    },
                },
                "spec": pod_spec,
            },
        },
    });
    Ok(serde_json::from_value(statefulset)?)
}

/// Build the disruption budget for a multi-instance LRP
pub fn build_pdb(id: &LrpIdentifier, namespace: &str) -> Result<PodDisruptionBudget> {
    let selector = selector_labels(id);
    let pdb = json!({
        "apiVersion": "policy/v1",
        "kind": "PodDisruptionBudget",
        "metadata": {
            "name": id.object_name(),
            "namespace": namespace,
            "labels": selector,
        },
        "spec": {
            "minAvailable": 1,
            "selector": { "matchLabels": selector },
        },
    });
    Ok(serde_json::from_value(pdb)?)
}

/// Merge patch applied by an update
pub fn update_patch(instances: i32, last_updated: &str, routes: &str) -> serde_json::Value {
    json!({
        "metadata": {
            "annotations": {
                (ANNOTATION_LAST_UPDATED): last_updated,
                (ANNOTATION_ROUTES): routes,
            }
        },
        "spec": { "replicas": instances },
    })
}

// =============================================================================
// Reading objects back
// =============================================================================

fn parse_megabytes(quantity: &str) -> i64 {
    quantity
        .trim_end_matches('M')
        .parse()
        .unwrap_or_default()
}

/// Identity recorded on a StatefulSet's labels
pub fn identifier_of(statefulset: &StatefulSet) -> Option<LrpIdentifier> {
    let labels = statefulset.metadata.labels.as_ref()?;
    Some(LrpIdentifier::new(
        labels.get(LABEL_GUID)?.clone(),
        labels.get(LABEL_VERSION)?.clone(),
    ))
}

/// Reconstruct the descriptor a StatefulSet was built from.
///
/// Registry credentials and health checks are not read back.
pub fn lrp_from_statefulset(statefulset: &StatefulSet) -> Lrp {
    let meta = &statefulset.metadata;
    let annotations = meta.annotations.clone().unwrap_or_default();
    let labels = meta.labels.clone().unwrap_or_default();
    let annotation = |key: &str| annotations.get(key).cloned().unwrap_or_default();

    let container = statefulset
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first());

    let limits = container
        .and_then(|c| c.resources.as_ref())
        .and_then(|r| r.limits.clone())
        .unwrap_or_default();

    Lrp {
        identifier: identifier_of(statefulset).unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        process_type: labels.get(LABEL_PROCESS_TYPE).cloned().unwrap_or_default(),
        app_guid: annotation(ANNOTATION_APP_ID),
        app_name: annotation(ANNOTATION_APP_NAME),
        space_guid: annotation(ANNOTATION_SPACE_GUID),
        space_name: annotation(ANNOTATION_SPACE_NAME),
        org_guid: annotation(ANNOTATION_ORG_GUID),
        org_name: annotation(ANNOTATION_ORG_NAME),
        image: container.and_then(|c| c.image.clone()).unwrap_or_default(),
        command: container.and_then(|c| c.command.clone()).unwrap_or_default(),
        env: container
            .and_then(|c| c.env.as_ref())
            .map(|env| {
                env.iter()
                    .map(|var| (var.name.clone(), var.value.clone().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default(),
        target_instances: statefulset
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or_default(),
        ports: container
            .and_then(|c| c.ports.as_ref())
            .map(|ports| ports.iter().map(|p| p.container_port).collect())
            .unwrap_or_default(),
        memory_mb: limits.get("memory").map(|q| parse_megabytes(&q.0)).unwrap_or_default(),
        disk_mb: limits
            .get("ephemeral-storage")
            .map(|q| parse_megabytes(&q.0))
            .unwrap_or_default(),
        app_uris: annotation(ANNOTATION_ROUTES),
        last_updated: annotation(ANNOTATION_LAST_UPDATED),
        original_request: annotation(ANNOTATION_ORIGINAL_REQUEST),
        ..Default::default()
    }
}
