//! Private registry pull secrets
//!
//! Workloads pulling from a private registry get their own
//! `kubernetes.io/dockerconfigjson` secret. It lives exactly as long as the
//! workload that references it.

use std::collections::BTreeMap;

use bifrost_common::kube_utils::{docker_config_json, DOCKER_CONFIG_JSON_KEY, DOCKER_CONFIG_JSON_TYPE};
use bifrost_common::opi::PrivateRegistry;
use bifrost_common::Result;
use k8s_openapi::api::core::v1::Secret;

/// Build the pull secret for a registry login
pub fn registry_secret(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    registry: &PrivateRegistry,
) -> Result<Secret> {
    let payload = docker_config_json(&registry.server, &registry.username, &registry.password)?;
    let secret = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": labels,
        },
        "type": DOCKER_CONFIG_JSON_TYPE,
        "stringData": {
            (DOCKER_CONFIG_JSON_KEY): payload,
        }
    });
    Ok(serde_json::from_value(secret)?)
}
