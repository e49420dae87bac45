use std::collections::BTreeMap;

use bifrost_common::cf::{DesireLrpRequest, Routes};
use bifrost_common::opi::{Healthcheck, HealthcheckType, Lrp, VolumeMount, DEFAULT_APP_PORT};
use bifrost_common::{Error, Result, CF_ROUTER_KEY};
use serde::Deserialize;

use super::{merge_env, Converter};

/// Environment variable the control plane uses to describe the app
const VCAP_APPLICATION_ENV: &str = "VCAP_APPLICATION";

/// Subset of `VCAP_APPLICATION` used to fill in names the request omits
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VcapApplication {
    application_name: String,
    application_id: String,
    space_name: String,
    space_id: String,
}

fn baseline_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("LANG".to_string(), "en_US.UTF-8".to_string()),
        ("CF_INSTANCE_ADDR".to_string(), "0.0.0.0:8080".to_string()),
        ("CF_INSTANCE_PORT".to_string(), "8080".to_string()),
        (
            "CF_INSTANCE_PORTS".to_string(),
            r#"[{"external":8080,"internal":8080}]"#.to_string(),
        ),
    ])
}

/// Routing payload carried by a workload: the `cf-router` route group as
/// JSON text, or the empty string when the request has none.
pub fn routes_payload(routes: &Routes) -> Result<String> {
    match routes.get(CF_ROUTER_KEY) {
        Some(group) => Ok(serde_json::to_string(group)?),
        None => Ok(String::new()),
    }
}

/// Inverse of [`routes_payload`]: empty payload means no route groups
pub fn routes_from_payload(payload: &str) -> Result<Routes> {
    if payload.is_empty() {
        return Ok(Routes::new());
    }
    let group: serde_json::Value = serde_json::from_str(payload)?;
    Ok(Routes::from([(CF_ROUTER_KEY.to_string(), group)]))
}

impl Converter {
    /// Convert a desire request into an LRP descriptor
    pub fn convert_lrp(&self, request: &DesireLrpRequest) -> Result<Lrp> {
        let lifecycle = request.lifecycle()?;
        let vcap = match request.environment.get(VCAP_APPLICATION_ENV) {
            Some(raw) if !raw.is_empty() => serde_json::from_str::<VcapApplication>(raw)
                .map_err(|e| Error::conversion(format!("failed to parse vcap app: {}", e)))?,
            _ => VcapApplication::default(),
        };

        let resolved = self.resolve_image(lifecycle);
        let port = resolved
            .port
            .or_else(|| request.ports.first().copied())
            .unwrap_or(DEFAULT_APP_PORT);

        let health = Healthcheck {
            kind: HealthcheckType::from(request.health_check_type.as_str()),
            endpoint: request.health_check_http_endpoint.clone(),
            timeout_ms: request.health_check_timeout_ms,
            port,
        };

        let volume_mounts = request
            .volume_mounts
            .iter()
            .map(|vm| VolumeMount {
                claim_name: vm.volume_id.clone(),
                mount_path: vm.mount_dir.clone(),
            })
            .collect();

        Ok(Lrp {
            identifier: request.identifier(),
            namespace: self.namespace_or_default(request.namespace.as_deref()),
            process_type: request.process_type.clone(),
            app_guid: first_non_empty(&request.app_guid, vcap.application_id),
            app_name: first_non_empty(&request.app_name, vcap.application_name),
            space_guid: first_non_empty(&request.space_guid, vcap.space_id),
            space_name: first_non_empty(&request.space_name, vcap.space_name),
            org_guid: request.organization_guid.clone(),
            org_name: request.organization_name.clone(),
            image: resolved.image,
            command: resolved.command,
            env: merge_env([&baseline_env(), &resolved.env, &request.environment]),
            target_instances: request.instances,
            health,
            ports: request.ports.clone(),
            memory_mb: request.memory_mb,
            disk_mb: request.disk_mb,
            cpu_weight: request.cpu_weight,
            volume_mounts,
            app_uris: routes_payload(&request.routes)?,
            last_updated: request.last_updated.clone(),
            private_registry: resolved.private_registry,
            user_defined_annotations: request.user_defined_annotations.clone(),
            original_request: request.lrp.clone(),
        })
    }
}

fn first_non_empty(preferred: &str, fallback: String) -> String {
    if preferred.is_empty() {
        fallback
    } else {
        preferred.to_string()
    }
}
