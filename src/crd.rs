//! LRP Custom Resource Definition
//!
//! An `LRP` object is a desire request stored in the cluster. The LRP
//! controller reconciles each one through the façade, so applying or
//! editing the resource creates or converges the workload it describes.

use bifrost_common::cf::DesireLrpRequest;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired long-running process
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "eirini.cloudfoundry.org",
    version = "v1",
    kind = "LRP",
    plural = "lrps",
    shortname = "lrp",
    namespaced,
    status = "LrpStatus",
    printcolumn = r#"{"name":"Instances","type":"integer","jsonPath":".spec.instances"}"#,
    printcolumn = r#"{"name":"Running","type":"integer","jsonPath":".status.replicas"}"#
)]
pub struct LrpSpec {
    /// The desire request, field for field
    #[serde(flatten)]
    pub request: DesireLrpRequest,
}

/// Observed state of an LRP
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LrpStatus {
    /// Instances whose container is running
    #[serde(default)]
    pub replicas: i32,

    /// RFC 3339 time of the last successful reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,

    /// Error of the last failed reconcile
    ///
    /// Serialized as null when absent so a merge patch clears it.
    #[serde(default)]
    pub message: Option<String>,
}

impl LRP {
    /// Desire request for this resource
    ///
    /// A request naming no namespace lands in the resource's own namespace.
    /// The spec as written is kept as the raw request body.
    pub fn desire_request(&self) -> DesireLrpRequest {
        let mut request = self.spec.request.clone();
        request.lrp = serde_json::to_string(&self.spec.request).unwrap_or_default();
        if request.namespace.as_deref().map_or(true, str::is_empty) {
            request.namespace = self.metadata.namespace.clone();
        }
        request
    }
}
