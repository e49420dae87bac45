//! Control-plane wire models
//!
//! Requests and responses exchanged with the Cloud Foundry control plane.
//! Field names follow the control plane's snake_case JSON. The lifecycle
//! union arrives as two nullable objects; [`LifecycleFields::resolve`] turns
//! it into the tagged [`Lifecycle`] everything downstream works with.

use std::collections::BTreeMap;

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, LrpIdentifier};

/// Route groups keyed by router name; each value is opaque to bifrost
pub type Routes = BTreeMap<String, serde_json::Value>;

/// Schema for fields carrying arbitrary JSON
fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Run a prebuilt container image
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DockerLifecycle {
    /// Image reference
    pub image: String,
    /// Entrypoint override
    pub command: Vec<String>,
    /// Private registry username
    pub registry_username: String,
    /// Private registry password
    pub registry_password: String,
}

impl DockerLifecycle {
    /// Registry credentials, if both parts are present
    pub fn registry_credentials(&self) -> Option<(&str, &str)> {
        if self.registry_username.is_empty() || self.registry_password.is_empty() {
            None
        } else {
            Some((&self.registry_username, &self.registry_password))
        }
    }
}

/// Run a staged droplet through the buildpack launcher
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BuildpackLifecycle {
    /// Droplet content hash, used as the image tag
    pub droplet_hash: String,
    /// Droplet GUID, used as the image repository
    pub droplet_guid: String,
    /// Command the launcher starts
    pub start_command: String,
}

/// The lifecycle union as sent on the wire: exactly one field must be set
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LifecycleFields {
    /// Docker lifecycle, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_lifecycle: Option<DockerLifecycle>,
    /// Buildpack lifecycle, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildpack_lifecycle: Option<BuildpackLifecycle>,
}

/// How a workload's image is obtained
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Explicit container image
    Docker(DockerLifecycle),
    /// Droplet translated to a registry image
    Buildpack(BuildpackLifecycle),
}

impl LifecycleFields {
    /// Resolve the wire union into a [`Lifecycle`].
    ///
    /// `legacy` is the buildpack lifecycle implied by top-level droplet
    /// fields of older requests; it only counts when no lifecycle object is
    /// set. Both objects set is contradictory; none at all is missing.
    pub fn resolve(&self, legacy: Option<BuildpackLifecycle>) -> Result<Lifecycle, Error> {
        match (&self.docker_lifecycle, &self.buildpack_lifecycle) {
            (Some(_), Some(_)) => Err(Error::conversion(
                "request specifies both docker and buildpack lifecycles",
            )),
            (Some(docker), None) => Ok(Lifecycle::Docker(docker.clone())),
            (None, Some(buildpack)) => Ok(Lifecycle::Buildpack(buildpack.clone())),
            (None, None) => legacy
                .map(Lifecycle::Buildpack)
                .ok_or_else(|| Error::conversion("request specifies no lifecycle")),
        }
    }
}

impl From<Lifecycle> for LifecycleFields {
    fn from(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Docker(docker) => Self {
                docker_lifecycle: Some(docker),
                buildpack_lifecycle: None,
            },
            Lifecycle::Buildpack(buildpack) => Self {
                docker_lifecycle: None,
                buildpack_lifecycle: Some(buildpack),
            },
        }
    }
}

// =============================================================================
// LRP requests
// =============================================================================

/// Volume claim mounted into every instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct VolumeMount {
    /// Persistent volume claim name
    pub volume_id: String,
    /// Mount path inside the container
    pub mount_dir: String,
}

/// Request to desire a long-running process
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DesireLrpRequest {
    /// Process GUID
    pub guid: String,
    /// Process version
    pub version: String,
    /// External process identifier, informational
    pub process_guid: String,
    /// Process type (web, worker, ...)
    pub process_type: String,
    /// Owning app GUID
    pub app_guid: String,
    /// Owning app name
    pub app_name: String,
    /// Space GUID
    pub space_guid: String,
    /// Space name
    pub space_name: String,
    /// Organization GUID
    pub organization_guid: String,
    /// Organization name
    pub organization_name: String,
    /// Target namespace; the configured default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Placement tags, carried but not interpreted
    pub placement_tags: Vec<String>,
    /// Exposed container ports
    pub ports: Vec<i32>,
    /// Route groups keyed by router name
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub routes: Routes,
    /// Environment supplied by the caller
    pub environment: BTreeMap<String, String>,
    /// Desired instance count
    pub instances: i32,
    /// Opaque last-updated marker
    pub last_updated: String,
    /// Health check kind: `http`, `port`, or `process`/empty for none
    pub health_check_type: String,
    /// HTTP health check path
    pub health_check_http_endpoint: String,
    /// Health check timeout
    pub health_check_timeout_ms: u32,
    /// Start timeout, carried but not interpreted
    pub start_timeout_ms: u32,
    /// Memory ceiling
    pub memory_mb: i64,
    /// Disk ceiling
    pub disk_mb: i64,
    /// Relative CPU weight
    pub cpu_weight: u8,
    /// Volume mounts
    pub volume_mounts: Vec<VolumeMount>,
    /// Lifecycle union
    pub lifecycle: LifecycleFields,
    /// Legacy droplet hash, implies a buildpack lifecycle
    pub droplet_hash: String,
    /// Legacy droplet GUID, implies a buildpack lifecycle
    pub droplet_guid: String,
    /// Legacy start command
    pub start_command: String,
    /// Annotations the user attached to the app
    pub user_defined_annotations: BTreeMap<String, String>,
    /// Raw request body as received; kept on the workload for debugging
    #[serde(skip)]
    pub lrp: String,
}

impl DesireLrpRequest {
    /// Identity named by this request
    pub fn identifier(&self) -> LrpIdentifier {
        LrpIdentifier::new(&self.guid, &self.version)
    }

    /// Resolve the lifecycle union, honouring legacy droplet fields
    pub fn lifecycle(&self) -> Result<Lifecycle, Error> {
        let legacy = (!self.droplet_guid.is_empty()).then(|| BuildpackLifecycle {
            droplet_hash: self.droplet_hash.clone(),
            droplet_guid: self.droplet_guid.clone(),
            start_command: self.start_command.clone(),
        });
        self.lifecycle.resolve(legacy)
    }
}

/// Fields of a running process that may change without a new version
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredLrpUpdate {
    /// New instance count; unchanged when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,
    /// New route groups; unchanged when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Routes>,
    /// New last-updated marker; unchanged when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

/// Request to update a running process
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateDesiredLrpRequest {
    /// Process GUID
    pub guid: String,
    /// Process version
    pub version: String,
    /// Changed fields
    pub update: DesiredLrpUpdate,
}

impl UpdateDesiredLrpRequest {
    /// Identity named by this request
    pub fn identifier(&self) -> LrpIdentifier {
        LrpIdentifier::new(&self.guid, &self.version)
    }
}

// =============================================================================
// LRP responses
// =============================================================================

/// A desired process as reported back to the control plane
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredLrp {
    /// External process identifier
    pub process_guid: String,
    /// Declared instance count
    pub instances: i32,
    /// Last-updated marker
    pub annotation: String,
    /// Route groups; empty when the workload carries no routes
    pub routes: Routes,
}

/// Scheduling summary of a desired process
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredLrpSchedulingInfo {
    /// External process identifier
    pub process_guid: String,
    /// Process GUID
    pub guid: String,
    /// Process version
    pub version: String,
    /// Last-updated marker
    pub annotation: String,
}

/// State of one instance as reported to the control plane
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Ordinal
    pub index: i32,
    /// `CLAIMED`, `RUNNING`, `CRASHED` or `UNCLAIMED`
    pub state: String,
    /// Nanoseconds since the epoch at which the instance started
    pub since: i64,
    /// Why the instance could not be placed
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub placement_error: String,
}

// =============================================================================
// Tasks
// =============================================================================

/// Environment entry of a task request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentVariable {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

/// Request to run a one-off task
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRequest {
    /// Task GUID; also supplied separately by the transport
    pub guid: String,
    /// Task name
    pub name: String,
    /// Owning app GUID
    pub app_guid: String,
    /// Owning app name
    pub app_name: String,
    /// Organization name
    pub org_name: String,
    /// Organization GUID
    pub org_guid: String,
    /// Space name
    pub space_name: String,
    /// Space GUID
    pub space_guid: String,
    /// Target namespace; the configured default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// URL notified when the task terminates
    pub completion_callback: String,
    /// Environment supplied by the caller
    pub environment: Vec<EnvironmentVariable>,
    /// Lifecycle union
    pub lifecycle: LifecycleFields,
    /// Memory ceiling
    pub memory_mb: i64,
    /// Disk ceiling
    pub disk_mb: i64,
    /// Relative CPU weight
    pub cpu_weight: u8,
}

/// Payload posted to a task's completion callback
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletedRequest {
    /// Task GUID
    pub task_guid: String,
    /// Whether the task failed or was cancelled
    pub failed: bool,
    /// Why the task failed
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub failure_reason: String,
    /// Task result, if any
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub result: String,
}

/// Failure reason reported for cancelled tasks
pub const TASK_CANCELLED_REASON: &str = "task was cancelled";

impl TaskCompletedRequest {
    /// Successful completion
    pub fn succeeded(task_guid: impl Into<String>) -> Self {
        Self {
            task_guid: task_guid.into(),
            ..Default::default()
        }
    }

    /// Failed completion with a reason
    pub fn failed(task_guid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_guid: task_guid.into(),
            failed: true,
            failure_reason: reason.into(),
            result: String::new(),
        }
    }

    /// Operator-initiated cancellation
    pub fn cancelled(task_guid: impl Into<String>) -> Self {
        Self::failed(task_guid, TASK_CANCELLED_REASON)
    }
}
