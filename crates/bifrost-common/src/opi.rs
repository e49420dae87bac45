//! Canonical workload descriptors
//!
//! Descriptors are built fresh by the converter for every call and handed to
//! the desirers by value. They never carry cluster-specific types, so the
//! façade and converter stay independent of kube-rs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::LrpIdentifier;

/// Port used by buildpack apps and by docker apps that expose none
pub const DEFAULT_APP_PORT: i32 = 8080;

/// Credentials for pulling from a private registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateRegistry {
    /// Registry host (Docker Hub for unqualified images)
    pub server: String,
    /// Registry username
    pub username: String,
    /// Registry password
    pub password: String,
}

// Keeps passwords out of logs
impl fmt::Debug for PrivateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateRegistry")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Kind of health check run against each instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthcheckType {
    /// HTTP GET against an endpoint
    Http,
    /// TCP connect to a port
    Port,
    /// Process liveness only
    #[default]
    Process,
}

impl From<&str> for HealthcheckType {
    fn from(value: &str) -> Self {
        match value {
            "http" => Self::Http,
            "port" => Self::Port,
            _ => Self::Process,
        }
    }
}

/// Health check configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Check kind
    pub kind: HealthcheckType,
    /// HTTP path, for [`HealthcheckType::Http`]
    pub endpoint: String,
    /// Check timeout
    pub timeout_ms: u32,
    /// Port the check targets
    pub port: i32,
}

/// Persistent volume mounted into every instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Claim name
    pub claim_name: String,
    /// Mount path
    pub mount_path: String,
}

/// Canonical description of a long-running process
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Lrp {
    /// Immutable identity
    pub identifier: LrpIdentifier,
    /// Namespace the workload lives in
    pub namespace: String,
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
    pub org_guid: String,
    /// Organization name
    pub org_name: String,
    /// Image reference
    pub image: String,
    /// Launch command
    pub command: Vec<String>,
    /// Environment, keys unique
    pub env: BTreeMap<String, String>,
    /// Declared instance count
    pub target_instances: i32,
    /// Health check
    pub health: Healthcheck,
    /// Exposed ports
    pub ports: Vec<i32>,
    /// Memory ceiling
    pub memory_mb: i64,
    /// Disk ceiling
    pub disk_mb: i64,
    /// Relative CPU weight
    pub cpu_weight: u8,
    /// Volume mounts
    pub volume_mounts: Vec<VolumeMount>,
    /// Routing payload: the router's route group as JSON text, or empty
    pub app_uris: String,
    /// Opaque last-updated marker
    pub last_updated: String,
    /// Registry credentials, if the image is private
    pub private_registry: Option<PrivateRegistry>,
    /// Annotations the user attached to the app
    pub user_defined_annotations: BTreeMap<String, String>,
    /// Raw desire request
    pub original_request: String,
}

/// Canonical description of a one-off task
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task GUID
    pub guid: String,
    /// Task name
    pub name: String,
    /// Namespace the task runs in
    pub namespace: String,
    /// Owning app GUID
    pub app_guid: String,
    /// Owning app name
    pub app_name: String,
    /// Space GUID
    pub space_guid: String,
    /// Space name
    pub space_name: String,
    /// Organization GUID
    pub org_guid: String,
    /// Organization name
    pub org_name: String,
    /// Image reference
    pub image: String,
    /// Launch command
    pub command: Vec<String>,
    /// Environment, keys unique
    pub env: BTreeMap<String, String>,
    /// URL notified when the task terminates
    pub completion_callback: String,
    /// Registry credentials, if the image is private
    pub private_registry: Option<PrivateRegistry>,
    /// Memory ceiling
    pub memory_mb: i64,
    /// Disk ceiling
    pub disk_mb: i64,
    /// Relative CPU weight
    pub cpu_weight: u8,
}

/// Observed state of one instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Scheduled, not yet running
    Starting,
    /// Container running
    Running,
    /// Container terminated or crash-looping
    Crashed,
    /// Could not be placed
    Error,
}

impl InstanceState {
    /// State name used by the control plane
    pub fn as_cf_state(&self) -> &'static str {
        match self {
            Self::Starting => "CLAIMED",
            Self::Running => "RUNNING",
            Self::Crashed => "CRASHED",
            Self::Error => "UNCLAIMED",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Crashed => write!(f, "crashed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Observed state of the instance with a given ordinal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Ordinal
    pub index: i32,
    /// Projected state
    pub state: InstanceState,
    /// Nanoseconds since the epoch at which the instance started, 0 if unknown
    pub since: i64,
    /// Scheduler message for instances that could not be placed
    pub placement_error: String,
}

/// Declared shape of a workload combined with its live status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningLrp {
    /// Descriptor reconstructed from the cluster object
    pub lrp: Lrp,
    /// Instances whose container is running
    pub running_instances: i32,
    /// Per-instance state, ordered by ordinal
    pub instances: Vec<Instance>,
}
