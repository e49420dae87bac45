//! Bifrost configuration loaded from YAML
//!
//! Example:
//!
//! ```yaml
//! namespace: eirini
//! registry_address: registry.local:5000
//! registry_secret_name: registry-secret
//! application_service_account: eirini
//! require_task_completion_callback: true
//! read_timeout_secs: 30
//! completion:
//!   tls_disabled: false
//!   ca_path: /certs/cc-ca.crt
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use bifrost_common::telemetry::LogFormat;
use bifrost_common::{Error, Result};
use serde::{Deserialize, Serialize};

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_completion_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Settings for the task completion callback client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Use plain HTTP client defaults without an extra CA
    #[serde(default)]
    pub tls_disabled: bool,
    /// Extra PEM root for the callback endpoint
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// Per-request timeout
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            tls_disabled: false,
            ca_path: None,
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

/// Top-level bifrost configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BifrostConfig {
    /// Namespace workloads land in when a request names none
    pub namespace: String,
    /// Registry droplet images are pulled from
    pub registry_address: String,
    /// Cluster-wide pull secret added to every pod
    #[serde(default)]
    pub registry_secret_name: String,
    /// Service account app and task pods run as
    #[serde(default)]
    pub application_service_account: String,
    /// Reject tasks without a completion callback
    #[serde(default = "default_true")]
    pub require_task_completion_callback: bool,
    /// Kubeconfig path; in-cluster config when absent
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Cluster connection timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Deadline for every cluster call
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Completion callback client
    #[serde(default)]
    pub completion: CompletionConfig,
}

impl BifrostConfig {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&data)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate YAML text
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data)
            .map_err(|e| Error::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings bifrost cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.registry_address.is_empty() {
            return Err(Error::config("registry_address must not be empty"));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(Error::config("cluster timeouts must be greater than zero"));
        }
        if self.completion.timeout_secs == 0 {
            return Err(Error::config("completion.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    /// Cluster connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Deadline for every cluster call
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
