//! Descriptor conversion
//!
//! Turns control-plane requests into canonical [`Lrp`](bifrost_common::opi::Lrp)
//! and [`Task`](bifrost_common::opi::Task) descriptors. Conversion is pure: no
//! cluster or network I/O happens here.

mod lrp;
mod task;

pub use lrp::{routes_from_payload, routes_payload};

use std::collections::BTreeMap;

use bifrost_common::cf::{BuildpackLifecycle, DockerLifecycle, Lifecycle};
use bifrost_common::kube_utils::registry_server;
use bifrost_common::opi::{PrivateRegistry, DEFAULT_APP_PORT};

/// Command every droplet image starts with
pub const LAUNCHER_COMMAND: [&str; 3] = ["dumb-init", "--", "/lifecycle/launch"];

/// Environment variable holding the buildpack start command
pub const START_COMMAND_ENV: &str = "START_COMMAND";

/// Converts requests into descriptors
#[derive(Clone, Debug)]
pub struct Converter {
    registry_address: String,
    default_namespace: String,
    require_task_completion_callback: bool,
}

/// Image, command and environment a lifecycle resolves to
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ResolvedImage {
    pub image: String,
    pub command: Vec<String>,
    /// Lifecycle environment, overridden by the caller's
    pub env: BTreeMap<String, String>,
    /// Port the app listens on, if the lifecycle implies one
    pub port: Option<i32>,
    pub private_registry: Option<PrivateRegistry>,
}

impl Converter {
    /// Create a converter
    ///
    /// `registry_address` hosts droplet images; `default_namespace` is used
    /// for requests that name no namespace.
    pub fn new(
        registry_address: impl Into<String>,
        default_namespace: impl Into<String>,
        require_task_completion_callback: bool,
    ) -> Self {
        Self {
            registry_address: registry_address.into(),
            default_namespace: default_namespace.into(),
            require_task_completion_callback,
        }
    }

    /// Registry path of a staged droplet
    pub fn droplet_image(&self, droplet_guid: &str, droplet_hash: &str) -> String {
        format!(
            "{}/cloudfoundry/{}:{}",
            self.registry_address, droplet_guid, droplet_hash
        )
    }

    pub(crate) fn namespace_or_default(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => self.default_namespace.clone(),
        }
    }

    pub(crate) fn resolve_image(&self, lifecycle: Lifecycle) -> ResolvedImage {
        match lifecycle {
            Lifecycle::Docker(docker) => resolve_docker(docker),
            Lifecycle::Buildpack(buildpack) => self.resolve_buildpack(buildpack),
        }
    }

    fn resolve_buildpack(&self, lifecycle: BuildpackLifecycle) -> ResolvedImage {
        let env = BTreeMap::from([
            ("HOME".to_string(), "/home/vcap/app".to_string()),
            ("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string()),
            ("USER".to_string(), "vcap".to_string()),
            ("TMPDIR".to_string(), "/home/vcap/tmp".to_string()),
            (START_COMMAND_ENV.to_string(), lifecycle.start_command),
        ]);
        ResolvedImage {
            image: self.droplet_image(&lifecycle.droplet_guid, &lifecycle.droplet_hash),
            command: LAUNCHER_COMMAND.iter().map(|s| s.to_string()).collect(),
            env,
            port: Some(DEFAULT_APP_PORT),
            private_registry: None,
        }
    }
}

fn resolve_docker(lifecycle: DockerLifecycle) -> ResolvedImage {
    let private_registry =
        lifecycle
            .registry_credentials()
            .map(|(username, password)| PrivateRegistry {
                server: registry_server(&lifecycle.image),
                username: username.to_string(),
                password: password.to_string(),
            });
    ResolvedImage {
        image: lifecycle.image,
        command: lifecycle.command,
        env: BTreeMap::new(),
        port: None,
        private_registry,
    }
}

/// Merge environments left to right; later maps win on key collision
pub(crate) fn merge_env<'a>(
    layers: impl IntoIterator<Item = &'a BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}
