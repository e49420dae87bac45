//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, object naming, label selectors, and the
//! `.dockerconfigjson` payload for private registry secrets.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum length of a DNS-1123 label
pub const MAX_LABEL_LENGTH: usize = 63;

/// Secret type for registry credentials
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Data key for registry credentials
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
/// Registry server used for images without an explicit registry host
pub const DOCKER_HUB_SERVER: &str = "index.docker.io/v1/";

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// The read timeout acts as the deadline for every cluster call issued by
/// the desirers.
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    tracing::debug!(
        cluster_url = %config.cluster_url,
        default_namespace = %config.default_namespace,
        "creating kube client"
    );
    Client::try_from(config).map_err(|e| Error::cluster_api("create client", e))
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 for stability across Rust toolchain versions.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Reduce arbitrary text to a DNS-1123 label fragment.
///
/// Lowercases, maps every run of characters outside `[a-z0-9]` to a single
/// `-`, trims leading/trailing dashes, and truncates to `max_len`.
pub fn sanitize_name(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.truncate(max_len);
    out.trim_matches('-').to_string()
}

/// True if `value` is a legal Kubernetes label value
pub fn is_valid_label_value(value: &str) -> bool {
    if value.len() > MAX_LABEL_LENGTH {
        return false;
    }
    let bytes = value.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return true;
    };
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Render a label map as a `k=v,k=v` selector string
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Registry host an image is pulled from.
///
/// Follows the Docker reference rules: the first path component is a
/// registry host when it contains `.` or `:` or is `localhost`; otherwise the
/// image lives on Docker Hub.
pub fn registry_server(image: &str) -> String {
    match image.split_once('/') {
        Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => {
            host.to_string()
        }
        _ => DOCKER_HUB_SERVER.to_string(),
    }
}

/// Build the `.dockerconfigjson` payload for a registry login
pub fn docker_config_json(server: &str, username: &str, password: &str) -> Result<String, Error> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let auth = STANDARD.encode(format!("{}:{}", username, password));
    let config = serde_json::json!({
        "auths": {
            (server): {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });
    Ok(serde_json::to_string(&config)?)
}
