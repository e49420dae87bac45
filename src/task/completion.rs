//! Task completion callbacks
//!
//! When a task terminates or is cancelled the control plane is told through
//! the callback URL it supplied with the task.

use std::time::Duration;

use async_trait::async_trait;
use bifrost_common::cf::TaskCompletedRequest;
use bifrost_common::{Error, Result};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::config::CompletionConfig;

/// Delivers completion payloads to the control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskCompleter: Send + Sync {
    /// POST `payload` to `callback_url`
    async fn complete(&self, callback_url: &str, payload: &TaskCompletedRequest) -> Result<()>;
}

/// [`TaskCompleter`] over HTTP(S)
pub struct HttpTaskCompleter {
    client: reqwest::Client,
}

impl HttpTaskCompleter {
    /// Build the HTTP client from config
    ///
    /// Unless TLS is disabled, `ca_path` is added as an extra trusted root.
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs));

        if let (false, Some(ca_path)) = (config.tls_disabled, &config.ca_path) {
            let pem = std::fs::read(ca_path).map_err(|e| {
                Error::config(format!("failed to read {}: {}", ca_path.display(), e))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::config(format!("invalid CA {}: {}", ca_path.display(), e)))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskCompleter for HttpTaskCompleter {
    async fn complete(&self, callback_url: &str, payload: &TaskCompletedRequest) -> Result<()> {
        let response = self
            .client
            .post(callback_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::callback(callback_url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::callback(
                callback_url,
                format!("unexpected status {}", status),
            ));
        }

        debug!(
            task_guid = %payload.task_guid,
            failed = payload.failed,
            "delivered task completion"
        );
        Ok(())
    }
}
