//! InfluxDB v2 HTTP store.
//!
//! Writes line protocol to `POST {host}/api/v2/write` with token
//! authentication. Connecting validates the endpoint, builds the HTTP client
//! and optionally probes `GET {host}/health`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::logging::snippet;
use crate::metric::{Measurement, encode_batch};
use crate::store::{MetricStore, StoreConnector, StoreError};

fn default_host() -> String {
    "http://localhost:8086".to_string()
}

fn default_bucket() -> String {
    "netpulse".to_string()
}

fn default_health_check() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Time-series store connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub org: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Probe `/health` when connecting.
    #[serde(default = "default_health_check")]
    pub health_check: bool,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            token: String::new(),
            org: String::new(),
            bucket: default_bucket(),
            health_check: default_health_check(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("health_check", &self.health_check)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl StoreConfig {
    /// Parse and check the host URL.
    pub fn base_url(&self) -> Result<Url, StoreError> {
        let mut url = Url::parse(self.host.trim())
            .map_err(|e| StoreError::Config(format!("invalid store host '{}': {e}", self.host)))?;
        // Keep any path prefix when joining API paths.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(StoreError::Config(format!(
                "unsupported store scheme '{other}' in '{}'",
                self.host
            ))),
        }
    }

    fn endpoint(&self, base: &Url, path: &str) -> Result<Url, StoreError> {
        base.join(path)
            .map_err(|e| StoreError::Config(format!("invalid store path '{path}': {e}")))
    }
}

/// A connected InfluxDB write handle.
pub struct InfluxStore {
    client: reqwest::Client,
    write_url: Url,
    org: String,
    token: String,
}

impl std::fmt::Debug for InfluxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxStore")
            .field("write_url", &self.write_url.as_str())
            .field("org", &self.org)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl MetricStore for InfluxStore {
    async fn write(&self, bucket: &str, measurements: &[Measurement]) -> Result<(), StoreError> {
        if measurements.is_empty() {
            return Ok(());
        }

        let body = encode_batch(measurements);
        if body.is_empty() {
            tracing::warn!(%bucket, "No encodable measurements, nothing sent");
            return Ok(());
        }

        let mut request = self
            .client
            .post(self.write_url.clone())
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", "ns"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if !self.token.is_empty() {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.token),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(StoreError::from_status(status.as_u16(), snippet(&text)))
    }
}

/// Builds [`InfluxStore`] handles from [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct InfluxConnector {
    config: StoreConfig,
}

impl InfluxConnector {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    async fn check_health(&self, client: &reqwest::Client, base: &Url) -> Result<(), StoreError> {
        let url = self.config.endpoint(base, "health")?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| StoreError::Connect(format!("health check failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(StoreError::Connect(format!(
                "health check returned HTTP {}: {}",
                status.as_u16(),
                snippet(&text)
            )))
        }
    }
}

#[async_trait::async_trait]
impl StoreConnector for InfluxConnector {
    async fn connect(&self) -> Result<Arc<dyn MetricStore>, StoreError> {
        let base = self.config.base_url()?;
        let write_url = self.config.endpoint(&base, "api/v2/write")?;

        let client = reqwest::Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| StoreError::Connect(format!("failed to build HTTP client: {e}")))?;

        if self.config.health_check {
            self.check_health(&client, &base).await?;
        }

        tracing::debug!(endpoint = %write_url, org = %self.config.org, "Store client ready");

        Ok(Arc::new(InfluxStore {
            client,
            write_url,
            org: self.config.org.clone(),
            token: self.config.token.clone(),
        }))
    }

    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn endpoint(&self) -> String {
        self.config.host.clone()
    }
}
