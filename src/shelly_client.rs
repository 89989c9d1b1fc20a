use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::telemetry::TelemetryRecord;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the Shelly Gen2 RPC `Shelly.GetStatus` endpoint
/// https://shelly-api-docs.shelly.cloud/gen2/ComponentsAndServices/EM
pub struct ShellyClient {
    endpoint_url: String,
    client: reqwest::Client,
}

impl ShellyClient {
    pub fn new(endpoint_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint_url: endpoint_url.into(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.shelly_url.clone(), config.request_timeout())
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Fetches one status document and flattens it into a telemetry record
    pub async fn read_status(&self) -> Result<TelemetryRecord> {
        let status: Value = self
            .client
            .get(&self.endpoint_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let record = TelemetryRecord::from_shelly_status(&status)?;
        debug!("Read {} fields from {}", record.len(), self.endpoint_url);
        Ok(record)
    }
}
