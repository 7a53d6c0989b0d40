//! # Telemetry Push
//!
//! Optional HTTP push of the current snapshot and actuator state to a
//! collection server. A failed push is logged by the caller and retried on
//! the next interval; nothing is queued.
//!
//! Payload:
//! ```json
//! {
//!   "device_id": "greenhouse-01",
//!   "readings": { "air_temperature": 23.0, "...": "..." },
//!   "devices": { "fan_on": false, "...": "..." }
//! }
//! ```

use crate::config::TelemetryConfig;
use crate::control::DeviceStatus;
use crate::SensorSnapshot;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Request could not be built or sent (DNS, connect, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("server returned status {0}")]
    Status(u16),
}

#[derive(Serialize, Debug)]
pub struct TelemetryPayload<'a> {
    pub device_id: &'a str,
    pub readings: &'a SensorSnapshot,
    pub devices: &'a DeviceStatus,
}

pub struct TelemetryClient {
    client: reqwest::Client,
    endpoint: String,
    device_id: String,
}

impl TelemetryClient {
    /// Client for `config`, or `None` when no endpoint is configured.
    pub fn from_config(config: &TelemetryConfig) -> Result<Option<Self>, TelemetryError> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(TelemetryClient {
            client,
            endpoint,
            device_id: config.device_id.clone(),
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one payload.
    pub async fn push(
        &self,
        snapshot: &SensorSnapshot,
        status: &DeviceStatus,
    ) -> Result<(), TelemetryError> {
        let payload = TelemetryPayload {
            device_id: &self.device_id,
            readings: snapshot,
            devices: status,
        };
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let code = response.status();
        if !code.is_success() {
            return Err(TelemetryError::Status(code.as_u16()));
        }
        debug!(endpoint = %self.endpoint, "telemetry pushed");
        Ok(())
    }
}
