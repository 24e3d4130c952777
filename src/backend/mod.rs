use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The business layer reports the ride is already assigned (409).
    #[error("ride already assigned")]
    AlreadyAssigned,
    /// The business layer refused the assignment for another reason.
    #[error("assignment rejected: {0}")]
    Rejected(String),
    /// Transport-level failure; nothing was committed.
    #[error("backend unreachable: {0}")]
    Unavailable(String),
}

/// Boundary to the business-application collaborator. The assignment call
/// is the single authority on who owns a ride; everything else here is
/// fire-and-forget notification.
#[async_trait]
pub trait AssignmentBackend: Send + Sync {
    /// Atomically persists driver <-> ride and locks the ride record.
    /// Idempotent under retry for the same (ride, driver) pair.
    async fn assign_driver(&self, ride_id: Uuid, driver_id: Uuid) -> Result<(), BackendError>;

    /// Posts a business event (`ride.timeout`, `ride.no_drivers`,
    /// `driver.disconnected`). Callers log failures and move on.
    async fn post_event(&self, event: &str, payload: serde_json::Value)
    -> Result<(), BackendError>;
}

#[derive(Debug, Deserialize)]
struct AssignResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP implementation speaking the internal REST boundary, authenticated
/// with the shared secret header.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

impl HttpBackend {
    /// `timeout` bounds every request; it must stay below the assignment
    /// lock TTL so a hung business layer cannot outlive the lock a driver
    /// accept is holding. Timeouts surface as `Unavailable`.
    pub fn new(base_url: String, secret: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("valid http client");
        Self {
            client,
            base_url,
            secret,
        }
    }
}

#[async_trait]
impl AssignmentBackend for HttpBackend {
    async fn assign_driver(&self, ride_id: Uuid, driver_id: Uuid) -> Result<(), BackendError> {
        let url = format!("{}/internal/ride/assign-driver", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-internal-secret", &self.secret)
            .json(&json!({ "ride_id": ride_id, "driver_id": driver_id }))
            .send()
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        if response.status() == StatusCode::CONFLICT {
            return Err(BackendError::AlreadyAssigned);
        }
        if !response.status().is_success() {
            return Err(BackendError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }

        let body: AssignResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        if body.success {
            Ok(())
        } else {
            Err(BackendError::Rejected(
                body.message.unwrap_or_else(|| "assignment refused".to_string()),
            ))
        }
    }

    async fn post_event(
        &self,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), BackendError> {
        let url = format!("{}/internal/events/{event}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-internal-secret", &self.secret)
            .json(&payload)
            .send()
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        if !response.status().is_success() {
            warn!(event, status = %response.status(), "business event rejected");
            return Err(BackendError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
