//! Device registration against the remote API
//!
//! A 400 answer means the server refused the identity and is returned at
//! once. Other statuses and transport failures are retried with the same
//! identity until [`MAX_ATTEMPTS`] requests have been made.

use crate::{error::RegistrationError, services::token_store::DeviceToken};
use log::{error, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tokio::time::sleep;

pub const MAX_ATTEMPTS: u32 = 3;
const CREATE_DEVICE_PATH: &str = "/device/create";

/// Remote account identity the device registers under.
#[derive(Clone, PartialEq)]
pub struct AccountIdentity {
    pub email: String,
    pub password: String,
    pub device_name: String,
}

impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("device_name", &self.device_name)
            .finish()
    }
}

#[derive(Serialize)]
struct CreateDeviceRequest<'a> {
    email: &'a str,
    password: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
struct CreateDeviceResponse {
    token: String,
}

#[derive(Deserialize)]
struct RejectionResponse {
    message: String,
}

enum AttemptError {
    Fatal(RegistrationError),
    Transient(String),
}

pub struct DeviceRegistrar {
    client: Client,
    endpoint: String,
    retry_delay: Duration,
}

impl DeviceRegistrar {
    /// # Arguments
    /// * `client` - HTTP client, its timeout bounds every attempt
    /// * `base_url` - registration API base, e.g. `http://host:8081/rest`
    /// * `retry_delay` - pause between a failed attempt and the next one
    pub fn new(client: Client, base_url: &str, retry_delay: Duration) -> Self {
        Self {
            client,
            endpoint: format!("{}{CREATE_DEVICE_PATH}", base_url.trim_end_matches('/')),
            retry_delay,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn register(
        &self,
        identity: &AccountIdentity,
    ) -> Result<DeviceToken, RegistrationError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            info!(
                "registering device {:?} ({attempt}/{MAX_ATTEMPTS})",
                identity.device_name
            );

            match self.attempt(identity).await {
                Ok(token) => {
                    info!("device {:?} registered", identity.device_name);
                    return Ok(token);
                }
                Err(AttemptError::Fatal(e)) => {
                    error!("registration failed: {e}");
                    return Err(e);
                }
                Err(AttemptError::Transient(reason)) => {
                    warn!("registration attempt {attempt} failed: {reason}");
                    last_error = reason;

                    if attempt < MAX_ATTEMPTS && !self.retry_delay.is_zero() {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!("registration gave up after {MAX_ATTEMPTS} attempts");

        Err(RegistrationError::Exhausted {
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }

    async fn attempt(&self, identity: &AccountIdentity) -> Result<DeviceToken, AttemptError> {
        let request = CreateDeviceRequest {
            email: &identity.email,
            password: &identity.password,
            name: &identity.device_name,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("POST {} failed: {e}", self.endpoint)))?;

        let status = response.status();

        if status != StatusCode::OK && status != StatusCode::BAD_REQUEST {
            return Err(AttemptError::Transient(format!(
                "server responded with {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(format!("failed to read response body: {e}")))?;

        if status == StatusCode::BAD_REQUEST {
            let message = serde_json::from_str::<RejectionResponse>(&body)
                .map(|rejection| rejection.message)
                .unwrap_or_else(|_| body.trim().to_string());
            return Err(AttemptError::Fatal(RegistrationError::Rejected(message)));
        }

        match serde_json::from_str::<CreateDeviceResponse>(&body) {
            Ok(created) if !created.token.is_empty() => Ok(DeviceToken::new(created.token)),
            Ok(_) => Err(AttemptError::Fatal(RegistrationError::MalformedResponse(
                "token is empty".to_string(),
            ))),
            Err(e) => Err(AttemptError::Fatal(RegistrationError::MalformedResponse(
                e.to_string(),
            ))),
        }
    }
}
