use crate::error::{NetworkModeError, ProvisioningError, RegistrationError};
use actix_web::{HttpResponse, http::StatusCode};
use anyhow::{Context, Result};
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Create the client used for all outgoing API calls
///
/// # Arguments
/// * `timeout` - Upper bound for a whole request including the response body
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to create HTTP client")
}

/// Body of every non-2xx provisioning response
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

pub fn error_response(status: StatusCode, reason: &str, detail: &str) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody {
        error: reason.to_string(),
        detail: detail.to_string(),
    })
}

/// Status code and machine-readable reason for a provisioning failure
pub fn classify(e: &ProvisioningError) -> (StatusCode, &'static str) {
    match e {
        ProvisioningError::Closed(_) => (StatusCode::CONFLICT, "provisioning_closed"),
        ProvisioningError::InvalidSubmission(_) => (StatusCode::BAD_REQUEST, "invalid_submission"),
        ProvisioningError::InProgress => {
            (StatusCode::SERVICE_UNAVAILABLE, "provisioning_in_progress")
        }
        ProvisioningError::Scan(_) => (StatusCode::INTERNAL_SERVER_ERROR, "scan_failed"),
        ProvisioningError::NetworkSwitch(NetworkModeError::Busy) => {
            (StatusCode::SERVICE_UNAVAILABLE, "network_switch_busy")
        }
        ProvisioningError::NetworkSwitch(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "network_switch_failed")
        }
        ProvisioningError::Registration(RegistrationError::Rejected(_)) => {
            (StatusCode::BAD_GATEWAY, "registration_rejected")
        }
        ProvisioningError::Registration(RegistrationError::MalformedResponse(_)) => {
            (StatusCode::BAD_GATEWAY, "registration_malformed_response")
        }
        ProvisioningError::Registration(RegistrationError::Exhausted { .. }) => {
            (StatusCode::GATEWAY_TIMEOUT, "registration_exhausted")
        }
        ProvisioningError::TokenSave(_) => (StatusCode::INTERNAL_SERVER_ERROR, "token_save_failed"),
    }
}

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for () {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().finish()
    }
}

impl ServiceResultResponse for Vec<String> {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().json(self)
    }
}

/// Convert a service result into an HTTP response
///
/// Errors are logged with their full cause chain and answered with an
/// [`ErrorBody`] whose status and reason come from [`classify`].
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Name of the operation, used in the log
pub fn handle_service_result<T>(result: Result<T, ProvisioningError>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            let (status, reason) = classify(&e);
            let detail = format!("{:#}", anyhow::Error::from(e));
            error!("{operation} failed: {detail}");
            error_response(status, reason, &detail)
        }
    }
}
