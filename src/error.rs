//! Error types for the agent
//!
//! Component boundaries return these typed errors so callers can tell a
//! rejected registration from an unreachable server, or a template bug from
//! a failed daemon restart. Application glue wraps them in `anyhow`.
//! Messages never contain passphrases, passwords or token values.

use crate::{lifecycle::AgentState, services::profile_store::ProfileName};
use std::{io, path::PathBuf};

/// Local file I/O failed. Fatal to the calling operation, never retried.
#[derive(Debug, thiserror::Error)]
#[error("failed to {action} {path:?}")]
pub struct FileError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FileError {
    pub fn new(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }
}

/// A profile template lacks a placeholder it must contain.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("template for {profile} is missing placeholder {placeholder}")]
pub struct TemplateError {
    pub profile: ProfileName,
    pub placeholder: &'static str,
}

/// A network daemon control command failed or exited non-zero.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("service control failed for {service}: {detail}")]
pub struct ServiceControlError {
    pub service: String,
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkModeError {
    #[error("network mode switch aborted")]
    File(#[from] FileError),

    #[error("network mode switch aborted")]
    Template(#[from] TemplateError),

    #[error("network mode switch failed after config commit")]
    ServiceControl(#[from] ServiceControlError),

    #[error("another network mode switch is in progress")]
    Busy,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error("invalid token record in {path:?}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("token record in {path:?} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u64 },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistrationError {
    /// The server refused the identity (HTTP 400); retrying cannot help.
    #[error("registration rejected: {0}")]
    Rejected(String),

    #[error("registration response malformed: {0}")]
    MalformedResponse(String),

    #[error("registration failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("provisioning is not accepted in state {0}")]
    Closed(AgentState),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("another submission is in progress")]
    InProgress,

    #[error("wifi scan failed: {0}")]
    Scan(String),

    #[error(transparent)]
    NetworkSwitch(#[from] NetworkModeError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("failed to persist device token")]
    TokenSave(#[source] TokenStoreError),
}
