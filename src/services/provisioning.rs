//! Provisioning flow
//!
//! Takes a submission collected while the device advertises its setup
//! network, moves the device onto the submitted Wi-Fi, registers it and
//! starts telemetry. Network switch and registration each consume only their
//! own part of the submission.

use crate::{
    error::ProvisioningError,
    lifecycle::{AgentState, Lifecycle},
    services::{
        network_mode::{NetworkModeController, SwitchTarget, WifiCredentials},
        registrar::{AccountIdentity, DeviceRegistrar},
        telemetry::TelemetryReporter,
        token_store::TokenStore,
    },
    system_client::{ServiceControl, WifiScanner},
};
use log::{error, info, warn};
use serde::Deserialize;
use serde_valid::Validate;
use std::{collections::BTreeSet, fmt, sync::Arc};
use tokio::sync::{Mutex, broadcast};

const MAX_SSID_BYTES: usize = 32;
const MIN_PASSPHRASE_CHARS: usize = 8;
const MAX_PASSPHRASE_CHARS: usize = 63;

#[derive(Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WifiCredentialSubmission {
    #[validate(min_length = 1)]
    pub ssid: String,
    #[serde(default)]
    pub passphrase: String,
    #[validate(min_length = 1)]
    pub account_email: String,
    #[validate(min_length = 1)]
    pub account_password: String,
    #[validate(min_length = 1)]
    pub device_name: String,
}

impl fmt::Debug for WifiCredentialSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentialSubmission")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("account_email", &self.account_email)
            .field("account_password", &"<redacted>")
            .field("device_name", &self.device_name)
            .finish()
    }
}

impl WifiCredentialSubmission {
    /// Boundary validation; the values end up in a quoted config value.
    pub fn check(&self) -> Result<(), ProvisioningError> {
        let invalid = |detail: String| Err(ProvisioningError::InvalidSubmission(detail));

        if let Err(e) = self.validate() {
            return invalid(e.to_string());
        }

        if self.ssid.len() > MAX_SSID_BYTES {
            return invalid(format!("ssid is longer than {MAX_SSID_BYTES} bytes"));
        }

        let passphrase_chars = self.passphrase.chars().count();
        if passphrase_chars != 0
            && !(MIN_PASSPHRASE_CHARS..=MAX_PASSPHRASE_CHARS).contains(&passphrase_chars)
        {
            return invalid(format!(
                "passphrase must be empty or {MIN_PASSPHRASE_CHARS} to {MAX_PASSPHRASE_CHARS} characters"
            ));
        }

        for (field, value) in [("ssid", &self.ssid), ("passphrase", &self.passphrase)] {
            if value.contains(['"', '\r', '\n']) {
                return invalid(format!("{field} contains a quote or line break"));
            }
        }

        Ok(())
    }

    pub fn wifi(&self) -> WifiCredentials {
        WifiCredentials {
            ssid: self.ssid.clone(),
            passphrase: self.passphrase.clone(),
        }
    }

    pub fn identity(&self) -> AccountIdentity {
        AccountIdentity {
            email: self.account_email.clone(),
            password: self.account_password.clone(),
            device_name: self.device_name.clone(),
        }
    }
}

pub struct ProvisioningService<Scanner, Control>
where
    Scanner: WifiScanner,
    Control: ServiceControl,
{
    pub scanner: Scanner,
    pub network: Arc<NetworkModeController<Control>>,
    pub registrar: DeviceRegistrar,
    pub token_store: TokenStore,
    pub reporter: Arc<TelemetryReporter>,
    pub lifecycle: Lifecycle,
    /// Signalled once provisioning completed and the listener should close
    pub shutdown_tx: broadcast::Sender<()>,
    /// Held for a whole submission so switch and registration run once at a time
    submitting: Mutex<()>,
}

impl<Scanner, Control> ProvisioningService<Scanner, Control>
where
    Scanner: WifiScanner,
    Control: ServiceControl,
{
    pub fn new(
        scanner: Scanner,
        network: Arc<NetworkModeController<Control>>,
        registrar: DeviceRegistrar,
        token_store: TokenStore,
        reporter: Arc<TelemetryReporter>,
        lifecycle: Lifecycle,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            scanner,
            network,
            registrar,
            token_store,
            reporter,
            lifecycle,
            shutdown_tx,
            submitting: Mutex::new(()),
        }
    }

    /// Visible network names without duplicates
    pub async fn networks(&self) -> Result<Vec<String>, ProvisioningError> {
        let scanned = self
            .scanner
            .scan()
            .await
            .map_err(|e| ProvisioningError::Scan(format!("{e:#}")))?;

        let unique: BTreeSet<String> = scanned.into_iter().collect();
        Ok(unique.into_iter().collect())
    }

    pub fn state(&self) -> AgentState {
        self.lifecycle.current()
    }

    pub async fn submit(
        &self,
        submission: &WifiCredentialSubmission,
    ) -> Result<(), ProvisioningError> {
        submission.check()?;

        let Ok(_submitting) = self.submitting.try_lock() else {
            warn!("submission rejected: another submission is in progress");
            return Err(ProvisioningError::InProgress);
        };

        let state = self.lifecycle.current();
        if !matches!(state, AgentState::Provisioning | AgentState::Registering) {
            warn!("submission rejected in state {state}");
            return Err(ProvisioningError::Closed(state));
        }

        info!("provisioning with network {:?}", submission.ssid);

        // on failure the device keeps advertising its setup network
        self.network
            .switch_to(SwitchTarget::Station(submission.wifi()))
            .await?;

        self.lifecycle.advance(AgentState::Registering);

        // the switch is kept even if registration fails, the device is online now
        let token = self.registrar.register(&submission.identity()).await?;

        self.token_store
            .save(&token)
            .map_err(ProvisioningError::TokenSave)?;

        self.reporter.start(token).await;
        self.lifecycle.advance(AgentState::Reporting);

        if self.shutdown_tx.send(()).is_err() {
            error!("no listener waiting for provisioning shutdown");
        }

        info!("provisioning complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> WifiCredentialSubmission {
        WifiCredentialSubmission {
            ssid: "HomeNet".to_string(),
            passphrase: "secret123".to_string(),
            account_email: "me@example.com".to_string(),
            account_password: "pw".to_string(),
            device_name: "kitchen".to_string(),
        }
    }

    #[test]
    fn test_valid_submission_passes() {
        assert!(submission().check().is_ok());
    }

    #[test]
    fn test_open_network_allows_empty_passphrase() {
        let mut open = submission();
        open.passphrase.clear();
        assert!(open.check().is_ok());
    }

    #[test]
    fn test_invalid_submissions_are_rejected() {
        let cases: Vec<fn(&mut WifiCredentialSubmission)> = vec![
            |s| s.ssid.clear(),
            |s| s.ssid = "x".repeat(33),
            |s| s.passphrase = "short".to_string(),
            |s| s.passphrase = "p".repeat(64),
            |s| s.ssid = "Home\"Net".to_string(),
            |s| s.passphrase = "secret123\nnetwork={".to_string(),
            |s| s.account_email.clear(),
            |s| s.account_password.clear(),
            |s| s.device_name.clear(),
        ];

        for (index, mutate) in cases.into_iter().enumerate() {
            let mut invalid = submission();
            mutate(&mut invalid);
            assert!(
                matches!(
                    invalid.check(),
                    Err(ProvisioningError::InvalidSubmission(_))
                ),
                "case {index} should be rejected"
            );
        }
    }

    #[test]
    fn test_submission_splits_into_independent_parts() {
        let submission = submission();

        assert_eq!(
            submission.wifi(),
            WifiCredentials {
                ssid: "HomeNet".to_string(),
                passphrase: "secret123".to_string(),
            }
        );
        assert_eq!(submission.identity().device_name, "kitchen");
        assert_eq!(submission.identity().email, "me@example.com");
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = serde_json::from_str::<WifiCredentialSubmission>(
            r#"{"ssid":"a","accountEmail":"e","accountPassword":"p","deviceName":"d","webIP":"x"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", submission());
        assert!(!debug.contains("secret123"));
        assert!(!debug.contains("\"pw\""));
    }
}
