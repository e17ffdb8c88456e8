//! Switching the device between access-point and station mode
//!
//! A switch resolves all four profiles, commits them as one set and only then
//! drives the network daemons. Daemon control is never retried here: a
//! half-applied transition is reported to the caller, who may start over.

use crate::{
    error::{NetworkModeError, TemplateError},
    services::profile_store::{ProfileName, ProfileStore},
    system_client::{ServiceCommand, ServiceControl, SystemService},
};
use log::{error, info, warn};
use serde::Serialize;
use std::{fmt, sync::Mutex};

pub const SSID_PLACEHOLDER: &str = "${wifi_ssid}";
pub const PASSPHRASE_PLACEHOLDER: &str = "${wifi_password}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkMode {
    AccessPoint,
    Station,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::AccessPoint => write!(f, "access point mode"),
            NetworkMode::Station => write!(f, "station mode"),
        }
    }
}

#[derive(Clone, Default, PartialEq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SwitchTarget {
    AccessPoint,
    Station(WifiCredentials),
}

impl SwitchTarget {
    pub fn mode(&self) -> NetworkMode {
        match self {
            SwitchTarget::AccessPoint => NetworkMode::AccessPoint,
            SwitchTarget::Station(_) => NetworkMode::Station,
        }
    }
}

/// Daemon commands issued after a successful commit, in order.
pub fn service_plan(mode: NetworkMode) -> Vec<ServiceCommand> {
    match mode {
        NetworkMode::AccessPoint => vec![
            ServiceCommand::Restart(SystemService::Dhcpcd),
            ServiceCommand::Start(SystemService::Dnsmasq),
            ServiceCommand::Start(SystemService::Hostapd),
        ],
        NetworkMode::Station => vec![
            ServiceCommand::Restart(SystemService::Dhcpcd),
            ServiceCommand::Stop(SystemService::Dnsmasq),
            ServiceCommand::Stop(SystemService::Hostapd),
            ServiceCommand::ReconfigureWifi,
        ],
    }
}

/// Fill the Wi-Fi placeholders of the station `wpa_supplicant` template.
pub fn render_wifi_template(
    template: &str,
    credentials: &WifiCredentials,
) -> Result<String, TemplateError> {
    for placeholder in [SSID_PLACEHOLDER, PASSPHRASE_PLACEHOLDER] {
        if !template.contains(placeholder) {
            return Err(TemplateError {
                profile: ProfileName::WpaSupplicant,
                placeholder,
            });
        }
    }

    Ok(template
        .replace(SSID_PLACEHOLDER, &credentials.ssid)
        .replace(PASSPHRASE_PLACEHOLDER, &credentials.passphrase))
}

pub struct NetworkModeController<Control>
where
    Control: ServiceControl,
{
    store: ProfileStore,
    control: Control,
    switching: tokio::sync::Mutex<()>,
    current: Mutex<Option<NetworkMode>>,
}

impl<Control> NetworkModeController<Control>
where
    Control: ServiceControl,
{
    pub fn new(store: ProfileStore, control: Control) -> Self {
        Self {
            store,
            control,
            switching: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Mode established by the last successful switch, if any
    pub fn current_mode(&self) -> Option<NetworkMode> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn switch_to(&self, target: SwitchTarget) -> Result<(), NetworkModeError> {
        let Ok(_guard) = self.switching.try_lock() else {
            warn!("rejecting switch to {}: switch in progress", target.mode());
            return Err(NetworkModeError::Busy);
        };

        let mode = target.mode();
        info!("switching to {mode}");

        let resolved = self.resolve(&target)?;

        let applied = self.store.write_active_set(&resolved)?;
        info!("{mode} configs committed");

        for command in service_plan(mode) {
            info!("{command}");

            if let Err(e) = self.control.run(command.clone()).await {
                error!("{command} failed during switch to {mode}: {e}");
                match applied.restore() {
                    Ok(()) => warn!("previous configs restored; daemons may need manual recovery"),
                    Err(restore_err) => error!("failed to restore configs: {restore_err}"),
                }
                return Err(e.into());
            }
        }

        applied.finalize();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(mode);
        info!("switched to {mode}");

        Ok(())
    }

    fn resolve(&self, target: &SwitchTarget) -> Result<Vec<(ProfileName, String)>, NetworkModeError> {
        let mode = target.mode();
        let mut resolved = Vec::with_capacity(ProfileName::ALL.len());

        for name in ProfileName::ALL {
            let content = self.store.load_profile(name, mode)?;

            let content = match (name, target) {
                (ProfileName::WpaSupplicant, SwitchTarget::Station(credentials)) => {
                    render_wifi_template(&content, credentials)?
                }
                _ => content,
            };

            resolved.push((name, content));
        }

        Ok(resolved)
    }
}
