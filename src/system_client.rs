//! Clients for the operating system's network daemons and wireless tools.

use crate::error::ServiceControlError;
use anyhow::{Context, Result, ensure};
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::fmt;
use tokio::process::Command;
use trait_variant::make;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemService {
    Dhcpcd,
    Dnsmasq,
    Hostapd,
}

impl SystemService {
    pub fn unit(&self) -> &'static str {
        match self {
            SystemService::Dhcpcd => "dhcpcd",
            SystemService::Dnsmasq => "dnsmasq",
            SystemService::Hostapd => "hostapd",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServiceCommand {
    Restart(SystemService),
    Start(SystemService),
    Stop(SystemService),
    /// Make wpa_supplicant re-read its configuration
    ReconfigureWifi,
}

impl ServiceCommand {
    /// Name of the service the command acts on, used in error reports
    pub fn service(&self) -> &'static str {
        match self {
            ServiceCommand::Restart(s) | ServiceCommand::Start(s) | ServiceCommand::Stop(s) => {
                s.unit()
            }
            ServiceCommand::ReconfigureWifi => "wpa_supplicant",
        }
    }

    fn invocation(&self, wifi_interface: &str) -> (&'static str, Vec<String>) {
        match self {
            ServiceCommand::Restart(s) => ("systemctl", vec!["restart".into(), s.unit().into()]),
            ServiceCommand::Start(s) => ("systemctl", vec!["start".into(), s.unit().into()]),
            ServiceCommand::Stop(s) => ("systemctl", vec!["stop".into(), s.unit().into()]),
            ServiceCommand::ReconfigureWifi => (
                "wpa_cli",
                vec!["-i".into(), wifi_interface.into(), "reconfigure".into()],
            ),
        }
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCommand::Restart(s) => write!(f, "restart {}", s.unit()),
            ServiceCommand::Start(s) => write!(f, "start {}", s.unit()),
            ServiceCommand::Stop(s) => write!(f, "stop {}", s.unit()),
            ServiceCommand::ReconfigureWifi => write!(f, "reconfigure wifi"),
        }
    }
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ServiceControl {
    async fn run(&self, command: ServiceCommand) -> Result<(), ServiceControlError>;
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait WifiScanner {
    /// Names of the networks currently visible, possibly with duplicates
    async fn scan(&self) -> Result<Vec<String>>;
}

/// Controls daemons through `systemctl` and `wpa_cli`.
#[derive(Clone)]
pub struct SystemctlClient {
    wifi_interface: String,
}

impl SystemctlClient {
    pub fn new(wifi_interface: &str) -> Self {
        Self {
            wifi_interface: wifi_interface.to_string(),
        }
    }
}

impl ServiceControl for SystemctlClient {
    async fn run(&self, command: ServiceCommand) -> Result<(), ServiceControlError> {
        let (program, args) = command.invocation(&self.wifi_interface);
        info!("{program} {}", args.join(" "));

        let failed = |detail: String| ServiceControlError {
            service: command.service().to_string(),
            detail,
        };

        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|e| failed(format!("failed to spawn {program}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(failed(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        // wpa_cli reports command failures on stdout with a zero exit code
        if stdout.trim() == "FAIL" {
            return Err(failed(format!("{program} reported FAIL")));
        }

        debug!("{command} done");
        Ok(())
    }
}

/// Scans with `iwlist <interface> scan`.
#[derive(Clone)]
pub struct IwlistScanner {
    wifi_interface: String,
}

impl IwlistScanner {
    pub fn new(wifi_interface: &str) -> Self {
        Self {
            wifi_interface: wifi_interface.to_string(),
        }
    }
}

impl WifiScanner for IwlistScanner {
    async fn scan(&self) -> Result<Vec<String>> {
        let output = Command::new("iwlist")
            .arg(&self.wifi_interface)
            .arg("scan")
            .output()
            .await
            .context("failed to spawn iwlist")?;

        ensure!(
            output.status.success(),
            "iwlist {} scan exited with {}: {}",
            self.wifi_interface,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        let networks = parse_essids(&String::from_utf8_lossy(&output.stdout));
        debug!("scan found {} networks", networks.len());

        Ok(networks)
    }
}

/// Extract `ESSID:"..."` values from `iwlist` output. Hidden networks are skipped.
pub fn parse_essids(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ESSID:"))
        .map(|value| {
            value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value)
        })
        .filter(|essid| !essid.is_empty() && !essid.starts_with("\\x00"))
        .map(str::to_string)
        .collect()
}
