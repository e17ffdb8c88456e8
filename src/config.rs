use crate::services::profile_store::ProfileName;
use anyhow::{Context, Result, bail};
use std::{collections::BTreeMap, env, path::PathBuf, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Provisioning HTTP server configuration
    pub ui: UiConfig,

    /// Network config profile locations
    pub profiles: ProfileConfig,

    /// Wireless interface used for scanning and `wpa_cli`
    pub wifi_interface: String,

    /// Remote API endpoints and HTTP client behavior
    pub remote: RemoteConfig,

    /// Telemetry reporting configuration
    pub telemetry: TelemetryConfig,

    /// Location of the persisted device token
    pub token_file: PathBuf,

    /// How the agent obtains account identity when it is not registered yet
    pub provisioning: ProvisioningMode,

    /// Clear the stored token and provision again
    pub reprovision: bool,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub port: u16,
    pub landing_page: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ProfileConfig {
    pub source_dir: PathBuf,
    pub targets: BTreeMap<ProfileName, PathBuf>,
}

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub registration_base_url: String,
    pub telemetry_base_url: String,
    pub timeout: Duration,
    pub registration_retry_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub update_interval: Duration,
    pub source: TemperatureSource,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemperatureSource {
    Fixed,
    File(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProvisioningMode {
    /// Advertise the setup access point and serve the provisioning API
    AccessPoint,
    /// Device is already online; ask for the account identity on stdin
    Prompt,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// and validates all configuration from environment variables.
    ///
    /// # Panics
    /// Panics if configuration loading fails. The agent cannot do anything
    /// sensible without valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    fn load_internal() -> Result<Self> {
        let ui = UiConfig::load()?;
        let profiles = ProfileConfig::load();
        let wifi_interface = env::var("WIFI_INTERFACE").unwrap_or_else(|_| "wlan0".to_string());
        let remote = RemoteConfig::load()?;
        let telemetry = TelemetryConfig::load()?;
        let token_file = env::var("TOKEN_FILE")
            .unwrap_or_else(|_| "/var/lib/device-agent/token.json".to_string())
            .into();
        let provisioning = ProvisioningMode::load()?;
        let reprovision = env::var("REPROVISION")
            .map(|v| matches!(v.as_str(), "1" | "true"))
            .unwrap_or(false);

        Ok(Self {
            ui,
            profiles,
            wifi_interface,
            remote,
            telemetry,
            token_file,
            provisioning,
            reprovision,
        })
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .context(format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

impl UiConfig {
    fn load() -> Result<Self> {
        let port = env::var("UI_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u16>()
            .context("failed to parse UI_PORT: invalid format")?;

        let landing_page = env::var("LANDING_PAGE")
            .unwrap_or_else(|_| "./public/index.html".to_string())
            .into();

        Ok(Self { port, landing_page })
    }
}

impl ProfileConfig {
    fn load() -> Self {
        let source_dir = env::var("PROFILE_DIR")
            .unwrap_or_else(|_| "/etc/device-agent/profiles".to_string())
            .into();

        let targets = ProfileName::ALL
            .into_iter()
            .map(|name| {
                let path = env::var(name.target_env_var())
                    .unwrap_or_else(|_| name.default_target().to_string());
                (name, PathBuf::from(path))
            })
            .collect();

        Self {
            source_dir,
            targets,
        }
    }
}

impl RemoteConfig {
    fn load() -> Result<Self> {
        let registration_base_url = env::var("REGISTRATION_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8081/rest".to_string());
        let telemetry_base_url =
            env::var("TELEMETRY_BASE_URL").unwrap_or_else(|_| registration_base_url.clone());

        Ok(Self {
            registration_base_url,
            telemetry_base_url,
            timeout: secs_var("HTTP_TIMEOUT_SECS", 10)?,
            registration_retry_delay: secs_var("REGISTRATION_RETRY_DELAY_SECS", 2)?,
        })
    }
}

impl TelemetryConfig {
    fn load() -> Result<Self> {
        let source = match env::var("TEMPERATURE_SOURCE") {
            Ok(value) if value == "fixed" => TemperatureSource::Fixed,
            Ok(value) => TemperatureSource::File(value.into()),
            Err(_) => TemperatureSource::File("/sys/class/thermal/thermal_zone0/temp".into()),
        };

        Ok(Self {
            update_interval: secs_var("UPDATE_INTERVAL_SECS", 1)?,
            source,
        })
    }
}

impl ProvisioningMode {
    fn load() -> Result<Self> {
        match env::var("PROVISIONING").as_deref() {
            Err(_) | Ok("ap") => Ok(Self::AccessPoint),
            Ok("prompt") => Ok(Self::Prompt),
            Ok(other) => bail!("failed to parse PROVISIONING: unknown mode {other:?}"),
        }
    }
}
