//! Temperature sources sampled by the telemetry reporter.

use crate::config::TemperatureSource;
use anyhow::{Context, Result};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{fs, path::PathBuf, sync::Arc};

/// Reading used when no real sensor is attached
pub const FIXED_READING_CELSIUS: f64 = 22.0;

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait Sensor: Send + Sync {
    fn read_celsius(&self) -> Result<f64>;
}

pub struct FixedSensor {
    celsius: f64,
}

impl FixedSensor {
    pub fn new(celsius: f64) -> Self {
        Self { celsius }
    }
}

impl Default for FixedSensor {
    fn default() -> Self {
        Self::new(FIXED_READING_CELSIUS)
    }
}

impl Sensor for FixedSensor {
    fn read_celsius(&self) -> Result<f64> {
        Ok(self.celsius)
    }
}

/// Reads a Linux thermal zone, which reports millidegrees Celsius.
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sensor for ThermalZoneSensor {
    fn read_celsius(&self) -> Result<f64> {
        let raw = fs::read_to_string(&self.path)
            .context(format!("failed to read {:?}", self.path))?;
        let millis = raw
            .trim()
            .parse::<i64>()
            .context(format!("failed to parse temperature {raw:?}"))?;

        Ok(millis as f64 / 1000.0)
    }
}

pub fn from_source(source: &TemperatureSource) -> Arc<dyn Sensor> {
    match source {
        TemperatureSource::Fixed => Arc::new(FixedSensor::default()),
        TemperatureSource::File(path) => Arc::new(ThermalZoneSensor::new(path)),
    }
}
