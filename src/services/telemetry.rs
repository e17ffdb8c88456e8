//! Background temperature reporting
//!
//! One worker task samples the sensor, posts the sample and sleeps for the
//! update interval, until it is told to stop. Failed samples are logged and
//! dropped; nothing is buffered.

use crate::{sensor::Sensor, services::token_store::DeviceToken};
use anyhow::{Context, Result, ensure};
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::sleep,
};

pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const TEMPERATURE_PATH: &str = "/device/temp";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetrySample {
    #[serde(rename = "date")]
    pub timestamp_unix: i64,
    #[serde(rename = "temp")]
    pub temperature_celsius: f64,
}

impl TelemetrySample {
    pub fn now(temperature_celsius: f64) -> Self {
        let timestamp_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        Self {
            timestamp_unix,
            temperature_celsius,
        }
    }
}

struct Worker {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything a worker needs, shared immutably for one reporting session.
#[derive(Clone)]
struct Session {
    client: Client,
    endpoint: String,
    interval: Duration,
    sensor: Arc<dyn Sensor>,
    token: DeviceToken,
}

pub struct TelemetryReporter {
    client: Client,
    endpoint: String,
    interval: Duration,
    sensor: Arc<dyn Sensor>,
    worker: Mutex<Option<Worker>>,
}

impl TelemetryReporter {
    /// Intervals below [`MIN_UPDATE_INTERVAL`] are raised to it.
    pub fn new(
        client: Client,
        base_url: &str,
        update_interval: Duration,
        sensor: Arc<dyn Sensor>,
    ) -> Self {
        if update_interval < MIN_UPDATE_INTERVAL {
            debug!("update interval {update_interval:?} raised to {MIN_UPDATE_INTERVAL:?}");
        }

        Self {
            client,
            endpoint: format!("{}{TEMPERATURE_PATH}", base_url.trim_end_matches('/')),
            interval: update_interval.max(MIN_UPDATE_INTERVAL),
            sensor,
            worker: Mutex::new(None),
        }
    }

    pub fn update_interval(&self) -> Duration {
        self.interval
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Start reporting with `token`. Returns `false` if a worker is already running.
    pub async fn start(&self, token: DeviceToken) -> bool {
        let mut worker = self.worker.lock().await;

        if worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
        {
            debug!("telemetry reporter already running");
            return false;
        }

        let session = Session {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            interval: self.interval,
            sensor: self.sensor.clone(),
            token,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run(session, stop_rx));

        *worker = Some(Worker { stop_tx, handle });

        info!(
            "telemetry reporter started: {} every {}s",
            self.endpoint,
            self.interval.as_secs()
        );
        true
    }

    /// Stop reporting and wait until the worker has exited.
    ///
    /// Returns `false` if no worker was running.
    pub async fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().await.take() else {
            debug!("telemetry reporter not running");
            return false;
        };

        // the worker may already be gone, in which case there is no receiver
        let _ = worker.stop_tx.send(());

        if let Err(e) = worker.handle.await {
            error!("telemetry worker ended abnormally: {e}");
        }

        info!("telemetry reporter stopped");
        true
    }
}

async fn run(session: Session, mut stop_rx: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = report_once(&session) => {}
        }

        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = sleep(session.interval) => {}
        }
    }

    debug!("telemetry worker exiting");
}

async fn report_once(session: &Session) {
    let temperature = match session.sensor.read_celsius() {
        Ok(temperature) => temperature,
        Err(e) => {
            warn!("sensor read failed, skipping sample: {e:#}");
            return;
        }
    };

    let sample = TelemetrySample::now(temperature);
    debug!("posting {:.1} °C", sample.temperature_celsius);

    if let Err(e) = post_sample(session, &sample).await {
        warn!("sample dropped: {e:#}");
    }
}

async fn post_sample(session: &Session, sample: &TelemetrySample) -> Result<()> {
    let response = session
        .client
        .post(&session.endpoint)
        .bearer_auth(session.token.value())
        .json(sample)
        .send()
        .await
        .context(format!("failed to send POST {}", session.endpoint))?;

    let status = response.status();
    ensure!(status.is_success(), "POST {} answered {status}", session.endpoint);

    Ok(())
}
