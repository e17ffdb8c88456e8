use actix_server::ServerHandle;
use actix_web::{App, HttpServer, web::Data};
use anyhow::{Context, Result};
use device_agent::{
    api::Api,
    config::{AppConfig, ProvisioningMode},
    http_client::build_client,
    lifecycle::{AgentState, Lifecycle},
    prompt::{IdentityPrompt, register_interactively},
    sensor,
    services::{
        network_mode::{NetworkModeController, SwitchTarget},
        profile_store::ProfileStore,
        provisioning::ProvisioningService,
        registrar::DeviceRegistrar,
        telemetry::TelemetryReporter,
        token_store::TokenStore,
    },
    system_client::{IwlistScanner, SystemctlClient},
};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use reqwest::Client;
use std::{io::Write, sync::Arc};
use tokio::{
    io::{BufReader, stdin, stdout},
    signal::unix::{Signal, SignalKind, signal},
    sync::broadcast,
};

type UiApi = Api<IwlistScanner, SystemctlClient>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::get();
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let lifecycle = Lifecycle::default();
    let token_store = TokenStore::new(&config.token_file);

    if config.reprovision {
        info!("reprovisioning requested");
        token_store
            .clear()
            .context("failed to clear device token")?;
        lifecycle.reprovision();
    }

    let client = build_client(config.remote.timeout)?;
    let reporter = Arc::new(TelemetryReporter::new(
        client.clone(),
        &config.remote.telemetry_base_url,
        config.telemetry.update_interval,
        sensor::from_source(&config.telemetry.source),
    ));

    match token_store.load().context("failed to load device token")? {
        Some(token) => {
            info!("device already registered, skipping provisioning");
            lifecycle.advance(AgentState::Reporting);
            reporter.start(token).await;
        }
        None => match config.provisioning {
            ProvisioningMode::AccessPoint => {
                provision_over_access_point(
                    client,
                    token_store,
                    reporter.clone(),
                    lifecycle.clone(),
                    &mut sigterm,
                )
                .await?
            }
            ProvisioningMode::Prompt => {
                provision_over_console(client, &token_store, &reporter, &lifecycle).await?
            }
        },
    }

    // provisioning may have been cut short by a signal
    if lifecycle.current() == AgentState::Reporting {
        wait_for_signal(&mut sigterm).await;
    }

    reporter.stop().await;
    lifecycle.advance(AgentState::Stopped);
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

async fn wait_for_signal(sigterm: &mut Signal) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("ctrl-c received"),
        _ = sigterm.recv() => debug!("SIGTERM received"),
    }
}

async fn provision_over_access_point(
    client: Client,
    token_store: TokenStore,
    reporter: Arc<TelemetryReporter>,
    lifecycle: Lifecycle,
    sigterm: &mut Signal,
) -> Result<()> {
    let config = AppConfig::get();

    let network = Arc::new(NetworkModeController::new(
        ProfileStore::new(&config.profiles),
        SystemctlClient::new(&config.wifi_interface),
    ));

    network
        .switch_to(SwitchTarget::AccessPoint)
        .await
        .context("failed to enter access point mode")?;

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let provisioning = Arc::new(ProvisioningService::new(
        IwlistScanner::new(&config.wifi_interface),
        network,
        DeviceRegistrar::new(
            client,
            &config.remote.registration_base_url,
            config.remote.registration_retry_delay,
        ),
        token_store,
        reporter,
        lifecycle,
        shutdown_tx,
    ));

    let (server_handle, server_task) =
        run_server(UiApi::new(provisioning, config.ui.landing_page.clone()))?;

    tokio::select! {
        _ = shutdown_rx.recv() => info!("provisioning finished, closing listener"),
        _ = tokio::signal::ctrl_c() => debug!("ctrl-c received"),
        _ = sigterm.recv() => debug!("SIGTERM received"),
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    }

    server_handle.stop(true).await;

    Ok(())
}

fn run_server(
    api: UiApi,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let ui_port = AppConfig::get().ui.port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(api.clone()))
            .configure(UiApi::configure)
    })
    .bind(format!("0.0.0.0:{ui_port}"))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    info!("provisioning listener on port {ui_port}");

    Ok((server.handle(), tokio::spawn(server)))
}

async fn provision_over_console(
    client: Client,
    token_store: &TokenStore,
    reporter: &TelemetryReporter,
    lifecycle: &Lifecycle,
) -> Result<()> {
    let config = AppConfig::get();

    let registrar = DeviceRegistrar::new(
        client,
        &config.remote.registration_base_url,
        config.remote.registration_retry_delay,
    );
    let mut prompt = IdentityPrompt::new(BufReader::new(stdin()), stdout());

    lifecycle.advance(AgentState::Registering);
    let token = register_interactively(&registrar, &mut prompt).await?;

    token_store
        .save(&token)
        .context("failed to save device token")?;

    reporter.start(token).await;
    lifecycle.advance(AgentState::Reporting);

    Ok(())
}
