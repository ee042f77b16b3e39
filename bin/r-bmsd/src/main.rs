//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the R-BMS daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
mod cli;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use r_bms_api::{bind_api_listener, serve_api, ApiServer, ApiState};
use r_bms_codec::CSV_HEADER;
use r_bms_common::{init_tracing, AppConfig};
use r_bms_core::{open_bus, Monitor, MonitorSettings, TerminationCoordinator};
use r_bms_metrics::{new_registry, DaemonMetrics, SharedRegistry};
use r_bms_persistence::{DataRecorder, PersistenceMetrics};
use tracing::{error, info, warn};

use crate::cli::{version_string, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", version_string());
        return Ok(());
    }

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(cli.config.as_deref())?;
    let load_duration = load_started.elapsed();
    let mut config = loaded.config;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    init_tracing("r-bmsd", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running on defaults"),
    }

    let registry = if config.metrics.enabled {
        let registry = new_registry();
        let daemon_metrics = DaemonMetrics::new(registry.clone())?;
        daemon_metrics.inc_start();
        daemon_metrics.observe_config_load(load_duration.as_secs_f64());
        let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
        daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), profile);
        Some(registry)
    } else {
        info!("metrics disabled by configuration");
        None
    };

    run_daemon(config, registry).await
}

async fn run_daemon(config: AppConfig, registry: Option<SharedRegistry>) -> Result<()> {
    // Bind first so a busy port aborts before any bus traffic happens.
    let listener = if config.api.enabled {
        Some(bind_api_listener(config.api.listen)?)
    } else {
        info!("api server disabled by configuration");
        None
    };

    let bus = open_bus(&config.bus.interface)
        .with_context(|| format!("failed to open bus {}", config.bus.interface))?;

    let mut recorder = DataRecorder::new(
        &config.recorder.root,
        config.recorder.extension.as_str(),
        config.recorder.retention_days,
        CSV_HEADER,
    )
    .context("failed to configure datafile recorder")?;
    if let Some(registry) = &registry {
        recorder = recorder.with_metrics(PersistenceMetrics::new(registry.clone())?);
    }
    info!(
        root = %config.recorder.root.display(),
        retention_days = config.recorder.retention_days,
        "datafile recorder configured"
    );

    let mut monitor = Monitor::start(
        MonitorSettings::from_config(&config),
        bus,
        Box::new(recorder),
        registry.clone(),
    )?;

    let api_server: Option<ApiServer> = match listener {
        Some(listener) => {
            let data_dir = config
                .api
                .serve_data
                .then(|| config.recorder.root.clone());
            let state = Arc::new(ApiState::new(monitor.broker(), registry));
            Some(serve_api(state, listener, data_dir)?)
        }
        None => None,
    };

    let coordinator = TerminationCoordinator::new();
    let listener_coordinator = coordinator.clone();
    let signals = tokio::spawn(async move {
        if let Err(err) = listener_coordinator.listen_for_signals().await {
            error!(error = %format!("{err:#}"), "signal listener failed");
        }
    });

    info!(version = env!("CARGO_PKG_VERSION"), "daemon running; waiting for termination signal");
    let fatal = tokio::select! {
        reason = coordinator.wait() => {
            info!(reason, "shutting down");
            None
        }
        err = monitor.wait_fatal() => {
            coordinator.trigger("fatal error");
            error!(error = %format!("{err:#}"), "fatal monitor error; shutting down");
            Some(err)
        }
    };

    let stopped = monitor.shutdown().await;
    if let Some(server) = api_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "api server shutdown failed");
        }
    }
    signals.abort();
    info!("daemon stopped");

    match (fatal, stopped) {
        (Some(err), Err(shutdown_err)) => {
            error!(error = %format!("{shutdown_err:#}"), "monitor shutdown failed");
            Err(err)
        }
        (Some(err), Ok(())) | (None, Err(err)) => Err(err),
        (None, Ok(())) => Ok(()),
    }
}
