//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary monitor lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use r_bms_common::AppConfig;
use r_bms_metrics::{MonitorMetrics, SharedRegistry};
use r_bms_persistence::RecordSink;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{BrokerHandle, StatusBroker};
use crate::bus::CanBus;
use crate::ingest::run_ingest;
use crate::keepalive::{KeepAliveGenerator, KeepAliveHandle};
use crate::writer::RecordWriter;

/// Timing knobs for the monitor tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Period of the keep-alive frame.
    pub keep_alive_interval: Duration,
    /// Period between recorded status samples.
    pub record_interval: Duration,
    /// Feed the bus from the built-in simulator.
    pub simulate: bool,
    /// Period between simulated frame bursts.
    pub simulation_interval: Duration,
    /// Pause between bus disconnect and task teardown.
    pub grace_period: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            keep_alive_interval: config.bus.keep_alive_interval,
            record_interval: config.recorder.interval,
            simulate: config.bus.simulate,
            simulation_interval: config.bus.simulation_interval,
            grace_period: config.shutdown.grace_period,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Entry point wiring the bus, broker and periodic tasks together.
#[derive(Debug)]
pub struct Monitor;

impl Monitor {
    /// Spawn every monitor task and return the handle controlling them.
    pub fn start(
        settings: MonitorSettings,
        bus: Arc<dyn CanBus>,
        sink: Box<dyn RecordSink>,
        metrics: Option<SharedRegistry>,
    ) -> Result<MonitorHandle> {
        let metrics = match metrics {
            Some(registry) => Some(MonitorMetrics::new(registry)?),
            None => None,
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        // The broker outlives its clients, so it stops on a signal of its own.
        let (broker_shutdown_tx, broker_shutdown_rx) = broadcast::channel(1);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        let (broker, broker_task) = StatusBroker::spawn(metrics.clone(), broker_shutdown_rx);

        // Subscribe before anything can publish so no early frame is missed.
        let frames = bus.subscribe();
        tasks.push((
            "ingest",
            spawn_supervised(
                "ingest",
                fatal_tx.clone(),
                run_ingest(frames, broker.clone(), metrics.clone(), shutdown_rx.resubscribe()),
            ),
        ));

        let writer = RecordWriter::new(broker.clone(), sink, settings.record_interval)
            .with_metrics(metrics.clone());
        tasks.push((
            "recorder",
            spawn_supervised("recorder", fatal_tx, writer.run(shutdown_rx.resubscribe())),
        ));

        if settings.simulate {
            #[cfg(feature = "simulation")]
            {
                let simulator =
                    crate::sim::BmsSimulator::new(bus.clone(), settings.simulation_interval);
                tasks.push((
                    "simulator",
                    tokio::spawn(simulator.run(shutdown_rx.resubscribe())),
                ));
            }
            #[cfg(not(feature = "simulation"))]
            warn!("simulation requested but the simulation feature is disabled");
        }

        let keep_alive = KeepAliveGenerator::new(bus.clone(), settings.keep_alive_interval)
            .with_metrics(metrics)
            .spawn(shutdown_rx);

        info!(
            bus = bus.name(),
            keep_alive_secs = settings.keep_alive_interval.as_secs_f64(),
            record_secs = settings.record_interval.as_secs_f64(),
            simulate = settings.simulate,
            "monitor started"
        );

        Ok(MonitorHandle {
            broker,
            bus,
            keep_alive,
            shutdown: shutdown_tx,
            tasks,
            broker_shutdown: broker_shutdown_tx,
            broker_task,
            fatal: fatal_rx,
            grace_period: settings.grace_period,
        })
    }
}

/// Lifecycle handle returned by [`Monitor::start`].
#[derive(Debug)]
pub struct MonitorHandle {
    broker: BrokerHandle,
    bus: Arc<dyn CanBus>,
    keep_alive: KeepAliveHandle,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    broker_shutdown: broadcast::Sender<()>,
    broker_task: JoinHandle<()>,
    fatal: mpsc::UnboundedReceiver<anyhow::Error>,
    grace_period: Duration,
}

impl MonitorHandle {
    /// Client for status queries.
    pub fn broker(&self) -> BrokerHandle {
        self.broker.clone()
    }

    /// Resolve with the first task failure. Pending forever if none occurs.
    pub async fn wait_fatal(&mut self) -> anyhow::Error {
        match self.fatal.recv().await {
            Some(err) => err,
            None => std::future::pending().await,
        }
    }

    /// Stop the keep-alive, release the bus, wait out the grace period, then stop and join every task.
    ///
    /// The broker is stopped last so requests issued by the other tasks
    /// while they wind down are still answered. A task failing during the
    /// teardown is returned as an error.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("monitor shutdown initiated");
        self.keep_alive.stop().await?;

        if let Err(err) = self.bus.disconnect() {
            warn!(bus = self.bus.name(), error = %err, "bus disconnect failed");
        }
        tokio::time::sleep(self.grace_period).await;

        let _ = self.shutdown.send(());
        for (name, task) in self.tasks {
            if let Err(err) = task.await {
                error!(task = name, error = %err, "monitor task join error");
            }
        }
        let _ = self.broker_shutdown.send(());
        if let Err(err) = self.broker_task.await {
            error!(task = "broker", error = %err, "monitor task join error");
        }

        if let Ok(err) = self.fatal.try_recv() {
            return Err(err.context("monitor task failed during shutdown"));
        }
        info!("monitor shutdown complete");
        Ok(())
    }
}

fn spawn_supervised<F>(
    name: &'static str,
    fatal: mpsc::UnboundedSender<anyhow::Error>,
    task: F,
) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = task.await {
            error!(task = name, error = %format!("{err:#}"), "monitor task failed");
            let _ = fatal.send(err.context(format!("{name} task failed")));
        }
    })
}
