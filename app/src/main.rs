mod adapter;
mod bus;
mod config;
mod device;
mod devices;
mod error;
mod logger;
mod opts;
mod router;
mod telemetry;

use crate::{
    adapter::Adapter,
    bus::SystemBus,
    config::Config,
    error::{BluetoothDevicesError, DevicesResult},
    logger::*,
    telemetry::AdapterEvent,
};

use opts::Opts;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

#[tokio::main]
async fn main() -> DevicesResult<()> {
    let opts = Opts::from_env();
    let config = Config::load(&opts.config)?;

    let level_filter = opts.level_filter(config.debug_logs);
    match &opts.log_file {
        Some(path) => init_logger(LoggerType::File(path), level_filter)?,
        None => init_logger(LoggerType::Console, level_filter)?,
    };

    run(&config).await
}

async fn run(config: &Config) -> DevicesResult<()> {
    let bus = match SystemBus::new().await {
        Ok(bus) => Arc::new(bus),
        Err(err) => {
            log::error!("Failed to connect to the system bus: {}", err);
            return Err(err.into());
        }
    };

    let (sender, receiver) = mpsc::unbounded_channel();
    let mut adapter = Adapter::from_config(config, bus, sender)?;
    log::info!("Tracking {} device(s)", adapter.devices().len());

    let mut consumer = tokio::spawn(publish_events(receiver));

    if let Err(err) = adapter.setup().await {
        log::error!("Adapter setup failed: {}", err);
        adapter.destroy().await;
        return Err(err);
    }

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, shutting down.");
            Ok(())
        }
        published = &mut consumer => match published {
            Ok(result) => result,
            Err(err) => {
                log::error!("Event consumer stopped: {}", err);
                Ok(())
            }
        },
    };

    adapter.destroy().await;
    outcome
}

/// Prints telemetry as JSON lines until the adapter dies.
async fn publish_events(mut events: UnboundedReceiver<AdapterEvent>) -> DevicesResult<()> {
    while let Some(event) = events.recv().await {
        match &event {
            AdapterEvent::DeviceUpdate { .. } => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => log::error!("Failed to serialize update: {}", err),
            },
            AdapterEvent::SetupCompleted => log::info!("Setup completed"),
            AdapterEvent::AdapterDied => {
                log::error!("Bluetooth adapter is gone");
                return Err(BluetoothDevicesError::AdapterDied);
            }
            _ => log::debug!("{:?}", event),
        }
    }

    log::warn!("Event stream closed, shutting down.");
    Ok(())
}
