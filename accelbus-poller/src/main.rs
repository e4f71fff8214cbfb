//! Sensor-node poller.
//!
//! Polls accelerometer sensor nodes over Modbus and publishes their decoded
//! registers to Zenoh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use accelbus_common::{KeyExprBuilder, LoggingConfig};
use accelbus_poller::config::{BridgeConfig, DeviceConfig};
use accelbus_poller::profiles::Profile;
use accelbus_poller::sink::{BridgeSink, LogSink, ZenohSink};
use accelbus_poller::transport::DeviceTransport;
use accelbus_poller::{DeviceSession, Poller, PollerExit, TypedValue};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use zenoh::Session;

/// Register-mapped telemetry poller for accelerometer sensor nodes.
#[derive(Parser, Debug)]
#[command(name = "accelbus-poller")]
#[command(about = "Polls sensor nodes over Modbus and publishes to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "accelbus.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Log outcomes instead of publishing them, without opening a Zenoh session.
    #[arg(long)]
    no_publish: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = BridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config: LoggingConfig = config
        .logging
        .clone()
        .with_level_override(args.log_level.as_deref());
    accelbus_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting accelbus-poller");
    info!(config = ?args.config, devices = config.devices.len(), "Loaded configuration");

    let keys = KeyExprBuilder::new(config.publish.key_prefix.clone());
    let session = if config.publish.enabled && !args.no_publish {
        let session = accelbus_common::connect(&config.zenoh)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;
        Some(session)
    } else {
        info!("Publishing disabled, outcomes are logged only");
        None
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for device in &config.devices {
        let mut poller = build_poller(device, stop_rx.clone()).await?;
        let mut sink = match &session {
            Some(session) => BridgeSink::Zenoh(ZenohSink::new(
                session.clone(),
                keys.clone(),
                device.name.clone(),
                config.serialization,
            )),
            None => BridgeSink::Log(LogSink::new(device.name.clone())),
        };

        info!(
            device = %device.name,
            connection = ?device.connection,
            unit_id = device.unit_id,
            "Starting poller"
        );

        let name = device.name.clone();
        tasks.spawn(async move {
            let exit = poller.run(&mut sink).await;
            (name, exit)
        });
    }

    info!(devices = config.devices.len(), "Poller running");
    publish_status(session.as_ref(), &keys, &config, "running").await;

    // Wait for a shutdown signal, or for every poller to stop on its own
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = drain(&mut tasks) => {
            warn!("All pollers stopped");
        }
    }

    // Pollers observe the stop flag at their next cycle
    let _ = stop_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), drain(&mut tasks))
        .await
        .is_err()
    {
        warn!("Pollers did not stop in time, aborting");
        tasks.abort_all();
    }

    publish_status(session.as_ref(), &keys, &config, "offline").await;

    if let Some(session) = session {
        session
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    }
    info!("accelbus-poller stopped");

    Ok(())
}

async fn build_poller(
    device: &DeviceConfig,
    stop: watch::Receiver<bool>,
) -> Result<Poller<DeviceTransport>> {
    let map = Arc::new(
        device
            .register_map()
            .with_context(|| format!("Device '{}'", device.name))?,
    );
    let transport = device
        .transport(&map)
        .with_context(|| format!("Device '{}'", device.name))?;
    let mut session = DeviceSession::new(transport, device.unit_id);

    if let Some(expected) = device.expected_device_id {
        check_identity(&mut session, &device.name, expected).await?;
    }

    Ok(Poller::new(device.name.clone(), session, map, device.poller_settings()).with_stop(stop))
}

/// Compare the node's identity register with the configured id.
///
/// A mismatch or a failed read is only reported; polling starts regardless.
async fn check_identity(
    session: &mut DeviceSession<DeviceTransport>,
    device: &str,
    expected: u16,
) -> Result<()> {
    let identity = Profile::Identity.register_map()?;

    match session.read_field(&identity, "device_id").await {
        Ok(TypedValue::Uint16(id)) if id == expected => {
            info!(device, device_id = %format!("0x{:04X}", id), "Device identity confirmed");
        }
        Ok(value) => {
            warn!(
                device,
                expected = %format!("0x{:04X}", expected),
                found = %value,
                "Unexpected device id"
            );
        }
        Err(e) => {
            warn!(device, error = %e, "Identity check failed");
        }
    }

    Ok(())
}

async fn drain(tasks: &mut JoinSet<(String, PollerExit)>) {
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok((device, PollerExit::Fatal(reason))) => {
                error!(device = %device, error = %reason, "Poller stopped on fatal error");
            }
            Ok((device, exit)) => {
                info!(device = %device, exit = ?exit, "Poller finished");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                error!(error = %e, "Poller task failed");
            }
        }
    }
}

async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

async fn publish_status(
    session: Option<&Session>,
    keys: &KeyExprBuilder,
    config: &BridgeConfig,
    status: &str,
) {
    let Some(session) = session else {
        return;
    };

    let payload = serde_json::json!({
        "bridge": "accelbus",
        "version": env!("CARGO_PKG_VERSION"),
        "devices": config.devices.iter().map(|d| &d.name).collect::<Vec<_>>(),
        "status": status,
    });

    if let Err(e) = session.put(keys.status(), payload.to_string()).await {
        error!(error = %e, "Failed to publish bridge status");
    }
}
