// bin/tankmon.rs

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use hydromon::*;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "conf/tank.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("hydromon tank monitor v{FW_VERSION}");
    info!("Initializing...");

    let config = MonitorConfig::load_or_default(Path::new(CONFIG_PATH), MonitorKind::Tank);
    info!("Active config:\n{config:#?}");

    let bridge = Arc::new(MqttBridge::new(&config.mqtt));
    if let Err(e) = bridge.connect().await {
        // keep going; the bridge reconnects on the next publish
        warn!("Initial MQTT connect failed: {e:#}");
    }

    let calibration = Arc::new(Calibration::new());
    let depth_sensor: SharedDepthSensor = Arc::new(Mutex::new(Box::new(sim::SimDepth::new(42.0))));

    let monitor = HydroMonitor::new_tank(
        config,
        Box::new(sim::SimTempHumidity::env()),
        Box::new(sim::SimTempHumidity::water()),
        depth_sensor.clone(),
        Box::new(sim::ConsoleDisplay),
        calibration.clone(),
        bridge,
    );
    info!("Initialized.");

    info!("Starting monitoring thread...");
    let handle = monitor.start();
    let button_task = tokio::spawn(watch_zero_button(
        Box::new(sim::SimButton),
        depth_sensor,
        calibration,
        handle.cancel_token(),
    ));
    info!("Monitoring thread started.");

    tokio::signal::ctrl_c().await?;
    info!("Stopping monitoring thread...");
    handle.stop();
    handle.join().await?;
    button_task.await??;
    info!("Monitoring thread stopped.");
    Ok(())
}

// EOF
