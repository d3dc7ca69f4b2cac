// bin/sysmon.rs

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use hydromon::*;
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "conf/system.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("hydromon system monitor v{FW_VERSION}");
    info!("Initializing...");

    let config = MonitorConfig::load_or_default(Path::new(CONFIG_PATH), MonitorKind::System);
    info!("Active config:\n{config:#?}");

    let bridge = Arc::new(MqttBridge::new(&config.mqtt));
    if let Err(e) = bridge.connect().await {
        // keep going; the bridge reconnects on the next publish
        warn!("Initial MQTT connect failed: {e:#}");
    }

    let monitor = HydroMonitor::new_system(config, Box::new(sim::SimTempHumidity::env()), bridge);
    info!("Initialized.");

    info!("Starting monitoring thread...");
    let handle = monitor.start();
    info!("Monitoring thread started.");

    tokio::signal::ctrl_c().await?;
    info!("Stopping monitoring thread...");
    handle.stop();
    handle.join().await?;
    info!("Monitoring thread stopped.");
    Ok(())
}

// EOF
