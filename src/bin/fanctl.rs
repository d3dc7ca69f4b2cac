// bin/fanctl.rs

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use hydromon::*;
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "conf/fan.json";

/// Cadence of the rpm-compute / command-drain loop.
const FAN_LOOP_SECS: u64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("hydromon fan controller v{FW_VERSION}");
    info!("Initializing...");

    let config = MonitorConfig::load_or_default(Path::new(CONFIG_PATH), MonitorKind::System);
    info!("Active config:\n{config:#?}");

    let bridge = Arc::new(MqttBridge::new(&config.mqtt));
    let tach = Arc::new(TachCounters::new());
    let controller = FanController::new(
        tach.clone(),
        Box::new(sim::LogPwm),
        bridge,
        Duration::from_secs(FAN_LOOP_SECS),
    );
    info!("Initialized.");

    let handle = controller.start();

    // bench stand-in for the tach edge interrupts: ~1200 rpm per fan
    let pulse_cancel = handle.cancel_token();
    let pulse_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = pulse_cancel.cancelled() => break,
                _ = sleep(Duration::from_millis(50)) => {}
            }
            for fan in FanId::ALL {
                tach.pulse(fan);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Stopping fan controller...");
    handle.stop();
    handle.join().await?;
    pulse_task.await?;
    info!("Fan controller stopped.");
    Ok(())
}

// EOF
