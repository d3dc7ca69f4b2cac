// lib.rs
#![warn(clippy::large_futures)]

pub use std::sync::Arc;

pub use anyhow::bail;
pub use chrono::*;
pub use serde::{Deserialize, Serialize};
pub use tokio::time::{sleep, Duration};
pub use tracing::*;

mod calibration;
pub use calibration::*;

mod config;
pub use config::*;

mod fan;
pub use fan::*;

mod gate;
pub use gate::*;

mod monitor;
pub use monitor::*;

mod mqtt;
pub use mqtt::*;

mod sensor;
pub use sensor::*;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One sampling cycle's worth of telemetry, serialized as-is onto the
/// sensor topic. The tank monitor fills every field; the system/room
/// monitor has no water sensors, and its payload simply omits them.
#[derive(Clone, Debug, Serialize)]
pub struct SensorReading {
    pub timestamp_iso: String,
    pub env_temperature_f: f64,
    pub env_humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_temperature_f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_depth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_depth_offset: Option<f64>,
}

impl SensorReading {
    pub fn new(
        now: DateTime<Local>,
        env_temperature_f: f64,
        env_humidity: f64,
        water_temperature_f: Option<f64>,
        water_depth: Option<f64>,
        water_depth_offset: Option<f64>,
    ) -> Self {
        SensorReading {
            timestamp_iso: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            env_temperature_f,
            env_humidity,
            water_temperature_f,
            water_depth,
            water_depth_offset,
        }
    }
}

// EOF
