// config.rs

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::*;

use crate::Duration;

const DEFAULT_SAMPLE_PERIOD: u64 = 1;
const DEFAULT_REPORT_PERIOD: u64 = 60;
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_ZERO_BUTTON_PIN: u8 = 17;
const DEFAULT_I2C_BUS: u8 = 1;

/// Which default table to fall back on when no config file exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorKind {
    Tank,
    System,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub name: String,
    pub sensor_sample_period_seconds: u64,
    pub zero_button_pin: u8,
    pub i2c: I2cConfig,
    pub mqtt: MqttConfig,
    pub sensors: SensorsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MqttConfig {
    pub server_url: String,
    pub server_port: u16,
    pub report_period_seconds: u64,
    pub base_topic: String,
    pub use_host_name_in_mqtt_topic: bool,
    // earlier config files carry the misspelled key
    #[serde(alias = "not_host_hame")]
    pub not_host_name: String,
    pub sensor_topic: String,
    pub status_topic: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct I2cConfig {
    pub bus: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_depth: Option<SensorAddr>,
    pub env_temp_humidity: SensorAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_temperature: Option<SensorAddr>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SensorAddr {
    pub i2c_addr: u16,
}

impl MonitorConfig {
    pub fn default_for(kind: MonitorKind) -> Self {
        match kind {
            MonitorKind::Tank => MonitorConfig {
                name: "default".into(),
                sensor_sample_period_seconds: DEFAULT_SAMPLE_PERIOD,
                zero_button_pin: DEFAULT_ZERO_BUTTON_PIN,
                i2c: I2cConfig { bus: DEFAULT_I2C_BUS },
                mqtt: MqttConfig {
                    server_url: "debian-openhab".into(),
                    server_port: DEFAULT_MQTT_PORT,
                    report_period_seconds: DEFAULT_REPORT_PERIOD,
                    base_topic: "hydro_tank_monitor".into(),
                    use_host_name_in_mqtt_topic: false,
                    not_host_name: "hydrofarm_tank1".into(),
                    sensor_topic: "last_sensor_data".into(),
                    status_topic: "status".into(),
                },
                sensors: SensorsConfig {
                    water_depth: Some(SensorAddr { i2c_addr: 0x29 }),
                    env_temp_humidity: SensorAddr { i2c_addr: 0x45 },
                    water_temperature: Some(SensorAddr { i2c_addr: 0x68 }),
                },
            },
            MonitorKind::System => MonitorConfig {
                name: "default".into(),
                sensor_sample_period_seconds: DEFAULT_SAMPLE_PERIOD,
                zero_button_pin: DEFAULT_ZERO_BUTTON_PIN,
                i2c: I2cConfig { bus: DEFAULT_I2C_BUS },
                mqtt: MqttConfig {
                    server_url: "debian-openhab".into(),
                    server_port: DEFAULT_MQTT_PORT,
                    report_period_seconds: DEFAULT_REPORT_PERIOD,
                    base_topic: "hydro_system_monitor".into(),
                    use_host_name_in_mqtt_topic: false,
                    not_host_name: "hydro_system_monitor".into(),
                    sensor_topic: "last_sensor_data".into(),
                    status_topic: "status".into(),
                },
                sensors: SensorsConfig {
                    water_depth: None,
                    env_temp_humidity: SensorAddr { i2c_addr: 0x45 },
                    water_temperature: None,
                },
            },
        }
    }

    pub fn load(path: &Path) -> Option<Self> {
        info!("Loading config from {}...", path.display());
        let raw = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                error!("Cannot read config file: {e}");
                return None;
            }
        };
        match serde_json::from_str::<MonitorConfig>(&raw) {
            Ok(c) => {
                info!("Config {} loaded.", path.display());
                Some(c)
            }
            Err(e) => {
                error!("Cannot parse config file: {e}");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Startup configuration is best-effort: a missing or malformed file
    /// falls back to the built-in defaults, which are persisted for the
    /// next run. Never aborts.
    pub fn load_or_default(path: &Path, kind: MonitorKind) -> Self {
        if let Some(c) = Self::load(path) {
            return c;
        }
        info!("Loading default config...");
        let c = Self::default_for(kind);
        match c.save(path) {
            Ok(()) => info!("Default config saved as: {}", path.display()),
            Err(e) => error!("Cannot save default config: {e:#}"),
        }
        c
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_secs(self.sensor_sample_period_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tank_defaults_are_the_known_farm_setup() {
        let c = MonitorConfig::default_for(MonitorKind::Tank);
        assert_eq!(c.sensor_sample_period_seconds, 1);
        assert_eq!(c.mqtt.report_period_seconds, 60);
        assert_eq!(c.mqtt.server_port, 1883);
        assert_eq!(c.mqtt.base_topic, "hydro_tank_monitor");
        assert_eq!(c.mqtt.not_host_name, "hydrofarm_tank1");
        assert_eq!(c.zero_button_pin, 17);
        assert_eq!(c.sensors.water_depth.unwrap().i2c_addr, 0x29);
        assert_eq!(c.sensors.env_temp_humidity.i2c_addr, 0x45);
        assert_eq!(c.sensors.water_temperature.unwrap().i2c_addr, 0x68);
    }

    #[test]
    fn system_defaults_have_no_water_sensors() {
        let c = MonitorConfig::default_for(MonitorKind::System);
        assert_eq!(c.mqtt.base_topic, "hydro_system_monitor");
        assert!(c.sensors.water_depth.is_none());
        assert!(c.sensors.water_temperature.is_none());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("tank.json");
        let c = MonitorConfig::default_for(MonitorKind::Tank);
        c.save(&path).unwrap();
        let loaded = MonitorConfig::load(&path).unwrap();
        assert_eq!(loaded.mqtt.base_topic, c.mqtt.base_topic);
        assert_eq!(loaded.mqtt.not_host_name, c.mqtt.not_host_name);
        assert_eq!(loaded.sensors.env_temp_humidity.i2c_addr, 0x45);
    }

    #[test]
    fn misspelled_hostname_key_is_accepted() {
        let raw = serde_json::to_string(&MonitorConfig::default_for(MonitorKind::Tank))
            .unwrap()
            .replace("not_host_name", "not_host_hame");
        let c: MonitorConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(c.mqtt.not_host_name, "hydrofarm_tank1");
    }

    #[test]
    fn load_or_default_persists_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tank.json");
        let c = MonitorConfig::load_or_default(&path, MonitorKind::Tank);
        assert_eq!(c.mqtt.base_topic, "hydro_tank_monitor");
        assert!(path.exists());
        // second run picks up the persisted file
        let again = MonitorConfig::load_or_default(&path, MonitorKind::System);
        assert_eq!(again.mqtt.base_topic, "hydro_tank_monitor");
    }

    #[test]
    fn sample_period_is_at_least_one_second() {
        let mut c = MonitorConfig::default_for(MonitorKind::Tank);
        c.sensor_sample_period_seconds = 0;
        assert_eq!(c.sample_period(), Duration::from_secs(1));
    }
}

// EOF
