// monitor.rs

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::*;

/// The depth sensor is read by both the sampling loop and the zero-button
/// handler, so it is shared behind a lock.
pub type SharedDepthSensor = Arc<Mutex<Box<dyn DepthSensor>>>;

/// Poll interval for the zero-button edge watcher.
const BUTTON_POLL_MS: u64 = 10;

/// Running monitor/controller task with a working stop.
pub struct ServiceHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ServiceHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<Result<()>>) -> Self {
        ServiceHandle { cancel, task }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal the loop to exit at its next cancellation point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<()> {
        self.task.await?
    }
}

/// Sampling loop shared by the two monitor services: read sensors, apply
/// the zero offset, update the display, publish through the gate, sleep,
/// repeat. The tank variant carries the full sensor set; the system/room
/// variant has only the environment sensor and emits env-only readings.
pub struct HydroMonitor {
    config: MonitorConfig,
    env_sensor: Box<dyn TempHumiditySensor>,
    water_temp_sensor: Option<Box<dyn TempHumiditySensor>>,
    depth_sensor: Option<SharedDepthSensor>,
    display: Option<Box<dyn NumericDisplay>>,
    calibration: Arc<Calibration>,
    bridge: Arc<MqttBridge>,
    clock: ReportClock,
    cancel: CancellationToken,
}

impl HydroMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new_tank(
        config: MonitorConfig,
        env_sensor: Box<dyn TempHumiditySensor>,
        water_temp_sensor: Box<dyn TempHumiditySensor>,
        depth_sensor: SharedDepthSensor,
        display: Box<dyn NumericDisplay>,
        calibration: Arc<Calibration>,
        bridge: Arc<MqttBridge>,
    ) -> Self {
        let clock = ReportClock::new(config.mqtt.report_period_seconds);
        HydroMonitor {
            config,
            env_sensor,
            water_temp_sensor: Some(water_temp_sensor),
            depth_sensor: Some(depth_sensor),
            display: Some(display),
            calibration,
            bridge,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    pub fn new_system(
        config: MonitorConfig,
        env_sensor: Box<dyn TempHumiditySensor>,
        bridge: Arc<MqttBridge>,
    ) -> Self {
        let clock = ReportClock::new(config.mqtt.report_period_seconds);
        HydroMonitor {
            config,
            env_sensor,
            water_temp_sensor: None,
            depth_sensor: None,
            display: None,
            calibration: Arc::new(Calibration::new()),
            bridge,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    pub fn start(self) -> ServiceHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        ServiceHandle::new(cancel, task)
    }

    pub async fn run(mut self) -> Result<()> {
        let period = self.config.sample_period();
        let topic = sensor_topic(&self.config.mqtt);
        info!("Monitoring loop started.");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.sample() {
                Ok(reading) => {
                    debug!("Sensor data: {reading:?}");

                    // depth in tenths of an inch for the 4-digit display;
                    // a display fault must not take the loop down
                    if let (Some(display), Some(depth)) =
                        (self.display.as_mut(), reading.water_depth)
                    {
                        let tenths = (depth * 10.0).round() as i32;
                        if let Err(e) = display.display_number(tenths) {
                            warn!("Display write failed: {e:#}");
                        }
                    }

                    let now = Local::now();
                    if self.clock.due(now) {
                        match serde_json::to_string(&reading) {
                            Ok(json) => match self.bridge.publish(&topic, json.as_bytes()).await {
                                Ok(()) => {
                                    debug!("Published reading to {topic}");
                                    self.clock.mark(now);
                                }
                                Err(e) => warn!("MQTT publish failed: {e:#}"),
                            },
                            Err(e) => error!("Cannot serialize reading: {e}"),
                        }
                    }
                }
                // skip display and publish this cycle, keep looping
                Err(e) => warn!("Sensor read failed, skipping cycle: {e:#}"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(period) => {}
            }
        }

        info!("Monitoring loop stopped.");
        Ok(())
    }

    /// Read every configured sensor once, depth last since it folds in the
    /// offset. The depth sign is inverted: the sensor looks down from a
    /// fixed mount, and the user-captured offset shifts the zero point.
    fn sample(&mut self) -> Result<SensorReading> {
        let env = self.env_sensor.read()?;
        let env_humidity = match env.humidity {
            Some(h) => h,
            None => {
                warn!("Env sensor reported no humidity, defaulting to 0.");
                0.0
            }
        };
        let water_temperature_f = match self.water_temp_sensor.as_mut() {
            Some(sensor) => Some(sensor.read()?.temperature_f),
            None => None,
        };
        let depth = match self.depth_sensor.as_ref() {
            Some(sensor) => {
                let raw = sensor.lock().read_distance_inches()?;
                let offset = self.calibration.offset();
                Some((-raw + offset, offset))
            }
            None => None,
        };
        Ok(SensorReading::new(
            Local::now(),
            env.temperature_f,
            env_humidity,
            water_temperature_f,
            depth.map(|(corrected, _)| corrected),
            depth.map(|(_, offset)| offset),
        ))
    }
}

/// Watch the zero button for a released-to-pressed edge and capture the
/// current raw depth as the new offset. Runs until cancelled.
pub async fn watch_zero_button(
    mut button: Box<dyn ZeroButton>,
    depth_sensor: SharedDepthSensor,
    calibration: Arc<Calibration>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut was_pressed = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(Duration::from_millis(BUTTON_POLL_MS)) => {}
        }
        let pressed = match button.is_pressed() {
            Ok(p) => p,
            Err(e) => {
                warn!("Zero button read failed: {e:#}");
                continue;
            }
        };
        if pressed && !was_pressed {
            info!("Zero button pressed.");
            match depth_sensor.lock().read_distance_inches() {
                Ok(raw) => {
                    calibration.capture_zero(raw);
                }
                Err(e) => warn!("Depth read for zero capture failed: {e:#}"),
            }
        }
        was_pressed = pressed;
    }
    Ok(())
}


// EOF
