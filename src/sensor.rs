// sensor.rs

use anyhow::Result;

/// Temperature always in degrees Fahrenheit. Humidity is relative 0-100;
/// sensors without a humidity element (the water thermistor) report `None`.
#[derive(Clone, Copy, Debug)]
pub struct TempHumidity {
    pub temperature_f: f64,
    pub humidity: Option<f64>,
}

pub trait TempHumiditySensor: Send {
    fn read(&mut self) -> Result<TempHumidity>;
}

pub trait DepthSensor: Send {
    fn read_distance_inches(&mut self) -> Result<f64>;
}

/// Momentary zero button, polled for a released-to-pressed edge.
pub trait ZeroButton: Send {
    fn is_pressed(&mut self) -> Result<bool>;
}

/// Opaque local display sink; nothing is read back from it.
pub trait NumericDisplay: Send {
    fn display_number(&mut self, value: i32) -> Result<()>;
}

/// Raw PWM primitive. The fan-driver inversion quirk lives in the fan
/// controller, not here.
pub trait PwmOutput: Send {
    fn set_duty_percent(&mut self, percent: u8) -> Result<()>;
}

pub mod sim {
    //! Deterministic stand-ins for the I2C/GPIO hardware, used when the
    //! services run on a bench host. The chip drivers (TCT40, SHT31,
    //! MCP3421, HT16K33) plug in behind the same traits on the farm.

    use anyhow::Result;
    use tracing::*;

    use super::*;

    pub struct SimTempHumidity {
        temperature_f: f64,
        humidity: Option<f64>,
    }

    impl SimTempHumidity {
        pub fn new(temperature_f: f64, humidity: Option<f64>) -> Self {
            SimTempHumidity {
                temperature_f,
                humidity,
            }
        }

        /// Plausible seedling-box air reading.
        pub fn env() -> Self {
            Self::new(72.5, Some(55.0))
        }

        /// Plausible tank water reading, no humidity element.
        pub fn water() -> Self {
            Self::new(68.0, None)
        }
    }

    impl TempHumiditySensor for SimTempHumidity {
        fn read(&mut self) -> Result<TempHumidity> {
            Ok(TempHumidity {
                temperature_f: self.temperature_f,
                humidity: self.humidity,
            })
        }
    }

    pub struct SimDepth {
        inches: f64,
    }

    impl SimDepth {
        pub fn new(inches: f64) -> Self {
            SimDepth { inches }
        }
    }

    impl DepthSensor for SimDepth {
        fn read_distance_inches(&mut self) -> Result<f64> {
            Ok(self.inches)
        }
    }

    /// Never-pressed button.
    pub struct SimButton;

    impl ZeroButton for SimButton {
        fn is_pressed(&mut self) -> Result<bool> {
            Ok(false)
        }
    }

    /// Logs what the 4-digit HT16K33 segment display would show.
    pub struct ConsoleDisplay;

    impl NumericDisplay for ConsoleDisplay {
        fn display_number(&mut self, value: i32) -> Result<()> {
            info!("display: {value:04}");
            Ok(())
        }
    }

    /// Logs duty-cycle writes instead of driving a PWM pin.
    pub struct LogPwm;

    impl PwmOutput for LogPwm {
        fn set_duty_percent(&mut self, percent: u8) -> Result<()> {
            info!("pwm duty: {percent}%");
            Ok(())
        }
    }
}

// EOF
