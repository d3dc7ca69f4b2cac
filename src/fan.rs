// fan.rs

use std::time::Instant;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::*;

pub const NUM_FANS: usize = 3;

/// Fixed topics the openHAB side watches; fan 3's tach is counted but has
/// no panel item, so only fans 1 and 2 publish RPM.
pub const FAN_RPM_TOPICS: [&str; 2] = [
    "lettuce_box/seedling_box/fan_1/rpm",
    "lettuce_box/seedling_box/fan_2/rpm",
];
pub const FAN_PWM_TOPIC: &str = "lettuce_box/seedling_box/fan/pwm";

/// Fans run at full speed until a remote set point arrives (the raw driver
/// sits at 0, which it treats as full duty).
pub const DEFAULT_FAN_DUTY: u8 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FanId {
    Fan1,
    Fan2,
    Fan3,
}

impl FanId {
    pub const ALL: [FanId; NUM_FANS] = [FanId::Fan1, FanId::Fan2, FanId::Fan3];

    pub fn index(self) -> usize {
        match self {
            FanId::Fan1 => 0,
            FanId::Fan2 => 1,
            FanId::Fan3 => 2,
        }
    }
}

struct TachWindow {
    counts: [u64; NUM_FANS],
    since: Instant,
}

/// Per-fan pulse counters, incremented from the tach edge context and
/// snapshotted by the RPM computation. Snapshot and reset share one
/// critical section with the increments, so a pulse is never lost between
/// a snapshot and its reset, and never counted in two windows.
pub struct TachCounters {
    window: Mutex<TachWindow>,
}

impl TachCounters {
    pub fn new() -> Self {
        TachCounters {
            window: Mutex::new(TachWindow {
                counts: [0; NUM_FANS],
                since: Instant::now(),
            }),
        }
    }

    /// One falling edge on a fan's tach line.
    pub fn pulse(&self, fan: FanId) {
        self.window.lock().counts[fan.index()] += 1;
    }

    /// Raw counts plus the elapsed window, optionally starting a new window.
    pub fn snapshot(&self, reset: bool) -> ([u64; NUM_FANS], std::time::Duration) {
        let now = Instant::now();
        let mut w = self.window.lock();
        let counts = w.counts;
        let elapsed = now.duration_since(w.since);
        if reset {
            w.counts = [0; NUM_FANS];
            w.since = now;
        }
        (counts, elapsed)
    }

    /// RPM per fan over the window since the previous reset (or since
    /// construction for the first call): `count / elapsed_seconds * 60`.
    pub fn speeds(&self, reset: bool) -> [f64; NUM_FANS] {
        let (counts, elapsed) = self.snapshot(reset);
        let secs = elapsed.as_secs_f64();
        let mut rpm = [0.0; NUM_FANS];
        if secs > 0.0 {
            for (r, &c) in rpm.iter_mut().zip(counts.iter()) {
                *r = c as f64 / secs * 60.0;
            }
        }
        rpm
    }
}

impl Default for TachCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an inbound pwm command payload: decimal integer 0-100.
pub fn parse_duty(payload: &[u8]) -> Result<u8> {
    let s = std::str::from_utf8(payload)?;
    let v: i64 = s.trim().parse()?;
    if !(0..=100).contains(&v) {
        bail!("duty cycle {v} out of range");
    }
    Ok(v as u8)
}

/// Measures fan speed from tach pulses, drives the shared PWM output, and
/// takes remote set-point commands over MQTT.
pub struct FanController {
    tach: Arc<TachCounters>,
    pwm: Box<dyn PwmOutput>,
    bridge: Arc<MqttBridge>,
    set_point: u8,
    period: Duration,
    cancel: CancellationToken,
}

impl FanController {
    pub fn new(
        tach: Arc<TachCounters>,
        pwm: Box<dyn PwmOutput>,
        bridge: Arc<MqttBridge>,
        period: Duration,
    ) -> Self {
        FanController {
            tach,
            pwm,
            bridge,
            set_point: DEFAULT_FAN_DUTY,
            period,
            cancel: CancellationToken::new(),
        }
    }

    pub fn tach(&self) -> Arc<TachCounters> {
        self.tach.clone()
    }

    pub fn set_point(&self) -> u8 {
        self.set_point
    }

    /// Apply a duty-cycle set point. The driver hardware treats 0% as full
    /// speed, so the requested value is inverted on the way out; that quirk
    /// is this controller's policy, not the PWM primitive's. A failed write
    /// is logged and not retried.
    pub fn set_duty(&mut self, percent: u8) {
        let percent = percent.min(100);
        self.set_point = percent;
        let driver_value = 100 - percent;
        if let Err(e) = self.pwm.set_duty_percent(driver_value) {
            warn!("PWM write failed: {e:#}");
        }
    }

    pub fn start(self) -> ServiceHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        ServiceHandle::new(cancel, task)
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Fan control loop started.");
        // driver boots at full speed; make the set point reflect that
        self.set_duty(DEFAULT_FAN_DUTY);

        // connection generation the pwm subscription was last issued on
        let mut subscribed_gen: Option<u64> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !self.bridge.is_connected() {
                if let Err(e) = self.bridge.connect().await {
                    warn!("MQTT connect failed: {e:#}");
                }
            }

            // subscriptions do not survive the broker connection, and the
            // connection can be replaced behind our back: publish() below
            // reconnects on demand, and a slow handshake can complete after
            // connect() already gave up. Key the subscription to the bridge
            // generation instead of to our own connect() calls.
            if self.bridge.is_connected() {
                let gen = self.bridge.generation();
                if subscribed_gen != Some(gen) {
                    match self.bridge.subscribe(FAN_PWM_TOPIC).await {
                        Ok(()) => subscribed_gen = Some(gen),
                        Err(e) => warn!("MQTT subscribe failed: {e:#}"),
                    }
                }
            }

            for msg in self.bridge.drain() {
                match parse_duty(&msg.payload) {
                    Ok(duty) => {
                        info!("Remote fan set point: {duty}%");
                        self.set_duty(duty);
                    }
                    Err(e) => warn!("Bad pwm command on {}: {e:#}", msg.topic),
                }
            }

            let rpm = self.tach.speeds(true);
            for (topic, rpm) in FAN_RPM_TOPICS.iter().zip(rpm.iter()) {
                let payload = format!("{}", rpm.round() as i64);
                if let Err(e) = self.bridge.publish(topic, payload.as_bytes()).await {
                    warn!("RPM publish failed: {e:#}");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.period) => {}
            }
        }

        info!("Fan control loop stopped.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::thread;

    #[test]
    fn pulses_are_conserved_across_windows() {
        let tach = Arc::new(TachCounters::new());
        let total_per_thread = 1000u64;
        let threads = 4;

        let mut handles = Vec::new();
        for t in 0..threads {
            let tach = tach.clone();
            let fan = FanId::ALL[t % NUM_FANS];
            handles.push(thread::spawn(move || {
                for _ in 0..total_per_thread {
                    tach.pulse(fan);
                }
            }));
        }

        // interleave snapshot+reset with the pulse threads
        let mut counted = [0u64; NUM_FANS];
        for _ in 0..50 {
            let (counts, _) = tach.snapshot(true);
            for (acc, c) in counted.iter_mut().zip(counts.iter()) {
                *acc += c;
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        let (counts, _) = tach.snapshot(true);
        for (acc, c) in counted.iter_mut().zip(counts.iter()) {
            *acc += c;
        }

        let total: u64 = counted.iter().sum();
        assert_eq!(total, total_per_thread * threads as u64);
        // nothing left behind after the final reset
        assert_eq!(tach.snapshot(false).0, [0; NUM_FANS]);
    }

    #[test]
    fn speeds_reflect_pulse_rate() {
        let tach = TachCounters::new();
        for _ in 0..10 {
            tach.pulse(FanId::Fan1);
        }
        thread::sleep(std::time::Duration::from_millis(100));
        let rpm = tach.speeds(true);
        // 10 pulses over at least 0.1s caps out at 6000 rpm
        assert!(rpm[0] > 0.0 && rpm[0] < 6100.0, "rpm = {}", rpm[0]);
        assert_eq!(rpm[1], 0.0);
        assert_eq!(rpm[2], 0.0);
        // the reset started a fresh window
        assert_eq!(tach.snapshot(false).0, [0; NUM_FANS]);
    }

    #[test]
    fn parse_duty_accepts_integers_in_range() {
        assert_eq!(parse_duty(b"0").unwrap(), 0);
        assert_eq!(parse_duty(b" 37 ").unwrap(), 37);
        assert_eq!(parse_duty(b"100").unwrap(), 100);
        assert!(parse_duty(b"101").is_err());
        assert!(parse_duty(b"-1").is_err());
        assert!(parse_duty(b"fast").is_err());
        assert!(parse_duty(&[0xff, 0xfe]).is_err());
    }

    struct RecordingPwm(Arc<AtomicU8>);

    impl PwmOutput for RecordingPwm {
        fn set_duty_percent(&mut self, percent: u8) -> anyhow::Result<()> {
            self.0.store(percent, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller_with_recorder() -> (FanController, Arc<AtomicU8>) {
        let written = Arc::new(AtomicU8::new(0));
        let cfg = MonitorConfig::default_for(MonitorKind::Tank).mqtt;
        let ctl = FanController::new(
            Arc::new(TachCounters::new()),
            Box::new(RecordingPwm(written.clone())),
            Arc::new(MqttBridge::new(&cfg)),
            Duration::from_secs(1),
        );
        (ctl, written)
    }

    #[test]
    fn set_duty_inverts_for_the_driver() {
        let (mut ctl, written) = controller_with_recorder();
        ctl.set_duty(0);
        assert_eq!(written.load(Ordering::SeqCst), 100);
        ctl.set_duty(100);
        assert_eq!(written.load(Ordering::SeqCst), 0);
        ctl.set_duty(37);
        assert_eq!(written.load(Ordering::SeqCst), 63);
        assert_eq!(ctl.set_point(), 37);
    }

    #[test]
    fn set_duty_clamps_out_of_range() {
        let (mut ctl, written) = controller_with_recorder();
        ctl.set_duty(250);
        assert_eq!(ctl.set_point(), 100);
        assert_eq!(written.load(Ordering::SeqCst), 0);
    }
}

// EOF
