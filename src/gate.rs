// gate.rs

use chrono::{DateTime, Local};

/// Publish gate: send a reading when nothing has been sent yet, or when at
/// least the report period has elapsed since the last send. Whole-second
/// truncating comparison; this debounces publishes rather than scheduling
/// them at a fixed rate, so loop jitter accumulates without catch-up.
pub fn should_publish(
    now: DateTime<Local>,
    last_publish: Option<DateTime<Local>>,
    report_period_seconds: u64,
) -> bool {
    match last_publish {
        None => true,
        Some(last) => (now - last).num_seconds() >= report_period_seconds as i64,
    }
}

/// Last-publish bookkeeping for one publishing subsystem.
#[derive(Clone, Copy, Debug)]
pub struct ReportClock {
    report_period_seconds: u64,
    last_publish: Option<DateTime<Local>>,
}

impl ReportClock {
    pub fn new(report_period_seconds: u64) -> Self {
        ReportClock {
            report_period_seconds,
            last_publish: None,
        }
    }

    pub fn due(&self, now: DateTime<Local>) -> bool {
        should_publish(now, self.last_publish, self.report_period_seconds)
    }

    /// Record a successful publish.
    pub fn mark(&mut self, now: DateTime<Local>) {
        self.last_publish = Some(now);
    }

    pub fn last_publish(&self) -> Option<DateTime<Local>> {
        self.last_publish
    }
}


// EOF
