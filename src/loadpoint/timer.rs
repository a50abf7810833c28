use chrono::{DateTime, TimeDelta, Utc};

/// Time after enabling without charge start before waking the vehicle
pub const WAKE_UP_TIMEOUT: TimeDelta = TimeDelta::seconds(30);

/// One-shot timer detecting vehicles that did not start charging
#[derive(Debug, Default, Clone, Copy)]
pub struct WakeUpTimer {
    started: Option<DateTime<Utc>>,
}

impl WakeUpTimer {
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.started = Some(now);
    }

    pub fn stop(&mut self) {
        self.started = None;
    }

    /// True once after the timeout has passed
    pub fn expired(&mut self, now: DateTime<Utc>) -> bool {
        let expired = self
            .started
            .is_some_and(|started| now - started > WAKE_UP_TIMEOUT);
        if expired {
            self.stop();
        }
        expired
    }
}

/// Step-wise progress indicator
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    step: f64,
    prev: Option<f64>,
}

impl Progress {
    pub fn new(step: f64) -> Self {
        Self { step, prev: None }
    }

    /// True when `value` reached a new step
    pub fn next_step(&mut self, value: f64) -> bool {
        let stepped = (value / self.step).floor() * self.step;
        if self.prev.is_none_or(|prev| stepped > prev) {
            self.prev = Some(stepped);
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_up_fires_once_after_timeout() {
        let now = Utc::now();
        let mut t = WakeUpTimer::default();
        assert!(!t.expired(now));

        t.start(now);
        assert!(!t.expired(now + TimeDelta::seconds(30)));
        assert!(t.expired(now + TimeDelta::seconds(31)));
        assert!(!t.expired(now + TimeDelta::seconds(60)));
    }

    #[test]
    fn progress_steps() {
        let mut p = Progress::new(10.0);
        assert!(p.next_step(35.0));
        assert!(!p.next_step(38.0));
        assert!(p.next_step(40.0));
        assert!(!p.next_step(20.0));
        p.reset();
        assert!(p.next_step(20.0));
    }
}
