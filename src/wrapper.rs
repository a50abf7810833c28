//! Synthetic capabilities for chargers without native metering
//!
//! The loadpoint feeds these from its internal events: the charge meter from
//! the charge current, the rater and timer from connect/start/stop.

use crate::api::{self, MeterEnergy};
use crate::clock::Clock;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Charge meter reporting a power value set by the loadpoint
#[derive(Debug, Default)]
pub struct ChargeMeter {
    power: Mutex<f64>,
}

impl ChargeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_power(&self, power: f64) {
        *self.power.lock().unwrap_or_else(PoisonError::into_inner) = power;
    }
}

#[async_trait]
impl api::Meter for ChargeMeter {
    async fn current_power(&self) -> Result<f64> {
        Ok(*self.power.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[derive(Debug, Default)]
struct RaterState {
    charging: bool,
    start: Option<DateTime<Utc>>,
    start_energy: f64,
    charged_energy: f64,
    charge_power: f64,
}

/// Charged energy accumulator
///
/// Uses the meter's energy counter when available, otherwise integrates the
/// charge power over time.
pub struct ChargeRater {
    clock: Arc<dyn Clock>,
    meter: Option<Arc<dyn MeterEnergy>>,
    logger: StructuredLogger,
    state: Mutex<RaterState>,
}

impl ChargeRater {
    pub fn new(clock: Arc<dyn Clock>, meter: Option<Arc<dyn MeterEnergy>>) -> Self {
        Self {
            clock,
            meter,
            logger: get_logger("charge_rater"),
            state: Mutex::new(RaterState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RaterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Energy in kWh for power held since `start`
    fn integrate(&self, state: &RaterState) -> f64 {
        state.start.map_or(0.0, |start| {
            let hours = self.clock.since(start).num_milliseconds() as f64 / 3_600_000.0;
            state.charge_power * hours / 1e3
        })
    }

    /// Start or resume counting
    pub async fn start_charge(&self, continued: bool) {
        let total = self.read_total().await;

        let mut state = self.lock();
        state.charging = true;
        state.start = Some(self.clock.now());
        if !continued {
            state.charged_energy = 0.0;
        }
        if let Some(total) = total {
            state.start_energy = total;
        }
    }

    /// Stop counting and accumulate the session energy
    pub async fn stop_charge(&self) {
        let total = self.read_total().await;

        let mut state = self.lock();
        if self.meter.is_some() {
            if let Some(total) = total {
                state.charged_energy += total - state.start_energy;
            }
        } else {
            state.charged_energy += self.integrate(&state);
        }
        state.charging = false;
    }

    /// Update the power used for integration
    pub fn set_charge_power(&self, power: f64) {
        let mut state = self.lock();
        if !state.charging {
            return;
        }

        if self.meter.is_none() {
            state.charged_energy += self.integrate(&state);
            state.start = Some(self.clock.now());
        }
        state.charge_power = power;
    }

    async fn read_total(&self) -> Option<f64> {
        let meter = self.meter.as_ref()?;
        match meter.total_energy().await {
            Ok(f) => Some(f),
            Err(e) => {
                self.logger.error(&format!("charge rater: {}", e));
                None
            }
        }
    }
}

#[async_trait]
impl api::ChargeRater for ChargeRater {
    async fn charged_energy(&self) -> Result<f64> {
        let (charging, charged, start_energy) = {
            let state = self.lock();
            (state.charging, state.charged_energy, state.start_energy)
        };

        if charging && let Some(meter) = &self.meter {
            let total = meter.total_energy().await?;
            return Ok(charged + total - start_energy);
        }

        Ok(charged)
    }
}

#[derive(Debug, Default)]
struct TimerState {
    charging: bool,
    start: Option<DateTime<Utc>>,
    duration: TimeDelta,
}

/// Charging time accumulator
pub struct ChargeTimer {
    clock: Arc<dyn Clock>,
    state: Mutex<TimerState>,
}

impl ChargeTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(TimerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start_charge(&self, continued: bool) {
        let mut state = self.lock();
        state.charging = true;
        state.start = Some(self.clock.now());
        if !continued {
            state.duration = TimeDelta::zero();
        }
    }

    pub fn stop_charge(&self) {
        let mut state = self.lock();
        if state.charging
            && let Some(start) = state.start
        {
            state.duration += self.clock.since(start);
        }
        state.charging = false;
    }
}

#[async_trait]
impl api::ChargeTimer for ChargeTimer {
    async fn charging_time(&self) -> Result<TimeDelta> {
        let state = self.lock();
        let mut duration = state.duration;
        if state.charging
            && let Some(start) = state.start
        {
            duration += self.clock.since(start);
        }
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChargeRater as _, ChargeTimer as _, Meter as _};
    use crate::clock::MockClock;

    #[tokio::test]
    async fn meter_reports_set_power() {
        let meter = ChargeMeter::new();
        meter.set_power(4140.0);
        assert_eq!(meter.current_power().await.unwrap(), 4140.0);
    }

    #[tokio::test]
    async fn rater_integrates_power() {
        let clock = Arc::new(MockClock::default());
        let rater = ChargeRater::new(clock.clone(), None);

        rater.start_charge(false).await;
        rater.set_charge_power(11000.0);
        clock.add(TimeDelta::minutes(30));
        rater.set_charge_power(11000.0);
        assert!((rater.charged_energy().await.unwrap() - 5.5).abs() < 1e-9);

        clock.add(TimeDelta::minutes(30));
        rater.stop_charge().await;
        assert!((rater.charged_energy().await.unwrap() - 11.0).abs() < 1e-9);

        // connect resets, start continues
        rater.start_charge(true).await;
        rater.stop_charge().await;
        assert!((rater.charged_energy().await.unwrap() - 11.0).abs() < 1e-9);
        rater.start_charge(false).await;
        assert_eq!(rater.charged_energy().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn timer_accumulates_while_charging() {
        let clock = Arc::new(MockClock::default());
        let timer = ChargeTimer::new(clock.clone());

        timer.start_charge(false);
        clock.add(TimeDelta::minutes(10));
        timer.stop_charge();
        clock.add(TimeDelta::minutes(10));
        assert_eq!(timer.charging_time().await.unwrap(), TimeDelta::minutes(10));

        timer.start_charge(true);
        clock.add(TimeDelta::minutes(5));
        assert_eq!(timer.charging_time().await.unwrap(), TimeDelta::minutes(15));
    }
}
