//! State of charge estimation
//!
//! Vehicle APIs update slowly. Between two readings the estimator derives the
//! SoC from the energy charged since the last reading, learning the energy per
//! percent step once enough data has been seen.

use crate::api::{Battery, Vehicle};
use crate::error::{HeliosError, Result};
use crate::logging::{StructuredLogger, get_logger};
use async_trait::async_trait;
use chrono::TimeDelta;
use std::sync::Arc;

/// Share of grid energy ending up in the battery
pub const CHARGE_EFFICIENCY: f64 = 0.9;

/// Estimates SoC and remaining charge for the active vehicle
#[async_trait]
pub trait SocEstimator: Send + Sync {
    /// Current SoC in % given the charged energy of the session in Wh
    async fn soc(&mut self, charged_energy: f64) -> Result<f64>;

    /// Time to reach `target_soc` at `power` W, `None` if not charging
    fn remaining_charge_duration(&self, power: f64, target_soc: u8) -> Option<TimeDelta>;

    /// Energy in kWh needed to reach `target_soc`
    fn remaining_charge_energy(&self, target_soc: u8) -> f64;

    /// Charge duration to reach `target_soc` at `power` W, before losses
    fn assumed_charge_duration(&self, target_soc: u8, power: f64) -> TimeDelta;

    /// Forget learned values, e.g. on vehicle change
    fn reset(&mut self);
}

/// Creates an estimator when the active vehicle changes
pub type EstimatorFactory = Arc<
    dyn Fn(Arc<dyn Vehicle>, Option<Arc<dyn Battery>>, bool) -> Box<dyn SocEstimator>
        + Send
        + Sync,
>;

/// Factory for the default [`Estimator`]
pub fn default_factory() -> EstimatorFactory {
    Arc::new(|vehicle, battery, estimate| {
        Box::new(Estimator::new(vehicle, battery, estimate)) as Box<dyn SocEstimator>
    })
}

fn hours(wh: f64, power: f64) -> TimeDelta {
    TimeDelta::milliseconds((wh / power * 3_600_000.0).round() as i64)
}

/// Linear SoC estimator
pub struct Estimator {
    logger: StructuredLogger,
    vehicle: Arc<dyn Vehicle>,
    battery: Option<Arc<dyn Battery>>,
    estimate: bool,

    /// Vehicle capacity in Wh
    capacity: f64,
    /// Learned capacity including losses in Wh
    virtual_capacity: f64,
    vehicle_soc: f64,
    initial_soc: f64,
    initial_energy: f64,
    prev_soc: f64,
    prev_charged_energy: f64,
    energy_per_soc_step: f64,
}

impl Estimator {
    pub fn new(vehicle: Arc<dyn Vehicle>, battery: Option<Arc<dyn Battery>>, estimate: bool) -> Self {
        let mut estimator = Self {
            logger: get_logger("soc"),
            vehicle,
            battery,
            estimate,
            capacity: 0.0,
            virtual_capacity: 0.0,
            vehicle_soc: 0.0,
            initial_soc: 0.0,
            initial_energy: 0.0,
            prev_soc: 0.0,
            prev_charged_energy: 0.0,
            energy_per_soc_step: 0.0,
        };
        estimator.reset();
        estimator
    }

    async fn fetch(&mut self) -> Result<f64> {
        if let Some(battery) = &self.battery
            && let Ok(f) = battery.soc().await
        {
            return Ok(f);
        }

        match self.vehicle.soc().await {
            Ok(f) => Ok(f),
            Err(HeliosError::MustRetry) => Err(HeliosError::MustRetry),
            Err(e) => {
                self.logger.warn(&format!("updating soc failed: {}", e));
                // never received a value
                if self.prev_soc == 0.0 {
                    return Err(e);
                }
                Ok(self.prev_soc)
            }
        }
    }
}

#[async_trait]
impl SocEstimator for Estimator {
    async fn soc(&mut self, charged_energy: f64) -> Result<f64> {
        let fetched = self.fetch().await?;
        self.vehicle_soc = fetched;

        if self.estimate && self.virtual_capacity > 0.0 {
            let soc_delta = self.vehicle_soc - self.prev_soc;
            let energy_delta = charged_energy.max(0.0) - self.prev_charged_energy;

            if soc_delta != 0.0 || energy_delta < 0.0 {
                // soc changed or energy counter was reset
                if self.initial_soc == 0.0 {
                    self.initial_soc = self.vehicle_soc;
                    self.initial_energy = charged_energy;
                }

                let soc_diff = self.vehicle_soc - self.initial_soc;
                let energy_diff = charged_energy - self.initial_energy;
                if soc_diff > 10.0 && energy_diff > 0.0 {
                    self.energy_per_soc_step = energy_diff / soc_diff;
                    self.virtual_capacity = self.energy_per_soc_step * 100.0;
                    self.logger.debug(&format!(
                        "soc gradient updated: {:.0}Wh/%, virtual capacity {:.0}Wh",
                        self.energy_per_soc_step, self.virtual_capacity
                    ));
                }

                self.prev_soc = self.vehicle_soc;
                self.prev_charged_energy = charged_energy.max(0.0);
            } else if self.energy_per_soc_step > 0.0 {
                self.vehicle_soc = (fetched + energy_delta / self.energy_per_soc_step).min(100.0);
                self.logger
                    .debug(&format!("soc estimated: {:.2}%", self.vehicle_soc));
            }
        }

        Ok(self.vehicle_soc)
    }

    fn remaining_charge_duration(&self, power: f64, target_soc: u8) -> Option<TimeDelta> {
        if power <= 0.0 {
            return None;
        }
        let wh = self.remaining_charge_energy(target_soc) * 1e3;
        Some(if wh > 0.0 {
            hours(wh, power)
        } else {
            TimeDelta::zero()
        })
    }

    fn remaining_charge_energy(&self, target_soc: u8) -> f64 {
        let percent = f64::from(target_soc) - self.vehicle_soc;
        if percent <= 0.0 || self.energy_per_soc_step <= 0.0 {
            return 0.0;
        }
        percent * self.energy_per_soc_step / CHARGE_EFFICIENCY / 1e3
    }

    fn assumed_charge_duration(&self, target_soc: u8, power: f64) -> TimeDelta {
        let percent = f64::from(target_soc) - self.vehicle_soc;
        if percent <= 0.0 || self.virtual_capacity <= 0.0 || power <= 0.0 {
            return TimeDelta::zero();
        }
        hours(percent / 100.0 * self.virtual_capacity, power)
    }

    fn reset(&mut self) {
        self.prev_soc = 0.0;
        self.prev_charged_energy = 0.0;
        self.initial_soc = 0.0;
        self.initial_energy = 0.0;
        self.capacity = self.vehicle.capacity() * 1e3;
        self.energy_per_soc_step = self.capacity / 100.0;
        self.virtual_capacity = self.capacity / CHARGE_EFFICIENCY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct TestVehicle {
        soc: Mutex<Result<f64>>,
    }

    #[async_trait]
    impl Vehicle for TestVehicle {
        fn title(&self) -> String {
            "test".into()
        }
        fn capacity(&self) -> f64 {
            50.0
        }
        async fn soc(&self) -> Result<f64> {
            self.soc.lock().unwrap().clone()
        }
    }

    fn vehicle(soc: Result<f64>) -> Arc<TestVehicle> {
        Arc::new(TestVehicle {
            soc: Mutex::new(soc),
        })
    }

    #[tokio::test]
    async fn estimates_between_readings() {
        let v = vehicle(Ok(50.0));
        let mut e = Estimator::new(v.clone(), None, true);

        assert_eq!(e.soc(0.0).await.unwrap(), 50.0);
        // 500Wh at 500Wh/% adds one percent
        assert!((e.soc(500.0).await.unwrap() - 51.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn must_retry_is_propagated() {
        let v = vehicle(Err(HeliosError::MustRetry));
        let mut e = Estimator::new(v, None, false);
        assert!(e.soc(0.0).await.unwrap_err().is_must_retry());
    }

    #[tokio::test]
    async fn recovers_last_value_on_error() {
        let v = vehicle(Ok(40.0));
        let mut e = Estimator::new(v.clone(), None, true);
        e.soc(0.0).await.unwrap();

        *v.soc.lock().unwrap() = Err(HeliosError::vehicle("api down"));
        assert_eq!(e.soc(0.0).await.unwrap(), 40.0);
    }

    #[tokio::test]
    async fn durations_and_energy() {
        let v = vehicle(Ok(50.0));
        let mut e = Estimator::new(v, None, false);
        e.soc(0.0).await.unwrap();

        // 30% of 50kWh / 0.9 at 11kW
        let d = e.assumed_charge_duration(80, 11000.0);
        assert_eq!(d.num_minutes(), 90);
        assert!((e.remaining_charge_energy(80) - 15.0 / 0.9).abs() < 1e-9);
        assert_eq!(e.remaining_charge_duration(0.0, 80), None);
        assert_eq!(e.assumed_charge_duration(40, 11000.0), TimeDelta::zero());
    }
}
