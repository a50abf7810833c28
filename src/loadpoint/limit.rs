use super::{Event, LoadPoint};
use crate::api::{AlarmClock, ChargeStatus};
use crate::error::{HeliosError, Result};
use chrono::TimeDelta;

impl LoadPoint {
    /// Remaining contactor guard time, `None` once expired
    pub(crate) fn guard_remaining(&self) -> Option<TimeDelta> {
        let updated = self.guard_updated?;
        let remaining = self.settings.guard_duration - self.clock.since(updated);
        let remaining = TimeDelta::seconds(remaining.num_seconds());
        (remaining > TimeDelta::zero()).then_some(remaining)
    }

    /// Apply charger current and enable state.
    ///
    /// Currents below the minimum disable the charger. Enable changes honour
    /// the contactor guard unless `force` is set.
    pub(crate) async fn set_limit(&mut self, current: f64, force: bool) -> Result<()> {
        let (min_current, charge_current, enabled) = self
            .state
            .read(|s| (s.min_current, s.charge_current, s.enabled));

        let mut current = current;

        if current != charge_current && current >= min_current {
            if let Some(ex) = &self.charger.ex {
                ex.max_current_millis(current).await.map_err(|e| {
                    HeliosError::charger(format!("max charge current {:.3}A: {}", current, e))
                })?;
            } else {
                current = current.trunc();
                self.charger
                    .charger
                    .max_current(current as i64)
                    .await
                    .map_err(|e| {
                        HeliosError::charger(format!("max charge current {:.3}A: {}", current, e))
                    })?;
            }

            self.logger.debug(&format!("max charge current: {:.3}A", current));
            self.state.update(|s| s.charge_current = current);
            self.dispatch(Event::ChargeCurrent(current)).await;
        }

        let enable = current >= min_current;
        if enable != enabled {
            if let Some(remaining) = self.guard_remaining()
                && !force
            {
                self.logger.debug(&format!(
                    "charger {}: contactor delay {}s",
                    status_label(enable),
                    remaining.num_seconds()
                ));
                return Ok(());
            }

            self.charger.charger.enable(enable).await.map_err(|e| {
                HeliosError::charger(format!("charger {}: {}", status_label(enable), e))
            })?;

            self.logger.debug(&format!("charger {}", status_label(enable)));
            self.state.update(|s| s.enabled = enable);
            self.guard_updated = Some(self.clock.now());

            self.dispatch(Event::ChargeCurrent(current)).await;

            // start/stop vehicle wake-up timer
            if enable {
                self.wake_up_timer.start(self.clock.now());
            } else {
                self.wake_up_timer.stop();
            }
        }

        Ok(())
    }

    /// Bring the charger's enable state in line with the loadpoint
    pub(crate) async fn sync_charger(&mut self) {
        let (expected, status) = self.state.read(|s| (s.enabled, s.status));

        match self.charger.charger.enabled().await {
            Ok(enabled) => {
                if enabled != expected {
                    self.logger.warn(&format!(
                        "charger out of sync: expected {}, got {}",
                        status_label(expected),
                        status_label(enabled)
                    ));
                    if let Err(e) = self.charger.charger.enable(expected).await {
                        self.logger.error(&format!("charger: {}", e));
                    }
                }

                if !enabled && status == ChargeStatus::C {
                    self.logger.warn("charger logic error: disabled but charging");
                }
            }
            Err(e) => self.logger.error(&format!("charger: {}", e)),
        }
    }

    /// Switch phases if the charger supports it
    pub(crate) async fn scale_phases_if_available(&mut self, phases: u8) -> Result<()> {
        if self.charger.is_switchable() {
            return self.scale_phases(phases).await;
        }
        Ok(())
    }

    /// Switch to `phases`, stopping the charger first.
    ///
    /// # Panics
    ///
    /// Panics if the charger cannot switch phases; callers check first.
    pub(crate) async fn scale_phases(&mut self, phases: u8) -> Result<()> {
        let Some(switcher) = self.charger.phases.clone() else {
            panic!("charger does not support phase switching");
        };

        if self.state.read(|s| s.phases) != phases {
            // disable the charger before switching
            self.set_limit(0.0, true).await?;

            switcher
                .phases_1p3p(phases)
                .await
                .map_err(|e| HeliosError::charger(format!("switch phases: {}", e)))?;

            self.logger.info(&format!("switched phases: {}p", phases));
            self.set_phases(phases);

            // allow pv mode to re-enable immediately
            self.elapse_pv_timer();
        }

        Ok(())
    }

    /// Record a new configured phase count
    pub(crate) fn set_phases(&mut self, phases: u8) {
        if self.state.read(|s| s.phases) != phases {
            self.state.update(|s| s.phases = phases);
            self.phase_timer = None;
            self.publisher.publish("phases", phases);

            // measurements are invalid after a switch
            self.set_measured_phases(0);
        }
    }

    /// Record measured active phases, 0 for unknown.
    ///
    /// Publishes the measured count, or the expected active phases while
    /// unknown.
    pub(crate) fn set_measured_phases(&mut self, phases: u8) {
        let published = self.state.update(|s| {
            s.measured_phases = phases;
            if phases == 0 { s.active_phases() } else { phases }
        });
        self.publisher.publish("activePhases", published);
    }

    /// Wake up a vehicle that did not start charging after enable
    pub(crate) async fn wake_up_vehicle(&mut self) {
        let result = if let Some(alarm) = &self.charger.alarm_clock {
            self.logger.debug("wake-up charger");
            Some(alarm.wake_up().await)
        } else if let Some(vehicle) = &self.vehicle
            && let Some(alarm) = vehicle.as_alarm_clock()
        {
            self.logger.debug("wake-up vehicle");
            Some(AlarmClock::wake_up(alarm).await)
        } else {
            None
        };

        if let Some(Err(e)) = result {
            self.logger.error(&format!("wake-up: {}", e));
        }
    }
}

fn status_label(enabled: bool) -> &'static str {
    if enabled { "enable" } else { "disable" }
}
