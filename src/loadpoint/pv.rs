//! PV surplus charging and automatic 1p/3p switching

use super::{LoadPoint, PvTimer};
use crate::api::{ChargeMode, ChargeStatus, power_to_current};
use chrono::TimeDelta;

const PV_TIMER: &str = "pv";
const PHASE_TIMER: &str = "phase";

const PV_ENABLE: &str = "enable";
const PV_DISABLE: &str = "disable";
const PHASE_SCALE_1P: &str = "scale1p";
const PHASE_SCALE_3P: &str = "scale3p";
const TIMER_INACTIVE: &str = "inactive";

impl LoadPoint {
    /// Target current for PV modes from the site power balance
    pub(crate) async fn pv_max_current(
        &mut self,
        mode: ChargeMode,
        site_power: f64,
        battery_buffered: bool,
    ) -> f64 {
        let (min_current, max_current, charge_power) = self
            .state
            .read(|s| (s.min_current, s.max_current, s.charge_power));

        if self.charger.is_switchable() {
            let available_power = -site_power + charge_power;

            // keep the charger disabled for this cycle after switching
            if self.pv_scale_phases(available_power, min_current).await {
                return 0.0;
            }
        }

        let effective_current = self.effective_current();
        let active_phases = self.state.read(|s| s.active_phases());
        let delta_current = power_to_current(-site_power, active_phases);
        let target_current = (effective_current + delta_current).max(0.0);

        self.logger.debug(&format!(
            "pv charge current: {:.3}A = {:.3}A + {:.3}A ({:.0}W @ {}p)",
            target_current, effective_current, delta_current, site_power, active_phases
        ));

        if target_current < min_current
            && (mode == ChargeMode::MinPv || battery_buffered || self.climate_active().await)
        {
            return min_current;
        }

        let enabled = self.state.read(|s| s.enabled);

        if mode == ChargeMode::Pv && enabled && target_current < min_current {
            let disable = self.settings.disable;

            if site_power >= disable.threshold && self.phase_timer.is_none() {
                self.logger.debug(&format!(
                    "site power {:.0}W >= {:.0}W disable threshold",
                    site_power, disable.threshold
                ));

                self.start_pv_timer(PV_DISABLE);
                self.publish_timer(PV_TIMER, disable.delay(), PV_DISABLE);

                if self.pv_timer_elapsed(disable.delay()) {
                    self.logger.debug("pv disable timer elapsed");
                    return 0.0;
                }
            } else {
                self.reset_pv_timer(Some(PV_DISABLE));
            }

            return min_current;
        }

        if mode == ChargeMode::Pv && !enabled {
            let enable = self.settings.enable;

            if (enable.threshold == 0.0 && target_current >= min_current)
                || (enable.threshold != 0.0 && site_power <= enable.threshold)
            {
                self.logger.debug(&format!(
                    "site power {:.0}W <= {:.0}W enable threshold",
                    site_power, enable.threshold
                ));

                self.start_pv_timer(PV_ENABLE);
                self.publish_timer(PV_TIMER, enable.delay(), PV_ENABLE);

                if self.pv_timer_elapsed(enable.delay()) {
                    self.logger.debug("pv enable timer elapsed");
                    return min_current;
                }
            } else {
                self.reset_pv_timer(Some(PV_ENABLE));
            }

            return 0.0;
        }

        self.reset_pv_timer(None);

        target_current.min(max_current)
    }

    /// Current the vehicle actually draws, 0 if not charging
    pub(crate) fn effective_current(&self) -> f64 {
        let (status, charge_current) = self.state.read(|s| (s.status, s.charge_current));
        if status != ChargeStatus::C {
            return 0.0;
        }

        // some vehicles stay below the limit
        match self.charge_currents {
            Some([l1, _, _]) => (l1 + 2.0).min(charge_current),
            None => charge_current,
        }
    }

    /// Switch phases if the available power calls for it.
    ///
    /// Returns true if a switch was executed.
    pub(crate) async fn pv_scale_phases(
        &mut self,
        available_power: f64,
        min_current: f64,
    ) -> bool {
        let (phases, measured_phases, active_phases, max_phases) = self.state.read(|s| {
            (
                s.phases,
                s.measured_phases,
                s.active_phases(),
                s.max_active_phases(true),
            )
        });

        if phases > 0 && phases < measured_phases {
            self.logger.warn(&format!(
                "ignoring inconsistent phases: {}p < {}p observed active",
                phases, measured_phases
            ));
        }

        let mut waiting = false;

        // scale down
        if power_to_current(available_power, active_phases) < min_current && active_phases > 1 {
            self.logger.debug(&format!(
                "available power {:.0}W < {:.0}W min {}p threshold",
                available_power,
                f64::from(active_phases) * crate::api::VOLTAGE * min_current,
                active_phases
            ));

            let delay = self.settings.disable.delay();
            if self.phase_timer_elapsed(PHASE_SCALE_1P, delay) {
                match self.scale_phases(1).await {
                    Ok(()) => self.logger.debug(&format!(
                        "switched phases: 1p @ {:.0}W",
                        available_power
                    )),
                    Err(e) => self.logger.error(&e.to_string()),
                }
                return true;
            }

            waiting = true;
        }

        let scalable = max_phases > 1 && phases < max_phases;

        // scale up
        if scalable && power_to_current(available_power, max_phases) >= min_current {
            self.logger.debug(&format!(
                "available power {:.0}W > {:.0}W min {}p threshold",
                available_power,
                f64::from(max_phases) * crate::api::VOLTAGE * min_current,
                max_phases
            ));

            let delay = self.settings.enable.delay();
            if self.phase_timer_elapsed(PHASE_SCALE_3P, delay) {
                match self.scale_phases(3).await {
                    Ok(()) => self.logger.debug(&format!(
                        "switched phases: 3p @ {:.0}W",
                        available_power
                    )),
                    Err(e) => self.logger.error(&e.to_string()),
                }
                return true;
            }

            waiting = true;
        }

        if !waiting && self.phase_timer.is_some() {
            self.logger.debug("phase timer reset");
            self.phase_timer = None;
            self.publish_timer(PHASE_TIMER, TimeDelta::zero(), TIMER_INACTIVE);
        }

        false
    }

    /// Start the phase timer if needed and check it against `delay`
    fn phase_timer_elapsed(&mut self, action: &str, delay: TimeDelta) -> bool {
        let started = match self.phase_timer {
            Some(started) => started,
            None => {
                self.logger.debug(&format!("start phase {} timer", action));
                let now = self.clock.now();
                self.phase_timer = Some(now);
                now
            }
        };

        self.publish_timer(PHASE_TIMER, delay, action);

        if self.clock.since(started) >= delay {
            self.logger.debug(&format!("phase {} timer elapsed", action));
            return true;
        }
        false
    }

    fn start_pv_timer(&mut self, action: &str) {
        if self.pv_timer == PvTimer::Inactive {
            self.logger.debug(&format!("pv {} timer start", action));
            self.pv_timer = PvTimer::Running(self.clock.now());
        }
    }

    fn pv_timer_elapsed(&self, delay: TimeDelta) -> bool {
        match self.pv_timer {
            PvTimer::Inactive => false,
            PvTimer::Running(started) => self.clock.since(started) >= delay,
            PvTimer::Elapsed => true,
        }
    }

    /// Put the pv timer into elapsed state so the next decision acts at once
    pub(crate) fn elapse_pv_timer(&mut self) {
        self.logger.debug("pv timer elapse");

        self.pv_timer = PvTimer::Elapsed;
        self.guard_updated = None;

        self.publish_timer(PV_TIMER, TimeDelta::zero(), TIMER_INACTIVE);
    }

    /// Reset a started or elapsed pv timer
    pub(crate) fn reset_pv_timer_if_running(&mut self) {
        self.reset_pv_timer(None);
    }

    fn reset_pv_timer(&mut self, action: Option<&str>) {
        if self.pv_timer == PvTimer::Inactive {
            return;
        }

        match action {
            Some(action) => self.logger.debug(&format!("pv {} timer reset", action)),
            None => self.logger.debug("pv timer reset"),
        }

        self.pv_timer = PvTimer::Inactive;
        self.publish_timer(PV_TIMER, TimeDelta::zero(), TIMER_INACTIVE);
    }

    /// Publish action and remaining time of the named timer
    fn publish_timer(&self, name: &str, delay: TimeDelta, action: &str) {
        let started = if name == PHASE_TIMER {
            self.phase_timer
        } else {
            match self.pv_timer {
                PvTimer::Running(started) => Some(started),
                PvTimer::Inactive | PvTimer::Elapsed => None,
            }
        };

        let remaining = started
            .map(|started| delay - self.clock.since(started))
            .filter(|remaining| *remaining > TimeDelta::zero())
            .unwrap_or_else(TimeDelta::zero);

        self.publisher.publish(&format!("{}Action", name), action);
        self.publisher
            .publish_duration(&format!("{}Remaining", name), remaining);

        if action == TIMER_INACTIVE {
            self.logger.debug(&format!("{} timer {}", name, action));
        } else {
            self.logger.debug(&format!(
                "{} {} in {}s",
                name,
                action,
                remaining.num_seconds()
            ));
        }
    }
}
