//! Target-time charging
//!
//! Decides whether charging has to start now to reach the target SoC by the
//! target time, and steers the charge current once active.

use crate::api::ChargeStatus;
use crate::logging::{StructuredLogger, get_logger};
use crate::publish::Publisher;
use crate::soc::{CHARGE_EFFICIENCY, SocEstimator};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Accepted early finish before slowing down
pub const DEVIATION: TimeDelta = TimeDelta::minutes(30);

/// Loadpoint values the planner evaluates against
pub struct PlanContext<'a> {
    pub now: DateTime<Utc>,
    pub target_soc: u8,
    pub min_current: f64,
    pub max_current: f64,
    /// Power at max current and active phases
    pub max_power: f64,
    pub status: ChargeStatus,
    pub estimator: Option<&'a dyn SocEstimator>,
}

/// Target charging planner
pub struct Planner {
    logger: StructuredLogger,
    publisher: Publisher,
    target_time: Option<DateTime<Utc>>,
    current: f64,
    finish_at: Option<DateTime<Utc>>,
    active: bool,
    validated: bool,
}

impl Planner {
    pub fn new(logger: StructuredLogger, publisher: Publisher) -> Self {
        Self {
            logger,
            publisher,
            target_time: None,
            current: 0.0,
            finish_at: None,
            active: false,
            validated: false,
        }
    }

    pub fn target_time(&self) -> Option<DateTime<Utc>> {
        self.target_time
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn finish_at(&self) -> Option<DateTime<Utc>> {
        self.finish_at
    }

    /// Set or clear the target time
    pub fn set(&mut self, target_time: Option<DateTime<Utc>>) {
        self.target_time = target_time;
        self.publisher.publish("targetTime", target_time);
    }

    /// Clear the target time and deactivate
    pub fn reset(&mut self) {
        self.set(None);
        self.stop();
    }

    /// Clear the validation flag before a control cycle
    pub fn must_validate_demand(&mut self) {
        self.validated = false;
    }

    /// Whether [`Planner::demand_active`] was evaluated since the last
    /// [`Planner::must_validate_demand`]
    pub fn demand_validated(&self) -> bool {
        self.validated
    }

    pub fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.publisher.publish("targetTimeActive", false);
            self.logger.debug("target charging: disable");
        }
    }

    /// Remaining charge duration at the planned power
    pub fn remaining_duration(&self, ctx: &PlanContext<'_>) -> Option<TimeDelta> {
        let estimator = ctx.estimator?;
        estimator.remaining_charge_duration(self.power(ctx), ctx.target_soc)
    }

    fn power(&self, ctx: &PlanContext<'_>) -> f64 {
        let mut power = ctx.max_power;
        if self.active && ctx.max_current > 0.0 {
            power *= self.current / ctx.max_current;
        }
        power
    }

    /// Whether charging must run now to meet the target time
    pub fn demand_active(&mut self, ctx: &PlanContext<'_>) -> bool {
        let Some(target_time) = self.target_time else {
            return false;
        };

        self.validated = true;

        let power = self.power(ctx);
        let Some(estimator) = ctx.estimator else {
            self.logger.warn("target charging: not possible");
            return false;
        };

        let assumed = estimator.assumed_charge_duration(ctx.target_soc, power);
        let remaining = TimeDelta::milliseconds(
            (assumed.num_milliseconds() as f64 / CHARGE_EFFICIENCY).round() as i64,
        );
        let projected = ctx.now + remaining;
        let finish_at = projected
            .duration_round(TimeDelta::minutes(1))
            .unwrap_or(projected);
        self.finish_at = Some(finish_at);

        self.logger.debug(&format!(
            "estimated charge duration: {}min to {}% at {:.0}W",
            remaining.num_minutes(),
            ctx.target_soc,
            power
        ));
        if self.active {
            self.logger.debug(&format!(
                "projected end: {}, desired finish time: {}",
                finish_at, target_time
            ));
        } else {
            self.logger
                .debug(&format!("projected start: {}", target_time - remaining));
        }

        // only deactivate once charging has stopped
        if self.active {
            if ctx.now > target_time && ctx.status != ChargeStatus::C {
                self.stop();
            }
            return self.active;
        }

        if finish_at > target_time {
            self.active = true;
            self.publisher.publish("targetTimeActive", true);
            self.current = ctx.max_current;
            self.logger.info(&format!(
                "target charging active for {}: projected {} ({}min remaining)",
                target_time,
                finish_at,
                remaining.num_minutes()
            ));
        }

        self.active
    }

    /// Adjust the current towards finishing just in time
    pub fn handle(&mut self, ctx: &PlanContext<'_>) -> f64 {
        let mut action = "steady";

        if let (Some(finish_at), Some(target_time)) = (self.finish_at, self.target_time) {
            if finish_at < target_time - DEVIATION {
                self.current -= 1.0;
                action = "slowdown";
            } else if finish_at > target_time {
                self.current += 1.0;
                action = "speedup";
            }
        }

        self.current = self.current.min(ctx.max_current).max(ctx.min_current);
        self.logger.debug(&format!(
            "target charging: {} ({:.3}A)",
            action, self.current
        ));

        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    struct FixedEstimator {
        duration: TimeDelta,
    }

    #[async_trait]
    impl SocEstimator for FixedEstimator {
        async fn soc(&mut self, _charged_energy: f64) -> Result<f64> {
            Ok(50.0)
        }
        fn remaining_charge_duration(&self, _power: f64, _target_soc: u8) -> Option<TimeDelta> {
            Some(self.duration)
        }
        fn remaining_charge_energy(&self, _target_soc: u8) -> f64 {
            0.0
        }
        fn assumed_charge_duration(&self, _target_soc: u8, _power: f64) -> TimeDelta {
            self.duration
        }
        fn reset(&mut self) {}
    }

    fn ctx<'a>(now: DateTime<Utc>, estimator: &'a FixedEstimator) -> PlanContext<'a> {
        PlanContext {
            now,
            target_soc: 80,
            min_current: 6.0,
            max_current: 16.0,
            max_power: 16.0 * 3.0 * 230.0,
            status: ChargeStatus::C,
            estimator: Some(estimator),
        }
    }

    fn planner() -> Planner {
        Planner::new(get_logger("planner"), Publisher::new())
    }

    #[test]
    fn inactive_without_target_time() {
        let mut p = planner();
        let est = FixedEstimator {
            duration: TimeDelta::hours(3),
        };
        p.must_validate_demand();
        assert!(!p.demand_active(&ctx(Utc::now(), &est)));
        assert!(!p.demand_validated());
    }

    #[test]
    fn activates_when_late_and_seeds_max_current() {
        let now = Utc::now();
        let mut p = planner();
        p.set(Some(now + TimeDelta::hours(2)));
        let est = FixedEstimator {
            duration: TimeDelta::hours(3),
        };

        p.must_validate_demand();
        assert!(p.demand_active(&ctx(now, &est)));
        assert!(p.demand_validated());
        assert_eq!(p.current(), 16.0);
        // late: speed up, clamped at max
        assert_eq!(p.handle(&ctx(now, &est)), 16.0);
    }

    #[test]
    fn stays_inactive_with_enough_time() {
        let now = Utc::now();
        let mut p = planner();
        p.set(Some(now + TimeDelta::hours(5)));
        let est = FixedEstimator {
            duration: TimeDelta::hours(3),
        };
        assert!(!p.demand_active(&ctx(now, &est)));
    }

    #[test]
    fn handle_slows_down_when_early() {
        let now = Utc::now();
        let mut p = planner();
        p.set(Some(now + TimeDelta::hours(2)));
        let late = FixedEstimator {
            duration: TimeDelta::hours(3),
        };
        assert!(p.demand_active(&ctx(now, &late)));

        let early = FixedEstimator {
            duration: TimeDelta::minutes(30),
        };
        assert!(p.demand_active(&ctx(now, &early)));
        assert_eq!(p.handle(&ctx(now, &early)), 15.0);
        assert_eq!(p.handle(&ctx(now, &early)), 14.0);

        // within the deviation window the current holds
        let on_time = FixedEstimator {
            duration: TimeDelta::minutes(95),
        };
        assert!(p.demand_active(&ctx(now, &on_time)));
        assert_eq!(p.handle(&ctx(now, &on_time)), 14.0);

        // late again: speed up
        assert!(p.demand_active(&ctx(now, &late)));
        assert_eq!(p.handle(&ctx(now, &late)), 15.0);
    }

    #[test]
    fn deactivates_after_target_once_not_charging() {
        let now = Utc::now();
        let mut p = planner();
        p.set(Some(now + TimeDelta::hours(1)));
        let est = FixedEstimator {
            duration: TimeDelta::hours(3),
        };
        assert!(p.demand_active(&ctx(now, &est)));

        let later = now + TimeDelta::hours(2);
        assert!(p.demand_active(&ctx(later, &est)));

        let mut c = ctx(later, &est);
        c.status = ChargeStatus::B;
        assert!(!p.demand_active(&c));
    }

    #[test]
    fn reset_clears_target() {
        let now = Utc::now();
        let mut p = planner();
        p.set(Some(now + TimeDelta::hours(1)));
        let est = FixedEstimator {
            duration: TimeDelta::hours(3),
        };
        assert!(p.demand_active(&ctx(now, &est)));

        p.reset();
        assert!(!p.is_active());
        assert_eq!(p.target_time(), None);
    }
}
