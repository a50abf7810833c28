//! Internal loadpoint events
//!
//! Events are dispatched in-line: synthesized meter/rater/timer handlers run
//! first so the loadpoint handlers see updated values.

use super::{LoadPoint, PvTimer};
use crate::api::ChargeStatus;

/// Internal state change notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Vehicle plugged in
    Connect,
    /// Vehicle unplugged
    Disconnect,
    /// Charging started
    Start,
    /// Charging stopped
    Stop,
    /// Charge current limit in A
    ChargeCurrent(f64),
    /// Measured charge power in W
    ChargePower(f64),
    /// New vehicle SoC in %
    VehicleSoc(f64),
}

impl LoadPoint {
    pub(crate) async fn dispatch(&mut self, event: Event) {
        self.dispatch_wrappers(event).await;

        match event {
            Event::Connect => self.on_connect(),
            Event::Disconnect => self.on_disconnect().await,
            Event::Start => self.on_start(),
            Event::Stop => self.on_stop(),
            Event::ChargeCurrent(current) => self.on_charge_current(current),
            Event::ChargePower(_) => {}
            Event::VehicleSoc(soc) => {
                if self.progress.next_step(soc) {
                    self.publisher.push("soc");
                }
            }
        }
    }

    async fn dispatch_wrappers(&self, event: Event) {
        if let Some(meter) = &self.meters.wrapped_meter {
            match event {
                Event::ChargeCurrent(current) => {
                    let (enabled, status, phases) =
                        self.state.read(|s| (s.enabled, s.status, s.active_phases()));
                    let power = if enabled && status == ChargeStatus::C {
                        current * f64::from(phases) * crate::api::VOLTAGE
                    } else {
                        0.0
                    };
                    meter.set_power(power);
                }
                Event::Stop => meter.set_power(0.0),
                _ => {}
            }
        }

        if let Some(rater) = &self.meters.wrapped_rater {
            match event {
                Event::ChargePower(power) => rater.set_charge_power(power),
                Event::Connect => rater.start_charge(false).await,
                Event::Start => rater.start_charge(true).await,
                Event::Stop => rater.stop_charge().await,
                _ => {}
            }
        }

        if let Some(timer) = &self.meters.wrapped_timer {
            match event {
                Event::Connect => timer.start_charge(false),
                Event::Start => timer.start_charge(true),
                Event::Stop => timer.stop_charge(),
                _ => {}
            }
        }
    }

    fn on_start(&mut self) {
        self.logger.info("start charging ->");
        self.publisher.push("start");

        self.wake_up_timer.stop();

        // soc update reset
        self.soc_updated = None;
    }

    fn on_stop(&mut self) {
        self.logger.info("stop charging <-");
        self.publisher.push("stop");

        // soc update reset
        self.soc_updated = None;

        // reset pv enable/disable timer unless a mode change elapsed it
        if self.pv_timer != PvTimer::Elapsed {
            self.reset_pv_timer_if_running();
        }
    }

    fn on_connect(&mut self) {
        self.logger.info("car connected");

        self.charged_energy = 0.0;
        self.publisher.publish("chargedEnergy", self.charged_energy);

        let now = self.clock.now();
        self.connected_time = Some(now);
        self.publisher.publish_duration("connectedDuration", chrono::TimeDelta::zero());

        // soc update reset
        self.soc_updated = None;
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.reset();
        }

        // start fresh for the new session
        self.cache.invalidate();

        if self.vehicles.len() > 1 {
            self.start_vehicle_detection();
        }

        // immediately allow pv mode activity
        self.elapse_pv_timer();

        self.publisher.push("connect");
    }

    async fn on_disconnect(&mut self) {
        self.logger.info("car disconnected");

        // phases are unknown when the vehicle disconnects
        self.set_measured_phases(0);

        self.publisher.publish("chargedEnergy", self.charged_energy);
        let connected = self
            .connected_time
            .map_or(chrono::TimeDelta::zero(), |t| self.clock.since(t));
        self.publisher.publish_duration("connectedDuration", connected);

        self.publisher.push("disconnect");

        if self.vehicles.len() > 1 {
            self.set_active_vehicle(None).await;
        } else if self.settings.poll_mode != crate::config::PollMode::Always {
            // keep the last known values when the vehicle is polled regardless
            self.unpublish_vehicle();
        }

        if self.settings.reset_on_disconnect {
            let action = self.on_disconnect.clone();
            self.apply_action(&action);
        }

        // soc update reset
        self.soc_updated = None;

        self.reset_planner();
    }

    fn on_charge_current(&mut self, current: f64) {
        let enabled = self.state.read(|s| s.enabled);
        self.publisher
            .publish("chargeCurrent", if enabled { current } else { 0.0 });
    }
}
