use super::{Event, LoadPoint, MIN_ACTIVE_CURRENT};
use crate::api::ChargeStatus;
use crate::error::Result;
use chrono::TimeDelta;

impl LoadPoint {
    /// Read the charge meter's power
    pub(crate) async fn update_charge_power(&mut self) {
        let meter = self.meters.meter.clone();
        let result = self
            .retry
            .run(&self.logger, || {
                let meter = meter.clone();
                async move { meter.current_power().await }
            })
            .await;

        match result {
            Ok(power) => {
                self.state.update(|s| s.charge_power = power);
                self.publisher.publish("chargePower", power);

                if power < -1.0 {
                    self.logger
                        .warn(&format!("charge power must not be negative: {:.0}", power));
                }
            }
            Err(e) => self.logger.error(&format!("charge meter: {}", e)),
        }
    }

    /// Read per-phase currents and derive the measured phase count
    pub(crate) async fn update_charge_currents(&mut self) {
        self.charge_currents = None;

        let Some(meter) = self.meters.currents.clone() else {
            return;
        };

        let (i1, i2, i3) = match meter.currents().await {
            Ok(currents) => currents,
            Err(e) => {
                self.logger.error(&format!("charge meter: {}", e));
                return;
            }
        };

        let currents = [i1, i2, i3];
        self.charge_currents = Some(currents);
        self.logger.debug(&format!(
            "charge currents: [{:.3} {:.3} {:.3}]A",
            i1, i2, i3
        ));
        self.publisher.publish("chargeCurrents", currents);

        if !self.charging() {
            return;
        }

        let active = |i: f64| i > MIN_ACTIVE_CURRENT;
        let phases = currents.iter().filter(|i| active(**i)).count() as u8;

        if phases >= 1 {
            self.set_measured_phases(phases);
            self.logger.debug(&format!(
                "detected phases: {}p [{:.3} {:.3} {:.3}]A",
                phases, i1, i2, i3
            ));

            if (!active(i1) && active(i2)) || (!active(i2) && active(i3)) {
                self.logger
                    .warn("invalid phase wiring between charge meter and charger");
            }
        }
    }

    /// Publish charged energy and durations of the session
    pub(crate) async fn publish_charge_progress(&mut self) {
        match self.meters.rater.charged_energy().await {
            Ok(kwh) => self.charged_energy = 1e3 * kwh,
            Err(e) => self.logger.error(&format!("charge rater: {}", e)),
        }

        match self.meters.timer.charging_time().await {
            Ok(d) => {
                let millis = d.num_milliseconds();
                self.charge_duration = TimeDelta::seconds((millis + 500).div_euclid(1000));
            }
            Err(e) => self.logger.error(&format!("charge timer: {}", e)),
        }

        self.publisher.publish("chargedEnergy", self.charged_energy);
        self.publisher
            .publish_duration("chargeDuration", self.charge_duration);

        if let Some(connected) = self.connected_time
            && self.connected()
        {
            self.publisher
                .publish_duration("connectedDuration", self.clock.since(connected));
        }
    }

    /// Read the charger status and raise transition events
    pub(crate) async fn update_charger_status(&mut self) -> Result<()> {
        let status = self.charger.charger.status().await?;
        self.logger.debug(&format!("charger status: {}", status));

        let prev = self.state.read(|s| s.status);
        if status == prev {
            return Ok(());
        }

        self.state.update(|s| s.status = status);
        self.publisher.publish("status", status);

        // vehicle found connected on startup
        if prev == ChargeStatus::None {
            self.connected_time = Some(self.clock.now());
            self.publisher
                .publish_duration("connectedDuration", TimeDelta::zero());
        }

        if prev == ChargeStatus::A {
            self.dispatch(Event::Connect).await;
        }

        // start/stop before disconnect so energy is final
        if status == ChargeStatus::C {
            self.dispatch(Event::Start).await;
        } else if prev == ChargeStatus::C {
            self.dispatch(Event::Stop).await;
        }

        if status == ChargeStatus::A && prev != ChargeStatus::None {
            self.dispatch(Event::Disconnect).await;
        }

        let charge_current = self.state.read(|s| s.charge_current);
        self.dispatch(Event::ChargeCurrent(charge_current)).await;

        Ok(())
    }
}
