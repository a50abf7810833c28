use super::{Event, LoadPoint, VEHICLE_DETECT_DURATION, VEHICLE_DETECT_INTERVAL};
use crate::api::{Vehicle, same_vehicle};
use crate::config::PollMode;
use crate::error::HeliosError;
use chrono::TimeDelta;
use std::sync::Arc;

/// Match `id` against a pattern where `*` matches any sequence of characters
pub(crate) fn match_identifier(pattern: &str, id: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return id.is_empty();
    };
    let Some(mut rest) = id.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // no wildcard
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}

impl LoadPoint {
    /// Identify the vehicle through the charger
    pub(crate) async fn identify_vehicle(&mut self) {
        let Some(identifier) = self.charger.identifier.clone() else {
            return;
        };

        let id = match identifier.identify().await {
            Ok(id) => id,
            Err(e) => {
                self.logger.error(&format!("charger vehicle id: {}", e));
                return;
            }
        };

        if self.vehicle_id == id {
            return;
        }

        // vehicle found or removed
        self.vehicle_id = id.clone();
        self.logger.debug(&format!("charger vehicle id: {}", id));
        self.publisher.publish("vehicleIdentity", &id);

        if !id.is_empty()
            && let Some(vehicle) = self.select_vehicle_by_id(&id)
        {
            self.set_active_vehicle(Some(vehicle)).await;
        }
    }

    /// Exact identifier match first, then wildcard patterns
    pub(crate) fn select_vehicle_by_id(&self, id: &str) -> Option<Arc<dyn Vehicle>> {
        self.vehicles
            .iter()
            .find(|v| v.identifiers().iter().any(|vid| vid == id))
            .or_else(|| {
                self.vehicles.iter().find(|v| {
                    v.identifiers()
                        .iter()
                        .any(|vid| vid.contains('*') && match_identifier(vid, id))
                })
            })
            .cloned()
    }

    /// Make `vehicle` the active vehicle and set up its estimator
    pub(crate) async fn set_active_vehicle(&mut self, vehicle: Option<Arc<dyn Vehicle>>) {
        let unchanged = match (&self.vehicle, &vehicle) {
            (Some(a), Some(b)) => same_vehicle(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        let from = match self.vehicle.take() {
            Some(prev) => {
                self.coordinator.release(&prev).await;
                prev.title()
            }
            None => "unknown".to_string(),
        };
        let to = match &vehicle {
            Some(next) => {
                self.coordinator.acquire(self.index, next).await;
                next.title()
            }
            None => "unknown".to_string(),
        };
        self.logger
            .info(&format!("vehicle updated: {} -> {}", from, to));

        match vehicle {
            Some(vehicle) => {
                self.vehicle = Some(vehicle.clone());
                self.estimator = Some((self.estimator_factory)(
                    vehicle.clone(),
                    self.charger.battery.clone(),
                    self.settings.estimate,
                ));

                let title = vehicle.title();
                let phases = vehicle.phases();
                self.state.update(|s| {
                    s.vehicle_title = Some(title.clone());
                    s.vehicle_phases = phases;
                });

                self.publisher.publish("vehiclePresent", true);
                self.publisher.publish("vehicleTitle", &title);
                self.publisher.publish("vehicleCapacity", vehicle.capacity());

                let action = vehicle.on_identified();
                self.apply_action(&action);

                self.progress.reset();
            }
            None => self.clear_vehicle(),
        }

        self.unpublish_vehicle();
    }

    /// Forget the active vehicle without coordinator bookkeeping
    pub(crate) fn clear_vehicle(&mut self) {
        self.vehicle = None;
        self.estimator = None;
        self.state.update(|s| {
            s.vehicle_title = None;
            s.vehicle_phases = 0;
        });

        self.publisher.publish("vehiclePresent", false);
        self.publisher.publish("vehicleTitle", "");
        self.publisher.publish("vehicleCapacity", 0_i64);
    }

    /// Reset published vehicle values
    pub(crate) fn unpublish_vehicle(&mut self) {
        self.state.update(|s| s.vehicle_soc = 0.0);

        self.publisher.publish("vehicleSoC", 0.0);
        self.publisher.publish("vehicleRange", 0_i64);
        self.publisher.publish("vehicleOdometer", 0.0);

        self.set_remaining_duration(None);
    }

    /// Start the window for identifying one of several vehicles
    pub(crate) fn start_vehicle_detection(&mut self) {
        let now = self.clock.now();
        self.vehicle_connected = Some(now);
        self.vehicle_detect_refresh = Some(now + VEHICLE_DETECT_INTERVAL);
    }

    /// True while waiting to identify one of several vehicles.
    ///
    /// Periodically invalidates cached vehicle data during the wait.
    pub(crate) fn vehicle_unidentified(&mut self) -> bool {
        let detecting = self.vehicles.len() > 1
            && self.vehicle.is_none()
            && self
                .vehicle_connected
                .is_some_and(|t| self.clock.since(t) < VEHICLE_DETECT_DURATION);

        if detecting
            && let Some(refresh) = self.vehicle_detect_refresh
            && self.clock.now() >= refresh
        {
            self.logger.debug("vehicle api refresh");
            self.cache.invalidate();
            self.vehicle_detect_refresh = Some(self.clock.now() + VEHICLE_DETECT_INTERVAL);
        }

        detecting
    }

    /// Confirm or find the connected vehicle by asking vehicles for their state
    pub(crate) async fn identify_vehicle_by_status(&mut self) {
        if self.vehicles.len() <= 1 {
            return;
        }

        if let Some(vehicle) = self
            .coordinator
            .identify_vehicle_by_status(&self.logger, self.index, &self.vehicles)
            .await
        {
            self.set_active_vehicle(Some(vehicle)).await;
            return;
        }

        // drop the previous vehicle if it could have confirmed its state
        if self
            .vehicle
            .as_ref()
            .is_some_and(|v| v.as_charge_state().is_some())
        {
            self.set_active_vehicle(None).await;
        }
    }

    /// Whether the vehicle requests climate control; publishes the climater state
    pub(crate) async fn climate_active(&self) -> bool {
        let Some(climater) = self.vehicle.as_ref().and_then(|v| v.as_climater()) else {
            return false;
        };

        match climater.climater().await {
            Ok(status) => {
                self.logger.debug(&format!(
                    "climater active: {}, target temp: {:.1}°C, outside temp: {:.1}°C",
                    status.active, status.target_temp, status.outside_temp
                ));
                self.publisher.publish("climater", status.label());
                status.active
            }
            Err(HeliosError::NotAvailable) => false,
            Err(e) => {
                self.logger.error(&format!("climater: {}", e));
                false
            }
        }
    }

    pub(crate) fn target_soc_reached(&self) -> bool {
        self.vehicle.is_some()
            && self.state.read(|s| {
                s.target_soc > 0 && s.target_soc < 100 && s.vehicle_soc >= f64::from(s.target_soc)
            })
    }

    pub(crate) fn min_soc_not_reached(&self) -> bool {
        self.vehicle.is_some()
            && self
                .state
                .read(|s| s.min_soc > 0 && s.vehicle_soc < f64::from(s.min_soc))
    }

    pub(crate) fn soc_poll_allowed(&self) -> bool {
        let remaining = self
            .soc_updated
            .map(|t| self.settings.poll_interval - self.clock.since(t));
        let connected = self.connected();

        let honour_interval = match self.settings.poll_mode {
            PollMode::Always => true,
            PollMode::Connected => connected,
            PollMode::Charging => false,
        };

        if honour_interval
            && let Some(remaining) = remaining
            && remaining > TimeDelta::zero()
        {
            self.logger.debug(&format!(
                "next soc poll remaining time: {}s",
                remaining.num_seconds()
            ));
        }

        let interval_passed = remaining.is_none_or(|r| r <= TimeDelta::zero());

        self.charging()
            || (honour_interval && interval_passed)
            || (connected && self.soc_updated.is_none())
    }

    async fn soc_provided_by_charger(&self) -> bool {
        match &self.charger.battery {
            Some(battery) => battery.soc().await.is_ok(),
            None => false,
        }
    }

    /// Poll or estimate the SoC and publish vehicle values
    pub(crate) async fn publish_soc_and_range(&mut self) {
        if self.estimator.is_none() {
            return;
        }

        if !(self.soc_poll_allowed() || self.soc_provided_by_charger().await) {
            return;
        }

        self.soc_updated = Some(self.clock.now());

        let charged_energy = self.charged_energy;
        let result = match self.estimator.as_mut() {
            Some(estimator) => estimator.soc(charged_energy).await,
            None => return,
        };

        let soc = match result {
            Ok(soc) => soc,
            Err(HeliosError::MustRetry) => {
                self.soc_updated = None;
                return;
            }
            Err(e) => {
                self.logger.error(&format!("vehicle soc: {}", e));
                return;
            }
        };

        let vehicle_soc = soc.trunc();
        self.state.update(|s| s.vehicle_soc = vehicle_soc);
        self.logger.debug(&format!("vehicle soc: {:.0}%", vehicle_soc));
        self.publisher.publish("vehicleSoC", vehicle_soc);

        let (charge_power, target_soc) = self.state.read(|s| (s.charge_power, s.target_soc));
        let remaining = if self.charging() {
            self.estimator
                .as_ref()
                .and_then(|e| e.remaining_charge_duration(charge_power, target_soc))
        } else {
            None
        };
        self.set_remaining_duration(remaining);

        let remaining_energy = self
            .estimator
            .as_ref()
            .map_or(0.0, |e| 1e3 * e.remaining_charge_energy(target_soc));
        self.publisher
            .publish("chargeRemainingEnergy", remaining_energy);

        if let Some(vehicle) = self.vehicle.clone() {
            if let Some(range) = vehicle.as_range()
                && let Ok(km) = range.range().await
            {
                self.logger.debug(&format!("vehicle range: {}km", km));
                self.publisher.publish("vehicleRange", km);
            }

            if let Some(odometer) = vehicle.as_odometer()
                && let Ok(km) = odometer.odometer().await
            {
                self.logger.debug(&format!("vehicle odometer: {:.0}km", km));
                self.publisher.publish("vehicleOdometer", km);
            }
        }

        self.dispatch(Event::VehicleSoc(soc)).await;
    }

    /// Publish the remaining charge duration, -1 if unknown
    fn set_remaining_duration(&self, remaining: Option<TimeDelta>) {
        match remaining {
            Some(d) => self
                .publisher
                .publish_duration("chargeRemainingDuration", d),
            None => self.publisher.publish("chargeRemainingDuration", -1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::match_identifier;

    #[test]
    fn identifier_patterns() {
        assert!(match_identifier("abc", "abc"));
        assert!(!match_identifier("abc", "abcd"));
        assert!(match_identifier("WVW*", "WVWZZZ123"));
        assert!(match_identifier("*123", "WVWZZZ123"));
        assert!(match_identifier("W*Z*3", "WVWZZZ123"));
        assert!(!match_identifier("W*X*3", "WVWZZZ123"));
        assert!(match_identifier("*", ""));
        assert!(!match_identifier("ab*ba", "aba"));
    }
}
