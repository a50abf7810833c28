//! Site-wide vehicle ownership
//!
//! A vehicle can be active at one loadpoint at a time. The coordinator tracks
//! which loadpoint owns which vehicle and resolves ambiguous connections by
//! asking the candidate vehicles for their charge state.

use crate::api::{ChargeStatus, Vehicle, same_vehicle};
use crate::logging::StructuredLogger;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Vehicle to loadpoint assignment
#[derive(Default)]
pub struct Coordinator {
    owners: Mutex<Vec<(Arc<dyn Vehicle>, usize)>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `loadpoint` as owner of `vehicle`
    pub async fn acquire(&self, loadpoint: usize, vehicle: &Arc<dyn Vehicle>) {
        let mut owners = self.owners.lock().await;
        owners.retain(|(v, _)| !same_vehicle(v, vehicle));
        owners.push((vehicle.clone(), loadpoint));
    }

    /// Remove ownership of `vehicle`
    pub async fn release(&self, vehicle: &Arc<dyn Vehicle>) {
        self.owners
            .lock()
            .await
            .retain(|(v, _)| !same_vehicle(v, vehicle));
    }

    /// Loadpoint currently owning `vehicle`
    pub async fn owner(&self, vehicle: &Arc<dyn Vehicle>) -> Option<usize> {
        self.owners
            .lock()
            .await
            .iter()
            .find(|(v, _)| same_vehicle(v, vehicle))
            .map(|(_, lp)| *lp)
    }

    /// Find the single candidate vehicle reporting to be connected.
    ///
    /// Only vehicles that can report their charge state and are unowned or
    /// owned by `loadpoint` are considered. More than one match gives up.
    pub async fn identify_vehicle_by_status(
        &self,
        logger: &StructuredLogger,
        loadpoint: usize,
        vehicles: &[Arc<dyn Vehicle>],
    ) -> Option<Arc<dyn Vehicle>> {
        let owners = self.owners.lock().await;
        let mut found: Option<Arc<dyn Vehicle>> = None;

        for vehicle in vehicles {
            let available = owners
                .iter()
                .find(|(v, _)| same_vehicle(v, vehicle))
                .is_none_or(|(_, lp)| *lp == loadpoint);
            if !available {
                continue;
            }

            let Some(state) = vehicle.as_charge_state() else {
                continue;
            };

            let status = match state.status().await {
                Ok(status) => status,
                Err(e) => {
                    logger.error(&format!("vehicle status: {}", e));
                    continue;
                }
            };
            logger.debug(&format!(
                "vehicle status: {} ({})",
                status,
                vehicle.title()
            ));

            if matches!(status, ChargeStatus::B | ChargeStatus::C) {
                if found.is_some() {
                    logger.warn("vehicle status: >1 matches, giving up");
                    return None;
                }
                found = Some(vehicle.clone());
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChargeState;
    use crate::error::Result;
    use crate::logging::get_logger;
    use async_trait::async_trait;

    struct StatusVehicle {
        title: &'static str,
        status: ChargeStatus,
    }

    #[async_trait]
    impl Vehicle for StatusVehicle {
        fn title(&self) -> String {
            self.title.to_string()
        }
        fn capacity(&self) -> f64 {
            50.0
        }
        async fn soc(&self) -> Result<f64> {
            Ok(50.0)
        }
        fn as_charge_state(&self) -> Option<&dyn ChargeState> {
            Some(self)
        }
    }

    #[async_trait]
    impl ChargeState for StatusVehicle {
        async fn status(&self) -> Result<ChargeStatus> {
            Ok(self.status)
        }
    }

    fn vehicle(title: &'static str, status: ChargeStatus) -> Arc<dyn Vehicle> {
        Arc::new(StatusVehicle { title, status })
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let c = Coordinator::new();
        let v = vehicle("a", ChargeStatus::A);
        c.acquire(1, &v).await;
        assert_eq!(c.owner(&v).await, Some(1));
        c.acquire(2, &v).await;
        assert_eq!(c.owner(&v).await, Some(2));
        c.release(&v).await;
        assert_eq!(c.owner(&v).await, None);
    }

    #[tokio::test]
    async fn identifies_single_connected_vehicle() {
        let c = Coordinator::new();
        let log = get_logger("coordinator");
        let idle = vehicle("idle", ChargeStatus::A);
        let plugged = vehicle("plugged", ChargeStatus::B);
        let vehicles = vec![idle, plugged.clone()];

        let found = c.identify_vehicle_by_status(&log, 0, &vehicles).await;
        assert!(same_vehicle(&found.unwrap(), &plugged));

        // owned elsewhere
        c.acquire(1, &plugged).await;
        assert!(c.identify_vehicle_by_status(&log, 0, &vehicles).await.is_none());
        // owned here
        assert!(c.identify_vehicle_by_status(&log, 1, &vehicles).await.is_some());
    }

    #[tokio::test]
    async fn ambiguous_match_gives_up() {
        let c = Coordinator::new();
        let log = get_logger("coordinator");
        let vehicles = vec![
            vehicle("one", ChargeStatus::B),
            vehicle("two", ChargeStatus::C),
        ];
        assert!(c.identify_vehicle_by_status(&log, 0, &vehicles).await.is_none());
    }
}
