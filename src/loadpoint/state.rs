use crate::api::{ChargeMode, ChargeStatus, RemoteDemand};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Assumed phases when nothing is known, e.g. a switchable charger on startup
pub const UNKNOWN_PHASES: u8 = 3;

fn expect(phases: u8) -> u8 {
    if phases > 0 { phases } else { UNKNOWN_PHASES }
}

/// Loadpoint values shared with external readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPointState {
    pub title: String,
    pub mode: ChargeMode,

    /// Configured phases, 0 if unknown
    pub phases: u8,
    /// Phases seen carrying current, 0 if unknown
    pub measured_phases: u8,
    /// Phases of the active vehicle, 0 if unknown
    pub vehicle_phases: u8,

    pub min_current: f64,
    pub max_current: f64,
    pub min_soc: u8,
    pub target_soc: u8,
    pub target_time: Option<DateTime<Utc>>,

    pub status: ChargeStatus,
    pub remote_demand: RemoteDemand,
    pub remote_source: String,

    pub enabled: bool,
    /// Current limit sent to the charger
    pub charge_current: f64,
    pub charge_power: f64,

    pub vehicle_title: Option<String>,
    pub vehicle_soc: f64,
}

impl LoadPointState {
    /// Phases expected to be active
    pub fn active_phases(&self) -> u8 {
        expect(self.vehicle_phases)
            .min(expect(self.phases))
            .min(expect(self.measured_phases))
    }

    /// Phases that could be active after switching
    pub fn max_active_phases(&self, switchable: bool) -> u8 {
        let mut physical = self.phases;
        let mut measured = self.measured_phases;

        // during 1p or unknown config, 1p measured is not a restriction
        if physical <= 1 || self.vehicle_phases == 1 {
            measured = 0;
        }

        if switchable {
            physical = 3;
        }

        expect(self.vehicle_phases)
            .min(expect(physical))
            .min(expect(measured))
    }

    pub fn connected(&self) -> bool {
        matches!(self.status, ChargeStatus::B | ChargeStatus::C)
    }

    pub fn charging(&self) -> bool {
        self.status == ChargeStatus::C
    }
}

/// Loadpoint state behind a lock that is only held for single reads/writes
#[derive(Debug, Clone)]
pub struct SharedState(Arc<Mutex<LoadPointState>>);

impl SharedState {
    pub fn new(state: LoadPointState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    fn lock(&self) -> MutexGuard<'_, LoadPointState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the full state
    pub fn snapshot(&self) -> LoadPointState {
        self.lock().clone()
    }

    pub fn read<T>(&self, f: impl FnOnce(&LoadPointState) -> T) -> T {
        f(&self.lock())
    }

    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut LoadPointState) -> T) -> T {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(phases: u8, vehicle: u8, measured: u8) -> LoadPointState {
        LoadPointState {
            title: "lp".into(),
            mode: ChargeMode::Off,
            phases,
            measured_phases: measured,
            vehicle_phases: vehicle,
            min_current: 6.0,
            max_current: 16.0,
            min_soc: 0,
            target_soc: 100,
            target_time: None,
            status: ChargeStatus::None,
            remote_demand: RemoteDemand::Enable,
            remote_source: String::new(),
            enabled: false,
            charge_current: 0.0,
            charge_power: 0.0,
            vehicle_title: None,
            vehicle_soc: 0.0,
        }
    }

    #[test]
    fn unknown_phases_default_to_three() {
        let s = state(0, 0, 0);
        assert_eq!(s.active_phases(), 3);
        assert_eq!(s.max_active_phases(true), 3);
    }

    #[test]
    fn measured_restricts_active() {
        let s = state(3, 0, 2);
        assert_eq!(s.active_phases(), 2);
        assert_eq!(s.max_active_phases(false), 2);
    }

    #[test]
    fn shared_state_updates() {
        let shared = SharedState::new(state(3, 0, 0));
        shared.update(|s| s.enabled = true);
        assert!(shared.read(|s| s.enabled));
        assert!(shared.snapshot().enabled);
    }
}
