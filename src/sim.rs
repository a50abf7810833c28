//! Simulated devices
//!
//! In-memory chargers, meters, vehicles and tariffs implementing the device
//! capabilities. The bundled binary wires them from the `devices` config
//! section; tests drive them directly.

use crate::api::{
    self, ActionConfig, ChargeState, ChargeStatus, ChargerCapabilities, MeterCapabilities,
    Vehicle, VehicleRange,
};
use crate::cache::{ApiCache, Cached};
use crate::clock::Clock;
use crate::config::{
    DevicesConfig, SimChargerConfig, SimMeterConfig, SimTariffConfig, SimVehicleConfig,
};
use crate::error::{HeliosError, Result};
use async_trait::async_trait;
use chrono::TimeDelta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Vehicle API values are served from cache for this long
pub const VEHICLE_CACHE_TTL: TimeDelta = TimeDelta::minutes(5);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct ChargerState {
    status: ChargeStatus,
    enabled: bool,
    current: f64,
    phases: u8,
    identity: Option<String>,
    fail: bool,
}

/// Simulated wallbox
#[derive(Debug)]
pub struct SimCharger {
    config: SimChargerConfig,
    state: Mutex<ChargerState>,
}

impl SimCharger {
    pub fn new(config: SimChargerConfig) -> Self {
        let state = ChargerState {
            status: config.status,
            enabled: false,
            current: 0.0,
            phases: 3,
            identity: config.identify.clone(),
            fail: false,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn set_status(&self, status: ChargeStatus) {
        lock(&self.state).status = status;
    }

    pub fn set_identity(&self, identity: Option<String>) {
        lock(&self.state).identity = identity;
    }

    /// Make every command fail until reset
    pub fn set_failing(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    /// Last current limit
    pub fn current(&self) -> f64 {
        lock(&self.state).current
    }

    /// Phases set through 1p/3p switching
    pub fn phases(&self) -> u8 {
        lock(&self.state).phases
    }

    fn check(&self) -> Result<()> {
        if lock(&self.state).fail {
            return Err(HeliosError::charger("simulated failure"));
        }
        Ok(())
    }

    /// Capability set according to the configuration
    pub fn capabilities(self: &Arc<Self>) -> ChargerCapabilities {
        let mut caps = ChargerCapabilities::new(self.clone());
        if self.config.millis {
            caps = caps.with_ex(self.clone());
        }
        if self.config.switchable {
            caps = caps.with_phases(self.clone());
        }
        if self.config.meter {
            caps = caps.with_meter(MeterCapabilities::new(self.clone()).with_currents(self.clone()));
        }
        if self.config.identify.is_some() {
            caps = caps.with_identifier(self.clone());
        }
        caps
    }

    fn phase_currents(&self) -> [f64; 3] {
        let state = lock(&self.state);
        if !state.enabled || state.status != ChargeStatus::C {
            return [0.0; 3];
        }
        match state.phases {
            1 => [state.current, 0.0, 0.0],
            _ => [state.current; 3],
        }
    }
}

#[async_trait]
impl api::Charger for SimCharger {
    async fn status(&self) -> Result<ChargeStatus> {
        self.check()?;
        Ok(lock(&self.state).status)
    }

    async fn enabled(&self) -> Result<bool> {
        self.check()?;
        Ok(lock(&self.state).enabled)
    }

    async fn enable(&self, enable: bool) -> Result<()> {
        self.check()?;
        lock(&self.state).enabled = enable;
        Ok(())
    }

    async fn max_current(&self, current: i64) -> Result<()> {
        self.check()?;
        lock(&self.state).current = current as f64;
        Ok(())
    }
}

#[async_trait]
impl api::ChargerEx for SimCharger {
    async fn max_current_millis(&self, current: f64) -> Result<()> {
        self.check()?;
        lock(&self.state).current = current;
        Ok(())
    }
}

#[async_trait]
impl api::ChargePhases for SimCharger {
    async fn phases_1p3p(&self, phases: u8) -> Result<()> {
        self.check()?;
        lock(&self.state).phases = phases;
        Ok(())
    }
}

#[async_trait]
impl api::Meter for SimCharger {
    async fn current_power(&self) -> Result<f64> {
        Ok(self.phase_currents().iter().sum::<f64>() * api::VOLTAGE)
    }
}

#[async_trait]
impl api::MeterCurrent for SimCharger {
    async fn currents(&self) -> Result<(f64, f64, f64)> {
        let [l1, l2, l3] = self.phase_currents();
        Ok((l1, l2, l3))
    }
}

#[async_trait]
impl api::Identifier for SimCharger {
    async fn identify(&self) -> Result<String> {
        Ok(lock(&self.state).identity.clone().unwrap_or_default())
    }
}

/// Simulated grid or battery meter
#[derive(Debug)]
pub struct SimMeter {
    power: Mutex<f64>,
    soc: Mutex<Option<f64>>,
}

impl SimMeter {
    pub fn new(config: &SimMeterConfig) -> Self {
        Self {
            power: Mutex::new(config.power),
            soc: Mutex::new(config.soc),
        }
    }

    pub fn set_power(&self, power: f64) {
        *lock(&self.power) = power;
    }

    pub fn set_soc(&self, soc: Option<f64>) {
        *lock(&self.soc) = soc;
    }
}

#[async_trait]
impl api::Meter for SimMeter {
    async fn current_power(&self) -> Result<f64> {
        Ok(*lock(&self.power))
    }
}

#[async_trait]
impl api::Battery for SimMeter {
    async fn soc(&self) -> Result<f64> {
        lock(&self.soc).ok_or(HeliosError::NotAvailable)
    }
}

#[derive(Debug)]
struct VehicleState {
    soc: f64,
    status: ChargeStatus,
}

/// Simulated vehicle with a cached API
pub struct SimVehicle {
    config: SimVehicleConfig,
    state: Mutex<VehicleState>,
    soc_cache: Cached<f64>,
}

impl SimVehicle {
    pub fn new(config: SimVehicleConfig, cache: Arc<ApiCache>, clock: Arc<dyn Clock>) -> Self {
        let state = VehicleState {
            soc: config.soc,
            status: ChargeStatus::A,
        };
        Self {
            config,
            state: Mutex::new(state),
            soc_cache: Cached::new(cache, clock, VEHICLE_CACHE_TTL),
        }
    }

    /// Change the SoC reported by the vehicle API
    pub fn set_soc(&self, soc: f64) {
        lock(&self.state).soc = soc;
    }

    /// Change the charge state reported by the vehicle
    pub fn set_status(&self, status: ChargeStatus) {
        lock(&self.state).status = status;
    }
}

#[async_trait]
impl Vehicle for SimVehicle {
    fn title(&self) -> String {
        self.config.title.clone()
    }

    fn capacity(&self) -> f64 {
        self.config.capacity
    }

    fn phases(&self) -> u8 {
        self.config.phases
    }

    fn identifiers(&self) -> Vec<String> {
        self.config.identifiers.clone()
    }

    fn on_identified(&self) -> ActionConfig {
        self.config.on_identify.clone()
    }

    async fn soc(&self) -> Result<f64> {
        let soc = lock(&self.state).soc;
        self.soc_cache.get(|| async move { Ok(soc) }).await
    }

    fn as_range(&self) -> Option<&dyn VehicleRange> {
        self.config.range.map(|_| self as &dyn VehicleRange)
    }

    fn as_charge_state(&self) -> Option<&dyn ChargeState> {
        self.config.charge_state.then_some(self as &dyn ChargeState)
    }
}

#[async_trait]
impl VehicleRange for SimVehicle {
    async fn range(&self) -> Result<i64> {
        self.config.range.ok_or(HeliosError::NotAvailable)
    }
}

#[async_trait]
impl ChargeState for SimVehicle {
    async fn status(&self) -> Result<ChargeStatus> {
        Ok(lock(&self.state).status)
    }
}

/// Simulated cheap-tariff signal
#[derive(Debug)]
pub struct SimTariff {
    cheap: Mutex<bool>,
}

impl SimTariff {
    pub fn new(config: &SimTariffConfig) -> Self {
        Self {
            cheap: Mutex::new(config.cheap),
        }
    }

    pub fn set_cheap(&self, cheap: bool) {
        *lock(&self.cheap) = cheap;
    }
}

#[async_trait]
impl api::Tariff for SimTariff {
    async fn is_cheap(&self) -> Result<bool> {
        Ok(*lock(&self.cheap))
    }
}

/// Named simulated devices
#[derive(Default)]
pub struct SimDevices {
    pub chargers: HashMap<String, Arc<SimCharger>>,
    pub meters: HashMap<String, Arc<SimMeter>>,
    pub vehicles: HashMap<String, Arc<SimVehicle>>,
    pub tariffs: HashMap<String, Arc<SimTariff>>,
}

impl SimDevices {
    pub fn from_config(config: &DevicesConfig, cache: Arc<ApiCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            chargers: config
                .chargers
                .iter()
                .map(|(name, c)| (name.clone(), Arc::new(SimCharger::new(c.clone()))))
                .collect(),
            meters: config
                .meters
                .iter()
                .map(|(name, m)| (name.clone(), Arc::new(SimMeter::new(m))))
                .collect(),
            vehicles: config
                .vehicles
                .iter()
                .map(|(name, v)| {
                    let vehicle = SimVehicle::new(v.clone(), cache.clone(), clock.clone());
                    (name.clone(), Arc::new(vehicle))
                })
                .collect(),
            tariffs: config
                .tariffs
                .iter()
                .map(|(name, t)| (name.clone(), Arc::new(SimTariff::new(t))))
                .collect(),
        }
    }

    pub fn charger(&self, name: &str) -> Result<Arc<SimCharger>> {
        self.chargers
            .get(name)
            .cloned()
            .ok_or_else(|| HeliosError::config(format!("unknown charger '{}'", name)))
    }

    pub fn meter(&self, name: &str) -> Result<Arc<SimMeter>> {
        self.meters
            .get(name)
            .cloned()
            .ok_or_else(|| HeliosError::config(format!("unknown meter '{}'", name)))
    }

    pub fn vehicle(&self, name: &str) -> Result<Arc<SimVehicle>> {
        self.vehicles
            .get(name)
            .cloned()
            .ok_or_else(|| HeliosError::config(format!("unknown vehicle '{}'", name)))
    }

    pub fn tariff(&self, name: &str) -> Result<Arc<SimTariff>> {
        self.tariffs
            .get(name)
            .cloned()
            .ok_or_else(|| HeliosError::config(format!("unknown tariff '{}'", name)))
    }
}
