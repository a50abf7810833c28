//! Device capability interfaces
//!
//! Chargers, meters and vehicles are consumed only through these traits. A
//! charger exposes its optional capabilities through [`ChargerCapabilities`];
//! capabilities a device lacks are synthesized by the `wrapper` module.

use crate::error::Result;
use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Nominal grid voltage used for power/current conversion
pub const VOLTAGE: f64 = 230.0;

/// Convert power to current for the given number of phases
pub fn power_to_current(power: f64, phases: u8) -> f64 {
    power / (VOLTAGE * f64::from(phases))
}

/// Charge status as reported by the charger (IEC 61851)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChargeStatus {
    /// Not yet read
    #[default]
    #[serde(rename = "")]
    None,
    /// No vehicle
    A,
    /// Vehicle connected, not charging
    B,
    /// Charging
    C,
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChargeStatus::None => "",
            ChargeStatus::A => "A",
            ChargeStatus::B => "B",
            ChargeStatus::C => "C",
        };
        f.write_str(s)
    }
}

/// Loadpoint charge mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeMode {
    #[default]
    Off,
    Now,
    #[serde(rename = "minpv")]
    MinPv,
    Pv,
}

impl fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChargeMode::Off => "off",
            ChargeMode::Now => "now",
            ChargeMode::MinPv => "minpv",
            ChargeMode::Pv => "pv",
        };
        f.write_str(s)
    }
}

/// Externally requested enable state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteDemand {
    #[default]
    #[serde(rename = "")]
    Enable,
    /// Disable PV charging only
    #[serde(rename = "soft")]
    SoftDisable,
    /// Disable any charging
    #[serde(rename = "hard")]
    HardDisable,
}

/// Settings applied on events such as vehicle identification or disconnect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub mode: Option<ChargeMode>,
    pub min_current: Option<f64>,
    pub max_current: Option<f64>,
    pub min_soc: Option<u8>,
    pub target_soc: Option<u8>,
}

/// Vehicle climate control reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimaterStatus {
    pub active: bool,
    pub outside_temp: f64,
    pub target_temp: f64,
}

impl ClimaterStatus {
    /// Published label: off, on, heating or cooling
    pub fn label(&self) -> &'static str {
        if !self.active {
            "off"
        } else if self.outside_temp < self.target_temp {
            "heating"
        } else if self.outside_temp > self.target_temp {
            "cooling"
        } else {
            "on"
        }
    }
}

/// Basic charger control, required for every loadpoint
#[async_trait]
pub trait Charger: Send + Sync {
    async fn status(&self) -> Result<ChargeStatus>;
    async fn enabled(&self) -> Result<bool>;
    async fn enable(&self, enable: bool) -> Result<()>;
    async fn max_current(&self, current: i64) -> Result<()>;
}

/// Fine-grained current control
#[async_trait]
pub trait ChargerEx: Send + Sync {
    async fn max_current_millis(&self, current: f64) -> Result<()>;
}

/// 1p/3p switching
#[async_trait]
pub trait ChargePhases: Send + Sync {
    async fn phases_1p3p(&self, phases: u8) -> Result<()>;
}

/// Power reading in W
#[async_trait]
pub trait Meter: Send + Sync {
    async fn current_power(&self) -> Result<f64>;
}

/// Energy counter in kWh
#[async_trait]
pub trait MeterEnergy: Send + Sync {
    async fn total_energy(&self) -> Result<f64>;
}

/// Per-phase currents in A
#[async_trait]
pub trait MeterCurrent: Send + Sync {
    async fn currents(&self) -> Result<(f64, f64, f64)>;
}

/// Vehicle identification by the charger (RFID, ISO 15118, ...)
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self) -> Result<String>;
}

/// Wake-up of a sleeping vehicle or charger
#[async_trait]
pub trait AlarmClock: Send + Sync {
    async fn wake_up(&self) -> Result<()>;
}

/// State of charge in %
#[async_trait]
pub trait Battery: Send + Sync {
    async fn soc(&self) -> Result<f64>;
}

/// Energy charged in the current session in kWh
#[async_trait]
pub trait ChargeRater: Send + Sync {
    async fn charged_energy(&self) -> Result<f64>;
}

/// Charging time of the current session
#[async_trait]
pub trait ChargeTimer: Send + Sync {
    async fn charging_time(&self) -> Result<TimeDelta>;
}

/// Cheap grid tariff signal
#[async_trait]
pub trait Tariff: Send + Sync {
    async fn is_cheap(&self) -> Result<bool>;
}

/// Remaining vehicle range in km
#[async_trait]
pub trait VehicleRange: Send + Sync {
    async fn range(&self) -> Result<i64>;
}

/// Vehicle odometer in km
#[async_trait]
pub trait VehicleOdometer: Send + Sync {
    async fn odometer(&self) -> Result<f64>;
}

/// Vehicle climate control
#[async_trait]
pub trait VehicleClimater: Send + Sync {
    async fn climater(&self) -> Result<ClimaterStatus>;
}

/// Charge status as reported by the vehicle
#[async_trait]
pub trait ChargeState: Send + Sync {
    async fn status(&self) -> Result<ChargeStatus>;
}

/// A vehicle that may be charged at a loadpoint
#[async_trait]
pub trait Vehicle: Send + Sync {
    fn title(&self) -> String;

    /// Battery capacity in kWh
    fn capacity(&self) -> f64;

    /// Phases the on-board charger uses, 0 if unknown
    fn phases(&self) -> u8 {
        0
    }

    /// Identifiers, `*` matches any sequence of characters
    fn identifiers(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_identified(&self) -> ActionConfig {
        ActionConfig::default()
    }

    async fn soc(&self) -> Result<f64>;

    fn as_range(&self) -> Option<&dyn VehicleRange> {
        None
    }

    fn as_odometer(&self) -> Option<&dyn VehicleOdometer> {
        None
    }

    fn as_climater(&self) -> Option<&dyn VehicleClimater> {
        None
    }

    fn as_charge_state(&self) -> Option<&dyn ChargeState> {
        None
    }

    fn as_alarm_clock(&self) -> Option<&dyn AlarmClock> {
        None
    }
}

/// True if both handles point to the same vehicle instance
pub fn same_vehicle(a: &Arc<dyn Vehicle>, b: &Arc<dyn Vehicle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A meter and the optional capabilities it offers
#[derive(Clone)]
pub struct MeterCapabilities {
    pub meter: Arc<dyn Meter>,
    pub energy: Option<Arc<dyn MeterEnergy>>,
    pub currents: Option<Arc<dyn MeterCurrent>>,
}

impl MeterCapabilities {
    pub fn new(meter: Arc<dyn Meter>) -> Self {
        Self {
            meter,
            energy: None,
            currents: None,
        }
    }

    pub fn with_energy(mut self, energy: Arc<dyn MeterEnergy>) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn with_currents(mut self, currents: Arc<dyn MeterCurrent>) -> Self {
        self.currents = Some(currents);
        self
    }
}

/// A charger and the optional capabilities it offers
#[derive(Clone)]
pub struct ChargerCapabilities {
    pub charger: Arc<dyn Charger>,
    pub ex: Option<Arc<dyn ChargerEx>>,
    pub phases: Option<Arc<dyn ChargePhases>>,
    pub meter: Option<MeterCapabilities>,
    pub identifier: Option<Arc<dyn Identifier>>,
    pub alarm_clock: Option<Arc<dyn AlarmClock>>,
    pub battery: Option<Arc<dyn Battery>>,
    pub rater: Option<Arc<dyn ChargeRater>>,
    pub timer: Option<Arc<dyn ChargeTimer>>,
}

impl ChargerCapabilities {
    pub fn new(charger: Arc<dyn Charger>) -> Self {
        Self {
            charger,
            ex: None,
            phases: None,
            meter: None,
            identifier: None,
            alarm_clock: None,
            battery: None,
            rater: None,
            timer: None,
        }
    }

    pub fn with_ex(mut self, ex: Arc<dyn ChargerEx>) -> Self {
        self.ex = Some(ex);
        self
    }

    pub fn with_phases(mut self, phases: Arc<dyn ChargePhases>) -> Self {
        self.phases = Some(phases);
        self
    }

    pub fn with_meter(mut self, meter: MeterCapabilities) -> Self {
        self.meter = Some(meter);
        self
    }

    pub fn with_identifier(mut self, identifier: Arc<dyn Identifier>) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_alarm_clock(mut self, alarm_clock: Arc<dyn AlarmClock>) -> Self {
        self.alarm_clock = Some(alarm_clock);
        self
    }

    pub fn with_battery(mut self, battery: Arc<dyn Battery>) -> Self {
        self.battery = Some(battery);
        self
    }

    pub fn with_rater(mut self, rater: Arc<dyn ChargeRater>) -> Self {
        self.rater = Some(rater);
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn ChargeTimer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Whether the charger can switch between 1p and 3p
    pub fn is_switchable(&self) -> bool {
        self.phases.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_to_current_uses_phases() {
        assert!((power_to_current(6.0 * VOLTAGE, 1) - 6.0).abs() < 1e-9);
        assert!((power_to_current(3.0 * 6.0 * VOLTAGE, 3) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn climater_labels() {
        let mut c = ClimaterStatus {
            active: false,
            outside_temp: 5.0,
            target_temp: 21.0,
        };
        assert_eq!(c.label(), "off");
        c.active = true;
        assert_eq!(c.label(), "heating");
        c.outside_temp = 30.0;
        assert_eq!(c.label(), "cooling");
        c.outside_temp = 21.0;
        assert_eq!(c.label(), "on");
    }

    #[test]
    fn mode_serde_names() {
        let m: ChargeMode = serde_yaml::from_str("minpv").unwrap();
        assert_eq!(m, ChargeMode::MinPv);
        assert_eq!(ChargeMode::Pv.to_string(), "pv");
        let d: RemoteDemand = serde_yaml::from_str("hard").unwrap();
        assert_eq!(d, RemoteDemand::HardDisable);
    }
}
