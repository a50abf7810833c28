//! Configuration management for Helios
//!
//! This module handles loading, validation, and normalization of the
//! application configuration from YAML files.

use crate::api::{ActionConfig, ChargeMode, ChargeStatus};
use crate::error::{HeliosError, Result};
use crate::logging::StructuredLogger;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

mod defaults;

/// Minimum vehicle poll interval before a warning is logged
pub const MIN_POLL_INTERVAL_SECONDS: u64 = 60 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site-wide settings
    pub site: SiteConfig,

    /// Charge points
    pub loadpoints: Vec<LoadPointConfig>,

    /// Retry behavior
    pub controls: ControlsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Simulated devices referenced by name
    pub devices: DevicesConfig,
}

/// Site power balance inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub title: String,

    /// Control loop interval in milliseconds
    pub poll_interval_ms: u64,

    /// Power added to the measured balance in W, positive keeps a reserve
    pub residual_power: f64,

    /// Battery SoC above which the battery may support charging, 0 disables
    pub buffer_soc: f64,

    /// Grid meter reference
    pub grid_meter: String,

    /// Home battery meter reference
    pub battery_meter: Option<String>,

    /// Cheap tariff reference
    pub tariff: Option<String>,
}

/// Retry settings for meter reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Max attempts per meter read
    pub meter_retry_attempts: u32,

    /// Delay between attempts in milliseconds
    pub meter_retry_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console level override
    pub console_level: Option<String>,

    /// Optional file level override
    pub file_level: Option<String>,

    /// Log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Hysteresis parameters for PV enable/disable
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub delay_seconds: u64,

    /// Site power threshold in W
    pub threshold: f64,
}

impl ThresholdConfig {
    pub fn delay(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.delay_seconds).unwrap_or(i64::MAX / 1000))
    }
}

/// Vehicle polling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Poll only while charging
    Charging,
    /// Poll while connected, honouring the interval
    Connected,
    /// Poll always, honouring the interval
    Always,
}

impl PollMode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "charging" => Some(PollMode::Charging),
            "connected" => Some(PollMode::Connected),
            "always" => Some(PollMode::Always),
            _ => None,
        }
    }
}

/// Vehicle polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// charging, connected or always
    pub mode: String,
    pub interval_seconds: u64,
}

/// SoC limits and polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocConfig {
    pub poll: PollConfig,

    /// Estimate SoC between vehicle readings
    pub estimate: bool,

    /// Charge at max power below this SoC
    pub min: u8,

    /// Stop charging at this SoC
    pub target: u8,
}

/// A charge point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPointConfig {
    pub title: String,

    /// Charger reference
    pub charger: String,

    /// Optional charge meter reference
    pub meter: Option<String>,

    /// Single vehicle reference
    pub vehicle: Option<String>,

    /// Multiple vehicle references
    pub vehicles: Vec<String>,

    pub mode: ChargeMode,

    /// Connected phases, 0 for auto on switchable chargers
    pub phases: u8,

    pub min_current: f64,
    pub max_current: f64,

    /// Minimum time between charger enable/disable
    pub guard_duration_seconds: u64,

    /// Restore the configured defaults when the vehicle disconnects
    pub reset_on_disconnect: bool,

    pub soc: SocConfig,
    pub enable: ThresholdConfig,
    pub disable: ThresholdConfig,
}

/// Simulated devices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub chargers: HashMap<String, SimChargerConfig>,
    pub meters: HashMap<String, SimMeterConfig>,
    pub vehicles: HashMap<String, SimVehicleConfig>,
    pub tariffs: HashMap<String, SimTariffConfig>,
}

/// Simulated charger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimChargerConfig {
    /// Initial status
    pub status: ChargeStatus,

    /// Supports 1p/3p switching
    pub switchable: bool,

    /// Supports fractional currents
    pub millis: bool,

    /// Has an integrated meter
    pub meter: bool,

    /// Identifier reported for the connected vehicle
    pub identify: Option<String>,
}

/// Simulated meter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimMeterConfig {
    /// Initial power in W
    pub power: f64,

    /// Battery SoC for battery meters
    pub soc: Option<f64>,
}

/// Simulated vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimVehicleConfig {
    pub title: String,

    /// Capacity in kWh
    pub capacity: f64,
    pub phases: u8,
    pub soc: f64,
    pub range: Option<i64>,
    pub identifiers: Vec<String>,

    /// Reports its own charge state
    pub charge_state: bool,
    pub on_identify: ActionConfig,
}

/// Simulated tariff
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimTariffConfig {
    pub cheap: bool,
}

impl LoadPointConfig {
    /// Vehicle references in configuration order
    pub fn vehicle_refs(&self) -> Vec<String> {
        match &self.vehicle {
            Some(v) => vec![v.clone()],
            None => self.vehicles.clone(),
        }
    }

    /// Poll mode after normalization
    pub fn poll_mode(&self) -> PollMode {
        PollMode::parse(&self.soc.poll.mode).unwrap_or(PollMode::Connected)
    }

    /// Apply construction-time corrections, logging what was changed
    pub fn normalize(&mut self, switchable: bool, logger: &StructuredLogger) {
        match PollMode::parse(&self.soc.poll.mode) {
            Some(PollMode::Charging) => {}
            Some(mode @ (PollMode::Connected | PollMode::Always)) => {
                logger.warn(&format!(
                    "poll mode '{:?}' may deplete your battery or lead to API misuse",
                    mode
                ));
            }
            None => {
                if !self.soc.poll.mode.is_empty() {
                    logger.warn(&format!("invalid poll mode: {}", self.soc.poll.mode));
                }
            }
        }
        self.soc.poll.mode = format!("{:?}", self.poll_mode()).to_lowercase();

        if self.soc.poll.interval_seconds < MIN_POLL_INTERVAL_SECONDS {
            if self.soc.poll.interval_seconds == 0 {
                self.soc.poll.interval_seconds = MIN_POLL_INTERVAL_SECONDS;
            } else {
                logger.warn(&format!(
                    "poll interval '{}s' is lower than {}s and may deplete your battery or lead to API misuse",
                    self.soc.poll.interval_seconds, MIN_POLL_INTERVAL_SECONDS
                ));
            }
        }

        if self.min_current == 0.0 {
            logger.warn("min_current must not be zero");
        }

        if self.max_current <= self.min_current {
            logger.warn("max_current must be larger than min_current");
        }

        if switchable && self.phases != 0 {
            logger.warn(&format!(
                "ignoring phases config ({}p) for switchable charger",
                self.phases
            ));
            self.phases = 0;
        }

        if self.enable.threshold > self.disable.threshold {
            logger.warn(&format!(
                "PV mode enable threshold ({:.0}W) is larger than disable threshold ({:.0}W)",
                self.enable.threshold, self.disable.threshold
            ));
        } else if self.enable.threshold > 0.0 {
            logger.warn(&format!(
                "PV mode enable threshold {:.0}W > 0 will start PV charging on grid power consumption. Did you mean -{:.0}?",
                self.enable.threshold, self.enable.threshold
            ));
        }
    }

    /// Settings restored on disconnect
    pub fn defaults_action(&self) -> ActionConfig {
        ActionConfig {
            mode: Some(self.mode),
            min_current: Some(self.min_current),
            max_current: Some(self.max_current),
            min_soc: Some(self.soc.min),
            target_soc: Some(self.soc.target),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = ["helios.yaml", "/data/helios.yaml", "/etc/helios/config.yaml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.site.poll_interval_ms == 0 {
            return Err(HeliosError::validation(
                "site.poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        if !self.devices.meters.contains_key(&self.site.grid_meter) {
            return Err(HeliosError::validation(
                "site.grid_meter".to_string(),
                format!("unknown meter '{}'", self.site.grid_meter),
            ));
        }

        if let Some(battery) = &self.site.battery_meter
            && !self.devices.meters.contains_key(battery)
        {
            return Err(HeliosError::validation(
                "site.battery_meter".to_string(),
                format!("unknown meter '{}'", battery),
            ));
        }

        if let Some(tariff) = &self.site.tariff
            && !self.devices.tariffs.contains_key(tariff)
        {
            return Err(HeliosError::validation(
                "site.tariff".to_string(),
                format!("unknown tariff '{}'", tariff),
            ));
        }

        for (i, lp) in self.loadpoints.iter().enumerate() {
            self.validate_loadpoint(i, lp)?;
        }

        Ok(())
    }

    fn validate_loadpoint(&self, index: usize, lp: &LoadPointConfig) -> Result<()> {
        let field = |name: &str| format!("loadpoints[{}].{}", index, name);

        if lp.charger.is_empty() {
            return Err(HeliosError::validation(
                field("charger"),
                "missing charger".to_string(),
            ));
        }
        if !self.devices.chargers.contains_key(&lp.charger) {
            return Err(HeliosError::validation(
                field("charger"),
                format!("unknown charger '{}'", lp.charger),
            ));
        }

        if let Some(meter) = &lp.meter
            && !self.devices.meters.contains_key(meter)
        {
            return Err(HeliosError::validation(
                field("meter"),
                format!("unknown meter '{}'", meter),
            ));
        }

        if lp.vehicle.is_some() && !lp.vehicles.is_empty() {
            return Err(HeliosError::validation(
                field("vehicle"),
                "cannot have vehicle and vehicles both".to_string(),
            ));
        }

        for v in lp.vehicle_refs() {
            if !self.devices.vehicles.contains_key(&v) {
                return Err(HeliosError::validation(
                    field("vehicles"),
                    format!("unknown vehicle '{}'", v),
                ));
            }
        }

        if !matches!(lp.phases, 0 | 1 | 3) {
            return Err(HeliosError::validation(
                field("phases"),
                format!("invalid number of phases: {}", lp.phases),
            ));
        }

        if lp.soc.min > 100 || lp.soc.target > 100 {
            return Err(HeliosError::validation(
                field("soc"),
                "SoC limits must be within 0..=100".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::get_logger;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site.poll_interval_ms, 10_000);
        assert_eq!(config.loadpoints.len(), 1);
        assert_eq!(config.loadpoints[0].min_current, 6.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.loadpoints[0].charger = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.loadpoints[0].vehicle = Some("ev".into());
        config.loadpoints[0].vehicles = vec!["ev".into()];
        assert!(config.validate().is_err());

        config = Config::default();
        config.site.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.site.grid_meter = "missing".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_corrections() {
        let log = get_logger("config");
        let mut lp = LoadPointConfig {
            phases: 3,
            ..LoadPointConfig::default()
        };
        lp.soc.poll.mode = "bogus".into();
        lp.soc.poll.interval_seconds = 0;

        lp.normalize(true, &log);
        assert_eq!(lp.poll_mode(), PollMode::Connected);
        assert_eq!(lp.soc.poll.mode, "connected");
        assert_eq!(lp.soc.poll.interval_seconds, MIN_POLL_INTERVAL_SECONDS);
        assert_eq!(lp.phases, 0);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.loadpoints[0].title, deserialized.loadpoints[0].title);
    }
}
