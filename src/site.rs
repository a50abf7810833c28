//! Site control loop
//!
//! The site owns every loadpoint and the meters that make up the power
//! balance. Each tick reads grid and battery power, derives the site power
//! and lets the loadpoints decide their charge currents in order. Commands
//! from [`LoadPointHandle`]s are applied between ticks.

use crate::api::{Battery, ChargerCapabilities, Meter, MeterCapabilities, Tariff, Vehicle};
use crate::cache::ApiCache;
use crate::clock::Clock;
use crate::config::{Config, SiteConfig};
use crate::coordinator::Coordinator;
use crate::error::{HeliosError, Result};
use crate::loadpoint::{LoadPoint, LoadPointCommand, LoadPointHandle, Services};
use crate::logging::{StructuredLogger, get_logger};
use crate::publish::Publisher;
use crate::retry::RetryPolicy;
use crate::sim::SimDevices;
use crate::soc::default_factory;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};

/// A command addressed to one loadpoint
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCommand {
    pub loadpoint: usize,
    pub command: LoadPointCommand,
}

/// Home battery, metered and reporting its SoC
#[derive(Clone)]
pub struct SiteBattery {
    pub meter: Arc<dyn Meter>,
    pub soc: Arc<dyn Battery>,
}

/// Power balance inputs of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SitePower {
    pub grid_power: f64,
    pub battery_power: f64,
    pub battery_soc: Option<f64>,
    /// Grid plus battery plus residual power, negative is surplus
    pub site_power: f64,
    /// Battery may support charging
    pub battery_buffered: bool,
}

/// The site and its control loop
pub struct Site {
    config: SiteConfig,
    logger: StructuredLogger,
    publisher: Publisher,
    retry: RetryPolicy,
    coordinator: Arc<Coordinator>,

    grid_meter: Arc<dyn Meter>,
    battery: Option<SiteBattery>,
    tariff: Option<Arc<dyn Tariff>>,
    loadpoints: Vec<LoadPoint>,

    commands_tx: mpsc::UnboundedSender<SiteCommand>,
    commands_rx: mpsc::UnboundedReceiver<SiteCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

impl Site {
    pub fn new(
        config: SiteConfig,
        grid_meter: Arc<dyn Meter>,
        publisher: Publisher,
        retry: RetryPolicy,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        Self {
            config,
            logger: get_logger("site"),
            publisher,
            retry,
            coordinator,
            grid_meter,
            battery: None,
            tariff: None,
            loadpoints: Vec::new(),
            commands_tx,
            commands_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn with_battery(mut self, battery: SiteBattery) -> Self {
        self.battery = Some(battery);
        self
    }

    pub fn with_tariff(mut self, tariff: Arc<dyn Tariff>) -> Self {
        self.tariff = Some(tariff);
        self
    }

    /// Add a loadpoint; its index must match its position
    pub fn add_loadpoint(&mut self, loadpoint: LoadPoint) -> Result<()> {
        if loadpoint.index() != self.loadpoints.len() {
            return Err(HeliosError::config(format!(
                "loadpoint '{}' has index {}, expected {}",
                loadpoint.title(),
                loadpoint.index(),
                self.loadpoints.len()
            )));
        }
        self.loadpoints.push(loadpoint);
        Ok(())
    }

    /// Build a site from the configuration using simulated devices
    pub fn from_config(
        config: &Config,
        devices: &SimDevices,
        clock: Arc<dyn Clock>,
        cache: Arc<ApiCache>,
    ) -> Result<Self> {
        config.validate()?;

        let publisher = Publisher::new();
        let retry = RetryPolicy::from_config(&config.controls);
        let coordinator = Arc::new(Coordinator::new());

        let grid: Arc<dyn Meter> = devices.meter(&config.site.grid_meter)?;
        let mut site = Site::new(
            config.site.clone(),
            grid,
            publisher.clone(),
            retry,
            coordinator.clone(),
        );

        if let Some(name) = &config.site.battery_meter {
            let battery = devices.meter(name)?;
            site = site.with_battery(SiteBattery {
                meter: battery.clone(),
                soc: battery,
            });
        }

        if let Some(name) = &config.site.tariff {
            site = site.with_tariff(devices.tariff(name)?);
        }

        let services = Services {
            clock,
            publisher,
            cache,
            coordinator,
            retry,
            estimator_factory: default_factory(),
        };

        for (index, lp_config) in config.loadpoints.iter().enumerate() {
            let charger: ChargerCapabilities = devices.charger(&lp_config.charger)?.capabilities();

            let mut lp_config = lp_config.clone();
            let logger = get_logger("config");
            lp_config.normalize(charger.is_switchable(), &logger);

            let meter = match &lp_config.meter {
                Some(name) => {
                    let meter: Arc<dyn Meter> = devices.meter(name)?;
                    Some(MeterCapabilities::new(meter))
                }
                None => None,
            };

            let vehicles = lp_config
                .vehicle_refs()
                .iter()
                .map(|name| devices.vehicle(name).map(|v| v as Arc<dyn Vehicle>))
                .collect::<Result<Vec<_>>>()?;

            let loadpoint =
                LoadPoint::new(index, &lp_config, charger, meter, vehicles, services.clone())?;
            site.add_loadpoint(loadpoint)?;
        }

        Ok(site)
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn loadpoints(&self) -> &[LoadPoint] {
        &self.loadpoints
    }

    pub fn loadpoint_mut(&mut self, index: usize) -> Option<&mut LoadPoint> {
        self.loadpoints.get_mut(index)
    }

    /// Handles for external readers and writers
    pub fn handles(&self) -> Vec<LoadPointHandle> {
        self.loadpoints
            .iter()
            .map(|lp| {
                LoadPointHandle::new(
                    lp.index(),
                    lp.is_switchable(),
                    lp.state(),
                    lp.publisher().clone(),
                    self.commands_tx.clone(),
                )
            })
            .collect()
    }

    /// Sender that stops [`Site::run`]
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Publish initial values and prepare all loadpoints
    pub async fn prepare(&mut self) {
        self.publisher.publish("siteTitle", &self.config.title);
        self.publisher.publish("residualPower", self.config.residual_power);
        self.publisher.publish("bufferSoC", self.config.buffer_soc);

        for lp in &mut self.loadpoints {
            lp.prepare().await;
        }
    }

    /// Read the meters and derive the power balance
    pub async fn site_power(&self) -> Result<SitePower> {
        let grid_power = self
            .retry
            .run(&self.logger, || self.grid_meter.current_power())
            .await
            .map_err(|e| HeliosError::meter(format!("grid power: {}", e)))?;
        self.publisher.publish("gridPower", grid_power);

        let mut battery_power = 0.0;
        let mut battery_soc = None;
        if let Some(battery) = &self.battery {
            match self
                .retry
                .run(&self.logger, || battery.meter.current_power())
                .await
            {
                Ok(power) => battery_power = power,
                Err(e) => self.logger.error(&format!("battery power: {}", e)),
            }
            self.publisher.publish("batteryPower", battery_power);

            match battery.soc.soc().await {
                Ok(soc) => {
                    battery_soc = Some(soc);
                    self.publisher.publish("batterySoC", soc);
                }
                Err(e) => self.logger.error(&format!("battery soc: {}", e)),
            }
        }

        let site_power = grid_power + battery_power + self.config.residual_power;
        self.publisher.publish("sitePower", site_power);

        let battery_buffered = self.config.buffer_soc > 0.0
            && battery_soc.is_some_and(|soc| soc > self.config.buffer_soc);

        self.logger.debug(&format!(
            "site power: {:.0}W (grid {:.0}W, battery {:.0}W)",
            site_power, grid_power, battery_power
        ));

        Ok(SitePower {
            grid_power,
            battery_power,
            battery_soc,
            site_power,
            battery_buffered,
        })
    }

    async fn cheap(&self) -> bool {
        let Some(tariff) = &self.tariff else {
            return false;
        };

        match tariff.is_cheap().await {
            Ok(cheap) => {
                self.publisher.publish("cheap", cheap);
                cheap
            }
            Err(e) => {
                self.logger.error(&format!("tariff: {}", e));
                false
            }
        }
    }

    /// Run one control tick for all loadpoints
    pub async fn update(&mut self) -> Result<()> {
        let power = self.site_power().await?;
        let cheap = self.cheap().await;

        for lp in &mut self.loadpoints {
            lp.update(power.site_power, cheap, power.battery_buffered)
                .await;
        }

        Ok(())
    }

    /// Apply a command to its loadpoint
    pub async fn handle_command(&mut self, cmd: SiteCommand) {
        let Some(lp) = self.loadpoints.get_mut(cmd.loadpoint) else {
            self.logger
                .warn(&format!("command for unknown loadpoint {}", cmd.loadpoint));
            return;
        };

        self.logger
            .debug(&format!("loadpoint {}: {:?}", cmd.loadpoint, cmd.command));
        if let Err(e) = lp.handle_command(cmd.command).await {
            self.logger.error(&format!("Command failed: {}", e));
        }
    }

    /// Run the control loop until a shutdown signal arrives
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info(&format!(
            "Starting site '{}' with {} loadpoint(s)",
            self.config.title,
            self.loadpoints.len()
        ));

        self.prepare().await;

        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.update().await {
                        // loadpoints keep their last limits
                        self.logger.error(&format!("Site update failed: {}", e));
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.logger.info("Site shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimMeterConfig;
    use crate::sim::SimMeter;

    fn site_with_battery(buffer_soc: f64, soc: Option<f64>) -> Site {
        let grid = Arc::new(SimMeter::new(&SimMeterConfig {
            power: -1500.0,
            soc: None,
        }));
        let battery = Arc::new(SimMeter::new(&SimMeterConfig { power: 500.0, soc }));
        let config = SiteConfig {
            residual_power: 100.0,
            buffer_soc,
            ..SiteConfig::default()
        };
        Site::new(
            config,
            grid,
            Publisher::new(),
            RetryPolicy::default(),
            Arc::new(Coordinator::new()),
        )
        .with_battery(SiteBattery {
            meter: battery.clone(),
            soc: battery,
        })
    }

    #[tokio::test]
    async fn site_power_sums_grid_battery_and_residual() {
        let site = site_with_battery(0.0, Some(90.0));
        let power = site.site_power().await.unwrap();

        assert_eq!(power.site_power, -1500.0 + 500.0 + 100.0);
        assert!(!power.battery_buffered);
        assert_eq!(site.publisher().get("sitePower"), Some(serde_json::json!(-900.0)));
        assert_eq!(site.publisher().get("batterySoC"), Some(serde_json::json!(90.0)));
    }

    #[tokio::test]
    async fn battery_buffered_above_buffer_soc() {
        assert!(site_with_battery(80.0, Some(90.0)).site_power().await.unwrap().battery_buffered);
        assert!(!site_with_battery(80.0, Some(70.0)).site_power().await.unwrap().battery_buffered);
        assert!(!site_with_battery(80.0, None).site_power().await.unwrap().battery_buffered);
    }

    #[tokio::test]
    async fn unknown_loadpoint_command_is_ignored() {
        let mut site = site_with_battery(0.0, None);
        site.handle_command(SiteCommand {
            loadpoint: 3,
            command: LoadPointCommand::SetTargetSoc(80),
        })
        .await;
        assert!(site.loadpoints().is_empty());
    }
}
