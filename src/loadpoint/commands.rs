use super::LoadPoint;
use crate::api::{ChargeMode, RemoteDemand};
use crate::error::{HeliosError, Result};
use chrono::{DateTime, Utc};

/// Commands accepted by a loadpoint from external components
#[derive(Debug, Clone, PartialEq)]
pub enum LoadPointCommand {
    SetMode(ChargeMode),
    SetTargetSoc(u8),
    SetMinSoc(u8),
    SetMinCurrent(f64),
    SetMaxCurrent(f64),
    /// 1, 3 or 0 for automatic
    SetPhases(u8),
    /// Reach `soc` by `time`, `None` clears the target time
    SetTargetCharge {
        time: Option<DateTime<Utc>>,
        soc: u8,
    },
    RemoteControl {
        source: String,
        demand: RemoteDemand,
    },
    /// Select a vehicle by title, `None` detaches
    SetVehicle(Option<String>),
}

fn validate_soc(field: &str, soc: u8) -> Result<()> {
    if soc > 100 {
        return Err(HeliosError::validation(
            field.to_string(),
            format!("SoC out of range: {}", soc),
        ));
    }
    Ok(())
}

impl LoadPoint {
    pub async fn handle_command(&mut self, cmd: LoadPointCommand) -> Result<()> {
        match cmd {
            LoadPointCommand::SetMode(mode) => self.set_mode(mode),
            LoadPointCommand::SetTargetSoc(soc) => {
                validate_soc("targetSoC", soc)?;
                self.set_target_soc(soc);
            }
            LoadPointCommand::SetMinSoc(soc) => {
                validate_soc("minSoC", soc)?;
                self.set_min_soc(soc);
            }
            LoadPointCommand::SetMinCurrent(current) => {
                if current <= 0.0 {
                    return Err(HeliosError::validation(
                        "minCurrent".to_string(),
                        format!("must be positive, got {}", current),
                    ));
                }
                self.set_min_current(current);
            }
            LoadPointCommand::SetMaxCurrent(current) => {
                let min_current = self.state.read(|s| s.min_current);
                if current < min_current {
                    return Err(HeliosError::validation(
                        "maxCurrent".to_string(),
                        format!("{} is below min current {}", current, min_current),
                    ));
                }
                self.set_max_current(current);
            }
            LoadPointCommand::SetPhases(phases) => self.set_phases_command(phases).await?,
            LoadPointCommand::SetTargetCharge { time, soc } => {
                validate_soc("targetSoC", soc)?;
                self.set_target_charge(time, soc);
            }
            LoadPointCommand::RemoteControl { source, demand } => {
                self.remote_control(&source, demand)
            }
            LoadPointCommand::SetVehicle(title) => self.set_vehicle(title.as_deref()).await?,
        }
        Ok(())
    }

    pub fn set_mode(&mut self, mode: ChargeMode) {
        self.logger.info(&format!("set charge mode: {}", mode));

        if self.state.read(|s| s.mode) != mode {
            self.state.update(|s| s.mode = mode);
            self.publisher.publish("mode", mode);

            // immediately allow pv mode activity
            self.elapse_pv_timer();
        }
    }

    pub fn set_target_soc(&mut self, soc: u8) {
        self.logger.info(&format!("set target soc: {}", soc));

        if self.state.read(|s| s.target_soc) != soc {
            self.state.update(|s| s.target_soc = soc);
            self.publisher.publish("targetSoC", soc);
        }
    }

    pub fn set_min_soc(&mut self, soc: u8) {
        self.logger.info(&format!("set min soc: {}", soc));

        if self.state.read(|s| s.min_soc) != soc {
            self.state.update(|s| s.min_soc = soc);
            self.publisher.publish("minSoC", soc);
        }
    }

    pub fn set_min_current(&mut self, current: f64) {
        self.logger.info(&format!("set min current: {:.3}A", current));

        if self.state.read(|s| s.min_current) != current {
            self.state.update(|s| s.min_current = current);
            self.publisher.publish("minCurrent", current);
        }
    }

    pub fn set_max_current(&mut self, current: f64) {
        self.logger.info(&format!("set max current: {:.3}A", current));

        if self.state.read(|s| s.max_current) != current {
            self.state.update(|s| s.max_current = current);
            self.publisher.publish("maxCurrent", current);
        }
    }

    /// Set the phase count, switching the charger if it supports it
    pub async fn set_phases_command(&mut self, phases: u8) -> Result<()> {
        if !matches!(phases, 0 | 1 | 3) {
            return Err(HeliosError::validation(
                "phases".to_string(),
                format!("invalid number of phases: {}", phases),
            ));
        }

        if self.charger.is_switchable() && phases != 0 {
            return self.scale_phases(phases).await;
        }

        self.set_phases(phases);
        Ok(())
    }

    /// Set the target SoC and the time it should be reached
    pub fn set_target_charge(&mut self, time: Option<DateTime<Utc>>, soc: u8) {
        self.logger.debug(&format!(
            "set target charge: {}% @ {}",
            soc,
            time.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
        ));

        self.state.update(|s| s.target_time = time);
        self.planner.set(time);
        self.set_target_soc(soc);
    }

    pub fn remote_control(&mut self, source: &str, demand: RemoteDemand) {
        self.logger.debug(&format!("remote demand: {:?} ({})", demand, source));

        let changed = self.state.update(|s| {
            let changed = s.remote_demand != demand;
            s.remote_demand = demand;
            s.remote_source = source.to_string();
            changed
        });

        if changed {
            self.publisher.publish("remoteDisabled", demand);
            self.publisher.publish("remoteDisabledSource", source);
        }
    }

    /// Select the active vehicle by title
    pub async fn set_vehicle(&mut self, title: Option<&str>) -> Result<()> {
        let vehicle = match title {
            Some(title) => Some(
                self.vehicles
                    .iter()
                    .find(|v| v.title() == title)
                    .cloned()
                    .ok_or_else(|| HeliosError::vehicle(format!("unknown vehicle: {}", title)))?,
            ),
            None => None,
        };

        self.set_active_vehicle(vehicle).await;
        Ok(())
    }
}
