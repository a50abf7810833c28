use super::{LoadPointCommand, LoadPointState, SharedState};
use crate::api::{ChargeMode, ChargeStatus, RemoteDemand, VOLTAGE};
use crate::error::{HeliosError, Result};
use crate::publish::Publisher;
use crate::site::SiteCommand;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

/// Cloneable access to a loadpoint running inside the site task.
///
/// Reads come from the shared state and never wait for a control tick.
/// Writes are queued and applied between ticks.
#[derive(Clone)]
pub struct LoadPointHandle {
    index: usize,
    switchable: bool,
    state: SharedState,
    publisher: Publisher,
    commands: mpsc::UnboundedSender<SiteCommand>,
}

impl LoadPointHandle {
    pub(crate) fn new(
        index: usize,
        switchable: bool,
        state: SharedState,
        publisher: Publisher,
        commands: mpsc::UnboundedSender<SiteCommand>,
    ) -> Self {
        Self {
            index,
            switchable,
            state,
            publisher,
            commands,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn snapshot(&self) -> LoadPointState {
        self.state.snapshot()
    }

    /// Last published value of `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.publisher.get(key)
    }

    pub fn title(&self) -> String {
        self.state.read(|s| s.title.clone())
    }

    pub fn status(&self) -> ChargeStatus {
        self.state.read(|s| s.status)
    }

    pub fn mode(&self) -> ChargeMode {
        self.state.read(|s| s.mode)
    }

    pub fn target_soc(&self) -> u8 {
        self.state.read(|s| s.target_soc)
    }

    pub fn min_soc(&self) -> u8 {
        self.state.read(|s| s.min_soc)
    }

    pub fn target_time(&self) -> Option<DateTime<Utc>> {
        self.state.read(|s| s.target_time)
    }

    pub fn phases(&self) -> u8 {
        self.state.read(|s| s.phases)
    }

    pub fn active_phases(&self) -> u8 {
        self.state.read(|s| s.active_phases())
    }

    pub fn max_active_phases(&self) -> u8 {
        self.state.read(|s| s.max_active_phases(self.switchable))
    }

    pub fn min_current(&self) -> f64 {
        self.state.read(|s| s.min_current)
    }

    pub fn max_current(&self) -> f64 {
        self.state.read(|s| s.max_current)
    }

    pub fn charge_power(&self) -> f64 {
        self.state.read(|s| s.charge_power)
    }

    /// Single phase power at min current
    pub fn min_power(&self) -> f64 {
        self.min_current() * VOLTAGE
    }

    /// Power at max current and active phases
    pub fn max_power(&self) -> f64 {
        self.state
            .read(|s| s.max_current * f64::from(s.active_phases()) * VOLTAGE)
    }

    pub fn enabled(&self) -> bool {
        self.state.read(|s| s.enabled)
    }

    pub fn remote_demand(&self) -> RemoteDemand {
        self.state.read(|s| s.remote_demand)
    }

    /// Queue a command for the next gap between ticks
    pub fn send(&self, command: LoadPointCommand) -> Result<()> {
        self.commands
            .send(SiteCommand {
                loadpoint: self.index,
                command,
            })
            .map_err(|_| HeliosError::generic("site is not running"))
    }

    pub fn set_mode(&self, mode: ChargeMode) -> Result<()> {
        self.send(LoadPointCommand::SetMode(mode))
    }

    pub fn set_target_soc(&self, soc: u8) -> Result<()> {
        self.send(LoadPointCommand::SetTargetSoc(soc))
    }

    pub fn set_min_soc(&self, soc: u8) -> Result<()> {
        self.send(LoadPointCommand::SetMinSoc(soc))
    }

    pub fn set_min_current(&self, current: f64) -> Result<()> {
        self.send(LoadPointCommand::SetMinCurrent(current))
    }

    pub fn set_max_current(&self, current: f64) -> Result<()> {
        self.send(LoadPointCommand::SetMaxCurrent(current))
    }

    pub fn set_phases(&self, phases: u8) -> Result<()> {
        self.send(LoadPointCommand::SetPhases(phases))
    }

    pub fn set_target_charge(&self, time: Option<DateTime<Utc>>, soc: u8) -> Result<()> {
        self.send(LoadPointCommand::SetTargetCharge { time, soc })
    }

    pub fn remote_control(&self, source: &str, demand: RemoteDemand) -> Result<()> {
        self.send(LoadPointCommand::RemoteControl {
            source: source.to_string(),
            demand,
        })
    }

    pub fn set_vehicle(&self, title: Option<&str>) -> Result<()> {
        self.send(LoadPointCommand::SetVehicle(title.map(str::to_string)))
    }
}
