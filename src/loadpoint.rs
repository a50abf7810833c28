//! Loadpoint control
//!
//! A loadpoint couples one charger with its charge meter and the vehicles
//! that may connect to it. Each control tick reads the charger and meters,
//! publishes the results and decides the charge current from the site power
//! balance, the charge mode and the vehicle's state of charge.
//!
//! The loadpoint is owned by the site's control task. External readers use
//! the [`SharedState`] snapshot; external writers send a [`LoadPointCommand`].

use crate::api::{
    ActionConfig, ChargeMode, ChargeRater, ChargeStatus, ChargeTimer, ChargerCapabilities, Meter,
    MeterCapabilities, MeterCurrent, RemoteDemand, Vehicle,
};
use crate::cache::ApiCache;
use crate::clock::Clock;
use crate::config::{LoadPointConfig, PollMode, ThresholdConfig};
use crate::coordinator::Coordinator;
use crate::error::{HeliosError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::planner::{PlanContext, Planner};
use crate::publish::Publisher;
use crate::retry::RetryPolicy;
use crate::soc::{EstimatorFactory, SocEstimator};
use crate::wrapper;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

mod commands;
mod events;
mod handle;
mod limit;
mod pv;
mod state;
mod status;
mod timer;
mod vehicle;


pub use commands::LoadPointCommand;
pub use events::Event;
pub use handle::LoadPointHandle;
pub use state::{LoadPointState, SharedState, UNKNOWN_PHASES};
pub use timer::{Progress, WAKE_UP_TIMEOUT, WakeUpTimer};

/// Interval for re-reading vehicle status during detection
pub const VEHICLE_DETECT_INTERVAL: TimeDelta = TimeDelta::minutes(3);
/// Time after connect during which vehicles are probed
pub const VEHICLE_DETECT_DURATION: TimeDelta = TimeDelta::minutes(10);
/// Current above which a phase counts as active
pub const MIN_ACTIVE_CURRENT: f64 = 1.0;
/// SoC step for "soc" push notifications
pub const SOC_PROGRESS_STEP: f64 = 10.0;

/// PV enable/disable hysteresis timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PvTimer {
    #[default]
    Inactive,
    Running(DateTime<Utc>),
    /// Counts as infinitely elapsed so the next PV decision acts immediately
    Elapsed,
}

/// Site-wide services shared by all loadpoints
#[derive(Clone)]
pub struct Services {
    pub clock: Arc<dyn Clock>,
    pub publisher: Publisher,
    pub cache: Arc<ApiCache>,
    pub coordinator: Arc<Coordinator>,
    pub retry: RetryPolicy,
    pub estimator_factory: EstimatorFactory,
}

/// Static loadpoint settings
#[derive(Debug, Clone)]
pub struct LoadPointSettings {
    pub poll_mode: PollMode,
    pub poll_interval: TimeDelta,
    pub estimate: bool,
    pub enable: ThresholdConfig,
    pub disable: ThresholdConfig,
    pub guard_duration: TimeDelta,
    pub reset_on_disconnect: bool,
}

/// Charge meter, rater and timer, native or synthesized
struct ChargeMeters {
    meter: Arc<dyn Meter>,
    currents: Option<Arc<dyn MeterCurrent>>,
    rater: Arc<dyn ChargeRater>,
    timer: Arc<dyn ChargeTimer>,
    wrapped_meter: Option<Arc<wrapper::ChargeMeter>>,
    wrapped_rater: Option<Arc<wrapper::ChargeRater>>,
    wrapped_timer: Option<Arc<wrapper::ChargeTimer>>,
}

impl ChargeMeters {
    fn configure(
        charger: &ChargerCapabilities,
        meter: Option<MeterCapabilities>,
        clock: &Arc<dyn Clock>,
    ) -> Self {
        // rater and timer of the charger only apply when it also meters
        let integrated = meter.is_none();

        let mut wrapped_meter = None;
        let caps = match meter.or_else(|| charger.meter.clone()) {
            Some(caps) => caps,
            None => {
                let m = Arc::new(wrapper::ChargeMeter::new());
                wrapped_meter = Some(m.clone());
                MeterCapabilities::new(m)
            }
        };

        let mut wrapped_rater = None;
        let rater: Arc<dyn ChargeRater> = match charger.rater.clone() {
            Some(rater) if integrated => rater,
            _ => {
                let r = Arc::new(wrapper::ChargeRater::new(clock.clone(), caps.energy.clone()));
                wrapped_rater = Some(r.clone());
                r
            }
        };

        let mut wrapped_timer = None;
        let timer: Arc<dyn ChargeTimer> = match charger.timer.clone() {
            Some(timer) => timer,
            None => {
                let t = Arc::new(wrapper::ChargeTimer::new(clock.clone()));
                wrapped_timer = Some(t.clone());
                t
            }
        };

        Self {
            meter: caps.meter,
            currents: caps.currents,
            rater,
            timer,
            wrapped_meter,
            wrapped_rater,
            wrapped_timer,
        }
    }
}

/// A charge point
pub struct LoadPoint {
    index: usize,
    logger: StructuredLogger,
    clock: Arc<dyn Clock>,
    publisher: Publisher,
    cache: Arc<ApiCache>,
    coordinator: Arc<Coordinator>,
    retry: RetryPolicy,
    estimator_factory: EstimatorFactory,

    settings: LoadPointSettings,
    state: SharedState,
    /// Restored on disconnect when enabled
    on_disconnect: ActionConfig,

    charger: ChargerCapabilities,
    meters: ChargeMeters,
    vehicles: Vec<Arc<dyn Vehicle>>,
    vehicle: Option<Arc<dyn Vehicle>>,
    estimator: Option<Box<dyn SocEstimator>>,

    planner: Planner,
    wake_up_timer: WakeUpTimer,
    progress: Progress,
    pv_timer: PvTimer,
    phase_timer: Option<DateTime<Utc>>,

    /// Last enable/disable, `None` if the guard has expired
    guard_updated: Option<DateTime<Utc>>,
    /// Last vehicle poll, `None` forces the next poll
    soc_updated: Option<DateTime<Utc>>,
    connected_time: Option<DateTime<Utc>>,
    /// Vehicle detection window start
    vehicle_connected: Option<DateTime<Utc>>,
    vehicle_detect_refresh: Option<DateTime<Utc>>,
    vehicle_id: String,

    /// Per-phase currents, `None` if not measured
    charge_currents: Option<[f64; 3]>,
    /// Session energy in Wh
    charged_energy: f64,
    charge_duration: TimeDelta,
}

impl LoadPoint {
    /// Create a loadpoint from its normalized configuration.
    ///
    /// A zero minimum current is accepted, [`LoadPointConfig::normalize`]
    /// warns about it. Negative currents are rejected.
    pub fn new(
        index: usize,
        config: &LoadPointConfig,
        charger: ChargerCapabilities,
        meter: Option<MeterCapabilities>,
        vehicles: Vec<Arc<dyn Vehicle>>,
        services: Services,
    ) -> Result<Self> {
        if config.min_current < 0.0 {
            return Err(HeliosError::validation(
                "min_current".to_string(),
                format!("must not be negative, got {}", config.min_current),
            ));
        }

        let logger = get_logger_with_context(
            LogContext::new("loadpoint").with_loadpoint(&config.title),
        );
        let publisher = services.publisher.scoped(index);
        let meters = ChargeMeters::configure(&charger, meter, &services.clock);

        let settings = LoadPointSettings {
            poll_mode: config.poll_mode(),
            poll_interval: TimeDelta::seconds(
                i64::try_from(config.soc.poll.interval_seconds).unwrap_or(i64::MAX / 1000),
            ),
            estimate: config.soc.estimate,
            enable: config.enable,
            disable: config.disable,
            guard_duration: TimeDelta::seconds(
                i64::try_from(config.guard_duration_seconds).unwrap_or(i64::MAX / 1000),
            ),
            reset_on_disconnect: config.reset_on_disconnect,
        };

        let state = SharedState::new(LoadPointState {
            title: config.title.clone(),
            mode: config.mode,
            phases: config.phases,
            measured_phases: 0,
            vehicle_phases: 0,
            min_current: config.min_current,
            max_current: config.max_current,
            min_soc: config.soc.min,
            target_soc: config.soc.target,
            target_time: None,
            status: ChargeStatus::None,
            remote_demand: RemoteDemand::Enable,
            remote_source: String::new(),
            enabled: false,
            charge_current: 0.0,
            charge_power: 0.0,
            vehicle_title: None,
            vehicle_soc: 0.0,
        });

        let planner = Planner::new(
            get_logger_with_context(LogContext::new("planner").with_loadpoint(&config.title)),
            publisher.clone(),
        );

        Ok(Self {
            index,
            logger,
            clock: services.clock,
            publisher,
            cache: services.cache,
            coordinator: services.coordinator,
            retry: services.retry,
            estimator_factory: services.estimator_factory,
            settings,
            state,
            on_disconnect: config.defaults_action(),
            charger,
            meters,
            vehicles,
            vehicle: None,
            estimator: None,
            planner,
            wake_up_timer: WakeUpTimer::default(),
            progress: Progress::new(SOC_PROGRESS_STEP),
            pv_timer: PvTimer::Inactive,
            phase_timer: None,
            guard_updated: None,
            soc_updated: None,
            connected_time: None,
            vehicle_connected: None,
            vehicle_detect_refresh: None,
            vehicle_id: String::new(),
            charge_currents: None,
            charged_energy: 0.0,
            charge_duration: TimeDelta::zero(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> String {
        self.state.read(|s| s.title.clone())
    }

    /// Shared state for external readers
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn vehicle(&self) -> Option<Arc<dyn Vehicle>> {
        self.vehicle.clone()
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn pv_timer(&self) -> PvTimer {
        self.pv_timer
    }

    pub fn phase_timer(&self) -> Option<DateTime<Utc>> {
        self.phase_timer
    }

    pub fn charged_energy(&self) -> f64 {
        self.charged_energy
    }

    /// Whether the charger can switch between 1p and 3p
    pub fn is_switchable(&self) -> bool {
        self.charger.is_switchable()
    }

    /// Publish the initial state, attach vehicles and read the charger
    pub async fn prepare(&mut self) {
        let snapshot = self.state.snapshot();
        self.publisher.publish("title", &snapshot.title);
        self.publisher.publish("minCurrent", snapshot.min_current);
        self.publisher.publish("maxCurrent", snapshot.max_current);
        self.publisher.publish("phases", snapshot.phases);
        self.publisher.publish("activePhases", snapshot.active_phases());
        self.publisher.publish("hasVehicle", !self.vehicles.is_empty());
        self.publisher.publish("mode", snapshot.mode);
        self.publisher.publish("targetSoC", snapshot.target_soc);
        self.publisher.publish("minSoC", snapshot.min_soc);

        match self.vehicles.as_slice() {
            [single] => {
                let vehicle = single.clone();
                self.set_active_vehicle(Some(vehicle)).await;
            }
            vehicles => {
                let detect = vehicles.len() > 1;
                self.clear_vehicle();
                self.unpublish_vehicle();
                if detect {
                    self.start_vehicle_detection();
                }
            }
        }

        match self.charger.charger.enabled().await {
            Ok(true) => {
                self.state.update(|s| s.enabled = true);
                self.guard_updated = Some(self.clock.now());
                // keep the charger enabled at the minimum until the first decision
                let min_current = self.state.read(|s| s.min_current);
                if let Err(e) = self.set_limit(min_current, false).await {
                    self.logger.error(&e.to_string());
                }
            }
            Ok(false) => {}
            Err(e) => self.logger.error(&format!("charger enabled: {}", e)),
        }
    }

    /// Run one control tick
    pub async fn update(&mut self, site_power: f64, cheap: bool, battery_buffered: bool) {
        let mode = self.state.read(|s| s.mode);
        self.publisher.publish("mode", mode);

        self.update_charge_power().await;
        self.update_charge_currents().await;

        let (charge_current, charge_power) =
            self.state.read(|s| (s.charge_current, s.charge_power));
        self.dispatch(Event::ChargeCurrent(charge_current)).await;
        self.dispatch(Event::ChargePower(charge_power)).await;

        self.publish_charge_progress().await;

        if let Err(e) = self.update_charger_status().await {
            self.logger.error(&format!("charger: {}", e));
            return;
        }

        let snapshot = self.state.snapshot();
        self.publisher.publish("connected", snapshot.connected());
        self.publisher.publish("charging", snapshot.charging());
        self.publisher.publish("enabled", snapshot.enabled);

        if snapshot.connected() {
            self.identify_vehicle().await;
            if self.vehicle_unidentified() {
                self.identify_vehicle_by_status().await;
            }
        }

        self.publish_soc_and_range().await;
        self.sync_charger().await;

        self.planner.must_validate_demand();

        let mut remote_disabled = RemoteDemand::Enable;
        let result = self
            .apply_strategy(mode, site_power, cheap, battery_buffered, &mut remote_disabled)
            .await;

        let (enabled, status, soc, target_soc) = self
            .state
            .read(|s| (s.enabled, s.status, s.vehicle_soc, s.target_soc));
        if enabled
            && status == ChargeStatus::B
            && soc.trunc() < f64::from(target_soc)
            && self.wake_up_timer.expired(self.clock.now())
        {
            self.wake_up_vehicle().await;
        }

        if !self.planner.demand_validated() {
            self.planner.stop();
        }

        if remote_disabled != RemoteDemand::Enable {
            self.publisher.publish("remoteDisabled", remote_disabled);
        }

        if let Err(e) = result {
            self.logger.error(&e.to_string());
        }
    }

    /// Decide the charge current for this tick
    async fn apply_strategy(
        &mut self,
        mode: ChargeMode,
        site_power: f64,
        cheap: bool,
        battery_buffered: bool,
        remote_disabled: &mut RemoteDemand,
    ) -> Result<()> {
        let (min_current, max_current, remote_demand) = self
            .state
            .read(|s| (s.min_current, s.max_current, s.remote_demand));

        if !self.connected() {
            // always disable charger if not connected
            return self.set_limit(0.0, false).await;
        }

        if self.target_soc_reached() {
            let current = if self.climate_active().await {
                min_current
            } else {
                0.0
            };
            let result = self.set_limit(current, true).await;
            self.reset_planner();
            return result;
        }

        if remote_demand == RemoteDemand::HardDisable {
            *remote_disabled = RemoteDemand::HardDisable;
            return self.set_limit(0.0, true).await;
        }

        if mode == ChargeMode::Off {
            return self.set_limit(0.0, true).await;
        }

        if self.min_soc_not_reached() {
            let result = match self.scale_phases_if_available(3).await {
                Ok(()) => self.set_limit(max_current, true).await,
                Err(e) => Err(e),
            };
            self.elapse_pv_timer();
            return result;
        }

        if mode == ChargeMode::Now {
            self.scale_phases_if_available(3).await?;
            return self.set_limit(max_current, true).await;
        }

        if self.planner_demand_active() {
            self.scale_phases_if_available(3).await?;
            let current = self.planner_handle();
            return self.set_limit(current, true).await;
        }

        if matches!(mode, ChargeMode::MinPv | ChargeMode::Pv) {
            let mut target = self.pv_max_current(mode, site_power, battery_buffered).await;
            let mut required = false;

            if target == 0.0 && self.climate_active().await {
                target = min_current;
                required = true;
            }

            if cheap {
                target = max_current;
                required = true;
            }

            if remote_demand == RemoteDemand::SoftDisable {
                *remote_disabled = RemoteDemand::SoftDisable;
                target = 0.0;
                required = true;
            }

            return self.set_limit(target, required).await;
        }

        Ok(())
    }

    fn plan_context<'a>(
        state: &SharedState,
        clock: &dyn Clock,
        estimator: Option<&'a dyn SocEstimator>,
    ) -> PlanContext<'a> {
        state.read(|s| {
            let max_power =
                s.max_current * f64::from(s.active_phases()) * crate::api::VOLTAGE;
            PlanContext {
                now: clock.now(),
                target_soc: s.target_soc,
                min_current: s.min_current,
                max_current: s.max_current,
                max_power,
                status: s.status,
                estimator,
            }
        })
    }

    fn planner_demand_active(&mut self) -> bool {
        let ctx = Self::plan_context(&self.state, self.clock.as_ref(), self.estimator.as_deref());
        self.planner.demand_active(&ctx)
    }

    fn planner_handle(&mut self) -> f64 {
        let ctx = Self::plan_context(&self.state, self.clock.as_ref(), self.estimator.as_deref());
        self.planner.handle(&ctx)
    }

    /// Remaining time to the target SoC, if known
    pub fn remaining_charge_duration(&self) -> Option<TimeDelta> {
        let ctx = Self::plan_context(&self.state, self.clock.as_ref(), self.estimator.as_deref());
        self.planner.remaining_duration(&ctx)
    }

    /// Clear the charge plan and its target time
    pub(crate) fn reset_planner(&mut self) {
        self.planner.reset();
        self.state.update(|s| s.target_time = None);
    }

    pub fn connected(&self) -> bool {
        self.state.read(|s| s.connected())
    }

    pub fn charging(&self) -> bool {
        self.state.read(|s| s.charging())
    }

    /// Apply the settings of an action, ignoring unset fields
    pub(crate) fn apply_action(&mut self, action: &ActionConfig) {
        if let Some(mode) = action.mode {
            self.set_mode(mode);
        }
        if let Some(current) = action.min_current {
            self.set_min_current(current);
        }
        if let Some(current) = action.max_current {
            self.set_max_current(current);
        }
        if let Some(soc) = action.min_soc {
            self.set_min_soc(soc);
        }
        if let Some(soc) = action.target_soc {
            self.set_target_soc(soc);
        }
    }
}
