//! # Helios - PV surplus charging controller
//!
//! Decides for each EV loadpoint of a site how much current to deliver,
//! whether to charge on one or three phases and whether a session has to run
//! at full power to reach a target SoC in time.
//!
//! ## Architecture
//!
//! - `api`: Capability traits for chargers, meters, vehicles and tariffs
//! - `loadpoint`: Per-loadpoint control loop, PV controller and phase scaling
//! - `planner`: Target-time charging
//! - `soc`: SoC estimation between vehicle readings
//! - `coordinator`: Site-wide vehicle to loadpoint assignment
//! - `wrapper`: Synthetic meter, rater and timer for chargers without them
//! - `site`: Power balance and the control loop task
//! - `sim`: Simulated devices
//! - `publish`: Key/value telemetry and push notifications
//! - `cache`, `clock`, `retry`: Vehicle API cache, time source, meter retries
//! - `config`, `logging`, `error`: Ambient services

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod loadpoint;
pub mod logging;
pub mod planner;
pub mod publish;
pub mod retry;
pub mod sim;
pub mod site;
pub mod soc;
pub mod wrapper;

// Re-export commonly used types
pub use config::Config;
pub use error::{HeliosError, Result};
pub use loadpoint::{LoadPoint, LoadPointCommand, LoadPointHandle};
pub use site::{Site, SiteCommand};
