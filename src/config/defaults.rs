use super::*;

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Home".to_string(),
            poll_interval_ms: 10_000,
            residual_power: 0.0,
            buffer_soc: 0.0,
            grid_meter: "grid".to_string(),
            battery_meter: None,
            tariff: None,
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            meter_retry_attempts: 3,
            meter_retry_delay_ms: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/helios.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            mode: "connected".to_string(),
            interval_seconds: MIN_POLL_INTERVAL_SECONDS,
        }
    }
}

impl Default for SocConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            estimate: true,
            min: 0,
            target: 100,
        }
    }
}

impl Default for LoadPointConfig {
    fn default() -> Self {
        Self {
            title: "Garage".to_string(),
            charger: "wallbox".to_string(),
            meter: None,
            vehicle: Some("ev".to_string()),
            vehicles: Vec::new(),
            mode: ChargeMode::Pv,
            phases: 3,
            min_current: 6.0,
            max_current: 16.0,
            guard_duration_seconds: 300,
            reset_on_disconnect: false,
            soc: SocConfig::default(),
            enable: ThresholdConfig {
                delay_seconds: 60,
                threshold: 0.0,
            },
            disable: ThresholdConfig {
                delay_seconds: 180,
                threshold: 0.0,
            },
        }
    }
}

impl Default for SimChargerConfig {
    fn default() -> Self {
        Self {
            status: ChargeStatus::A,
            switchable: false,
            millis: false,
            meter: false,
            identify: None,
        }
    }
}

impl Default for SimVehicleConfig {
    fn default() -> Self {
        Self {
            title: "EV".to_string(),
            capacity: 50.0,
            phases: 0,
            soc: 50.0,
            range: None,
            identifiers: Vec::new(),
            charge_state: false,
            on_identify: ActionConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut devices = DevicesConfig::default();
        devices
            .chargers
            .insert("wallbox".to_string(), SimChargerConfig::default());
        devices.meters.insert(
            "grid".to_string(),
            SimMeterConfig {
                power: -3000.0,
                soc: None,
            },
        );
        devices
            .vehicles
            .insert("ev".to_string(), SimVehicleConfig::default());

        Self {
            site: SiteConfig::default(),
            loadpoints: vec![LoadPointConfig::default()],
            controls: ControlsConfig::default(),
            logging: LoggingConfig::default(),
            devices,
        }
    }
}
