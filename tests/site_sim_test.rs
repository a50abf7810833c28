use helios::api::{ChargeMode, ChargeStatus};
use helios::cache::ApiCache;
use helios::clock::MockClock;
use helios::config::{Config, SimChargerConfig, SimVehicleConfig, ThresholdConfig};
use helios::sim::SimDevices;
use helios::site::Site;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn pv_config(grid_power: f64) -> Config {
    let mut config = Config::default();
    config.site.poll_interval_ms = 10;
    config
        .devices
        .meters
        .get_mut("grid")
        .unwrap()
        .power = grid_power;
    config.devices.chargers.insert(
        "wallbox".into(),
        SimChargerConfig {
            status: ChargeStatus::C,
            ..SimChargerConfig::default()
        },
    );

    let lp = &mut config.loadpoints[0];
    lp.mode = ChargeMode::Pv;
    lp.guard_duration_seconds = 0;
    lp.enable = ThresholdConfig::default();
    lp.disable = ThresholdConfig::default();

    config
}

fn build(config: &Config) -> (SimDevices, Site) {
    let cache = Arc::new(ApiCache::new());
    let clock = Arc::new(MockClock::default());
    let devices = SimDevices::from_config(&config.devices, cache.clone(), clock.clone());
    let site = Site::from_config(config, &devices, clock, cache).unwrap();
    (devices, site)
}

#[tokio::test]
async fn pv_surplus_enables_and_raises_current() {
    let config = pv_config(-5000.0);
    let (devices, mut site) = build(&config);
    let charger = devices.charger("wallbox").unwrap();

    site.prepare().await;
    site.update().await.unwrap();

    // enabled at min current first
    assert!(charger.is_enabled());
    assert_eq!(charger.current(), 6.0);

    site.update().await.unwrap();

    // 6A + 5000W / (3 * 230V), whole amps
    assert_eq!(charger.current(), 13.0);

    let handle = site.handles().remove(0);
    assert!(handle.enabled());
    assert_eq!(handle.get("chargeCurrent"), Some(json!(13.0)));
    assert_eq!(site.publisher().get("sitePower"), Some(json!(-5000.0)));
}

#[tokio::test]
async fn no_surplus_keeps_charger_off() {
    let config = pv_config(500.0);
    let (devices, mut site) = build(&config);
    let charger = devices.charger("wallbox").unwrap();

    site.prepare().await;
    site.update().await.unwrap();
    site.update().await.unwrap();

    assert!(!charger.is_enabled());
}

#[tokio::test]
async fn cheap_tariff_charges_at_max_current() {
    let mut config = pv_config(500.0);
    config.devices.tariffs.insert(
        "tariff".into(),
        helios::config::SimTariffConfig { cheap: true },
    );
    config.site.tariff = Some("tariff".into());

    let (devices, mut site) = build(&config);
    let charger = devices.charger("wallbox").unwrap();

    site.prepare().await;
    site.update().await.unwrap();

    assert!(charger.is_enabled());
    assert_eq!(charger.current(), 16.0);
    assert_eq!(site.publisher().get("cheap"), Some(json!(true)));
}

#[tokio::test]
async fn charger_failure_does_not_stop_the_site() {
    let config = pv_config(-5000.0);
    let (devices, mut site) = build(&config);
    let charger = devices.charger("wallbox").unwrap();

    site.prepare().await;
    charger.set_failing(true);
    assert!(site.update().await.is_ok());
    assert!(!charger.is_enabled());

    charger.set_failing(false);
    site.update().await.unwrap();
    assert!(charger.is_enabled());
}

#[tokio::test]
async fn handle_commands_apply_between_ticks() {
    let config = pv_config(0.0);
    let (_devices, mut site) = build(&config);
    let handle = site.handles().remove(0);
    let shutdown = site.shutdown_sender();

    let control = async {
        handle.set_mode(ChargeMode::Now).unwrap();
        handle.set_target_soc(80).unwrap();
        handle.set_max_current(10.0).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.send(()).unwrap();
    };

    let (res, ()) = tokio::join!(site.run(), control);
    res.unwrap();

    assert_eq!(handle.mode(), ChargeMode::Now);
    assert_eq!(handle.target_soc(), 80);
    assert_eq!(handle.max_current(), 10.0);
    assert_eq!(handle.max_power(), 10.0 * 3.0 * 230.0);

    drop(site);
    assert!(handle.set_mode(ChargeMode::Off).is_err());
}

fn multi_vehicle_config() -> Config {
    let mut config = pv_config(0.0);
    config.devices.vehicles.insert(
        "a".into(),
        SimVehicleConfig {
            title: "Alpha".into(),
            identifiers: vec!["RFID-1".into()],
            charge_state: true,
            ..SimVehicleConfig::default()
        },
    );
    config.devices.vehicles.insert(
        "b".into(),
        SimVehicleConfig {
            title: "Beta".into(),
            identifiers: vec!["WVW*".into()],
            charge_state: true,
            ..SimVehicleConfig::default()
        },
    );

    let lp = &mut config.loadpoints[0];
    lp.vehicle = None;
    lp.vehicles = vec!["a".into(), "b".into()];
    lp.mode = ChargeMode::Off;

    config
}

#[tokio::test]
async fn vehicle_identified_by_charger_id() {
    let mut config = multi_vehicle_config();
    config.devices.chargers.insert(
        "wallbox".into(),
        SimChargerConfig {
            status: ChargeStatus::B,
            identify: Some("WVWZZZ1".into()),
            ..SimChargerConfig::default()
        },
    );

    let (_devices, mut site) = build(&config);
    let handle = site.handles().remove(0);

    site.prepare().await;
    assert_eq!(handle.snapshot().vehicle_title, None);

    site.update().await.unwrap();
    assert_eq!(handle.snapshot().vehicle_title.as_deref(), Some("Beta"));
    assert_eq!(handle.get("vehicleIdentity"), Some(json!("WVWZZZ1")));
}

#[tokio::test]
async fn vehicle_identified_by_charge_state() {
    let mut config = multi_vehicle_config();
    config.devices.chargers.insert(
        "wallbox".into(),
        SimChargerConfig {
            status: ChargeStatus::B,
            ..SimChargerConfig::default()
        },
    );

    let (devices, mut site) = build(&config);
    let handle = site.handles().remove(0);
    let alpha = devices.vehicle("a").unwrap();
    alpha.set_status(ChargeStatus::B);

    site.prepare().await;
    site.update().await.unwrap();

    assert_eq!(handle.snapshot().vehicle_title.as_deref(), Some("Alpha"));
    let vehicle = site.loadpoints()[0].vehicle().unwrap();
    assert_eq!(site.coordinator().owner(&vehicle).await, Some(0));
}

#[tokio::test]
async fn vehicle_detached_on_disconnect() {
    let mut config = multi_vehicle_config();
    config.devices.chargers.insert(
        "wallbox".into(),
        SimChargerConfig {
            status: ChargeStatus::B,
            identify: Some("RFID-1".into()),
            ..SimChargerConfig::default()
        },
    );

    let (devices, mut site) = build(&config);
    let handle = site.handles().remove(0);
    let charger = devices.charger("wallbox").unwrap();

    site.prepare().await;
    site.update().await.unwrap();
    assert_eq!(handle.snapshot().vehicle_title.as_deref(), Some("Alpha"));

    charger.set_status(ChargeStatus::A);
    site.update().await.unwrap();
    assert_eq!(handle.snapshot().vehicle_title, None);
    assert_eq!(handle.get("vehiclePresent"), Some(json!(false)));
}
