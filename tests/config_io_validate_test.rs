use helios::api::ChargeMode;
use helios::config::{Config, PollMode};
use helios::logging::get_logger;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.site.residual_power = 150.0;
    cfg.loadpoints[0].mode = ChargeMode::MinPv;
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.site.residual_power, 150.0);
    assert_eq!(loaded.loadpoints[0].mode, ChargeMode::MinPv);
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn partial_yaml_uses_defaults() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        r#"
site:
  title: Garage
  residual_power: 100
  grid_meter: grid
loadpoints:
  - title: Carport
    charger: wallbox
    vehicles: [a, b]
    vehicle: null
    mode: minpv
    phases: 1
    soc:
      poll:
        mode: charging
      target: 80
    enable:
      delay_seconds: 30
      threshold: -500
devices:
  chargers:
    wallbox:
      status: B
      switchable: true
  meters:
    grid:
      power: -1200
  vehicles:
    a:
      title: Alpha
    b:
      title: Beta
      identifiers: ["WVW*"]
"#,
    )
    .unwrap();

    let cfg = Config::from_file(tmp.path()).unwrap();
    assert!(cfg.validate().is_ok());

    assert_eq!(cfg.site.poll_interval_ms, 10_000);
    let lp = &cfg.loadpoints[0];
    assert_eq!(lp.title, "Carport");
    assert_eq!(lp.vehicle_refs(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(lp.mode, ChargeMode::MinPv);
    assert_eq!(lp.min_current, 6.0);
    assert_eq!(lp.soc.target, 80);
    assert_eq!(lp.poll_mode(), PollMode::Charging);
    assert_eq!(lp.enable.threshold, -500.0);
    assert_eq!(lp.disable.delay_seconds, 180);
    assert!(cfg.devices.chargers["wallbox"].switchable);
}

#[test]
fn normalize_drops_phases_for_switchable_charger() {
    let mut cfg = Config::default();
    let lp = &mut cfg.loadpoints[0];
    lp.phases = 3;
    lp.soc.poll.mode = "sometimes".into();
    lp.soc.poll.interval_seconds = 0;

    lp.normalize(true, &get_logger("config"));

    assert_eq!(lp.phases, 0);
    assert_eq!(lp.poll_mode(), PollMode::Connected);
    assert_eq!(lp.soc.poll.interval_seconds, 60 * 60);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();
    cfg.loadpoints[0].charger = "missing".into();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.loadpoints[0].phases = 2;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.loadpoints[0].soc.target = 120;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.site.battery_meter = Some("battery".into());
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.site.tariff = Some("dynamic".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), "site: [not, a, map").unwrap();
    assert!(Config::from_file(tmp.path()).is_err());
}

#[test]
fn from_file_missing_fails() {
    let tmp_dir = tempfile::tempdir().unwrap();
    assert!(Config::from_file(tmp_dir.path().join("absent.yaml")).is_err());
}
