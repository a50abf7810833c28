use helios::config::LoggingConfig;
use helios::logging::{LogContext, get_logger, get_logger_with_context, init_logging, parse_log_level};
use tracing::Level;

#[test]
fn parse_levels_case_insensitive() {
    assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
    assert_eq!(parse_log_level("Warn").unwrap(), Level::WARN);
    assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
    assert!(parse_log_level("verbose").is_err());
}

#[test]
fn logger_carries_context() {
    let logger = get_logger_with_context(
        LogContext::new("loadpoint")
            .with_loadpoint("Garage")
            .with_field("vehicle", "EV".to_string()),
    );
    let ctx = logger.context();
    assert_eq!(ctx.component, "loadpoint");
    assert_eq!(ctx.loadpoint.as_deref(), Some("Garage"));
    assert_eq!(ctx.extra_fields.get("vehicle").map(String::as_str), Some("EV"));

    assert!(get_logger("site").context().loadpoint.is_none());
}

#[test]
fn init_with_file_layer() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        level: "DEBUG".into(),
        file: tmp_dir.path().join("helios.log").to_string_lossy().to_string(),
        console_output: false,
        ..LoggingConfig::default()
    };
    assert!(init_logging(&config).is_ok());
    // repeated initialization is a no-op
    assert!(init_logging(&config).is_ok());
    get_logger("test").info("logging initialized");
}
