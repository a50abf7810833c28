use helios::error::HeliosError;

#[test]
fn error_constructors_device() {
    assert!(matches!(
        HeliosError::config("x"),
        HeliosError::Config { .. }
    ));
    assert!(matches!(
        HeliosError::charger("x"),
        HeliosError::Charger { .. }
    ));
    assert!(matches!(HeliosError::meter("x"), HeliosError::Meter { .. }));
    assert!(matches!(
        HeliosError::vehicle("x"),
        HeliosError::Vehicle { .. }
    ));
}

#[test]
fn error_constructors_general() {
    assert!(matches!(HeliosError::io("x"), HeliosError::Io { .. }));
    assert!(matches!(
        HeliosError::validation("f", "m"),
        HeliosError::Validation { .. }
    ));
    assert!(matches!(
        HeliosError::timeout("x"),
        HeliosError::Timeout { .. }
    ));
    assert!(matches!(
        HeliosError::generic("x"),
        HeliosError::Generic { .. }
    ));
}

#[test]
fn sentinels() {
    assert!(HeliosError::MustRetry.is_must_retry());
    assert!(!HeliosError::NotAvailable.is_must_retry());
    assert!(!HeliosError::meter("timeout").is_must_retry());
}

#[test]
fn conversions() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    assert!(matches!(HeliosError::from(io), HeliosError::Io { .. }));

    let yaml = serde_yaml::from_str::<u8>("[").unwrap_err();
    assert!(matches!(
        HeliosError::from(yaml),
        HeliosError::Serialization { .. }
    ));
}

#[test]
fn display_messages() {
    let e = HeliosError::validation("field", "bad");
    let s = format!("{}", e);
    assert!(s.contains("Validation error"));
    assert_eq!(HeliosError::MustRetry.to_string(), "must retry");
}
