use super::*;

#[test]
fn test_cadence_error_construction() {
    let err = CadenceError::config("Configuration file not found");
    assert!(matches!(err, CadenceError::Config { .. }));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(err.code(), ErrorCode::CONFIG_GENERIC);

    let err = CadenceError::run_with_code(ErrorCode::RUN_ALREADY_ACTIVE, "already running");
    assert!(matches!(err, CadenceError::Run { .. }));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(err.code(), ErrorCode::RUN_ALREADY_ACTIVE);

    let err = CadenceError::validation("Invalid input");
    assert_eq!(err.exit_code(), 8);
    assert_eq!(err.code(), ErrorCode::VALIDATION_GENERIC);

    let err = CadenceError::other("Unknown error");
    assert_eq!(err.exit_code(), 1);
    assert_eq!(err.code(), ErrorCode::OTHER_GENERIC);
}

#[test]
fn test_error_display_carries_code() {
    let err = CadenceError::session_with_code(
        ErrorCode::SESSION_CREATION_FAILED,
        "browser did not start",
        Some("primary".to_string()),
    );
    assert_eq!(
        err.to_string(),
        "[E2002] Session error: browser did not start"
    );
    assert_eq!(
        err.user_message(),
        "Session for channel 'primary' failed: browser did not start"
    );
}

#[test]
fn test_error_with_context_and_source() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err = CadenceError::config("Config error")
        .with_context("cadence.toml")
        .with_source(io);

    assert!(err.to_string().contains("Config error: cadence.toml"));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_describe_error_code() {
    assert_eq!(
        describe_error_code(ErrorCode::RUN_ALREADY_ACTIVE),
        "A run is already active"
    );
    assert_eq!(describe_error_code(4242), "Unknown error code");
}
