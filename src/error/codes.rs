/// Error code registry for Cadence
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Session errors
/// - 4000-4999: Run lifecycle errors
/// - 7000-7999: Validation errors
/// - 9000-9999: Other errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1007;
    pub const CONFIG_VALIDATION_FAILED: u16 = 1008;

    // Session errors (2000-2999)
    pub const SESSION_GENERIC: u16 = 2000;
    pub const SESSION_NOT_REGISTERED: u16 = 2001;
    pub const SESSION_CREATION_FAILED: u16 = 2002;
    pub const SESSION_CHALLENGE_TIMEOUT: u16 = 2005;
    pub const SESSION_FAILED_STATE: u16 = 2006;

    // Run lifecycle errors (4000-4999)
    pub const RUN_ALREADY_ACTIVE: u16 = 4001;
    pub const RUN_NOT_ACTIVE: u16 = 4002;
    pub const RUN_NO_CHANNELS: u16 = 4003;
    pub const RUN_WORKER_PANICKED: u16 = 4004;
    pub const RUN_STOP_TIMEOUT: u16 = 4005;

    // Validation errors (7000-7999)
    pub const VALIDATION_GENERIC: u16 = 7000;
    pub const VALIDATION_EMPTY_TARGET: u16 = 7001;
    pub const VALIDATION_EMPTY_LIST: u16 = 7002;
    pub const VALIDATION_UNKNOWN_KIND: u16 = 7003;
    pub const VALIDATION_KIND_MISMATCH: u16 = 7004;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1007 => "Failed to parse configuration",
        1008 => "Configuration validation failed",

        2000 => "Generic session error",
        2001 => "No session registered for channel",
        2002 => "Session could not be created",
        2005 => "Timed out waiting for challenge answer",
        2006 => "Session previously failed for this run",

        4001 => "A run is already active",
        4002 => "No run is active",
        4003 => "No channel serves the requested action kinds",
        4004 => "A worker task panicked",
        4005 => "Workers did not stop in time",

        7000 => "Generic validation error",
        7001 => "Target is empty",
        7002 => "Target list is empty",
        7003 => "Unknown action kind",
        7004 => "Action kind does not apply to target",

        9000 => "Generic error",
        _ => "Unknown error code",
    }
}
