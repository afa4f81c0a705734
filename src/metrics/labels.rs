//! Metric names and label values

/// Dial attempts started
pub const DIAL_ATTEMPTS: &str = "tlsdial_dial_attempts_total";
/// Dials finished, labelled by outcome
pub const DIAL_COMPLETED: &str = "tlsdial_dial_completed_total";
/// Post-handshake verifications, labelled by mode and result
pub const VERIFICATIONS: &str = "tlsdial_verification_total";
/// Dial duration in milliseconds, labelled by outcome
pub const DIAL_DURATION: &str = "tlsdial_dial_duration_ms";

/// Successful outcome
pub const OUTCOME_SUCCESS: &str = "success";
/// Verification passed
pub const RESULT_OK: &str = "ok";
/// Verification failed
pub const RESULT_FAILED: &str = "failed";
