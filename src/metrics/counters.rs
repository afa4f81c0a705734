//! Counter metrics

use super::labels;

/// A dial was started
pub fn dial_attempted() {
    ::metrics::counter!(labels::DIAL_ATTEMPTS).increment(1);
}

/// A dial finished with `outcome` (`success` or an error category)
pub fn dial_completed(outcome: &'static str) {
    ::metrics::counter!(labels::DIAL_COMPLETED, "outcome" => outcome).increment(1);
}

/// A post-handshake verification ran
pub fn verification(mode: &'static str, ok: bool) {
    let result = if ok {
        labels::RESULT_OK
    } else {
        labels::RESULT_FAILED
    };
    ::metrics::counter!(labels::VERIFICATIONS, "mode" => mode, "result" => result).increment(1);
}
