#![no_main]

use libfuzzer_sys::fuzz_target;
use tlsdial::connection::parse_legacy_certificate;

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    if let Ok(cert) = parse_legacy_certificate(&input) {
        assert!(!cert.as_ref().is_empty());
    }
});
