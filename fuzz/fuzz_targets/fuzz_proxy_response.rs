#![no_main]

use libfuzzer_sys::fuzz_target;
use tlsdial::connection::{check_response, TunnelError, EXPECTED_RESPONSE};

fuzz_target!(|data: &[u8]| {
    match check_response(data) {
        Ok(()) => assert_eq!(data, EXPECTED_RESPONSE),
        Err(TunnelError::UnexpectedResponse(_)) => assert_ne!(data, EXPECTED_RESPONSE),
        Err(e) => panic!("unexpected error kind: {e}"),
    }
});
