#![no_main]

use libfuzzer_sys::fuzz_target;
use tlsdial::connection::{
    derive_server_name, encode_connect_request, parse_server_name, split_host, split_host_port,
};

fuzz_target!(|addr: &str| {
    let host = split_host(addr);
    assert!(addr.starts_with(host));

    if let Ok((h, _port)) = split_host_port(addr) {
        assert!(addr.contains(h));
    }

    let name = derive_server_name(None, addr);
    let _ = parse_server_name(&name);

    // The request line always carries the address verbatim
    let request = encode_connect_request(addr);
    assert!(request.starts_with(b"CONNECT "));
    assert!(request.ends_with(b"\r\n\r\n"));
});
