#![no_main]

use libfuzzer_sys::fuzz_target;
use socket_flow::handshake::accept_key;

// `accept_key` is pure (SHA-1 + base64, no I/O) and takes an arbitrary
// client-supplied string, making it fuzzable without a transport at all.
fuzz_target!(|data: &[u8]| {
    let key = String::from_utf8_lossy(data);
    let _ = accept_key(&key);
});
