#![no_main]

use libfuzzer_sys::fuzz_target;
use socket_flow::frame::decode_frame;
use socket_flow::message::read_message;
use std::io::Cursor;

// Feeds arbitrary bytes straight into the frame decoder and the message
// reassembler, the way a malicious or confused client would. Both are
// blocking, synchronous functions over anything implementing `Read`, so a
// `Cursor` stands in for the transport with no network or runtime needed.
fuzz_target!(|data: &[u8]| {
    let mut cursor = Cursor::new(data.to_vec());
    let _ = decode_frame(&mut cursor, 16 << 20);

    let mut cursor = Cursor::new(data.to_vec());
    let _ = read_message(&mut cursor, 16 << 20, 64 << 20);
});
