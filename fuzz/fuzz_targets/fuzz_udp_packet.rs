#![no_main]

use double_socket::core::bit_buffer::BitBuffer;
use double_socket::core::udp_framer::check_prefix;
use double_socket::protocol::timestamp::TIMESTAMP_MODULUS;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buffer = BitBuffer::from_vec(data.to_vec());
    if let Ok(timestamp) = check_prefix(&mut buffer) {
        assert!(timestamp < TIMESTAMP_MODULUS);
        let _ = buffer.read_remaining_bytes();
    }
});
