#![no_main]

use double_socket::core::bit_buffer::BitBuffer;
use double_socket::protocol::handshake::{parse_udp_key, AuthReply};
use double_socket::utils::crypto::FixedKeyCrypto;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = parse_udp_key(data);

    // Replies arrive encrypted, so garbage must fail in decryption or parsing
    let crypto = FixedKeyCrypto::new(*b"fuzz-fuzz-fuzz!!");
    if let Ok(plaintext) = crypto.decrypt(data) {
        let mut buffer = BitBuffer::from_vec(plaintext);
        let _ = AuthReply::read(&mut buffer);
    }
    let mut raw = BitBuffer::from_vec(data.to_vec());
    let _ = AuthReply::read(&mut raw);
});
