//! Property-based tests using proptest
//!
//! These tests validate the wire invariants of both channels across randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use double_socket::core::bit_buffer::BitBuffer;
use double_socket::core::crc32::{crc32, crc32_range};
use double_socket::core::tcp_framer::{frame_packet, TcpFramer};
use double_socket::core::udp_framer::{check_prefix, write_prefixed};
use double_socket::protocol::timestamp::{TimestampTracker, TIMESTAMP_MODULUS};
use double_socket::protocol::SequenceTracker;
use double_socket::utils::crypto::AnyKeyCrypto;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Field {
    Bits(u64, u32),
    Bool(bool),
    U8(u8),
    I16(i16),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
}

fn field() -> impl Strategy<Value = Field> {
    prop_oneof![
        (1u32..=64).prop_flat_map(|n| {
            let max = if n == 64 { u64::MAX } else { (1u64 << n) - 1 };
            (0..=max, Just(n))
        })
        .prop_map(|(v, n)| Field::Bits(v, n)),
        any::<bool>().prop_map(Field::Bool),
        any::<u8>().prop_map(Field::U8),
        any::<i16>().prop_map(Field::I16),
        any::<u32>().prop_map(Field::U32),
        any::<i64>().prop_map(Field::I64),
        any::<f32>().prop_filter("NaN", |f| !f.is_nan()).prop_map(Field::F32),
        any::<f64>().prop_filter("NaN", |f| !f.is_nan()).prop_map(Field::F64),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Field::Bytes),
    ]
}

// Property: interleaved typed writes read back unchanged, aligned or not
proptest! {
    #[test]
    fn prop_bit_buffer_roundtrip(fields in prop::collection::vec(field(), 0..200)) {
        let mut buffer = BitBuffer::with_capacity(16 * 1024);
        for f in &fields {
            match f {
                Field::Bits(v, n) => buffer.write_bits(*v, *n),
                Field::Bool(v) => buffer.write_bool(*v),
                Field::U8(v) => buffer.write_u8(*v),
                Field::I16(v) => buffer.write_i16(*v),
                Field::U32(v) => buffer.write_u32(*v),
                Field::I64(v) => buffer.write_i64(*v),
                Field::F32(v) => buffer.write_f32(*v),
                Field::F64(v) => buffer.write_f64(*v),
                Field::Bytes(v) => buffer.write_bytes(v),
            }
        }
        for f in &fields {
            match f {
                Field::Bits(v, n) => prop_assert_eq!(buffer.read_bits(*n), *v),
                Field::Bool(v) => prop_assert_eq!(buffer.read_bool(), *v),
                Field::U8(v) => prop_assert_eq!(buffer.read_u8(), *v),
                Field::I16(v) => prop_assert_eq!(buffer.read_i16(), *v),
                Field::U32(v) => prop_assert_eq!(buffer.read_u32(), *v),
                Field::I64(v) => prop_assert_eq!(buffer.read_i64(), *v),
                Field::F32(v) => prop_assert_eq!(buffer.read_f32(), *v),
                Field::F64(v) => prop_assert_eq!(buffer.read_f64(), *v),
                Field::Bytes(v) => prop_assert_eq!(&buffer.read_bytes(v.len()), v),
            }
        }
        prop_assert_eq!(buffer.total_bits_left(), 0);
    }
}

// Property: any single bit flip changes the checksum
proptest! {
    #[test]
    fn prop_crc_detects_bit_flips(
        data in prop::collection::vec(any::<u8>(), 1..512),
        bit in any::<prop::sample::Index>(),
    ) {
        let bit = bit.index(data.len() * 8);
        let mut flipped = data.clone();
        flipped[bit / 8] ^= 1 << (bit % 8);
        prop_assert_eq!(crc32(&data), crc32(&data));
        prop_assert_ne!(crc32(&data), crc32(&flipped));
    }
}

// Property: a range checksum only depends on the bytes in the range
proptest! {
    #[test]
    fn prop_crc_range_is_position_independent(
        prefix in prop::collection::vec(any::<u8>(), 0..64),
        body in prop::collection::vec(any::<u8>(), 0..256),
        suffix in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut array = prefix.clone();
        array.extend_from_slice(&body);
        array.extend_from_slice(&suffix);
        prop_assert_eq!(crc32_range(&array, prefix.len(), body.len()), crc32(&body));
    }
}

// Property: encryption round-trips and a different key never yields the plaintext
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]
    #[test]
    fn prop_crypto_roundtrip(
        key in any::<[u8; 16]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..1300),
        flip in 0usize..16,
    ) {
        let ciphertext = AnyKeyCrypto.encrypt(&key, &plaintext);
        prop_assert_eq!(ciphertext.len() % 16, 0);
        prop_assert_eq!(AnyKeyCrypto.decrypt(&key, &ciphertext).unwrap(), plaintext.clone());

        let mut wrong = key;
        wrong[flip] ^= 0x5A;
        if let Ok(garbage) = AnyKeyCrypto.decrypt(&wrong, &ciphertext) {
            prop_assert_ne!(garbage, plaintext);
        }
    }
}

// Property: framed packets reassemble identically however the stream is split
proptest! {
    #[test]
    fn prop_framer_reassembles_any_split(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let stream: Vec<u8> = bodies
            .iter()
            .flat_map(|b| frame_packet(b).unwrap())
            .collect();
        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();

        let mut framer = TcpFramer::new(1024);
        let mut seen = Vec::new();
        for pair in points.windows(2) {
            framer.feed(&stream[pair[0]..pair[1]], |p| seen.push(p.to_vec())).unwrap();
        }
        prop_assert_eq!(seen, bodies);
        prop_assert!(!framer.is_mid_packet());
    }
}

// Property: a valid UDP prefix survives and any corruption of it is caught
proptest! {
    #[test]
    fn prop_udp_prefix(
        timestamp in 0u32..TIMESTAMP_MODULUS,
        payload in prop::collection::vec(any::<u8>(), 0..256),
        corrupt in any::<prop::sample::Index>(),
    ) {
        let mut buffer = BitBuffer::with_capacity(512);
        write_prefixed(&mut buffer, timestamp, |b| b.write_bytes(&payload));
        let packet = buffer.as_slice().to_vec();

        let mut received = BitBuffer::from_vec(packet.clone());
        prop_assert_eq!(check_prefix(&mut received).unwrap(), timestamp);

        let mut damaged = packet;
        let index = corrupt.index(damaged.len());
        damaged[index] ^= 0x80;
        prop_assert!(check_prefix(&mut BitBuffer::from_vec(damaged)).is_err());
    }
}

// Property: timestamps that keep moving forward are always newest, across wraparound
proptest! {
    #[test]
    fn prop_forward_timestamps_are_newest(
        start in 0u32..TIMESTAMP_MODULUS,
        steps in prop::collection::vec(1u32..1000, 1..200),
    ) {
        let mut tracker = TimestampTracker::with_newest(start);
        let mut current = start;
        for step in steps {
            let next = (current + step) % TIMESTAMP_MODULUS;
            prop_assert!(tracker.is_newest(next));
            prop_assert!(!tracker.is_newest(current));
            prop_assert!(!tracker.is_newest(next));
            current = next;
        }
    }
}

// Property: sender and receiver counters stay in lockstep for any bound
proptest! {
    #[test]
    fn prop_sequence_lockstep(bound in 128u8..=255, count in 0usize..1000) {
        let mut sender = SequenceTracker::new(bound);
        let mut receiver = SequenceTracker::new(bound);
        for _ in 0..count {
            let id = sender.next_send_id();
            prop_assert!(id < bound);
            prop_assert!(receiver.check_receive_id(id));
        }
    }
}
