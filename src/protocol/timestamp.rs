//! # Packet Timestamps
//!
//! Every UDP packet carries the time elapsed since the connection started, in
//! 10 ms ticks, truncated to 20 bits. The counter wraps about every 2.9
//! hours, so all comparisons are modular.
//!
//! A candidate timestamp is newer than a stored one when its forward distance
//! from it is between 1 and half the modulus (exclusive). Anything else is a
//! duplicate or a stale, reordered packet.

use crate::core::udp_framer::TIMESTAMP_BITS;
use crate::utils::time::time_millis;

/// Length of one timestamp tick in milliseconds
pub const TICK_MS: u64 = 10;

/// Number of distinct timestamp values
pub const TIMESTAMP_MODULUS: u32 = 1 << TIMESTAMP_BITS;

const HALF_MODULUS: u32 = TIMESTAMP_MODULUS / 2;

fn elapsed_ticks(connection_start: u64, now: u64) -> u64 {
    now.saturating_sub(connection_start) / TICK_MS
}

/// Timestamp of a packet sent at `now` on a connection started at `connection_start`
pub fn packet_timestamp(connection_start: u64, now: u64) -> u32 {
    (elapsed_ticks(connection_start, now) % u64::from(TIMESTAMP_MODULUS)) as u32
}

/// Timestamp of a packet sent right now
pub fn current_packet_timestamp(connection_start: u64) -> u32 {
    packet_timestamp(connection_start, time_millis())
}

/// Forward distance from `from` to `to`, in ticks
fn forward_distance(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from) & (TIMESTAMP_MODULUS - 1)
}

/// One-way transit time in milliseconds of a packet stamped `timestamp` and received at `now`
pub fn trip_time(connection_start: u64, timestamp: u32, now: u64) -> u64 {
    u64::from(forward_distance(timestamp, packet_timestamp(connection_start, now))) * TICK_MS
}

/// Epoch milliseconds at which a packet stamped `timestamp` was sent, assuming it arrived by `now`
pub fn send_timestamp(connection_start: u64, timestamp: u32, now: u64) -> u64 {
    let elapsed = elapsed_ticks(connection_start, now);
    let back = forward_distance(timestamp, packet_timestamp(connection_start, now));
    connection_start + elapsed.saturating_sub(u64::from(back)) * TICK_MS
}

/// Whether `candidate` is strictly newer than `newest`, tolerating wraparound
pub fn is_newer(newest: u32, candidate: u32) -> bool {
    let distance = forward_distance(newest, candidate);
    distance != 0 && distance < HALF_MODULUS
}

/// Newest UDP timestamp seen on one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampTracker {
    newest: Option<u32>,
}

impl TimestampTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that has already seen `newest`
    pub fn with_newest(newest: u32) -> Self {
        Self {
            newest: Some(newest),
        }
    }

    pub fn newest(&self) -> Option<u32> {
        self.newest
    }

    /// Accept and record `timestamp` when it is newer than everything seen so far
    pub fn is_newest(&mut self, timestamp: u32) -> bool {
        let accept = match self.newest {
            None => true,
            Some(newest) => is_newer(newest, timestamp),
        };
        if accept {
            self.newest = Some(timestamp);
        }
        accept
    }

    pub fn reset(&mut self) {
        self.newest = None;
    }
}
