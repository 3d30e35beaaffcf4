//! Observability and Metrics
//!
//! Atomic counters for connections, handshakes and per-channel traffic.
//! Every client and server owns one `Arc<Metrics>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one client or server
#[derive(Debug)]
pub struct Metrics {
    /// Total TCP connections established
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Handshakes started
    pub handshakes_total: AtomicU64,
    /// Handshakes that reached the authenticated state
    pub handshakes_success: AtomicU64,
    /// Handshakes rejected or aborted
    pub handshakes_failed: AtomicU64,
    /// Handshakes that ran out of time
    pub handshakes_timed_out: AtomicU64,
    /// TCP packets sent
    pub tcp_packets_sent: AtomicU64,
    /// TCP packets received
    pub tcp_packets_received: AtomicU64,
    /// UDP packets sent
    pub udp_packets_sent: AtomicU64,
    /// UDP packets received
    pub udp_packets_received: AtomicU64,
    /// Total bytes sent on both channels
    pub bytes_sent: AtomicU64,
    /// Total bytes received on both channels
    pub bytes_received: AtomicU64,
    /// UDP packets dropped for failing decryption or the checksum
    pub udp_packets_dropped: AtomicU64,
    /// TCP packets dropped for an out-of-order sequence id
    pub sequence_rejects: AtomicU64,
    /// Protocol violations that closed a connection
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            handshakes_timed_out: AtomicU64::new(0),
            tcp_packets_sent: AtomicU64::new(0),
            tcp_packets_received: AtomicU64::new(0),
            udp_packets_sent: AtomicU64::new(0),
            udp_packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            udp_packets_dropped: AtomicU64::new(0),
            sequence_rejects: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_timed_out(&self) {
        self.handshakes_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tcp_sent(&self, byte_count: usize) {
        self.tcp_packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn tcp_received(&self, byte_count: usize) {
        self.tcp_packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn udp_sent(&self, byte_count: usize) {
        self.udp_packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn udp_received(&self, byte_count: usize) {
        self.udp_packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn udp_dropped(&self) {
        self.udp_packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sequence_reject(&self) {
        self.sequence_rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            handshakes_timed_out: self.handshakes_timed_out.load(Ordering::Relaxed),
            tcp_packets_sent: self.tcp_packets_sent.load(Ordering::Relaxed),
            tcp_packets_received: self.tcp_packets_received.load(Ordering::Relaxed),
            udp_packets_sent: self.udp_packets_sent.load(Ordering::Relaxed),
            udp_packets_received: self.udp_packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            udp_packets_dropped: self.udp_packets_dropped.load(Ordering::Relaxed),
            sequence_rejects: self.sequence_rejects.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            handshakes_timed_out = snapshot.handshakes_timed_out,
            tcp_packets_sent = snapshot.tcp_packets_sent,
            tcp_packets_received = snapshot.tcp_packets_received,
            udp_packets_sent = snapshot.udp_packets_sent,
            udp_packets_received = snapshot.udp_packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            udp_packets_dropped = snapshot.udp_packets_dropped,
            sequence_rejects = snapshot.sequence_rejects,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Connection metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub handshakes_timed_out: u64,
    pub tcp_packets_sent: u64,
    pub tcp_packets_received: u64,
    pub udp_packets_sent: u64,
    pub udp_packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub udp_packets_dropped: u64,
    pub sequence_rejects: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_connections_never_underflow() {
        let metrics = Metrics::new();
        metrics.connection_closed();
        metrics.connection_established();
        metrics.connection_closed();
        metrics.connection_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 1);
        assert_eq!(snapshot.connections_active, 0);
    }

    #[test]
    fn test_traffic_counters() {
        let metrics = Metrics::new();
        metrics.tcp_sent(10);
        metrics.udp_sent(5);
        metrics.udp_received(7);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_sent, 15);
        assert_eq!(snapshot.bytes_received, 7);
        assert_eq!(snapshot.udp_packets_received, 1);
    }
}
