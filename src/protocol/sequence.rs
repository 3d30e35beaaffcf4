//! TCP sequence ids.
//!
//! Every steady-state TCP packet starts with a one-byte id counting up from 0
//! and wrapping at a per-connection bound chosen during the handshake. The
//! receiver only accepts the id it expects next; a mismatched packet is
//! dropped and the expectation stays where it was.

/// Send and receive counters of one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    bound: u8,
    send: u8,
    receive: u8,
}

impl SequenceTracker {
    /// Counters wrapping to 0 when they reach `bound`
    pub fn new(bound: u8) -> Self {
        Self {
            bound,
            send: 0,
            receive: 0,
        }
    }

    pub fn bound(&self) -> u8 {
        self.bound
    }

    /// The id the next received packet must carry
    pub fn expected_receive_id(&self) -> u8 {
        self.receive
    }

    fn advance(id: u8, bound: u8) -> u8 {
        let next = id.wrapping_add(1);
        if next == bound {
            0
        } else {
            next
        }
    }

    /// Id the next outgoing packet will carry, without consuming it
    pub fn peek_send_id(&self) -> u8 {
        self.send
    }

    /// Id to prepend to the next outgoing packet
    pub fn next_send_id(&mut self) -> u8 {
        let id = self.send;
        self.send = Self::advance(id, self.bound);
        id
    }

    /// Accept `id` if it is the expected one, advancing the expectation
    pub fn check_receive_id(&mut self, id: u8) -> bool {
        if id != self.receive {
            return false;
        }
        self.receive = Self::advance(id, self.bound);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_ids_wrap_at_bound() {
        let mut tracker = SequenceTracker::new(130);
        let ids: Vec<u8> = (0..132).map(|_| tracker.next_send_id()).collect();
        assert_eq!(ids[129], 129);
        assert_eq!(ids[130], 0);
        assert_eq!(ids[131], 1);
    }

    #[test]
    fn test_gap_is_rejected_without_advancing() {
        let mut tracker = SequenceTracker::new(200);
        assert!(tracker.check_receive_id(0));
        assert!(tracker.check_receive_id(1));
        assert!(tracker.check_receive_id(2));
        assert!(!tracker.check_receive_id(4));
        assert_eq!(tracker.expected_receive_id(), 3);
        assert!(tracker.check_receive_id(3));
    }

    #[test]
    fn test_sender_and_receiver_agree_over_many_wraps() {
        let mut sender = SequenceTracker::new(255);
        let mut receiver = SequenceTracker::new(255);
        for _ in 0..1000 {
            assert!(receiver.check_receive_id(sender.next_send_id()));
        }
    }
}
