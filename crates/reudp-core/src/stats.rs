//! # Session Statistics
//!
//! Per-transfer counters for observability. Designed for JSON export
//! (e.g. attaching a snapshot to a `tracing` event or exposing it over an
//! HTTP debug endpoint in `reudp`), not for the protocol's own decisions —
//! nothing in [`crate::sender`] or [`crate::receiver`] reads these back.

use serde::Serialize;

/// Counters for a single outgoing transfer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// Fragments sent, including retransmissions.
    pub fragments_sent: u64,
    /// Original payload bytes sent (excludes retransmissions).
    pub bytes_sent: u64,
    /// Fragments resent in response to a REQ.
    pub retransmissions: u64,
    /// REQ packets received from the peer.
    pub requests_received: u64,
    /// Stall-retry rounds triggered by a silent peer.
    pub stall_retries: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of sent fragments that were retransmissions.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.fragments_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.fragments_sent as f64
        }
    }
}

/// Counters for a single incoming transfer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Fragments received, including duplicates.
    pub fragments_received: u64,
    /// Unique payload bytes received.
    pub bytes_received: u64,
    /// Duplicate fragments discarded (already held or already delivered).
    pub duplicates: u64,
    /// REQ packets sent requesting missing fragments.
    pub requests_sent: u64,
    /// Hole-scan cycles run against this transfer.
    pub scan_cycles: u64,
    /// `true` once every fragment has been delivered to the application.
    pub delivered: bool,
    /// FIN packets sent (including repeats while awaiting ACK).
    pub fins_sent: u64,
    /// `true` once the sender's ACK(FIN) has been observed.
    pub finished: bool,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of received fragments that were duplicates.
    pub fn duplicate_ratio(&self) -> f64 {
        if self.fragments_received == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.fragments_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_retransmit_ratio_zero_div() {
        assert_eq!(SenderStats::new().retransmit_ratio(), 0.0);
    }

    #[test]
    fn sender_retransmit_ratio_correct() {
        let stats = SenderStats {
            fragments_sent: 100,
            retransmissions: 8,
            ..SenderStats::new()
        };
        assert!((stats.retransmit_ratio() - 0.08).abs() < 0.0001);
    }

    #[test]
    fn receiver_duplicate_ratio_zero_div() {
        assert_eq!(ReceiverStats::new().duplicate_ratio(), 0.0);
    }

    #[test]
    fn receiver_duplicate_ratio_correct() {
        let stats = ReceiverStats {
            fragments_received: 50,
            duplicates: 5,
            ..ReceiverStats::new()
        };
        assert!((stats.duplicate_ratio() - 0.10).abs() < 0.0001);
    }

    #[test]
    fn stats_serialize_to_json() {
        let stats = SenderStats {
            fragments_sent: 10,
            ..SenderStats::new()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"fragments_sent\":10"));
    }
}
