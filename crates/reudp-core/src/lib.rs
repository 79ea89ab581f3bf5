//! # reudp-core
//!
//! Pure-logic reliability and pacing engine for a reliable datagram
//! transport over UDP. No sockets, no timers — just the framing, codecs,
//! and state machines that the `reudp` crate drives against a real socket.
//!
//! ## Crate structure
//!
//! - [`seqcodec`] — run-encoded 15-bit sequence list codec (REQ payloads)
//! - [`integrity`] — one's-complement checksum + XOR obfuscation
//! - [`wire`] — packet header + the five packet kinds
//! - [`peer`] — peer/transfer/session key types
//! - [`tables`] — per-peer session tables with TTL sweep
//! - [`sender`] — sender-side fragment generator, pacing, retry
//! - [`receiver`] — receiver-side reassembly, hole scan, finish-notify
//! - [`stats`] — per-session counters for observability
//! - [`config`] — tunables shared by sender and receiver
//! - [`error`] — the public, synchronous error surface

pub mod config;
pub mod error;
pub mod integrity;
pub mod peer;
pub mod receiver;
pub mod seqcodec;
pub mod sender;
pub mod stats;
pub mod tables;
pub mod wire;

/// Maximum payload carried by a single PSH fragment (MTU 1090 minus 14
/// bytes of framing headroom).
pub const MAX_PACKET_PAYLOAD: usize = 1076;

/// Default parallel window — number of fragments paced per burst.
pub const PARALLEL_COUNT: usize = 92;

/// Delay before the receiver's first hole-scan after a PSH.
pub const LATENCY_MS: u64 = 35;

/// Default round-trip-time estimate (includes `LATENCY_MS`).
pub const DEFAULT_RTT_MS: u64 = 200 + LATENCY_MS;

/// Default pacing bandwidth estimate, in bytes/sec (4 MiB/s).
pub const DEFAULT_BANDWIDTH_BPS: u64 = 4 * 1024 * 1024;

/// Largest payload `send()` will accept (2^15 fragments of `MAX_PACKET_PAYLOAD`).
pub const MAX_BUFFER_SIZE: usize = 0x8000 * MAX_PACKET_PAYLOAD;

/// Transfer-id counter modulus (wraps `u32` id allocation to 0).
pub const MAX_COUNTER: u64 = 1 << 32;

/// Receiver hole-scan retry budget before a transfer is abandoned.
pub const MAX_RECEIVE_RETRIES: u32 = 10;

/// Sender stall-retry budget before a transfer times out.
pub const MAX_SEND_RETRIES: u32 = 3;

/// Finish-notify (FIN) retransmit budget after delivery.
pub const MAX_FINISH_RETRIES: u32 = 10;

/// Idle time after delivery before a receiving session may be garbage
/// collected or its id lazily recycled.
pub const DELIVERED_GC_SECS: u64 = 30 * 60;

/// Session-table sweep interval.
pub const SWEEP_INTERVAL_SECS: u64 = 30;

/// Session-table TTL — entries unvisited this long are swept.
pub const SESSION_TTL_SECS: u64 = 60 * 60;
