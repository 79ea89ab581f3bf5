//! # Error Taxonomy
//!
//! Only the synchronous, user-API-facing errors are exposed as `Result`
//! types. Wire-level and protocol-level conditions (a bad checksum, an
//! unknown packet type, a REQ for an unknown transfer, a duplicate
//! fragment) never propagate across the API boundary — they are absorbed
//! into session-state transitions and surfaced only through the
//! `message`/`drain`/`timeout` event stream plus `tracing` diagnostics.
//! See `spec.md` §7.

use thiserror::Error;

/// Errors raised synchronously by [`crate::seqcodec::zip`].
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CodecError {
    /// A value had the range-marker bit (`0x8000`) set, which is reserved.
    #[error("sequence value {0:#06x} has the reserved range-marker bit set")]
    InvalidInput(u16),
}

/// Errors raised synchronously by `Endpoint::send`.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SendError {
    /// The byte payload exceeds `MAX_BUFFER_SIZE`.
    #[error("payload of {len} bytes exceeds the maximum transfer size of {max} bytes")]
    Range {
        /// Length of the rejected payload.
        len: usize,
        /// The maximum allowed length (`MAX_BUFFER_SIZE`).
        max: usize,
    },
    /// The endpoint has been closed.
    #[error("endpoint is closed")]
    State,
    /// No destination peer was supplied and no default peer is configured.
    #[error("no destination peer given and no default peer configured")]
    Missing,
}

/// Errors raised synchronously when constructing or binding an endpoint.
#[derive(Debug, Error)]
pub enum BindError {
    /// The underlying socket bind failed.
    #[error("failed to bind UDP socket: {0}")]
    Io(#[from] std::io::Error),
}

/// Internal decode failures for a raw datagram. Never surfaced to callers
/// as a `Result` — the endpoint logs these via `tracing` and drops the
/// datagram, same as a failed checksum (spec.md §6: malformed input is a
/// wire-level condition, not an API error).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum WireError {
    #[error("datagram of {0} bytes is shorter than the 6-byte packet header")]
    Truncated(usize),
    #[error("unknown packet type byte {0:#04x}")]
    UnknownType(u8),
    #[error("REQ payload length {0} is not a multiple of 2")]
    MalformedReqPayload(usize),
    #[error("ACK payload is empty, expected a 1-byte acked-kind code")]
    MalformedAckPayload,
    #[error("ERR payload is empty, expected a 1-byte reason code")]
    MalformedErrPayload,
}
