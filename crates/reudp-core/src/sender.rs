//! # Sender Engine
//!
//! Pure logic — no sockets, no real timers. [`SenderEngine`] owns one
//! [`SendSession`] per `(peer, transfer id)`, fragments outbound payloads,
//! paces their emission, answers REQ with the missing fragments, and
//! retries a stalled transfer before giving up. The driving loop (in the
//! `reudp` crate) calls [`SenderEngine::send`]/[`on_req`]/[`on_fin`] as
//! packets arrive and [`SenderEngine::poll`] on a short tick to advance
//! pacing and retry timers, then drains [`SenderEvent`]s to act on.
//!
//! Mirrors the teacher's `Sender` state machine in `strata-transport`:
//! pure `&mut self` transitions, an output queue instead of direct I/O,
//! generalised from a single always-open stream to many independent
//! `(peer, id)` transfers each with their own fragment generator.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::config::EndpointConfig;
use crate::error::SendError;
use crate::peer::{PeerKey, SessionKey, TransferId};
use crate::stats::SenderStats;
use crate::tables::{PeerAllocators, SessionTable};
use crate::wire::{ErrCode, Packet};
use crate::{MAX_BUFFER_SIZE, MAX_PACKET_PAYLOAD};

/// Pull-based fragment generator (spec.md §9 design note): packs fragments
/// lazily, on demand, rather than up front. The first call (`requested =
/// None`) yields the opening burst; every later call packs exactly the
/// sequences the caller asks for (normally the REQ-suppressed request
/// set).
struct FragmentGenerator {
    payload: Bytes,
    total_count: u16,
    opening_window: u16,
    opened: bool,
}

impl FragmentGenerator {
    fn new(payload: Bytes, total_count: u16, opening_window: u16) -> Self {
        FragmentGenerator {
            payload,
            total_count,
            opening_window,
            opened: false,
        }
    }

    fn pack(&self, seq: u16) -> Bytes {
        let start = seq as usize * MAX_PACKET_PAYLOAD;
        let end = (start + MAX_PACKET_PAYLOAD).min(self.payload.len());
        self.payload.slice(start..end)
    }

    /// Advance the generator. `None` requests the opening burst;
    /// `Some(seqs)` packs exactly those (already deduped, filtered to
    /// valid range) sequences.
    fn next(&mut self, requested: Option<&[u16]>) -> Vec<(u16, Bytes)> {
        match requested {
            None => {
                self.opened = true;
                (0..self.opening_window.min(self.total_count))
                    .map(|seq| (seq, self.pack(seq)))
                    .collect()
            }
            Some(seqs) => seqs
                .iter()
                .copied()
                .filter(|&seq| seq < self.total_count)
                .map(|seq| (seq, self.pack(seq)))
                .collect(),
        }
    }
}

/// One outgoing transfer in flight.
struct SendSession {
    peer: PeerKey,
    id: TransferId,
    generator: FragmentGenerator,
    total_count: u16,
    /// Packed PSH packets awaiting the next pacing tick, keyed by sequence.
    outbound_queue: BTreeMap<u16, Packet>,
    /// Suppression window: sequences already requested within the last RTT.
    last_request_sequences: BTreeSet<u16>,
    request_clear_at: Option<Instant>,
    /// Sequences transmitted on the most recent pacing burst, kept around
    /// for the stall-retry's direct resend.
    last_burst: Vec<u16>,
    pacing_interval: Duration,
    pacing_next: Instant,
    stall_deadline: Option<Instant>,
    stall_round: u32,
    stall_base: Duration,
    stats: SenderStats,
}

/// Observable effects of driving the sender engine: packets to put on the
/// wire and the two sender-side lifecycle events.
#[derive(Debug, Clone)]
pub enum SenderEvent {
    /// Hand `packet` to the integrity layer and transmit it to `peer`.
    Transmit { peer: PeerKey, packet: Packet },
    /// A transfer's FIN was acknowledged by the peer.
    Drain { id: TransferId, peer: PeerKey },
    /// A transfer was abandoned after exhausting its stall-retry budget.
    Timeout { id: TransferId, peer: PeerKey },
}

/// Owns every outgoing transfer on this endpoint.
pub struct SenderEngine {
    config: EndpointConfig,
    sessions: SessionTable<SendSession>,
    allocators: PeerAllocators,
    events: Vec<SenderEvent>,
}

impl SenderEngine {
    pub fn new(config: EndpointConfig) -> Self {
        SenderEngine {
            config,
            sessions: SessionTable::new(),
            allocators: PeerAllocators::new(),
            events: Vec::new(),
        }
    }

    /// Compute the per-burst pacing interval and the opening-window burst
    /// multiplier from the configured bandwidth/RTT (spec.md §4.F).
    fn pacing(&self) -> (Duration, u16) {
        let interval_ms = self.config.pacing_interval_ms(MAX_PACKET_PAYLOAD);
        let frequency = (self.config.rtt_ms / interval_ms.max(1)).max(1);
        (Duration::from_millis(interval_ms), frequency as u16)
    }

    /// Begin sending `payload` to `peer`. Returns the allocated transfer
    /// id, or `None` for an empty payload (spec.md §6: no traffic, no id).
    ///
    /// # Errors
    ///
    /// [`SendError::Range`] if `payload.len() > MAX_BUFFER_SIZE`.
    pub fn send(
        &mut self,
        payload: Bytes,
        peer: PeerKey,
        now: Instant,
    ) -> Result<Option<TransferId>, SendError> {
        if payload.is_empty() {
            return Ok(None);
        }
        if payload.len() > MAX_BUFFER_SIZE {
            return Err(SendError::Range {
                len: payload.len(),
                max: MAX_BUFFER_SIZE,
            });
        }

        let id = self.allocators.alloc(&peer);
        let total_count = payload.len().div_ceil(MAX_PACKET_PAYLOAD) as u16;
        let parallel_count = (self.config.parallel_count as u16).max(1);
        let (pacing_interval, frequency) = self.pacing();
        let opening_window = (parallel_count.saturating_mul(frequency)).min(total_count);

        let mut generator = FragmentGenerator::new(payload.clone(), total_count, opening_window);
        let initial = generator.next(None);

        let mut stats = SenderStats::new();
        stats.fragments_sent += initial.len() as u64;
        stats.bytes_sent = initial.iter().map(|(_, b)| b.len() as u64).sum();

        let mut outbound_queue = BTreeMap::new();
        let mut last_burst = Vec::with_capacity(initial.len());
        for (seq, bytes) in initial {
            last_burst.push(seq);
            outbound_queue.insert(
                seq,
                Packet::Psh {
                    id,
                    seq,
                    single_total: parallel_count,
                    total_count,
                    payload: bytes,
                },
            );
        }

        let session = SendSession {
            peer: peer.clone(),
            id,
            generator,
            total_count,
            outbound_queue,
            last_request_sequences: BTreeSet::new(),
            request_clear_at: None,
            last_burst,
            pacing_interval,
            pacing_next: now,
            stall_deadline: None,
            stall_round: 0,
            stall_base: Duration::from_millis(self.config.rtt_ms + 1000),
            stats,
        };

        self.sessions
            .insert(SessionKey::new(peer, id), session, now);
        Ok(Some(id))
    }

    /// A REQ arrived for `(peer, id)` naming `seqs` (already deflated).
    pub fn on_req(&mut self, peer: &PeerKey, id: TransferId, seqs: &[u16], now: Instant) {
        let key = SessionKey::new(peer.clone(), id);
        let Some(session) = self.sessions.get_mut(&key) else {
            self.events.push(SenderEvent::Transmit {
                peer: peer.clone(),
                packet: Packet::Err {
                    id,
                    code: ErrCode::IdNotFound,
                },
            });
            return;
        };

        session.stats.requests_received += 1;
        session.stall_deadline = None;
        session.stall_round = 0;

        let fresh: Vec<u16> = seqs
            .iter()
            .copied()
            .filter(|s| !session.last_request_sequences.contains(s))
            .collect();

        session.last_request_sequences = seqs.iter().copied().collect();
        session.request_clear_at = Some(now + Duration::from_millis(self.config.rtt_ms));

        if fresh.is_empty() {
            self.sessions.touch(&key, now);
            return;
        }

        let parallel_count = (self.config.parallel_count as u16).max(1);
        let total_count = session.total_count;
        let packed = session.generator.next(Some(&fresh));
        session.stats.retransmissions += packed.len() as u64;
        session.stats.fragments_sent += packed.len() as u64;
        for (seq, bytes) in packed {
            session.outbound_queue.insert(
                seq,
                Packet::Psh {
                    id,
                    seq,
                    single_total: parallel_count,
                    total_count,
                    payload: bytes,
                },
            );
        }
        self.sessions.touch(&key, now);
    }

    /// A FIN arrived from `peer` for `id`: the peer has received every
    /// fragment. Always ACKs, even for an id we no longer track (the
    /// peer's finish-notify retry may outlive our session).
    pub fn on_fin(&mut self, peer: &PeerKey, id: TransferId, now: Instant) {
        let key = SessionKey::new(peer.clone(), id);
        if let Some(session) = self.sessions.remove(&key) {
            tracing::info!(
                peer = %session.peer,
                id,
                fragments_sent = session.stats.fragments_sent,
                retransmit_ratio = session.stats.retransmit_ratio(),
                "transfer drained"
            );
            self.events.push(SenderEvent::Drain {
                id,
                peer: session.peer,
            });
        }
        let _ = now;
        self.events.push(SenderEvent::Transmit {
            peer: peer.clone(),
            packet: Packet::ack_fin(id),
        });
    }

    /// Advance pacing and stall-retry timers for every open session.
    /// Call on a short, regular tick (the `reudp` endpoint uses a few ms).
    pub fn poll(&mut self, now: Instant) {
        let mut timed_out = Vec::new();

        for (key, session) in self.sessions.iter_mut() {
            if let Some(clear_at) = session.request_clear_at {
                if now >= clear_at {
                    session.last_request_sequences.clear();
                    session.request_clear_at = None;
                }
            }

            if now >= session.pacing_next {
                let burst: Vec<u16> = session
                    .outbound_queue
                    .keys()
                    .take(self.config.parallel_count.max(1))
                    .copied()
                    .collect();
                if !burst.is_empty() {
                    session.last_burst = burst.clone();
                    for seq in &burst {
                        if let Some(packet) = session.outbound_queue.remove(seq) {
                            self.events.push(SenderEvent::Transmit {
                                peer: session.peer.clone(),
                                packet,
                            });
                        }
                    }
                }
                session.pacing_next = now + session.pacing_interval;

                if session.outbound_queue.is_empty() && session.stall_deadline.is_none() {
                    session.stall_deadline = Some(now + session.stall_base);
                    session.stall_round = 0;
                }
            }

            if let Some(deadline) = session.stall_deadline {
                if now >= deadline {
                    if session.stall_round >= self.config.max_send_retries {
                        timed_out.push(key.clone());
                        continue;
                    }
                    session.stats.stall_retries += 1;
                    for seq in &session.last_burst {
                        let parallel_count = (self.config.parallel_count as u16).max(1);
                        let bytes = session.generator.pack(*seq);
                        self.events.push(SenderEvent::Transmit {
                            peer: session.peer.clone(),
                            packet: Packet::Psh {
                                id: session.id,
                                seq: *seq,
                                single_total: parallel_count,
                                total_count: session.total_count,
                                payload: bytes,
                            },
                        });
                    }
                    session.stall_round += 1;
                    let next_wait = session.stall_base.mul_f64(1.8f64.powi(session.stall_round as i32));
                    session.stall_deadline = Some(now + next_wait);
                }
            }
        }

        for key in timed_out {
            if let Some(session) = self.sessions.remove(&key) {
                self.events.push(SenderEvent::Timeout {
                    id: session.id,
                    peer: session.peer,
                });
            }
        }
    }

    /// Sweep sessions untouched for the configured session TTL.
    pub fn sweep(&mut self, ttl: Duration, now: Instant) {
        self.sessions.sweep(ttl, now, |key, _| {
            tracing::debug!(peer = %key.peer, id = key.id, "sender session swept on ttl expiry");
        });
    }

    /// Drain pending events for the I/O layer to act on.
    pub fn drain_events(&mut self) -> impl Iterator<Item = SenderEvent> + '_ {
        self.events.drain(..)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Family;
    use crate::wire::AckedKind;

    fn peer() -> PeerKey {
        PeerKey::new(9000, Some("10.0.0.1"), Family::V4)
    }

    fn cfg() -> EndpointConfig {
        EndpointConfig {
            parallel_count: 4,
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn empty_payload_returns_none_and_creates_no_session() {
        let mut engine = SenderEngine::new(cfg());
        let now = Instant::now();
        let id = engine.send(Bytes::new(), peer(), now).unwrap();
        assert_eq!(id, None);
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut engine = SenderEngine::new(cfg());
        let now = Instant::now();
        let payload = Bytes::from(vec![0u8; MAX_BUFFER_SIZE + 1]);
        let err = engine.send(payload, peer(), now).unwrap_err();
        assert!(matches!(err, SendError::Range { .. }));
    }

    #[test]
    fn send_queues_an_opening_burst() {
        let mut engine = SenderEngine::new(cfg());
        let now = Instant::now();
        let payload = Bytes::from(vec![7u8; MAX_PACKET_PAYLOAD * 10]);
        let id = engine.send(payload, peer(), now).unwrap().unwrap();
        assert_eq!(id, 0);
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn poll_transmits_paced_bursts() {
        let mut engine = SenderEngine::new(cfg());
        let mut now = Instant::now();
        let payload = Bytes::from(vec![1u8; MAX_PACKET_PAYLOAD * 10]);
        engine.send(payload, peer(), now).unwrap();

        now += Duration::from_secs(1);
        engine.poll(now);
        let events: Vec<_> = engine.drain_events().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, SenderEvent::Transmit { .. })));
    }

    #[test]
    fn unknown_id_req_emits_err() {
        let mut engine = SenderEngine::new(cfg());
        let now = Instant::now();
        engine.on_req(&peer(), 99, &[0, 1], now);
        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SenderEvent::Transmit {
                packet: Packet::Err {
                    code: ErrCode::IdNotFound,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn fin_emits_drain_and_ack() {
        let mut engine = SenderEngine::new(cfg());
        let now = Instant::now();
        let payload = Bytes::from(vec![1u8; MAX_PACKET_PAYLOAD * 3]);
        let id = engine.send(payload, peer(), now).unwrap().unwrap();

        engine.on_fin(&peer(), id, now);
        let events: Vec<_> = engine.drain_events().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, SenderEvent::Drain { id: d, .. } if *d == id)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SenderEvent::Transmit { packet: Packet::Ack { acked: AckedKind::Fin, .. }, .. })));
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn fin_for_unknown_id_still_acks() {
        let mut engine = SenderEngine::new(cfg());
        let now = Instant::now();
        engine.on_fin(&peer(), 123, now);
        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SenderEvent::Transmit {
                packet: Packet::Ack { acked: AckedKind::Fin, .. },
                ..
            }
        ));
    }

    #[test]
    fn req_suppresses_repeated_sequences_within_one_rtt() {
        let mut engine = SenderEngine::new(cfg());
        let mut now = Instant::now();
        let payload = Bytes::from(vec![1u8; MAX_PACKET_PAYLOAD * 20]);
        engine.send(payload, peer(), now).unwrap();
        engine.drain_events().for_each(drop);

        engine.on_req(&peer(), 0, &[5, 6], now);
        let first: Vec<_> = engine.drain_events().collect();
        assert!(!first.is_empty());

        now += Duration::from_millis(1);
        engine.on_req(&peer(), 0, &[5, 6], now);
        let second: Vec<_> = engine.drain_events().collect();
        assert!(second.is_empty(), "repeated REQ within one RTT must be suppressed");
    }

    #[test]
    fn stall_retry_escalates_and_times_out_after_three_rounds() {
        let mut engine = SenderEngine::new(cfg());
        let mut now = Instant::now();
        let payload = Bytes::from(vec![1u8; MAX_PACKET_PAYLOAD * 2]);
        let id = engine.send(payload, peer(), now).unwrap().unwrap();

        now += Duration::from_secs(1);
        engine.poll(now);
        engine.drain_events().for_each(drop);

        // Advance well past the stall_base and each escalating round.
        for _ in 0..4 {
            now += Duration::from_secs(10);
            engine.poll(now);
        }

        let events: Vec<_> = engine.drain_events().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, SenderEvent::Timeout { id: d, .. } if *d == id)));
    }
}
