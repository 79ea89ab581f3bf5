//! # Receiver Engine
//!
//! Pure logic — no sockets, no real timers. [`ReceiverEngine`] owns one
//! [`RecvSession`] per `(peer, transfer id)`: it admits PSH fragments,
//! detects duplicates, scans for holes, and drives the timed REQ/FIN
//! cycle described in spec.md §4.E. The driving loop calls
//! [`ReceiverEngine::on_psh`]/`on_ack_fin`/`on_err` as packets arrive and
//! [`ReceiverEngine::poll`] on a tick to advance hole-scan and
//! finish-notify timers, then drains [`ReceiverEvent`]s.
//!
//! Mirrors the teacher's `Receiver` in `strata-transport`: an `events:
//! Vec<_>` accumulator drained by the caller rather than direct
//! callbacks, generalised from one reorder buffer per link to one sparse
//! reassembly buffer per `(peer, id)`.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use quanta::Instant;

use crate::config::EndpointConfig;
use crate::peer::{PeerKey, SessionKey, TransferId};
use crate::stats::ReceiverStats;
use crate::tables::SessionTable;
use crate::wire::Packet;
use crate::DELIVERED_GC_SECS;

/// One incoming transfer, complete or in progress.
struct RecvSession {
    peer: PeerKey,
    id: TransferId,
    /// Sparse reassembly buffer, indexed by sequence number. `None` until
    /// `total_count` is known (first PSH seen).
    fragments: Vec<Option<Bytes>>,
    total_count: Option<u16>,
    /// The sender's current pacing-window hint; bounds how many holes one
    /// hole-scan collects.
    single_total: u16,
    filled: u16,
    last_scan_index: u16,
    retry_count: u32,
    scan_deadline: Instant,
    delivered: bool,
    delivered_at: Option<Instant>,
    stats: ReceiverStats,
}

impl RecvSession {
    fn new(peer: PeerKey, id: TransferId, now: Instant) -> Self {
        RecvSession {
            peer,
            id,
            fragments: Vec::new(),
            total_count: None,
            single_total: 1,
            filled: 0,
            last_scan_index: 0,
            retry_count: 0,
            scan_deadline: now,
            delivered: false,
            delivered_at: None,
            stats: ReceiverStats::new(),
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self.total_count, Some(total) if self.filled == total)
    }

    /// Sparse scan for up to `single_total` empty indices, starting at
    /// `last_scan_index`. Advances `last_scan_index` to the first hole
    /// found (or to `total_count` if the scan found none).
    fn hole_scan(&mut self) -> Vec<u16> {
        let total = self.total_count.unwrap_or(0);
        let limit = self.single_total.max(1) as usize;
        let mut holes = Vec::with_capacity(limit);
        let mut first_hole = None;

        let mut i = self.last_scan_index;
        while i < total && holes.len() < limit {
            if self.fragments[i as usize].is_none() {
                if first_hole.is_none() {
                    first_hole = Some(i);
                }
                holes.push(i);
            }
            i += 1;
        }

        self.last_scan_index = first_hole.unwrap_or(total);
        holes
    }

    fn deliver(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for slot in &self.fragments {
            if let Some(bytes) = slot {
                buf.put_slice(bytes);
            }
        }
        buf.freeze()
    }
}

/// One `(peer, id)` awaiting ACK(FIN) after full delivery.
struct FinishNotify {
    next_retry: Instant,
    retry_count: u32,
}

/// Observable effects of driving the receiver engine.
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    /// A complete transfer has been reassembled.
    Message {
        payload: Bytes,
        peer: PeerKey,
        id: TransferId,
    },
    /// Hand `packet` to the integrity layer and transmit it to `peer`.
    Transmit { peer: PeerKey, packet: Packet },
}

/// Owns every incoming transfer on this endpoint.
pub struct ReceiverEngine {
    config: EndpointConfig,
    sessions: SessionTable<RecvSession>,
    finish_notify: HashMap<SessionKey, FinishNotify>,
    events: Vec<ReceiverEvent>,
}

impl ReceiverEngine {
    pub fn new(config: EndpointConfig) -> Self {
        ReceiverEngine {
            config,
            sessions: SessionTable::new(),
            finish_notify: HashMap::new(),
            events: Vec::new(),
        }
    }

    fn rtt(&self) -> Duration {
        Duration::from_millis(self.config.rtt_ms)
    }

    /// A PSH fragment arrived. Admits a new `(peer, id)` lazily, applies
    /// the lazy-recycle rule for a stale delivered entry, stores the
    /// fragment (or counts a duplicate), and re-arms the hole-check timer.
    pub fn on_psh(
        &mut self,
        peer: &PeerKey,
        id: TransferId,
        seq: u16,
        single_total: u16,
        total_count: u16,
        payload: Bytes,
        now: Instant,
    ) {
        let key = SessionKey::new(peer.clone(), id);

        let recycle = matches!(
            self.sessions.get(&key),
            Some(s) if s.delivered
                && s.delivered_at
                    .is_some_and(|t| now.duration_since(t) > Duration::from_secs(DELIVERED_GC_SECS))
        );
        if recycle {
            self.sessions.remove(&key);
            self.finish_notify.remove(&key);
        }

        if !self.sessions.contains(&key) {
            self.sessions
                .insert(key.clone(), RecvSession::new(peer.clone(), id, now), now);
        }

        let session = self.sessions.get_mut(&key).expect("just inserted");

        if session.total_count.is_none() {
            session.total_count = Some(total_count);
            session.fragments = vec![None; total_count as usize];
        }
        session.single_total = single_total;

        let idx = seq as usize;
        if idx >= session.fragments.len() || session.fragments[idx].is_some() {
            session.stats.duplicates += 1;
            self.sessions.touch(&key, now);
            return;
        }

        session.fragments[idx] = Some(payload.clone());
        session.filled += 1;
        session.retry_count = 0;
        session.stats.fragments_received += 1;
        session.stats.bytes_received += payload.len() as u64;
        session.scan_deadline = now + Duration::from_millis(crate::LATENCY_MS);
        self.sessions.touch(&key, now);
    }

    /// ACK(FIN) arrived: stop retrying the finish-notify for this transfer.
    pub fn on_ack_fin(&mut self, peer: &PeerKey, id: TransferId) {
        let key = SessionKey::new(peer.clone(), id);
        if let Some(session) = self.sessions.get_mut(&key) {
            session.stats.finished = true;
        }
        self.finish_notify.remove(&key);
    }

    /// ERR(ID_NOT_FOUND) arrived: the sender has no memory of this
    /// transfer, so destroy it immediately rather than keep scanning.
    pub fn on_err_id_not_found(&mut self, peer: &PeerKey, id: TransferId) {
        let key = SessionKey::new(peer.clone(), id);
        self.sessions.remove(&key);
        self.finish_notify.remove(&key);
    }

    /// Advance the hole-check and finish-notify timers for every session.
    pub fn poll(&mut self, now: Instant) {
        let rtt = self.rtt();
        let mut to_abort = Vec::new();

        for (key, session) in self.sessions.iter_mut() {
            if session.delivered || now < session.scan_deadline {
                continue;
            }

            if session.is_complete() {
                let payload = session.deliver();
                self.events.push(ReceiverEvent::Message {
                    payload,
                    peer: session.peer.clone(),
                    id: session.id,
                });
                self.events.push(ReceiverEvent::Transmit {
                    peer: session.peer.clone(),
                    packet: Packet::Fin { id: session.id },
                });
                session.delivered = true;
                session.delivered_at = Some(now);
                session.stats.delivered = true;
                session.stats.fins_sent += 1;
                self.finish_notify.insert(
                    key.clone(),
                    FinishNotify {
                        next_retry: now + Duration::from_secs(1),
                        retry_count: 0,
                    },
                );
            } else if session.retry_count > self.config.max_receive_retries {
                to_abort.push(key.clone());
            } else {
                let holes = session.hole_scan();
                session.stats.requests_sent += 1;
                session.stats.scan_cycles += 1;
                session.retry_count += 1;
                session.scan_deadline = now + rtt + Duration::from_millis(crate::LATENCY_MS);
                self.events.push(ReceiverEvent::Transmit {
                    peer: session.peer.clone(),
                    packet: Packet::Req {
                        id: session.id,
                        seqs: holes,
                    },
                });
            }
        }

        for key in to_abort {
            self.sessions.remove(&key);
            tracing::debug!(peer = %key.peer, id = key.id, "receive session aborted after exhausting hole-scan retries");
        }

        let mut exhausted = Vec::new();
        for (key, notify) in self.finish_notify.iter_mut() {
            if now < notify.next_retry {
                continue;
            }
            if notify.retry_count >= self.config.max_finish_retries {
                exhausted.push(key.clone());
                continue;
            }
            notify.retry_count += 1;
            notify.next_retry = now + Duration::from_secs(1);
            if let Some(session) = self.sessions.get_mut(key) {
                session.stats.fins_sent += 1;
            }
            self.events.push(ReceiverEvent::Transmit {
                peer: key.peer.clone(),
                packet: Packet::Fin { id: key.id },
            });
        }
        for key in exhausted {
            self.finish_notify.remove(&key);
        }
    }

    /// Sweep sessions untouched for the configured session TTL, and
    /// garbage-collect delivered sessions idle past the recycle grace
    /// period.
    pub fn sweep(&mut self, ttl: Duration, now: Instant) {
        self.sessions.sweep(ttl, now, |key, _| {
            tracing::debug!(peer = %key.peer, id = key.id, "receive session swept on ttl expiry");
        });
        self.sessions.remove_if(
            |_, s| {
                s.delivered
                    && s.delivered_at
                        .is_some_and(|t| now.duration_since(t) > Duration::from_secs(DELIVERED_GC_SECS))
            },
            |_, _| {},
        );
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ReceiverEvent> + '_ {
        self.events.drain(..)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
