//! # Endpoint
//!
//! Wires a `tokio::net::UdpSocket` to the integrity layer, the packet
//! codec, and the sender/receiver engines (spec.md §4, component G).
//! The socket, both engines, and their timers are owned by a single
//! background task (spec.md §5: "single-threaded cooperative event
//! loop") so that no session ever needs a lock — [`Endpoint`] itself is
//! just a cheaply-cloneable handle that posts commands to that task.
//!
//! Mirrors the teacher's [`BondingRuntime`](strata_bonding::runtime) —
//! a worker owning the real protocol state, driven over a channel from
//! a thin public handle — generalised from a background OS thread plus
//! a bounded `crossbeam_channel` to a `tokio` task plus `mpsc`, since
//! the engine's suspension points (socket recv, timers) are exactly
//! what `tokio::select!` is for.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use quanta::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use reudp_core::config::EndpointConfig;
use reudp_core::error::{BindError, SendError};
use reudp_core::peer::{Family, PeerKey, TransferId};
use reudp_core::receiver::{ReceiverEngine, ReceiverEvent};
use reudp_core::sender::{SenderEngine, SenderEvent};
use reudp_core::wire::{AckedKind, ErrCode, Packet};
use reudp_core::{integrity, SESSION_TTL_SECS, SWEEP_INTERVAL_SECS};

/// Largest datagram this endpoint will ever receive: the packet MTU the
/// protocol targets plus headroom for the integrity prefix.
const RECV_BUF_SIZE: usize = 2048;

/// How often the driver task advances pacing and hole-scan timers.
/// Short enough that `LATENCY_MS` (35ms) and the pacing interval are
/// both resolved with reasonable precision, long enough not to spin.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Configuration accepted by [`Endpoint::bind`], covering the local
/// bind address, an optional default destination peer, the engine
/// tunables (parallelism, bandwidth, RTT, retry budgets), and an
/// optional caller-supplied socket (spec.md §6: the `socket` config
/// option, for reusing a socket an external dispatch layer already
/// created).
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Local port to bind. Ignored if `socket` is set.
    pub port: u16,
    /// Local address to bind. `None` binds the unspecified address for
    /// `family`. Ignored if `socket` is set.
    pub address: Option<String>,
    /// Local address family. Ignored if `socket` is set.
    pub family: Family,
    /// Default destination peer for `send()` calls that omit one.
    pub remote_port: Option<u16>,
    pub remote_address: Option<String>,
    pub remote_family: Family,
    /// Number of fragments paced per burst. Defaults to
    /// [`reudp_core::PARALLEL_COUNT`].
    pub parallel_count: Option<usize>,
    /// Pacing bandwidth estimate, in megabits/sec. Defaults to
    /// [`reudp_core::DEFAULT_BANDWIDTH_BPS`] (converted from Mbps here
    /// since that's the unit the spec's config option uses).
    pub band_width_mbps: Option<f64>,
    /// Round-trip-time estimate, in milliseconds. Defaults to
    /// [`reudp_core::DEFAULT_RTT_MS`].
    pub rtt_ms: Option<u64>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        EndpointOptions {
            port: 0,
            address: None,
            family: Family::V4,
            remote_port: None,
            remote_address: None,
            remote_family: Family::V4,
            parallel_count: None,
            band_width_mbps: None,
            rtt_ms: None,
        }
    }
}

impl EndpointOptions {
    fn bind_addr(&self) -> SocketAddr {
        let default_unspecified = match self.family {
            Family::V4 => "0.0.0.0",
            Family::V6 => "::",
        };
        let ip: std::net::IpAddr = self
            .address
            .as_deref()
            .unwrap_or(default_unspecified)
            .parse()
            .unwrap_or_else(|_| default_unspecified.parse().expect("valid unspecified IP"));
        SocketAddr::new(ip, self.port)
    }

    fn default_peer(&self) -> Option<PeerKey> {
        self.remote_port
            .map(|port| PeerKey::new(port, self.remote_address.as_deref(), self.remote_family))
    }

    fn engine_config(&self) -> EndpointConfig {
        let mut cfg = EndpointConfig::default();
        if let Some(pc) = self.parallel_count {
            cfg.parallel_count = pc;
        }
        if let Some(mbps) = self.band_width_mbps {
            cfg.bandwidth_bps = ((mbps * 1_000_000.0) / 8.0) as u64;
        }
        if let Some(rtt) = self.rtt_ms {
            cfg.rtt_ms = rtt;
        }
        cfg
    }
}

/// A lifecycle event surfaced to the application (spec.md §6).
#[derive(Debug, Clone)]
pub enum Event {
    /// One complete transfer was received.
    Message {
        payload: Bytes,
        peer: PeerKey,
        id: TransferId,
    },
    /// One sent transfer was acknowledged by the peer.
    Drain { id: TransferId, peer: PeerKey },
    /// One sent transfer was abandoned after exhausting its retry budget.
    Timeout { id: TransferId, peer: PeerKey },
}

enum Command {
    Send {
        payload: Bytes,
        peer: Option<PeerKey>,
        resp: oneshot::Sender<Result<Option<TransferId>, SendError>>,
    },
    Close {
        resp: oneshot::Sender<()>,
    },
}

/// A bound reliable-datagram endpoint.
///
/// Cloning an `Endpoint` shares the same background driver task and
/// socket; every clone observes the same `closed` state. Dropping the
/// last handle does *not* close the endpoint — call [`Endpoint::close`]
/// explicitly, same as the teacher's `BondingRuntime` requires an
/// explicit `shutdown()` (its `Drop` impl calls it for the owning
/// handle, which this type mirrors via `close_on_drop`).
#[derive(Clone)]
pub struct Endpoint {
    cmd_tx: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
}

impl Endpoint {
    /// Bind a UDP socket per `options` and start the driver task.
    /// Returns the endpoint handle plus the event stream the
    /// application should poll for `message`/`drain`/`timeout` events.
    pub async fn bind(
        options: EndpointOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>), BindError> {
        let socket = UdpSocket::bind(options.bind_addr()).await?;
        Ok(Self::from_socket(socket, options))
    }

    /// Start the driver task against an already-bound socket (spec.md
    /// §6's `socket` config option: reuse a socket an external dispatch
    /// layer created).
    pub fn from_socket(
        socket: UdpSocket,
        options: EndpointOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let engine_config = options.engine_config();
        let default_peer = options.default_peer();
        tokio::spawn(run(socket, cmd_rx, event_tx, engine_config, default_peer));

        (Endpoint { cmd_tx, closed }, event_rx)
    }

    /// Begin sending `payload` to `peer` (or the configured default peer
    /// if `peer` is `None`). Returns the allocated transfer id, or
    /// `None` for an empty payload.
    ///
    /// # Errors
    ///
    /// [`SendError::State`] if the endpoint is closed.
    /// [`SendError::Missing`] if `peer` is omitted and no default peer
    /// is configured. [`SendError::Range`] if `payload` exceeds
    /// [`reudp_core::MAX_BUFFER_SIZE`].
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        peer: Option<PeerKey>,
    ) -> Result<Option<TransferId>, SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::State);
        }
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                payload: payload.into(),
                peer,
                resp: resp_tx,
            })
            .map_err(|_| SendError::State)?;
        resp_rx.await.map_err(|_| SendError::State)?
    }

    /// Close the endpoint. Idempotent: every call after the first
    /// observes `closed` already set and returns immediately. Draining
    /// the driver task runs every session's `on_before_destroy`
    /// equivalent (timers are simply dropped with the task).
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { resp: resp_tx }).is_ok() {
            let _ = resp_rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Wrap an inner packet for the wire: encode, checksum-prefix, XOR.
fn wrap(packet: &Packet) -> Bytes {
    let inner = packet.encode();
    let framed = integrity::generate(&inner);
    let mut buf = BytesMut::from(&framed[..]);
    integrity::xor(&mut buf);
    buf.freeze()
}

/// Unwrap a raw datagram into a decoded packet, or `None` if it failed
/// the integrity check, was truncated, or named an unknown type —
/// every case is a silent wire-level drop (spec.md §7: `WireDrop`).
fn unwrap(datagram: &[u8]) -> Option<Packet> {
    let mut buf = datagram.to_vec();
    integrity::xor(&mut buf);
    if !integrity::verify(&buf) {
        return None;
    }
    match Packet::decode(&buf[2..]) {
        Ok(packet) => Some(packet),
        Err(err) => {
            tracing::debug!(?err, "dropped datagram: decode failed");
            None
        }
    }
}

async fn send_packet(socket: &UdpSocket, peer: &PeerKey, packet: &Packet) {
    match peer.to_socket_addr() {
        Ok(addr) => {
            let bytes = wrap(packet);
            if let Err(err) = socket.send_to(&bytes, addr).await {
                tracing::warn!(%peer, %err, "send_to failed");
            }
        }
        Err(err) => tracing::warn!(%peer, %err, "peer address does not parse, dropping packet"),
    }
}

fn dispatch(
    sender: &mut SenderEngine,
    receiver: &mut ReceiverEngine,
    peer: &PeerKey,
    packet: Packet,
    now: Instant,
) {
    match packet {
        Packet::Psh {
            id,
            seq,
            single_total,
            total_count,
            payload,
        } => receiver.on_psh(peer, id, seq, single_total, total_count, payload, now),
        Packet::Req { id, seqs } => sender.on_req(peer, id, &seqs, now),
        Packet::Fin { id } => sender.on_fin(peer, id, now),
        Packet::Ack { id, acked } => {
            if matches!(acked, AckedKind::Fin) {
                receiver.on_ack_fin(peer, id);
            }
        }
        Packet::Err { id, code } => {
            if matches!(code, ErrCode::IdNotFound) {
                receiver.on_err_id_not_found(peer, id);
            }
        }
    }
}

async fn run(
    socket: UdpSocket,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<Event>,
    engine_config: EndpointConfig,
    default_peer: Option<PeerKey>,
) {
    let mut sender = SenderEngine::new(engine_config.clone());
    let mut receiver = ReceiverEngine::new(engine_config);
    let mut recv_buf = vec![0u8; RECV_BUF_SIZE];
    let mut poll_tick = tokio::time::interval(POLL_INTERVAL);
    let mut sweep_tick = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    let ttl = Duration::from_secs(SESSION_TTL_SECS);

    loop {
        tokio::select! {
            recv = socket.recv_from(&mut recv_buf) => {
                match recv {
                    Ok((n, addr)) => {
                        let peer = PeerKey::from_socket_addr(addr);
                        if let Some(packet) = unwrap(&recv_buf[..n]) {
                            dispatch(&mut sender, &mut receiver, &peer, packet, Instant::now());
                        } else {
                            tracing::trace!(%peer, "dropped malformed or unverifiable datagram");
                        }
                    }
                    Err(err) => tracing::warn!(%err, "recv_from failed"),
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send { payload, peer, resp }) => {
                        let target = peer.or_else(|| default_peer.clone());
                        let result = match target {
                            None => Err(SendError::Missing),
                            Some(p) => sender.send(payload, p, Instant::now()),
                        };
                        let _ = resp.send(result);
                    }
                    Some(Command::Close { resp }) => {
                        let _ = resp.send(());
                        break;
                    }
                    None => break,
                }
            }
            _ = poll_tick.tick() => {
                let now = Instant::now();
                sender.poll(now);
                receiver.poll(now);
            }
            _ = sweep_tick.tick() => {
                let now = Instant::now();
                sender.sweep(ttl, now);
                receiver.sweep(ttl, now);
            }
        }

        let sender_events: Vec<_> = sender.drain_events().collect();
        for ev in sender_events {
            match ev {
                SenderEvent::Transmit { peer, packet } => send_packet(&socket, &peer, &packet).await,
                SenderEvent::Drain { id, peer } => {
                    let _ = event_tx.send(Event::Drain { id, peer });
                }
                SenderEvent::Timeout { id, peer } => {
                    let _ = event_tx.send(Event::Timeout { id, peer });
                }
            }
        }

        let receiver_events: Vec<_> = receiver.drain_events().collect();
        for ev in receiver_events {
            match ev {
                ReceiverEvent::Message { payload, peer, id } => {
                    let _ = event_tx.send(Event::Message { payload, peer, id });
                }
                ReceiverEvent::Transmit { peer, packet } => {
                    send_packet(&socket, &peer, &packet).await
                }
            }
        }
    }

    tracing::info!("endpoint driver task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrips_a_psh_packet() {
        let packet = Packet::Psh {
            id: 7,
            seq: 1,
            single_total: 4,
            total_count: 9,
            payload: Bytes::from_static(b"hello endpoint"),
        };
        let wire_bytes = wrap(&packet);
        let decoded = unwrap(&wire_bytes).expect("roundtrip should decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn unwrap_rejects_corrupted_datagram() {
        let packet = Packet::Fin { id: 1 };
        let mut wire_bytes = wrap(&packet).to_vec();
        let last = wire_bytes.len() - 1;
        wire_bytes[last] ^= 0xFF;
        assert!(unwrap(&wire_bytes).is_none());
    }

    #[tokio::test]
    async fn send_without_peer_and_no_default_errors_missing() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (endpoint, _events) = Endpoint::from_socket(socket, EndpointOptions::default());
        let err = endpoint.send(Bytes::from_static(b"hi"), None).await.unwrap_err();
        assert!(matches!(err, SendError::Missing));
    }

    #[tokio::test]
    async fn send_empty_payload_returns_none() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = PeerKey::new(9000, Some("127.0.0.1"), Family::V4);
        let (endpoint, _events) = Endpoint::from_socket(socket, EndpointOptions::default());
        let id = endpoint.send(Bytes::new(), Some(peer)).await.unwrap();
        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_sends() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (endpoint, _events) = Endpoint::from_socket(socket, EndpointOptions::default());
        endpoint.close().await;
        endpoint.close().await;
        let peer = PeerKey::new(9000, Some("127.0.0.1"), Family::V4);
        let err = endpoint
            .send(Bytes::from_static(b"hi"), Some(peer))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::State));
    }
}
