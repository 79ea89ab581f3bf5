//! # reudp
//!
//! Binds [`reudp_core`]'s pure-logic reliability engine to a real
//! `tokio::net::UdpSocket`. This crate owns the only I/O and the only
//! timers in the stack — everything about *what* to send and *when* a
//! transfer is done lives in `reudp-core`; this crate just drives that
//! logic against a socket on a cooperative single-task event loop.
//!
//! See [`endpoint::Endpoint`] for the public surface: `bind`, `send`,
//! `close`, and the `message`/`drain`/`timeout` event stream.

pub mod endpoint;

pub use endpoint::{Endpoint, EndpointOptions, Event};
pub use reudp_core::config::EndpointConfig;
pub use reudp_core::error::{BindError, SendError};
pub use reudp_core::peer::{Family, PeerKey, TransferId};
