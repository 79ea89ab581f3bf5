//! # Peer & Session Keys
//!
//! `PeerKey` identifies a remote endpoint by `(port, address, family)`.
//! `SessionKey` pairs a peer with a 32-bit transfer id. Both are used
//! verbatim as hash keys by [`crate::tables`].

use std::fmt;

/// Address family of a peer key. Used for the loopback-default rule and
/// for canonicalising keys received from the wire/API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Default for Family {
    fn default() -> Self {
        Family::V4
    }
}

/// A remote peer, identified by port, address, and address family.
///
/// An unspecified address defaults to the loopback address for the given
/// family (`127.0.0.1` for v4, `::1` for v6); an unspecified family
/// defaults to v4. Construct via [`PeerKey::new`] to apply this
/// canonicalisation once, up front — every other part of the crate treats
/// `PeerKey` as an opaque, already-canonical hash key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub port: u16,
    pub address: String,
    pub family: Family,
}

impl PeerKey {
    /// Build a canonical peer key, filling in the loopback default for a
    /// missing address.
    pub fn new(port: u16, address: Option<&str>, family: Family) -> Self {
        let address = match address {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => match family {
                Family::V4 => "127.0.0.1".to_string(),
                Family::V6 => "::1".to_string(),
            },
        };
        PeerKey {
            port,
            address,
            family,
        }
    }

    /// Build a peer key directly from a socket address, deriving family
    /// and address from it.
    pub fn from_socket_addr(addr: std::net::SocketAddr) -> Self {
        let family = if addr.is_ipv6() {
            Family::V6
        } else {
            Family::V4
        };
        PeerKey::new(addr.port(), Some(&addr.ip().to_string()), family)
    }

    /// Resolve this key back to a concrete socket address for the I/O
    /// layer to send to.
    pub fn to_socket_addr(&self) -> Result<std::net::SocketAddr, std::net::AddrParseError> {
        let ip: std::net::IpAddr = self.address.parse()?;
        Ok(std::net::SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Family::V4 => write!(f, "{}:{}", self.address, self.port),
            Family::V6 => write!(f, "[{}]:{}", self.address, self.port),
        }
    }
}

/// A 32-bit transfer identifier, allocated per `(peer, direction)` by the
/// local endpoint. Monotonic modulo 2^32.
pub type TransferId = u32;

/// `(peer, transfer id)` — the key under which sending and receiving
/// sessions are tracked. At most one sending session and at most one
/// receiving session exist per `SessionKey` at a time (spec.md §3
/// invariant 1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub peer: PeerKey,
    pub id: TransferId,
}

impl SessionKey {
    pub fn new(peer: PeerKey, id: TransferId) -> Self {
        SessionKey { peer, id }
    }
}

/// Per-peer monotonic transfer-id allocator, wrapping at [`crate::MAX_COUNTER`].
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator { next: 0 }
    }

    /// Return the current counter value and advance it, wrapping to 0 at
    /// `MAX_COUNTER`.
    pub fn alloc(&mut self) -> TransferId {
        let id = self.next as u32;
        self.next = (self.next + 1) % crate::MAX_COUNTER;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_address_defaults_to_loopback_v4() {
        let key = PeerKey::new(9000, None, Family::V4);
        assert_eq!(key.address, "127.0.0.1");
    }

    #[test]
    fn unspecified_address_defaults_to_loopback_v6() {
        let key = PeerKey::new(9000, None, Family::V6);
        assert_eq!(key.address, "::1");
    }

    #[test]
    fn explicit_address_is_kept() {
        let key = PeerKey::new(9000, Some("10.0.0.5"), Family::V4);
        assert_eq!(key.address, "10.0.0.5");
    }

    #[test]
    fn id_allocator_wraps_at_max_counter() {
        let mut alloc = IdAllocator { next: (1u64 << 32) - 1 };
        assert_eq!(alloc.alloc(), u32::MAX);
        assert_eq!(alloc.alloc(), 0);
    }

    #[test]
    fn id_allocator_is_monotonic() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc(), 0);
        assert_eq!(alloc.alloc(), 1);
        assert_eq!(alloc.alloc(), 2);
    }

    #[test]
    fn ids_are_independent_per_peer() {
        let mut a = IdAllocator::new();
        let mut b = IdAllocator::new();
        assert_eq!(a.alloc(), 0);
        assert_eq!(a.alloc(), 1);
        assert_eq!(b.alloc(), 0);
    }
}
