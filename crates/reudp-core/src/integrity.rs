//! # Integrity Layer
//!
//! Wraps every outgoing datagram and unwraps every incoming one. Two
//! independent steps, applied in order on encode and reverse order on
//! decode:
//!
//! 1. A 16-bit one's-complement checksum prefix (`generate`/`verify`).
//! 2. A whole-buffer XOR obfuscation keyed by the buffer's own first word.
//!
//! This layer is integrity-only obfuscation, not cryptographic security —
//! see `spec.md` §1 Non-goals.

use bytes::{BufMut, Bytes, BytesMut};

/// Compute the 16-bit one's-complement checksum of `buf`, with an odd-byte
/// pad of `0x00` appended to the low byte if `buf.len()` is odd.
fn checksum(buf: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = buf.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0x00]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Whether `buf` (assumed to already carry a checksum prefix) is intact.
pub fn verify(buf: &[u8]) -> bool {
    checksum(buf) == 0xFFFF
}

/// Prepend the two-byte big-endian checksum of `buf` to `buf`, such that
/// `verify(&generate(buf))` is always true.
pub fn generate(buf: &[u8]) -> Bytes {
    let prefix = !checksum(buf) & 0xFFFF;
    let mut out = BytesMut::with_capacity(buf.len() + 2);
    out.put_u16(prefix as u16);
    out.extend_from_slice(buf);
    out.freeze()
}

/// XOR-obfuscate (or de-obfuscate — the operation is its own inverse)
/// `buf` in place.
///
/// The first 4 bytes are read as a big-endian key word and left
/// unchanged; every subsequent 4-byte-aligned word is XORed with that
/// key, and a trailing 1-3 byte remainder is XORed byte-wise with the
/// key's high byte. Buffers of 4 bytes or fewer pass through untouched —
/// this is a documented compatibility quirk, not a bug (see spec.md §9).
pub fn xor(buf: &mut [u8]) {
    if buf.len() <= 4 {
        return;
    }

    let key = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let key_bytes = key.to_be_bytes();
    let high_byte = key_bytes[0];

    let mut chunks = buf[4..].chunks_exact_mut(4);
    for word in &mut chunks {
        for (b, k) in word.iter_mut().zip(key_bytes.iter()) {
            *b ^= k;
        }
    }
    for b in chunks.into_remainder() {
        *b ^= high_byte;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn integrity_roundtrip(buf in proptest::collection::vec(any::<u8>(), 0..512)) {
            let wrapped = generate(&buf);
            prop_assert!(verify(&wrapped));
        }

        #[test]
        fn xor_is_involutive(mut buf in proptest::collection::vec(any::<u8>(), 0..512)) {
            let original = buf.clone();
            xor(&mut buf);
            xor(&mut buf);
            prop_assert_eq!(buf, original);
        }
    }

    #[test]
    fn checksum_prefix_achieves_0xffff() {
        let buf = b"hello reudp";
        let wrapped = generate(buf);
        assert!(verify(&wrapped));
    }

    #[test]
    fn short_buffer_passes_xor_unchanged() {
        for len in 0..=4 {
            let original = vec![0xAAu8; len];
            let mut buf = original.clone();
            xor(&mut buf);
            assert_eq!(buf, original, "buffers <= 4 bytes must be untouched");
        }
    }

    #[test]
    fn xor_changes_longer_buffers_with_nonzero_key() {
        let mut buf = vec![0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xFF];
        let original = buf.clone();
        xor(&mut buf);
        assert_ne!(buf, original);
        // key word itself untouched
        assert_eq!(&buf[0..4], &original[0..4]);
    }

    #[test]
    fn xor_tail_uses_high_byte_only() {
        // key = 0xAABBCCDD, tail has 3 bytes, each XORed with 0xAA
        let mut buf = vec![0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x00, 0x00];
        xor(&mut buf);
        assert_eq!(&buf[4..], &[0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn verify_fails_on_corrupted_buffer() {
        let mut wrapped = generate(b"integrity check").to_vec();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;
        assert!(!verify(&wrapped));
    }
}
