//! # Sequence Codec
//!
//! Compresses/decompresses sets of 15-bit sequence numbers for REQ payloads
//! using run-endpoint marking: the high bit (`0x8000`) flags a value as one
//! end of a closed range rather than a standalone sequence number.
//!
//! Used only by REQ packets — the receiver zips a hole list to request
//! retransmission, the sender unzips it back into individual sequences.

use crate::error::CodecError;

/// Top bit marks a value as a range endpoint rather than a standalone seq.
const RANGE_MARKER: u16 = 0x8000;
const VALUE_MASK: u16 = 0x7FFF;

/// Compress a set of sequence numbers into the run-encoded wire form.
///
/// Every maximal run of 2+ consecutive values collapses to a marked
/// `(start, end)` pair; singletons pass through unmarked. Input is sorted
/// and deduplicated first — order and duplicates never affect the result.
///
/// # Errors
///
/// Returns [`CodecError::InvalidInput`] if any value has the top bit set
/// (`>= 0x8000`), since that bit is reserved as the range marker.
pub fn zip(seqs: &[u16]) -> Result<Vec<u16>, CodecError> {
    let mut sorted: Vec<u16> = seqs.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    for &v in &sorted {
        if v & RANGE_MARKER != 0 {
            return Err(CodecError::InvalidInput(v));
        }
    }

    let mut out = Vec::with_capacity(sorted.len());
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == end + 1 {
            end = sorted[j];
            j += 1;
        }

        if end > start {
            out.push(start | RANGE_MARKER);
            out.push(end | RANGE_MARKER);
        } else {
            out.push(start);
        }
        i = j;
    }

    Ok(out)
}

/// Decompress a run-encoded sequence list back into individual values.
///
/// A marked value followed by another marked value is a closed range
/// `[a, b]`, fully expanded. A marked value *not* followed by another
/// marked value decays to its masked form (a lone marker is meaningless
/// on its own, so it is treated as if the marker bit were never set).
///
/// The result is deduplicated and sorted ascending.
pub fn unzip(seqs: &[u16]) -> Vec<u16> {
    let mut sorted: Vec<u16> = seqs.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = Vec::with_capacity(sorted.len());
    let mut i = 0;
    while i < sorted.len() {
        let v = sorted[i];
        if v & RANGE_MARKER != 0 {
            if i + 1 < sorted.len() && sorted[i + 1] & RANGE_MARKER != 0 {
                let start = v & VALUE_MASK;
                let end = sorted[i + 1] & VALUE_MASK;
                for s in start..=end {
                    out.push(s);
                }
                i += 2;
                continue;
            }
            out.push(v & VALUE_MASK);
            i += 1;
            continue;
        }
        out.push(v);
        i += 1;
    }

    out.sort_unstable();
    out.dedup();
    out
}
