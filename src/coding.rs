// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Variable-length integer codec used in database keys and block payloads.
//!
//! The encoding is big-endian and self-delimiting: the count of leading
//! one-bits of the first byte selects the total length. Because the
//! length prefixes occupy disjoint ascending first-byte ranges and the
//! payload is big-endian, the byte-lexicographic order of two encodings
//! equals the numeric order of the encoded values. This property is
//! what makes packed keys of the same family sort in tuple order.

use crate::{Error, Result};

const MAX_1: u64 = 0x7F;
const MAX_2: u64 = 0x3FFF;
const MAX_3: u64 = 0x1F_FFFF;
const MAX_4: u64 = 0x0FFF_FFFF;
const MAX_5: u64 = 0x0007_FFFF_FFFF;
const MAX_6: u64 = 0x03FF_FFFF_FFFF;
const MAX_7: u64 = 0x0001_FFFF_FFFF_FFFF;
const MAX_8: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// Appends a packed unsigned integer to `out`.
pub fn pack_uint64(out: &mut Vec<u8>, v: u64) {
    if v <= MAX_1 {
        #[allow(clippy::cast_possible_truncation)]
        out.push(v as u8);
        return;
    }

    let (marker, payload_bytes) = if v <= MAX_2 {
        (0x80, 1)
    } else if v <= MAX_3 {
        (0xC0, 2)
    } else if v <= MAX_4 {
        (0xE0, 3)
    } else if v <= MAX_5 {
        (0xF0, 4)
    } else if v <= MAX_6 {
        (0xF8, 5)
    } else if v <= MAX_7 {
        (0xFC, 6)
    } else if v <= MAX_8 {
        (0xFE, 7)
    } else {
        (0xFF, 8)
    };

    if payload_bytes == 8 {
        // the 0xFF marker byte carries no payload bits
        out.push(marker);
    } else {
        #[allow(clippy::cast_possible_truncation)]
        out.push(marker | ((v >> (payload_bytes * 8)) as u8));
    }

    for i in (0..payload_bytes).rev() {
        #[allow(clippy::cast_possible_truncation)]
        out.push((v >> (i * 8)) as u8);
    }
}

/// Appends a packed 32-bit unsigned integer to `out`.
pub fn pack_uint(out: &mut Vec<u8>, v: u32) {
    pack_uint64(out, u64::from(v));
}

/// Returns the encoded length of `v` in bytes.
#[must_use]
pub fn packed_len(v: u32) -> usize {
    match u64::from(v) {
        0..=MAX_1 => 1,
        v if v <= MAX_2 => 2,
        v if v <= MAX_3 => 3,
        v if v <= MAX_4 => 4,
        _ => 5,
    }
}

// (marker bits consumed, extra bytes, minimum canonical value)
fn decode_header(first: u8) -> (u64, usize, u64) {
    match first {
        0x00..=0x7F => (u64::from(first), 0, 0),
        0x80..=0xBF => (u64::from(first & 0x3F), 1, MAX_1 + 1),
        0xC0..=0xDF => (u64::from(first & 0x1F), 2, MAX_2 + 1),
        0xE0..=0xEF => (u64::from(first & 0x0F), 3, MAX_3 + 1),
        0xF0..=0xF7 => (u64::from(first & 0x07), 4, MAX_4 + 1),
        0xF8..=0xFB => (u64::from(first & 0x03), 5, MAX_5 + 1),
        0xFC..=0xFD => (u64::from(first & 0x01), 6, MAX_6 + 1),
        0xFE => (0, 7, MAX_7 + 1),
        0xFF => (0, 8, MAX_8 + 1),
    }
}

/// Parses a packed unsigned integer, advancing the cursor past it.
pub fn unpack_uint64(cursor: &mut &[u8]) -> Result<u64> {
    let (&first, rest) = cursor.split_first().ok_or(Error::KeyMalformed)?;
    let (mut value, extra, min) = decode_header(first);

    if rest.len() < extra {
        return Err(Error::KeyMalformed);
    }
    for &b in rest.get(..extra).ok_or(Error::KeyMalformed)? {
        value = (value << 8) | u64::from(b);
    }
    if value < min {
        // non-canonical (overlong) encoding
        return Err(Error::KeyMalformed);
    }

    *cursor = rest.get(extra..).ok_or(Error::KeyMalformed)?;

    Ok(value)
}

/// Parses a packed 32-bit unsigned integer, advancing the cursor past it.
pub fn unpack_uint(cursor: &mut &[u8]) -> Result<u32> {
    let v = unpack_uint64(cursor)?;
    u32::try_from(v).map_err(|_| Error::KeyMalformed)
}

/// Reader over a packed delta-coded ascending sequence.
///
/// The first value is stored absolute, every following value as the
/// difference to its predecessor. There is no length prefix; the
/// sequence ends when the byte cursor reaches the end of the payload.
pub struct AscendingReader<'a> {
    data: &'a [u8],
    prev: u32,
}

impl<'a> AscendingReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, prev: 0 }
    }

    /// Remaining unread payload bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl Iterator for AscendingReader<'_> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match unpack_uint(&mut self.data) {
            Ok(delta) => {
                let Some(value) = self.prev.checked_add(delta) else {
                    return Some(Err(Error::BlockCorrupt("delta sequence overflows u32")));
                };
                if value <= self.prev && self.prev != 0 {
                    return Some(Err(Error::BlockCorrupt("delta sequence not ascending")));
                }
                self.prev = value;
                Some(Ok(value))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Appends a strictly ascending sequence as packed deltas.
///
/// # Panics
///
/// Panics in debug mode if the sequence is not strictly ascending.
pub fn pack_ascending(out: &mut Vec<u8>, values: &[u32]) {
    let mut prev = 0;
    for &v in values {
        debug_assert!(v > prev || prev == 0, "sequence must be strictly ascending");
        pack_uint(out, v - prev);
        prev = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn roundtrip(v: u64) -> Vec<u8> {
        let mut buf = vec![];
        pack_uint64(&mut buf, v);
        let mut cursor = &buf[..];
        assert_eq!(v, unpack_uint64(&mut cursor).expect("should decode"));
        assert!(cursor.is_empty());
        buf
    }

    #[test]
    fn uint_roundtrip() {
        for v in [
            0u64,
            1,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            0x1F_FFFF,
            0x20_0000,
            0x0FFF_FFFF,
            0x1000_0000,
            u64::from(u32::MAX),
            u64::MAX,
        ] {
            roundtrip(v);
        }
    }

    #[test]
    fn uint_order_matches_encoding_order() {
        let mut prev: Option<Vec<u8>> = None;
        for v in [0u64, 1, 17, 127, 128, 300, 16383, 16384, 70000, 2_097_151, 2_097_152, 4_000_000_000] {
            let buf = roundtrip(v);
            if let Some(p) = prev {
                assert!(p < buf, "encoding order broken at {v}");
            }
            prev = Some(buf);
        }
    }

    #[test]
    fn overlong_encoding_is_rejected() {
        // 0x05 encoded in two bytes
        let buf = [0x80u8, 0x05];
        let mut cursor = &buf[..];
        assert!(unpack_uint(&mut cursor).is_err());
    }

    #[test]
    fn uint32_overflow_is_rejected() {
        let mut buf = vec![];
        pack_uint64(&mut buf, u64::from(u32::MAX) + 1);
        let mut cursor = &buf[..];
        assert!(unpack_uint(&mut cursor).is_err());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut buf = vec![];
        pack_uint(&mut buf, 100_000);
        let mut cursor = &buf[..buf.len() - 1];
        assert!(unpack_uint(&mut cursor).is_err());
    }

    #[test]
    fn ascending_roundtrip() {
        let values = [2u32, 5, 9, 10, 1000, 1001, 4_000_000_000];
        let mut buf = vec![];
        pack_ascending(&mut buf, &values);

        let decoded = AscendingReader::new(&buf)
            .collect::<Result<Vec<_>>>()
            .expect("should decode");
        assert_eq!(&values[..], &decoded[..]);
    }

    #[test]
    fn empty_ascending_sequence() {
        assert_eq!(0, AscendingReader::new(&[]).count());
    }
}
