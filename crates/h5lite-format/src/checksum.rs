//! Metadata checksums: Bob Jenkins' lookup3 `hashlittle`.
//!
//! Superblocks v2/v3, v2 object headers, and the B-tree v2, fractal heap and
//! array index structures all end in a 4-byte lookup3 hash of the bytes before
//! it.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};

/// lookup3 `hashlittle` with an initial value of 0.
pub fn jenkins_lookup3(data: &[u8]) -> u32 {
    hashlittle(data, 0)
}

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

fn hashlittle(data: &[u8], initval: u32) -> u32 {
    let seed = 0xdead_beef_u32
        .wrapping_add(data.len() as u32)
        .wrapping_add(initval);
    let (mut a, mut b, mut c) = (seed, seed, seed);

    // The final block (1..=12 bytes) goes through final_mix, not mix.
    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(LittleEndian::read_u32(&rest[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&rest[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    if rest.is_empty() {
        return c;
    }

    // Zero-padding the tail gives the same sums as the byte-wise switch.
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(LittleEndian::read_u32(&tail[0..4]));
    b = b.wrapping_add(LittleEndian::read_u32(&tail[4..8]));
    c = c.wrapping_add(LittleEndian::read_u32(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

/// Hash `buf[start..end]` and compare with the little-endian u32 stored at
/// `end`. Returns the stored value on success.
pub fn validate_range(buf: &[u8], start: usize, end: usize, structure: &'static str) -> Result<u32> {
    if start > end || end.checked_add(4).map_or(true, |e| e > buf.len()) {
        return Err(FormatError::UnexpectedEof {
            offset: end as u64,
            needed: 4,
            available: buf.len().saturating_sub(end),
        });
    }
    let computed = jenkins_lookup3(&buf[start..end]);
    let stored = LittleEndian::read_u32(&buf[end..end + 4]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch {
            structure,
            stored,
            computed,
        });
    }
    Ok(stored)
}

/// Validate a block whose last four bytes are the checksum of the rest.
pub fn validate_block(block: &[u8], structure: &'static str) -> Result<u32> {
    let end = block.len().checked_sub(4).ok_or(FormatError::UnexpectedEof {
        offset: 0,
        needed: 4,
        available: block.len(),
    })?;
    validate_range(block, 0, end, structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reference_vectors() {
        assert_eq!(jenkins_lookup3(b""), 0xdead_beef);
        assert_eq!(jenkins_lookup3(b"Four score and seven years ago"), 0x1777_0551);
        assert_eq!(hashlittle(b"Four score and seven years ago", 1), 0xcd62_8161);
    }

    #[test]
    fn every_tail_length_is_deterministic_and_distinct() {
        let data: Vec<u8> = (0..40u8).collect();
        let hashes: Vec<u32> = (0..=data.len()).map(|n| jenkins_lookup3(&data[..n])).collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    fn with_checksum(payload: &[u8]) -> Vec<u8> {
        let mut buf = payload.to_vec();
        buf.extend_from_slice(&jenkins_lookup3(payload).to_le_bytes());
        buf
    }

    #[test]
    fn validate_accepts_unmodified_range() {
        let buf = with_checksum(b"superblock bytes here");
        let stored = validate_range(&buf, 0, buf.len() - 4, "superblock").unwrap();
        assert_eq!(stored, jenkins_lookup3(b"superblock bytes here"));
        assert!(validate_block(&buf, "superblock").is_ok());
    }

    #[test]
    fn validate_reports_stored_and_computed() {
        let mut buf = with_checksum(b"abcdef");
        buf[0] = b'z';
        match validate_range(&buf, 0, 6, "test") {
            Err(FormatError::ChecksumMismatch { stored, computed, .. }) => {
                assert_eq!(stored, jenkins_lookup3(b"abcdef"));
                assert_eq!(computed, jenkins_lookup3(b"zbcdef"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn validate_range_out_of_bounds() {
        let buf = [0u8; 6];
        assert!(matches!(
            validate_range(&buf, 0, 4, "test"),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    proptest! {
        #[test]
        fn any_single_bit_flip_is_detected(
            payload in proptest::collection::vec(any::<u8>(), 1..256),
            idx in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut buf = with_checksum(&payload);
            let i = idx.index(payload.len());
            buf[i] ^= 1 << bit;
            let result = validate_range(&buf, 0, payload.len(), "prop");
            let is_mismatch = matches!(result, Err(FormatError::ChecksumMismatch { .. }));
            prop_assert!(is_mismatch);
        }
    }
}
