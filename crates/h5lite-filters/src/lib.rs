//! Codec primitives for the HDF5 filter pipeline.
//!
//! These functions know nothing about the file format: they transform byte
//! buffers. `h5lite-format` wraps them as registered filters and decides when
//! and in which order they run.

use std::io::Read;

use thiserror::Error;

/// Errors raised by a codec while decoding a chunk.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The zlib stream was corrupt or truncated.
    #[error("deflate stream error: {0}")]
    Deflate(String),
    /// The Fletcher-32 trailer did not match the data.
    #[error("fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Fletcher32Mismatch { stored: u32, computed: u32 },
    /// The input is too short for the codec.
    #[error("input too short: need at least {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    /// Client data required by the codec was missing or meaningless.
    #[error("invalid client data: {0}")]
    InvalidClientData(String),
}

pub type Result<T> = std::result::Result<T, FilterError>;

/// Inflate a zlib stream.
///
/// `size_hint` pre-sizes the output buffer; pass the expected decoded chunk
/// size when it is known, or 0.
pub fn deflate_decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(size_hint);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| FilterError::Deflate(e.to_string()))?;
    Ok(out)
}

/// Undo the byte shuffle for elements of `element_size` bytes.
///
/// The shuffled layout stores byte 0 of every element, then byte 1 of every
/// element, and so on. Trailing bytes that do not form a whole element are
/// left in place.
pub fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte in 0..element_size {
        let plane = &data[byte * count..(byte + 1) * count];
        for (i, &b) in plane.iter().enumerate() {
            out[i * element_size + byte] = b;
        }
    }
    let whole = count * element_size;
    out[whole..].copy_from_slice(&data[whole..]);
    out
}

/// Apply the byte shuffle. Only the inverse runs on read; this exists for
/// producing test inputs.
pub fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..count {
        for byte in 0..element_size {
            out[byte * count + i] = data[i * element_size + byte];
        }
    }
    let whole = count * element_size;
    out[whole..].copy_from_slice(&data[whole..]);
    out
}

/// Fletcher-32 over 16-bit big-endian words, as HDF5 computes it.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    let mut words = data.chunks_exact(2);

    // 360 words is the longest run before the sums can overflow.
    loop {
        let mut taken = 0;
        for w in words.by_ref().take(360) {
            sum1 += (u32::from(w[0]) << 8) | u32::from(w[1]);
            sum2 += sum1;
            taken += 1;
        }
        if taken == 0 {
            break;
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    if let [last] = words.remainder() {
        sum1 += u32::from(*last) << 8;
        sum2 += sum1;
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    (sum2 << 16) | sum1
}

/// Verify the trailing Fletcher-32 checksum and return the payload without it.
///
/// Older writers stored the checksum with the bytes of each 16-bit half
/// swapped; both forms are accepted.
pub fn fletcher32_verify(mut data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(FilterError::TooShort {
            needed: 4,
            actual: data.len(),
        });
    }
    let body_len = data.len() - 4;
    let t = &data[body_len..];
    let stored = u32::from_le_bytes([t[0], t[1], t[2], t[3]]);
    let computed = fletcher32(&data[..body_len]);
    let swapped = ((computed & 0x00ff_00ff) << 8) | ((computed & 0xff00_ff00) >> 8);
    if stored != computed && stored != swapped {
        return Err(FilterError::Fletcher32Mismatch { stored, computed });
    }
    data.truncate(body_len);
    Ok(data)
}
