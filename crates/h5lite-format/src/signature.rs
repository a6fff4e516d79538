//! Format signature search.

use crate::error::{FormatError, Result};

/// The 8-byte format signature: `\x89HDF\r\n\x1a\n`.
pub const SIGNATURE: [u8; 8] = [0x89, 0x48, 0x44, 0x46, 0x0d, 0x0a, 0x1a, 0x0a];

/// Find the signature at offset 0, 512, 1024, 2048, ...
///
/// Probes below `search_start` are skipped, so a caller can look past an
/// earlier match. The first match wins.
pub fn find_signature(data: &[u8], search_start: u64) -> Result<usize> {
    let mut offset: u64 = 0;
    loop {
        let Ok(pos) = usize::try_from(offset) else {
            break;
        };
        if pos.saturating_add(SIGNATURE.len()) > data.len() {
            break;
        }
        if offset >= search_start && data[pos..pos + SIGNATURE.len()] == SIGNATURE {
            return Ok(pos);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Err(FormatError::SignatureNotFound {
        searched_to: data.len() as u64,
    })
}
