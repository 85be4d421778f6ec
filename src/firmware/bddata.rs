//! Board data file loading.
//!
//! The file holds a single line of hex pairs; each pair becomes one byte of
//! the WRITE_BD_DATA payload.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};

use crate::hci::config::{BD_DATA_MAX_HEX_CHARS, BD_DATA_PARAM_SIZE};
use crate::hci::{VendorError, VendorResult};

/// Decode one hex pair.
pub(crate) fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some(((hi << 4) | lo) as u8)
}

/// Read and decode the board data file at `path`.
///
/// At most [`BD_DATA_MAX_HEX_CHARS`] characters are read. Trailing
/// whitespace is ignored, a short file is zero-padded and anything past the
/// 80-byte payload is dropped.
pub fn load_bd_data(path: &Path) -> VendorResult<[u8; BD_DATA_PARAM_SIZE]> {
    let unavailable = || VendorError::BdDataUnavailable {
        path: path.display().to_string(),
    };

    let file = File::open(path).map_err(|e| {
        warn!("bddata: cannot open {}: {}", path.display(), e);
        unavailable()
    })?;

    let mut raw = Vec::with_capacity(BD_DATA_MAX_HEX_CHARS);
    file.take(BD_DATA_MAX_HEX_CHARS as u64)
        .read_to_end(&mut raw)
        .map_err(|e| {
            warn!("bddata: read of {} failed: {}", path.display(), e);
            unavailable()
        })?;

    let decoded = decode_hex(trim_whitespace(&raw))?;
    if decoded.len() > BD_DATA_PARAM_SIZE {
        warn!(
            "bddata: {} bytes in {}, using the first {}",
            decoded.len(),
            path.display(),
            BD_DATA_PARAM_SIZE
        );
    }

    let mut payload = [0u8; BD_DATA_PARAM_SIZE];
    let n = decoded.len().min(BD_DATA_PARAM_SIZE);
    payload[..n].copy_from_slice(&decoded[..n]);
    debug!("bddata: loaded {} bytes from {}", n, path.display());
    Ok(payload)
}

fn trim_whitespace(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &raw[start..end]
}

fn decode_hex(text: &[u8]) -> VendorResult<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(VendorError::MalformedBdData {
            reason: format!("odd number of hex digits ({})", text.len()),
        });
    }

    text.chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            hex_pair(pair[0], pair[1]).ok_or_else(|| VendorError::MalformedBdData {
                reason: format!("invalid hex at offset {}", i * 2),
            })
        })
        .collect()
}
