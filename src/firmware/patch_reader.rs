//! Patch file readers.
//!
//! Binary patches (`.pbn`) are a stream of records:
//! `[address u32 LE][length u32 LE][length bytes]`, terminated by the
//! address `0xFFFFFFFF`.
//!
//! Text patches (`.seq`) are ASCII lines. Lines tagged `01` hold one HCI
//! command as hex: opcode low/high byte at columns 3..7, parameter length
//! at 8..10 and the parameters from column 10 on. Every other line is a
//! comment or a record this library does not send.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use log::trace;

use super::bddata::hex_pair;
use crate::hci::config::PATCH_END_ADDRESS;
use crate::hci::{HciCommand, VendorError, VendorResult};

/// On-disk patch encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFormat {
    Binary,
    Text,
}

impl PatchFormat {
    /// Open `path` for streaming in this format.
    pub fn open(self, path: &Path) -> VendorResult<PatchStream> {
        let reader = BufReader::new(File::open(path)?);
        Ok(match self {
            PatchFormat::Binary => PatchStream::Binary(BinaryPatchReader::new(reader)),
            PatchFormat::Text => PatchStream::Text(TextPatchReader::new(reader)),
        })
    }
}

/// An open patch file owned by the firmware sequence.
pub enum PatchStream {
    Binary(BinaryPatchReader<BufReader<File>>),
    Text(TextPatchReader<BufReader<File>>),
}

impl std::fmt::Debug for PatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchStream::Binary(r) => write!(f, "PatchStream::Binary(offset {})", r.offset()),
            PatchStream::Text(r) => write!(f, "PatchStream::Text(line {})", r.line_number()),
        }
    }
}

// ============================================================================
// Binary Records
// ============================================================================

/// Header of one binary patch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRecord {
    pub address: u32,
    pub length: u32,
}

/// Reader for `.pbn` record streams.
pub struct BinaryPatchReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> BinaryPatchReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record header. `None` marks the end-of-stream sentinel.
    pub fn next_record(&mut self) -> VendorResult<Option<PatchRecord>> {
        let address = self.read_u32()?;
        if address == PATCH_END_ADDRESS {
            return Ok(None);
        }
        let length = self.read_u32()?;
        trace!("patch: record at 0x{:08X}, {} bytes", address, length);
        Ok(Some(PatchRecord { address, length }))
    }

    /// Read `len` bytes of record data.
    pub fn read_chunk(&mut self, len: usize) -> VendorResult<Vec<u8>> {
        let mut data = vec![0u8; len];
        self.fill(&mut data)?;
        Ok(data)
    }

    fn read_u32(&mut self) -> VendorResult<u32> {
        let mut word = [0u8; 4];
        self.fill(&mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn fill(&mut self, buf: &mut [u8]) -> VendorResult<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(VendorError::TruncatedPatch {
                    offset: self.offset,
                })
            }
            Err(e) => Err(VendorError::Io(e)),
        }
    }
}

// ============================================================================
// Text Records
// ============================================================================

/// Reader for `.seq` command scripts.
pub struct TextPatchReader<R> {
    inner: R,
    line_number: usize,
}

impl<R: BufRead> TextPatchReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line_number: 0,
        }
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Next command line, skipping everything else. `None` at end of file.
    pub fn next_command(&mut self) -> VendorResult<Option<HciCommand>> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if self.inner.read_until(b'\n', &mut line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            if let Some(command) = parse_line(&line)? {
                return Ok(Some(command));
            }
        }
    }
}

/// Lines that never carry a command: comments (`*`), blank lines, `F`
/// headers and non-command records (`x2...`).
pub(crate) fn is_filtered(line: &[u8]) -> bool {
    match line.first() {
        None | Some(b'*') | Some(b'\r') | Some(b'\n') | Some(b'F') => true,
        _ => line.get(1) == Some(&b'2') || line.iter().all(|b| b.is_ascii_whitespace()),
    }
}

/// Parse one script line into a command, or `None` if it is not a command line.
pub(crate) fn parse_line(line: &[u8]) -> VendorResult<Option<HciCommand>> {
    if is_filtered(line) || !line.starts_with(b"01") {
        return Ok(None);
    }

    let malformed = || VendorError::MalformedPatchLine {
        line: String::from_utf8_lossy(line).trim_end().to_string(),
    };
    let byte_at = |pos: usize| -> VendorResult<u8> {
        match (line.get(pos), line.get(pos + 1)) {
            (Some(&hi), Some(&lo)) => hex_pair(hi, lo).ok_or_else(malformed),
            _ => Err(malformed()),
        }
    };

    let opcode = u16::from_le_bytes([byte_at(3)?, byte_at(5)?]);
    let param_len = byte_at(8)? as usize;
    let params = (0..param_len)
        .map(|i| byte_at(10 + i * 2))
        .collect::<VendorResult<Vec<u8>>>()?;

    Ok(Some(HciCommand::new(opcode, params)?))
}
