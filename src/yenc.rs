//! yEnc codec and CRC32
//!
//! Encoding adds 42 (mod 256) to every byte and escapes the four bytes that
//! would break an NNTP line (`NUL`, `LF`, `CR` and the escape character `=`
//! itself) as `=` followed by the byte plus 64. Lines are wrapped after every
//! [`LINE_LENGTH`] *source* bytes, so an escaped line can be up to twice as long
//! on the wire.
//!
//! All functions here are pure and can be called from any number of workers.

use crate::error::YencError;

/// Source bytes per encoded line, also advertised as `line=` in `=ybegin`
pub const LINE_LENGTH: usize = 128;

const ESCAPE: u8 = b'=';

/// Line terminator written after each encoded line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::Crlf => b"\r\n",
        }
    }
}

#[inline]
fn needs_escape(c: u8) -> bool {
    matches!(c, 0 | b'\n' | b'\r' | ESCAPE)
}

/// Encode a chunk with `\n` line endings
pub fn encode(raw: &[u8]) -> Vec<u8> {
    encode_with(raw, LineEnding::Lf)
}

/// Encode a chunk with the given line ending
pub fn encode_with(raw: &[u8], ending: LineEnding) -> Vec<u8> {
    let terminator = ending.as_bytes();
    let lines = raw.len().div_ceil(LINE_LENGTH);
    // Worst case every byte is escaped; typical data escapes ~1.6%
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 32 + lines * terminator.len());

    for line in raw.chunks(LINE_LENGTH) {
        for &byte in line {
            let c = byte.wrapping_add(42);
            if needs_escape(c) {
                out.push(ESCAPE);
                out.push(c.wrapping_add(64));
            } else {
                out.push(c);
            }
        }
        out.extend_from_slice(terminator);
    }

    out
}

/// Decode an encoded payload (without `=ybegin`/`=yend` lines)
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>, YencError> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut iter = encoded.iter().copied();

    while let Some(byte) = iter.next() {
        match byte {
            b'\r' | b'\n' => continue,
            ESCAPE => {
                let next = iter.next().ok_or(YencError::TrailingEscape)?;
                out.push(next.wrapping_sub(64).wrapping_sub(42));
            }
            c => out.push(c.wrapping_sub(42)),
        }
    }

    Ok(out)
}

/// Standard CRC-32 (IEEE, reflected) of `data`
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Render a CRC the way it appears in `=yend` trailers
pub fn format_crc(crc: u32) -> String {
    format!("{:08x}", crc)
}
