//! Text-encoding detection from byte-order marks.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use crate::TailError;

/// Text encodings recognized by preamble sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8 (also the fallback when no preamble is found).
    Utf8,
    /// UTF-16 little-endian.
    Utf16Le,
    /// UTF-16 big-endian.
    Utf16Be,
}

impl TextEncoding {
    /// The byte-order mark for this encoding.
    pub fn preamble(&self) -> &'static [u8] {
        match self {
            Self::Utf8 => &[0xEF, 0xBB, 0xBF],
            Self::Utf16Le => &[0xFF, 0xFE],
            Self::Utf16Be => &[0xFE, 0xFF],
        }
    }

    /// The byte form of the `\r\n` line terminator in this encoding.
    pub fn newline(&self) -> &'static [u8] {
        match self {
            Self::Utf8 => b"\r\n",
            Self::Utf16Le => &[0x0D, 0x00, 0x0A, 0x00],
            Self::Utf16Be => &[0x00, 0x0D, 0x00, 0x0A],
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
        };
        f.write_str(s)
    }
}

/// Result of preamble sniffing.
///
/// `content_start` is the offset of the first content byte in the
/// *underlying byte stream* — the preamble length when one was found,
/// zero otherwise. Offsets returned by the scanners are relative to the
/// stream, not the logical character sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedEncoding {
    /// The detected (or fallback) encoding.
    pub encoding: TextEncoding,
    /// Byte offset where content begins (= preamble length).
    pub content_start: u64,
    /// Whether a preamble was actually found. When false, the encoding is
    /// the default fallback and the content's true encoding is unknown.
    pub from_preamble: bool,
}

/// Sniff the stream's leading bytes for a known byte-order mark.
///
/// Longest preambles are tried first so UTF-8's 3-byte mark wins over the
/// UTF-16 2-byte marks. Falls back to UTF-8 with `content_start == 0` when
/// nothing matches. The stream position afterwards is unspecified; callers
/// seek explicitly.
pub fn detect_encoding<R: Read + Seek>(reader: &mut R) -> Result<DetectedEncoding, TailError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut head = [0u8; 3];
    let mut filled = 0;
    // A short stream is not an error; match against however much exists.
    while filled < head.len() {
        let n = reader.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    for encoding in [
        TextEncoding::Utf8,
        TextEncoding::Utf16Le,
        TextEncoding::Utf16Be,
    ] {
        let preamble = encoding.preamble();
        if filled >= preamble.len() && &head[..preamble.len()] == preamble {
            return Ok(DetectedEncoding {
                encoding,
                content_start: preamble.len() as u64,
                from_preamble: true,
            });
        }
    }

    Ok(DetectedEncoding {
        encoding: TextEncoding::Utf8,
        content_start: 0,
        from_preamble: false,
    })
}

/// Detect with a caller-specified encoding: the preamble (if present) is
/// still consumed so offsets stay in stream bytes, but no sniffing happens.
pub fn detect_with<R: Read + Seek>(
    reader: &mut R,
    encoding: TextEncoding,
) -> Result<DetectedEncoding, TailError> {
    reader.seek(SeekFrom::Start(0))?;
    let preamble = encoding.preamble();
    let mut head = vec![0u8; preamble.len()];
    let mut filled = 0;
    while filled < head.len() {
        let n = reader.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let matched = filled >= preamble.len() && head[..preamble.len()] == *preamble;
    Ok(DetectedEncoding {
        encoding,
        content_start: if matched { preamble.len() as u64 } else { 0 },
        from_preamble: matched,
    })
}
