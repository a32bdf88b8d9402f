//! Backward tail scan and forward head scan.

use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::TailError;
use crate::encoding::{DetectedEncoding, TextEncoding, detect_encoding, detect_with};

/// Block size for the backward scan. Tail regions are located by reading
/// fixed-size blocks from the end, so memory use is bounded regardless of
/// file size.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Read buffer size for the forward scan.
const READ_CHUNK: usize = 8 * 1024;

/// Input/output encoding selection for the copy operations.
///
/// `input == None` sniffs the stream's byte-order mark and falls back to
/// UTF-8. `output == None` always copies the matched region verbatim —
/// in particular, content whose encoding could not actually be determined
/// is never re-encoded and therefore never corrupted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Input encoding; sniffed from the preamble when absent.
    pub input: Option<TextEncoding>,
    /// Output encoding; verbatim copy when absent or equal to the input.
    pub output: Option<TextEncoding>,
}

fn resolve<R: Read + Seek>(
    reader: &mut R,
    input: Option<TextEncoding>,
) -> Result<DetectedEncoding, TailError> {
    match input {
        Some(encoding) => detect_with(reader, encoding),
        None => detect_encoding(reader),
    }
}

/// Byte offset where the last `lines` lines of the stream begin.
///
/// `lines == 0` returns the stream length. If the stream holds fewer than
/// `lines` lines the content start (post-preamble) is returned — the whole
/// file qualifies. A `\r\n` ending exactly at end-of-file terminates the
/// last line rather than separating it from an empty one, so it is not
/// counted.
pub fn tail_start<R: Read + Seek>(
    reader: &mut R,
    lines: u64,
    input: Option<TextEncoding>,
) -> Result<u64, TailError> {
    let detected = resolve(reader, input)?;
    tail_start_detected(reader, lines, &detected)
}

fn tail_start_detected<R: Read + Seek>(
    reader: &mut R,
    lines: u64,
    detected: &DetectedEncoding,
) -> Result<u64, TailError> {
    let len = reader.seek(SeekFrom::End(0))?;
    if lines == 0 {
        return Ok(len);
    }

    let start = detected.content_start;
    if len <= start {
        return Ok(start);
    }

    let nl = detected.encoding.newline();
    let mut counted = 0u64;
    let mut block_end = len;
    // First `nl.len()` bytes of the block above, appended to each block's
    // buffer so a newline split across the block boundary is still seen.
    let mut carry: Vec<u8> = Vec::new();

    while block_end > start {
        let block_start = block_end.saturating_sub(BLOCK_SIZE as u64).max(start);
        let block_len = (block_end - block_start) as usize;

        let mut buf = vec![0u8; block_len + carry.len()];
        reader.seek(SeekFrom::Start(block_start))?;
        reader.read_exact(&mut buf[..block_len])?;
        buf[block_len..].copy_from_slice(&carry);

        // Scan windows that *start* in this block, highest offset first.
        // Windows starting in the carry region were already scanned as
        // part of the block above.
        for p in (0..block_len).rev() {
            let end = p + nl.len();
            if end > buf.len() || &buf[p..end] != nl {
                continue;
            }
            let match_end = block_start + end as u64;
            if match_end == len {
                // Trailing newline terminates the last line; not a separator.
                continue;
            }
            counted += 1;
            if counted == lines {
                return Ok(match_end);
            }
        }

        carry.clear();
        carry.extend_from_slice(&buf[..block_len.min(nl.len())]);
        block_end = block_start;
    }

    Ok(start)
}

/// Byte offset immediately after the `lines`th newline, scanning forward.
///
/// `lines == 0` returns the content start. If fewer than `lines` newlines
/// exist, the stream length is returned.
pub fn head_end<R: Read + Seek>(
    reader: &mut R,
    lines: u64,
    input: Option<TextEncoding>,
) -> Result<u64, TailError> {
    let detected = resolve(reader, input)?;
    head_end_detected(reader, lines, &detected)
}

fn head_end_detected<R: Read + Seek>(
    reader: &mut R,
    lines: u64,
    detected: &DetectedEncoding,
) -> Result<u64, TailError> {
    let start = detected.content_start;
    if lines == 0 {
        return Ok(start);
    }

    let nl = detected.encoding.newline();
    reader.seek(SeekFrom::Start(start))?;

    // Sliding window of the newline byte length, fed one byte at a time.
    let mut window: VecDeque<u8> = VecDeque::with_capacity(nl.len());
    let mut offset = start;
    let mut counted = 0u64;
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(offset);
        }
        for &byte in &buf[..n] {
            if window.len() == nl.len() {
                window.pop_front();
            }
            window.push_back(byte);
            offset += 1;
            if window.len() == nl.len() && window.iter().eq(nl.iter()) {
                counted += 1;
                if counted == lines {
                    return Ok(offset);
                }
            }
        }
    }
}

/// Copy the last `lines` lines to `writer`; returns the region's start offset.
pub fn copy_tail<R: Read + Seek, W: Write>(
    reader: &mut R,
    writer: &mut W,
    lines: u64,
    opts: &ScanOptions,
) -> Result<u64, TailError> {
    let detected = resolve(reader, opts.input)?;
    let offset = tail_start_detected(reader, lines, &detected)?;
    let len = reader.seek(SeekFrom::End(0))?;
    copy_region(reader, writer, offset, len, &detected, opts.output)?;
    Ok(offset)
}

/// Copy the first `lines` lines to `writer`; returns the region's end offset.
pub fn copy_head<R: Read + Seek, W: Write>(
    reader: &mut R,
    writer: &mut W,
    lines: u64,
    opts: &ScanOptions,
) -> Result<u64, TailError> {
    let detected = resolve(reader, opts.input)?;
    let end = head_end_detected(reader, lines, &detected)?;
    copy_region(reader, writer, detected.content_start, end, &detected, opts.output)?;
    Ok(end)
}

fn copy_region<R: Read + Seek, W: Write>(
    reader: &mut R,
    writer: &mut W,
    from: u64,
    to: u64,
    detected: &DetectedEncoding,
    output: Option<TextEncoding>,
) -> Result<(), TailError> {
    reader.seek(SeekFrom::Start(from))?;
    let region_len = to.saturating_sub(from);

    let reencode = match output {
        None => false,
        Some(out) => out != detected.encoding,
    };

    if !reencode {
        std::io::copy(&mut reader.by_ref().take(region_len), writer)?;
        return Ok(());
    }

    // The region is at most the requested lines, so buffering it is fine.
    let mut raw = Vec::with_capacity(region_len as usize);
    reader.by_ref().take(region_len).read_to_end(&mut raw)?;
    let text = decode(&raw, detected.encoding)?;
    let out = output.expect("reencode implies output encoding");
    writer.write_all(&encode(&text, out))?;
    Ok(())
}

fn decode(bytes: &[u8], encoding: TextEncoding) -> Result<String, TailError> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| {
            TailError::InvalidText {
                encoding,
                message: e.to_string(),
            }
        }),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            if bytes.len() % 2 != 0 {
                return Err(TailError::TruncatedUnit {
                    encoding,
                    len: bytes.len() as u64,
                });
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| match encoding {
                    TextEncoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                    _ => u16::from_be_bytes([pair[0], pair[1]]),
                })
                .collect();
            String::from_utf16(&units).map_err(|e| TailError::InvalidText {
                encoding,
                message: e.to_string(),
            })
        }
    }
}

fn encode(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Utf16Le => text
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect(),
        TextEncoding::Utf16Be => text
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect(),
    }
}
