//! Tail/head line extraction for remote file reads.
//!
//! Locates the start offset of the last N lines (or the end offset of the
//! first N lines) of a possibly huge file without loading it whole:
//!
//! - [`detect_encoding`] — byte-order-mark sniffing (UTF-8, UTF-16 LE/BE)
//!   with a UTF-8 fallback when no preamble is present.
//! - [`tail_start`] — backward 64 KB-block scan for the last N lines.
//! - [`head_end`] — forward scan for the first N lines.
//! - [`copy_tail`] / [`copy_head`] — copy the matched region to a sink,
//!   optionally re-encoding between input and output encodings.
//!
//! Only `\r\n` (in the detected encoding's byte form) is recognized as a
//! line terminator; callers whose files use bare `\n` will see the whole
//! file treated as one line. All returned offsets are byte offsets into
//! the underlying stream, never logical character offsets.

mod encoding;
mod scan;

pub use encoding::{DetectedEncoding, TextEncoding, detect_encoding, detect_with};
pub use scan::{BLOCK_SIZE, ScanOptions, copy_head, copy_tail, head_end, tail_start};

/// Errors from tail/head scanning.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// Underlying stream I/O failed.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A UTF-16 region had an odd byte length and cannot be decoded.
    #[error("truncated {encoding} content: odd byte length {len}")]
    TruncatedUnit {
        /// The encoding being decoded.
        encoding: TextEncoding,
        /// The offending region length.
        len: u64,
    },

    /// The matched region is not valid text in the input encoding.
    #[error("invalid {encoding} content: {message}")]
    InvalidText {
        /// The encoding being decoded.
        encoding: TextEncoding,
        /// Decoder error description.
        message: String,
    },
}
