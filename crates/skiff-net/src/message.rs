//! Wire protocol: postcard-encoded messages with length-prefixed framing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use skiff_types::{FaultRecord, FileEntry, RouteHeaders};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;

/// Maximum frame size: 64 MB. File payloads are chunk-sized in practice,
/// but directory enumerations can be wide.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Which part of a file a `ReadFile` wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadSpan {
    /// The whole file.
    All,
    /// The last `n` lines (backward scan).
    Tail(u64),
    /// The first `n` lines (forward scan).
    Head(u64),
}

/// A file operation, addressed by the [`RouteHeaders`] that accompany it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOp {
    /// Read a file, optionally only its head or tail lines.
    ReadFile {
        /// Absolute path on the target node.
        path: String,
        /// Which region to read.
        span: ReadSpan,
    },
    /// Write a file. The previous content, if any, is preserved until the
    /// write completes.
    WriteFile {
        /// Absolute path on the target node.
        path: String,
        /// File content.
        data: Vec<u8>,
        /// Whether an existing file may be replaced.
        overwrite: bool,
    },
    /// Delete a file.
    DeleteFile {
        /// Absolute path on the target node.
        path: String,
    },
    /// Enumerate files in a directory.
    GetFiles {
        /// Directory to enumerate.
        path: String,
        /// Optional `*`/`?` wildcard pattern on entry names.
        pattern: Option<String>,
    },
    /// Enumerate subdirectories of a directory.
    GetDirectories {
        /// Directory to enumerate.
        path: String,
    },
    /// Delete a directory.
    DeleteDirectory {
        /// Directory to delete.
        path: String,
        /// Whether to remove contents recursively.
        recursive: bool,
    },
    /// Stage a file into the intermediate blob container.
    CopyFileToBlob {
        /// Local source path.
        path: String,
        /// Destination blob name.
        blob: String,
    },
    /// Stage a file out of the intermediate blob container.
    CopyFileFromBlob {
        /// Local destination path.
        path: String,
        /// Source blob name.
        blob: String,
    },
    /// Stage a directory tree into the container under a prefix.
    CopyDirectoryToBlob {
        /// Local source directory.
        path: String,
        /// Destination blob-name prefix.
        prefix: String,
    },
    /// Stage a directory tree out of the container.
    CopyDirectoryFromBlob {
        /// Local destination directory.
        path: String,
        /// Source blob-name prefix.
        prefix: String,
    },
    /// No-op used by the pool to refresh a connection's liveness without
    /// doing any file I/O.
    KeepAlive,
}

/// A routed request: out-of-band headers plus the operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Target node and caller identity.
    pub headers: RouteHeaders,
    /// The operation to perform.
    pub op: FileOp,
}

/// Successful operation results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpReply {
    /// The operation completed with no payload.
    Done,
    /// File content (for `ReadFile`).
    Data(Vec<u8>),
    /// Enumeration rows (for `GetFiles`/`GetDirectories`).
    Entries(Vec<FileEntry>),
}

/// Every operation resolves to a reply or a taxonomy fault — raw transport
/// or filesystem errors never cross the wire.
pub type WireResponse = Result<OpReply, FaultRecord>;

/// Write one frame: 4-byte big-endian length prefix, then the postcard body.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        postcard::to_allocvec(value).map_err(|e| NetError::Serialization(e.to_string()))?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge {
            len: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame: length prefix, then that many bytes, postcard-decoded.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, NetError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge {
            len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    postcard::from_bytes(&payload).map_err(|e| NetError::Serialization(e.to_string()))
}
