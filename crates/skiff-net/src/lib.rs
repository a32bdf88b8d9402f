//! Network layer for Skiff: wire protocol and pooled connections.
//!
//! - [`WireRequest`]/[`OpReply`] — the postcard-serialized protocol, with
//!   4-byte big-endian length-prefixed framing.
//! - [`Channel`], [`Connector`], [`NodeResolver`] — the transport seams.
//!   The bundled implementation is [`TcpChannel`]; tests substitute mocks.
//! - [`ConnectionPool`] — one cached outbound connection per logical
//!   destination, with keep-alive and TTL-eviction background loops.

mod channel;
mod error;
mod message;
mod pool;
#[cfg(test)]
mod tests;

pub use channel::{
    Channel, ChannelState, Connector, NodeResolver, Resolution, Scheme, StaticResolver,
    TcpChannel, TcpConnector,
};
pub use error::NetError;
pub use message::{
    FileOp, MAX_MESSAGE_SIZE, OpReply, ReadSpan, WireRequest, WireResponse, read_frame,
    write_frame,
};
pub use pool::{ConnectionGuard, ConnectionPool, PoolConfig, PooledConnection};
