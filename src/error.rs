//! Error types for the register table, frame codec, endpoints, and config.

use std::io;

use thiserror::Error;

use crate::modbus::codec::Header;

/// Failure while accessing a [`RegisterTable`](crate::modbus::table::RegisterTable).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// The requested cells do not fit inside the table.
    #[error("register range {start}..{end} exceeds table size {size}")]
    OutOfRange {
        /// First requested address.
        start: usize,
        /// One past the last requested address.
        end: usize,
        /// Number of cells in the table.
        size: usize,
    },
    /// A previous holder of the table lock panicked.
    #[error("register table lock poisoned")]
    Poisoned,
}

/// Reasons an inbound byte sequence is not accepted as a Modbus TCP request.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the MBAP header plus function code.
    #[error("frame of {0} bytes is shorter than the 8-byte header")]
    TooShort(usize),
    /// Protocol identifier other than 0.
    #[error("protocol id {} is not Modbus", .header.protocol_id)]
    ProtocolId {
        /// Header as decoded from the peer.
        header: Header,
    },
    /// Declared length does not match the bytes that follow the length field.
    #[error("declared length {} does not match {actual} trailing bytes", .header.length)]
    LengthMismatch {
        /// Header as decoded from the peer.
        header: Header,
        /// Bytes actually received after the length field.
        actual: usize,
    },
}

impl FrameError {
    /// Returns the peer's header when enough bytes arrived to decode one.
    pub fn header(&self) -> Option<&Header> {
        match self {
            Self::TooShort(_) => None,
            Self::ProtocolId { header } | Self::LengthMismatch { header, .. } => Some(header),
        }
    }
}

/// Failure to bring up or run a Modbus endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Any other socket-level failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Configuration problem with the dotted path of the offending field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g. `"servers.pv1.port"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    /// Builds an error for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
