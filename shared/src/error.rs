//! Error taxonomy shared by both peers.

use thiserror::Error;

/// Failure to turn a byte sequence into a packet.
///
/// Always local to the offending packet: the receiver logs it, drops the
/// bytes and carries on with the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("{kind} packet body is {actual} bytes, expected {expected}")]
    TruncatedMessage {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("malformed packet body: {0}")]
    Malformed(String),
}

impl From<bincode::Error> for DecodeError {
    fn from(err: bincode::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

/// Failure to turn a packet into bytes.
#[derive(Debug, Error)]
#[error("failed to encode packet: {0}")]
pub struct EncodeError(#[from] pub bincode::Error);

/// Failure while reading or writing a framed control packet on a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Why the server refused or closed a reliable-channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    ServerFull = 1,
    VersionMismatch = 2,
    InvalidRequest = 3,
    AlreadyConnected = 4,
    SessionTimeout = 5,
    Kicked = 6,
}

impl RejectReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RejectReason::ServerFull),
            2 => Some(RejectReason::VersionMismatch),
            3 => Some(RejectReason::InvalidRequest),
            4 => Some(RejectReason::AlreadyConnected),
            5 => Some(RejectReason::SessionTimeout),
            6 => Some(RejectReason::Kicked),
            _ => None,
        }
    }

    /// Human readable text carried alongside the code in an ErrorResponse.
    pub fn description(self) -> &'static str {
        match self {
            RejectReason::ServerFull => "Server full",
            RejectReason::VersionMismatch => "Protocol version mismatch",
            RejectReason::InvalidRequest => "Invalid request type",
            RejectReason::AlreadyConnected => "Already connected",
            RejectReason::SessionTimeout => "Session timed out",
            RejectReason::Kicked => "Kicked by server",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A handshake the server turned down, as seen by the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("handshake rejected ({reason:?}): {message}")]
pub struct HandshakeRejected {
    pub reason: RejectReason,
    pub message: String,
}
