use shared::{EncodeError, FrameError, HandshakeRejected};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("control channel error: {0}")]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Rejected(#[from] HandshakeRejected),
    #[error("unexpected {0} on the control channel")]
    UnexpectedPacket(&'static str),
    #[error("server closed the control channel")]
    ConnectionClosed,
    #[error("not connected")]
    NotConnected,
}
