//! Connection-level errors.
//!
//! Everything in here is fatal to the connection that raised it: once a frame is
//! misread the stream position can no longer be trusted. Engine failures are not
//! represented here because they are reported to the client and the connection lives on.
use thiserror::Error;

use super::{
    compress::CompressionError, response::ServerPacketKind, revision::Revision,
    transport::TransportError,
};

/// How a fatal error should be classified when the connection is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unexpected packet, malformed varint, short read.
    ProtocolViolation,
    /// A field could not be decoded under the negotiated revision.
    DecodeError,
    /// The peer never completed a HELLO exchange.
    HandshakeFailure,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handshake failed: {0}")]
    Handshake(TransportError),

    #[error("expected HELLO, got packet type {0}")]
    UnexpectedPacket(u64),

    #[error("unknown packet type {0}")]
    UnknownPacket(u64),

    #[error("unexpected {0:?} packet from server")]
    UnexpectedReply(ServerPacketKind),

    #[error("setting '{name}' cannot be decoded at revision {revision}")]
    UnsupportedSetting { name: String, revision: Revision },

    #[error("unsupported client interface {0}")]
    UnsupportedInterface(u8),

    #[error("unknown column type '{0}'")]
    UnknownColumnType(String),

    #[error("malformed block info field {0}")]
    MalformedBlockInfo(u64),

    #[error("compressed query: {0}")]
    Compression(#[from] CompressionError),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Handshake(_) | ProtocolError::UnexpectedPacket(_) => {
                ErrorKind::HandshakeFailure
            }
            ProtocolError::Transport(TransportError::InvalidUtf8(_)) => ErrorKind::DecodeError,
            ProtocolError::Transport(_)
            | ProtocolError::UnknownPacket(_)
            | ProtocolError::UnexpectedReply(_) => ErrorKind::ProtocolViolation,
            ProtocolError::UnsupportedSetting { .. }
            | ProtocolError::UnsupportedInterface(_)
            | ProtocolError::UnknownColumnType(_)
            | ProtocolError::MalformedBlockInfo(_)
            | ProtocolError::Compression(_) => ErrorKind::DecodeError,
        }
    }

    /// The peer hung up; not worth more than a debug line.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(TransportError::ConnectionClosed)
                | ProtocolError::Handshake(TransportError::ConnectionClosed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(
            ProtocolError::UnexpectedPacket(1).kind(),
            ErrorKind::HandshakeFailure
        );
        assert_eq!(
            ProtocolError::from(TransportError::MalformedVarint).kind(),
            ErrorKind::ProtocolViolation
        );
        assert_eq!(
            ProtocolError::UnsupportedSetting {
                name: "max_threads".into(),
                revision: Revision(54000),
            }
            .kind(),
            ErrorKind::DecodeError
        );
        assert_eq!(
            ProtocolError::UnexpectedReply(ServerPacketKind::Data).kind(),
            ErrorKind::ProtocolViolation
        );
    }

    #[test]
    fn detects_closed_connections() {
        assert!(ProtocolError::from(TransportError::ConnectionClosed).is_connection_closed());
        assert!(!ProtocolError::UnknownPacket(9).is_connection_closed());
    }
}
