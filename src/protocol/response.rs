use std::io::{Read, Write};

use super::{
    ProtocolError, ProtocolTransport, TransportError, block::ResultBlock,
    handshake::ServerHello, revision::Revision,
};

/// Packet types the server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPacketKind {
    Hello = 0,
    Data = 1,
    Exception = 2,
    Pong = 4,
    EndOfStream = 5,
}

impl From<ServerPacketKind> for u64 {
    fn from(value: ServerPacketKind) -> Self {
        value as u64
    }
}

impl TryFrom<u64> for ServerPacketKind {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServerPacketKind::Hello),
            1 => Ok(ServerPacketKind::Data),
            2 => Ok(ServerPacketKind::Exception),
            4 => Ok(ServerPacketKind::Pong),
            5 => Ok(ServerPacketKind::EndOfStream),
            other => Err(other),
        }
    }
}

/// A decoded server packet, as seen by a client.
#[derive(Debug, PartialEq)]
pub enum ServerPacket {
    Hello(ServerHello),
    Data(ResultBlock),
    Exception(String),
    Pong,
    EndOfStream,
}

impl ServerPacket {
    pub fn kind(&self) -> ServerPacketKind {
        match self {
            ServerPacket::Hello(_) => ServerPacketKind::Hello,
            ServerPacket::Data(_) => ServerPacketKind::Data,
            ServerPacket::Exception(_) => ServerPacketKind::Exception,
            ServerPacket::Pong => ServerPacketKind::Pong,
            ServerPacket::EndOfStream => ServerPacketKind::EndOfStream,
        }
    }

    /// Queue the packet, type included, on `transport`.
    pub fn write<T: Read + Write>(
        &self,
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<(), TransportError> {
        match self {
            ServerPacket::Hello(hello) => return hello.write(transport, revision),
            ServerPacket::Data(block) => {
                transport.write_varint(self.kind().into());
                // Temporary table name; always empty for results.
                transport.write_string("");
                block.write(transport, revision)?;
            }
            ServerPacket::Exception(message) => {
                transport.write_varint(self.kind().into());
                transport.write_string(message);
            }
            ServerPacket::Pong | ServerPacket::EndOfStream => {
                transport.write_varint(self.kind().into())
            }
        }
        Ok(())
    }

    /// Read the next packet, type included.
    pub fn read<T: Read + Write>(
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<Self, ProtocolError> {
        let tag = transport.read_varint()?;
        let kind = ServerPacketKind::try_from(tag).map_err(ProtocolError::UnknownPacket)?;
        Ok(match kind {
            ServerPacketKind::Hello => {
                let (hello, _) = ServerHello::read(transport, revision.0)?;
                ServerPacket::Hello(hello)
            }
            ServerPacketKind::Data => {
                let _table = transport.read_string()?;
                ServerPacket::Data(ResultBlock::read(transport, revision)?)
            }
            ServerPacketKind::Exception => ServerPacket::Exception(transport.read_string()?),
            ServerPacketKind::Pong => ServerPacket::Pong,
            ServerPacketKind::EndOfStream => ServerPacket::EndOfStream,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::protocol::revision::SERVER_REVISION;

    fn encode(packet: &ServerPacket) -> Vec<u8> {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        packet.write(&mut transport, Revision(SERVER_REVISION)).unwrap();
        transport.pending().to_vec()
    }

    #[test]
    fn server_packet_tags() {
        let inputs = vec![
            (0, ServerPacketKind::Hello),
            (1, ServerPacketKind::Data),
            (2, ServerPacketKind::Exception),
            (4, ServerPacketKind::Pong),
            (5, ServerPacketKind::EndOfStream),
        ];

        for (tag, kind) in inputs {
            assert_eq!(u64::from(kind), tag);
            assert_eq!(ServerPacketKind::try_from(tag), Ok(kind));
        }
        assert_eq!(ServerPacketKind::try_from(3), Err(3));
    }

    #[test]
    fn control_packets_are_a_single_varint() {
        assert_eq!(encode(&ServerPacket::Pong), vec![4]);
        assert_eq!(encode(&ServerPacket::EndOfStream), vec![5]);
    }

    #[test]
    fn exception_carries_only_the_message() {
        assert_eq!(
            encode(&ServerPacket::Exception("boom".into())),
            vec![2, 4, b'b', b'o', b'o', b'm']
        );
    }

    #[test]
    fn empty_data_packet_keeps_the_preamble() {
        let bytes = encode(&ServerPacket::Data(ResultBlock::empty()));
        assert_eq!(
            bytes,
            vec![1, 0, 1, 0, 2, 0xff, 0xff, 0xff, 0xff, 0, 0, 0]
        );
    }

    #[test]
    fn reads_what_it_writes() {
        for packet in [
            ServerPacket::Exception("Unknown function".into()),
            ServerPacket::Data(ResultBlock::empty()),
            ServerPacket::Pong,
        ] {
            let mut transport = ProtocolTransport::new(Cursor::new(encode(&packet)));
            let read = ServerPacket::read(&mut transport, Revision(SERVER_REVISION)).unwrap();
            assert_eq!(read, packet);
        }
    }

    #[test]
    fn unknown_server_packet() {
        let mut transport = ProtocolTransport::new(Cursor::new(vec![9]));
        assert!(matches!(
            ServerPacket::read(&mut transport, Revision(SERVER_REVISION)),
            Err(ProtocolError::UnknownPacket(9))
        ));
    }
}
