//! Client side of the native protocol.
use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
};

use log::{debug, info};

use super::{
    ProtocolError, ProtocolTransport, TransportError,
    block::ResultBlock,
    handshake::{ClientHello, ServerHello},
    query::QueryRequest,
    request::ClientPacket,
    response::{ServerPacket, ServerPacketKind},
    revision::{Revision, SERVER_REVISION},
};

pub const CLIENT_NAME: &str = "cowsdb-client";

/// What a query produced, once the server is done answering.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    /// Zero or more DATA blocks followed by END_OF_STREAM.
    Blocks(Vec<ResultBlock>),
    /// The engine refused the query; the connection is still usable.
    Exception(String),
}

pub struct NativeClient<T: Read + Write> {
    transport: ProtocolTransport<T>,
    hello: ClientHello,
    revision: Revision,
    server: Option<ServerHello>,
}

impl NativeClient<TcpStream> {
    /// Connect and complete the HELLO exchange.
    pub fn connect(
        address: impl ToSocketAddrs,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(address).map_err(TransportError::from)?;
        let mut client = Self::new(
            stream,
            ClientHello {
                client_name: CLIENT_NAME.into(),
                version_major: 25,
                version_minor: 5,
                revision: SERVER_REVISION,
                database: database.into(),
                user: user.into(),
                password: password.into(),
            },
        );
        client.hello()?;
        Ok(client)
    }
}

impl<T: Read + Write> NativeClient<T> {
    /// Wrap a stream. Nothing is sent until [`NativeClient::hello`].
    pub fn new(stream: T, hello: ClientHello) -> Self {
        let revision = Revision(hello.revision);
        Self {
            transport: ProtocolTransport::new(stream),
            hello,
            revision,
            server: None,
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn server(&self) -> Option<&ServerHello> {
        self.server.as_ref()
    }

    pub fn hello(&mut self) -> Result<&ServerHello, ProtocolError> {
        self.hello.write(&mut self.transport);
        self.transport.flush()?;

        let tag = self.transport.read_varint()?;
        match ServerPacketKind::try_from(tag).map_err(ProtocolError::UnknownPacket)? {
            ServerPacketKind::Hello => {}
            ServerPacketKind::Exception => {
                let message = self.transport.read_string()?;
                debug!("server refused HELLO: {message}");
                return Err(ProtocolError::UnexpectedReply(ServerPacketKind::Exception));
            }
            other => return Err(ProtocolError::UnexpectedReply(other)),
        }

        let (server, revision) = ServerHello::read(&mut self.transport, self.hello.revision)?;
        info!(
            "connected to {} {}.{} (revision {revision})",
            server.name, server.version_major, server.version_minor
        );
        self.revision = revision;
        Ok(&*self.server.insert(server))
    }

    pub fn read_packet(&mut self) -> Result<ServerPacket, ProtocolError> {
        ServerPacket::read(&mut self.transport, self.revision)
    }

    pub fn send_query(&mut self, request: &QueryRequest) -> Result<(), ProtocolError> {
        request.write(&mut self.transport, self.revision)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Run `sql` and collect the reply.
    pub fn query(&mut self, sql: &str) -> Result<QueryResponse, ProtocolError> {
        self.send_query(&QueryRequest::new(sql))?;

        let mut blocks = Vec::new();
        loop {
            match self.read_packet()? {
                ServerPacket::Data(block) => blocks.push(block),
                ServerPacket::EndOfStream => return Ok(QueryResponse::Blocks(blocks)),
                ServerPacket::Exception(message) => return Ok(QueryResponse::Exception(message)),
                other => return Err(ProtocolError::UnexpectedReply(other.kind())),
            }
        }
    }

    pub fn ping(&mut self) -> Result<(), ProtocolError> {
        self.transport.write_varint(ClientPacket::Ping.into());
        self.transport.flush()?;
        self.expect(ServerPacketKind::Pong)
    }

    /// Fire-and-forget; the server does not answer CANCEL.
    pub fn cancel(&mut self) -> Result<(), ProtocolError> {
        self.transport.write_varint(ClientPacket::Cancel.into());
        self.transport.flush()?;
        Ok(())
    }

    pub fn send_data(&mut self, table: &str, block: &ResultBlock) -> Result<(), ProtocolError> {
        self.transport.write_varint(ClientPacket::Data.into());
        self.transport.write_string(table);
        block.write(&mut self.transport, self.revision)?;
        self.transport.flush()?;
        self.expect(ServerPacketKind::EndOfStream)
    }

    fn expect(&mut self, kind: ServerPacketKind) -> Result<(), ProtocolError> {
        let packet = self.read_packet()?;
        if packet.kind() == kind {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedReply(packet.kind()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::protocol::{handshake::ServerInfo, request::QueryStage, transport::testing::Duplex};

    fn client(revision: u64, replies: &[ServerPacket]) -> NativeClient<Duplex> {
        let negotiated = Revision::negotiate(revision, SERVER_REVISION);
        let mut server = ProtocolTransport::new(Cursor::new(Vec::new()));
        ServerHello::new(&ServerInfo::default(), negotiated)
            .write(&mut server, negotiated)
            .unwrap();
        for packet in replies {
            packet.write(&mut server, negotiated).unwrap();
        }

        let stream = Duplex::new(server.pending().to_vec());
        NativeClient::new(
            stream,
            ClientHello {
                client_name: CLIENT_NAME.into(),
                version_major: 25,
                version_minor: 5,
                revision,
                database: "default".into(),
                user: "a".into(),
                password: "a".into(),
            },
        )
    }

    fn sent(client: &NativeClient<Duplex>) -> ProtocolTransport<Cursor<Vec<u8>>> {
        ProtocolTransport::new(Cursor::new(client.transport.get_ref().written().to_vec()))
    }

    #[test]
    fn hello_negotiates_down() {
        let mut client = client(54449, &[]);
        let server = client.hello().unwrap();
        assert_eq!(server.name, "CowsDB");
        assert_eq!(server.password_rules, None);
        assert_eq!(client.revision(), Revision(54449));
    }

    #[test]
    fn query_collects_blocks_until_end_of_stream() {
        let block = ResultBlock::from_raw(&[1, 1, 1, b'x', 5, b'U', b'I', b'n', b't', b'8', 7]).unwrap();
        let mut client = client(
            SERVER_REVISION,
            &[ServerPacket::Data(block.clone()), ServerPacket::EndOfStream],
        );
        client.hello().unwrap();

        assert_eq!(
            client.query("SELECT 7 AS x").unwrap(),
            QueryResponse::Blocks(vec![block])
        );

        let mut wire = sent(&client);
        assert_eq!(wire.read_varint().unwrap(), 0);
        ClientHello::read(&mut wire).unwrap();
        assert_eq!(wire.read_varint().unwrap(), 1);
        let request = QueryRequest::read(&mut wire, Revision(SERVER_REVISION)).unwrap();
        assert_eq!(request.query, "SELECT 7 AS x");
        assert_eq!(request.stage, QueryStage::Complete);
    }

    #[test]
    fn exception_ends_the_query() {
        let mut client = client(SERVER_REVISION, &[ServerPacket::Exception("nope".into())]);
        client.hello().unwrap();
        assert_eq!(
            client.query("SELECT bogus_fn()").unwrap(),
            QueryResponse::Exception("nope".into())
        );
    }

    #[test]
    fn ping_expects_pong() {
        let mut client = client(SERVER_REVISION, &[ServerPacket::Pong, ServerPacket::EndOfStream]);
        client.hello().unwrap();
        client.ping().unwrap();
        assert!(matches!(
            client.ping(),
            Err(ProtocolError::UnexpectedReply(ServerPacketKind::EndOfStream))
        ));
    }

    #[test]
    fn server_hangup_is_connection_closed() {
        let mut client = client(SERVER_REVISION, &[]);
        client.hello().unwrap();
        assert!(client.query("SELECT 1").unwrap_err().is_connection_closed());
    }
}
