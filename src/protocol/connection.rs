//! Per-connection state machine and packet dispatch.
//!
//! ```text
//! Accepted -> Handshaking -> Ready -> Closed
//! ```
//!
//! A [`Connection`] owns its [`ConnectionState`] outright; nothing in it is shared with
//! other connections. The only shared pieces are the [`Negotiator`] and the
//! [`SessionRegistry`], both reached through [`ServerContext`].
use std::{
    io::{Read, Write},
    sync::Arc,
};

use log::{debug, info, trace, warn};

use crate::{
    engine::EngineError,
    session::{Identity, SessionRegistry},
    statement::StatementKind,
};

use super::{
    ProtocolError, ProtocolTransport, TransportError,
    block::ResultBlock,
    handshake::{Handshake, HandshakeState, Negotiator},
    query::{OutputFormat, QueryRequest},
    request::ClientPacket,
    response::ServerPacket,
    revision::Revision,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Accepted,
    Handshaking,
    Ready,
    Closed,
}

/// Everything a connection remembers between packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub handshake: HandshakeState,
    pub revision: Revision,
    pub identity: Identity,
    pub client_name: String,
    pub database: String,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Accepted,
            handshake: HandshakeState::AwaitingHello,
            revision: Revision(0),
            identity: Identity::Anonymous,
            client_name: String::new(),
            database: String::new(),
        }
    }
}

impl ConnectionState {
    /// Record a completed HELLO exchange, replacing whatever an earlier one set.
    fn complete(&mut self, handshake: Handshake) {
        self.phase = ConnectionPhase::Ready;
        self.handshake = HandshakeState::Complete;
        self.revision = handshake.revision;
        self.identity = handshake.client.identity();
        self.client_name = handshake.client.client_name;
        self.database = handshake.client.database;
    }
}

/// Shared by every connection a server accepts.
pub struct ServerContext {
    pub negotiator: Negotiator,
    pub sessions: SessionRegistry,
}

impl ServerContext {
    pub fn new(negotiator: Negotiator, sessions: SessionRegistry) -> Self {
        Self {
            negotiator,
            sessions,
        }
    }
}

pub struct Connection<T: Read + Write> {
    id: u64,
    transport: ProtocolTransport<T>,
    state: ConnectionState,
    context: Arc<ServerContext>,
}

impl<T: Read + Write> Connection<T> {
    pub fn new(id: u64, stream: T, context: Arc<ServerContext>) -> Self {
        Self {
            id,
            transport: ProtocolTransport::new(stream),
            state: ConnectionState::default(),
            context,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Drive the connection until the peer leaves or a fatal error occurs.
    ///
    /// The peer hanging up between packets is a normal end and returns `Ok`.
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        let result = self.serve();
        self.state.phase = ConnectionPhase::Closed;
        result
    }

    fn serve(&mut self) -> Result<(), ProtocolError> {
        self.state.phase = ConnectionPhase::Handshaking;
        let packet = self.transport.read_varint().map_err(ProtocolError::Handshake)?;
        self.handshake(packet)?;

        loop {
            let packet = match self.transport.read_varint() {
                Ok(packet) => packet,
                Err(TransportError::ConnectionClosed) => {
                    debug!("connection {}: peer closed", self.id);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            self.dispatch(packet)?;
            self.transport.flush()?;
        }
    }

    fn handshake(&mut self, packet: u64) -> Result<(), ProtocolError> {
        let handshake = self.context.negotiator.accept(&mut self.transport, packet)?;
        self.transport.flush().map_err(ProtocolError::Handshake)?;
        self.state.complete(handshake);
        Ok(())
    }

    fn dispatch(&mut self, packet: u64) -> Result<(), ProtocolError> {
        trace!("connection {}: packet type {packet}", self.id);
        match ClientPacket::try_from(packet).map_err(ProtocolError::UnknownPacket)? {
            ClientPacket::Hello => {
                info!("connection {}: re-handshake", self.id);
                self.handshake(packet)
            }
            ClientPacket::Query => self.query(),
            ClientPacket::Data => self.data(),
            ClientPacket::Ping => self.send(ServerPacket::Pong),
            ClientPacket::Cancel => {
                // Nothing is in flight here: queries run to completion before the next
                // packet is read, and the engine call cannot be interrupted.
                debug!("connection {}: cancel requested, nothing to cancel", self.id);
                Ok(())
            }
        }
    }

    fn query(&mut self) -> Result<(), ProtocolError> {
        let request = QueryRequest::read(&mut self.transport, self.state.revision)?;
        let kind = StatementKind::classify(&request.query);
        debug!(
            "connection {}: query {:?} ({kind:?}, {:?}): {}",
            self.id, request.id, request.stage, request.query
        );

        for packet in self.execute(&request.query, kind) {
            self.send(packet)?;
        }
        Ok(())
    }

    /// Replies for one query. Failures here are reported to the client, not raised.
    fn execute(&self, query: &str, kind: StatementKind) -> Vec<ServerPacket> {
        let result = self
            .context
            .sessions
            .get_or_create(&self.state.identity)
            .map_err(|e| EngineError::new(e.to_string()))
            .and_then(|session| session.execute(query, OutputFormat::Native.as_str()));

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("connection {}: query failed: {e}", self.id);
                return vec![ServerPacket::Exception(e.to_string())];
            }
        };

        if !kind.returns_rows() {
            return vec![ServerPacket::EndOfStream];
        }

        match ResultBlock::from_raw(&raw) {
            Ok(block) => {
                debug!(
                    "connection {}: {} columns, {} rows",
                    self.id,
                    block.columns.len(),
                    block.rows
                );
                vec![ServerPacket::Data(block), ServerPacket::EndOfStream]
            }
            Err(e) => {
                warn!("connection {}: unusable engine result: {e}", self.id);
                vec![ServerPacket::Exception(format!("malformed engine result: {e}"))]
            }
        }
    }

    /// Inserts are not supported; the block is read to keep the stream aligned and dropped.
    fn data(&mut self) -> Result<(), ProtocolError> {
        let table = self.transport.read_string()?;
        let block = ResultBlock::read(&mut self.transport, self.state.revision)?;
        debug!(
            "connection {}: discarding {} rows for table '{table}'",
            self.id, block.rows
        );
        self.send(ServerPacket::EndOfStream)
    }

    fn send(&mut self, packet: ServerPacket) -> Result<(), ProtocolError> {
        packet.write(&mut self.transport, self.state.revision)?;
        Ok(())
    }
}
