//! Native binary protocol.
//!
//! This module implements the server side of the columnar database native protocol, plus
//! a small client used by the REPL and by tests. It covers everything from the byte-level
//! codec up to the per-connection dispatch loop.
//!
//! # Overview
//!
//! A connection is a stream of packets. Every packet starts with a varint type tag; the
//! body that follows has no length prefix, so each side must know exactly which fields to
//! expect. That knowledge comes from the *negotiated revision*, fixed during the HELLO
//! exchange as the lesser of what client and server announce.
//!
//! # Key Components
//!
//! - [`varint`]: LEB128 integers, the alphabet everything else is written in.
//! - [`ProtocolTransport`]: strings and fixed-width integers over a buffered stream.
//! - [`Revision`] and [`Feature`]: the single table deciding which optional fields exist.
//! - [`Negotiator`]: HELLO exchange.
//! - [`QueryRequest`]: QUERY body decoder.
//! - [`ResultBlock`]: engine output re-encoded as a wire block.
//! - [`Connection`]: per-connection state machine and dispatch loop.
//! - [`NativeServer`]: accept loop giving every socket a thread of its own.
//! - [`NativeClient`]: the other end of the conversation.
//!
//! # Binary Format
//!
//! - Integers in packet headers and lengths are varints.
//! - Strings are a varint byte length followed by the bytes.
//! - Fixed-width integers and column values are little-endian.
//!
//! # Errors
//!
//! Anything that leaves the stream position in doubt is a [`ProtocolError`] and closes the
//! connection. Engine failures are reported to the client as an EXCEPTION packet and the
//! connection carries on.
pub mod varint;

mod block;
mod client;
mod compress;
mod connection;
mod error;
mod handshake;
mod query;
mod request;
mod response;
mod revision;
mod server;
mod thread;
mod transport;

pub use block::{BlockError, BlockInfo, Column, ColumnData, ColumnType, ResultBlock};
pub use client::{CLIENT_NAME, NativeClient, QueryResponse};
pub use compress::{CompressionError, CompressionMethod};
pub use connection::{Connection, ConnectionPhase, ConnectionState, ServerContext};
pub use error::{ErrorKind, ProtocolError};
pub use handshake::{ClientHello, Handshake, HandshakeState, Negotiator, ServerHello, ServerInfo};
pub use query::{
    ClientInfo, INTERFACE_TCP, OutputFormat, ParallelReplicas, QueryKind, QueryRequest, TraceContext,
};
pub use request::{ClientPacket, Compression, QueryStage};
pub use response::{ServerPacket, ServerPacketKind};
pub use revision::{Feature, REVISION_TABLE, Revision, SERVER_REVISION};
pub use server::{NativeServer, ServerError};
pub use thread::{ConnectionLimiter, Permit, AdmissionError};
pub use transport::{ProtocolTransport, TransportError};
