//! QUERY packet body.
//!
//! The body has no length prefix, so the decoder must consume exactly the fields the
//! negotiated revision implies, in order:
//!
//! 1. query id
//! 2. client info ([`Feature::ClientInfo`]), itself gated field by field
//! 3. settings, `(name, flags, value)` until an empty name
//! 4. inter-server secret ([`Feature::InterserverSecret`])
//! 5. processing stage and compression flag
//! 6. query text, plain or compressed depending on the flag
//! 7. parameters ([`Feature::Parameters`]), same shape as settings
use std::{
    collections::HashMap,
    io::{Read, Write},
};

use log::trace;

use super::{
    ProtocolError, ProtocolTransport, TransportError, compress,
    request::{ClientPacket, Compression, QueryStage},
    revision::{Feature, Revision},
};

/// Client interface declared in the client-info block.
pub const INTERFACE_TCP: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    NoQuery,
    Initial,
    Secondary,
}

impl QueryKind {
    fn from_byte(value: u8) -> Self {
        match value {
            0 => QueryKind::NoQuery,
            1 => QueryKind::Initial,
            _ => QueryKind::Secondary,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            QueryKind::NoQuery => 0,
            QueryKind::Initial => 1,
            QueryKind::Secondary => 2,
        }
    }
}

/// OpenTelemetry context forwarded by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: [u8; 16],
    pub span_id: u64,
    pub tracestate: String,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParallelReplicas {
    pub collaborate_with_initiator: u64,
    pub participating_replicas: u64,
    pub current_replica: u64,
}

/// Who is asking, as reported by the client. Decoded to keep the stream aligned; the
/// server only logs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub kind: QueryKind,
    pub initial_user: String,
    pub initial_query_id: String,
    pub initial_address: String,
    pub initial_query_start_time: Option<u64>,
    pub interface: u8,
    pub os_user: String,
    pub hostname: String,
    pub client_name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub client_revision: u64,
    pub quota_key: Option<String>,
    pub distributed_depth: Option<u64>,
    pub version_patch: Option<u64>,
    pub trace: Option<TraceContext>,
    pub parallel_replicas: Option<ParallelReplicas>,
}

impl ClientInfo {
    /// Client info for a query issued directly by `client_name`.
    pub fn initial(client_name: &str, revision: Revision) -> Self {
        Self {
            kind: QueryKind::Initial,
            initial_user: String::new(),
            initial_query_id: String::new(),
            initial_address: "0.0.0.0:0".into(),
            initial_query_start_time: revision
                .supports(Feature::InitialQueryStartTime)
                .then_some(0),
            interface: INTERFACE_TCP,
            os_user: String::new(),
            hostname: String::new(),
            client_name: client_name.into(),
            version_major: 25,
            version_minor: 5,
            client_revision: revision.0,
            quota_key: revision.supports(Feature::QuotaKey).then(String::new),
            distributed_depth: revision.supports(Feature::DistributedDepth).then_some(0),
            version_patch: revision.supports(Feature::VersionPatch).then_some(0),
            trace: None,
            parallel_replicas: revision
                .supports(Feature::ParallelReplicas)
                .then(ParallelReplicas::default),
        }
    }

    /// Returns `None` for an empty block (query kind 0), which carries no further fields.
    pub fn read<T: Read + Write>(
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<Option<Self>, ProtocolError> {
        let kind = QueryKind::from_byte(transport.read_u8()?);
        if kind == QueryKind::NoQuery {
            return Ok(None);
        }

        let initial_user = transport.read_string()?;
        let initial_query_id = transport.read_string()?;
        let initial_address = transport.read_string()?;
        let initial_query_start_time = if revision.supports(Feature::InitialQueryStartTime) {
            Some(transport.read_u64()?)
        } else {
            None
        };

        let interface = transport.read_u8()?;
        if interface != INTERFACE_TCP {
            return Err(ProtocolError::UnsupportedInterface(interface));
        }

        let os_user = transport.read_string()?;
        let hostname = transport.read_string()?;
        let client_name = transport.read_string()?;
        let version_major = transport.read_varint()?;
        let version_minor = transport.read_varint()?;
        let client_revision = transport.read_varint()?;

        let quota_key = if revision.supports(Feature::QuotaKey) {
            Some(transport.read_string()?)
        } else {
            None
        };
        let distributed_depth = if revision.supports(Feature::DistributedDepth) {
            Some(transport.read_varint()?)
        } else {
            None
        };
        let version_patch = if revision.supports(Feature::VersionPatch) {
            Some(transport.read_varint()?)
        } else {
            None
        };
        let trace = if revision.supports(Feature::OpenTelemetry) && transport.read_u8()? != 0 {
            let raw = transport.read_raw(16)?;
            let mut trace_id = [0u8; 16];
            trace_id.copy_from_slice(&raw);
            Some(TraceContext {
                trace_id,
                span_id: transport.read_u64()?,
                tracestate: transport.read_string()?,
                flags: transport.read_u8()?,
            })
        } else {
            None
        };
        let parallel_replicas = if revision.supports(Feature::ParallelReplicas) {
            Some(ParallelReplicas {
                collaborate_with_initiator: transport.read_varint()?,
                participating_replicas: transport.read_varint()?,
                current_replica: transport.read_varint()?,
            })
        } else {
            None
        };

        Ok(Some(Self {
            kind,
            initial_user,
            initial_query_id,
            initial_address,
            initial_query_start_time,
            interface,
            os_user,
            hostname,
            client_name,
            version_major,
            version_minor,
            client_revision,
            quota_key,
            distributed_depth,
            version_patch,
            trace,
            parallel_replicas,
        }))
    }

    pub fn write<T: Read + Write>(
        &self,
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<(), TransportError> {
        transport.write_u8(self.kind.as_byte())?;
        if self.kind == QueryKind::NoQuery {
            return Ok(());
        }

        transport.write_string(&self.initial_user);
        transport.write_string(&self.initial_query_id);
        transport.write_string(&self.initial_address);
        if revision.supports(Feature::InitialQueryStartTime) {
            transport.write_u64(self.initial_query_start_time.unwrap_or(0))?;
        }
        transport.write_u8(self.interface)?;
        transport.write_string(&self.os_user);
        transport.write_string(&self.hostname);
        transport.write_string(&self.client_name);
        transport.write_varint(self.version_major);
        transport.write_varint(self.version_minor);
        transport.write_varint(self.client_revision);
        if revision.supports(Feature::QuotaKey) {
            transport.write_string(self.quota_key.as_deref().unwrap_or_default());
        }
        if revision.supports(Feature::DistributedDepth) {
            transport.write_varint(self.distributed_depth.unwrap_or(0));
        }
        if revision.supports(Feature::VersionPatch) {
            transport.write_varint(self.version_patch.unwrap_or(0));
        }
        if revision.supports(Feature::OpenTelemetry) {
            match &self.trace {
                Some(trace) => {
                    transport.write_u8(1)?;
                    transport.write_raw(&trace.trace_id);
                    transport.write_u64(trace.span_id)?;
                    transport.write_string(&trace.tracestate);
                    transport.write_u8(trace.flags)?;
                }
                None => transport.write_u8(0)?,
            }
        }
        if revision.supports(Feature::ParallelReplicas) {
            let replicas = self.parallel_replicas.clone().unwrap_or_default();
            transport.write_varint(replicas.collaborate_with_initiator);
            transport.write_varint(replicas.participating_replicas);
            transport.write_varint(replicas.current_replica);
        }
        Ok(())
    }
}

/// Read `(name, flags, value)` triples until an empty name.
fn read_string_bag<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    revision: Revision,
) -> Result<HashMap<String, String>, ProtocolError> {
    let mut bag = HashMap::new();
    loop {
        let name = transport.read_string()?;
        if name.is_empty() {
            return Ok(bag);
        }
        // Before string serialization each setting is written in its own binary type,
        // which cannot be skipped without knowing that type.
        if !revision.supports(Feature::SettingsAsStrings) {
            return Err(ProtocolError::UnsupportedSetting { name, revision });
        }
        let flags = transport.read_varint()?;
        let value = transport.read_string()?;
        trace!("setting {name} = {value} (flags {flags})");
        bag.insert(name, value);
    }
}

fn write_string_bag<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    bag: &HashMap<String, String>,
) {
    for (name, value) in bag {
        transport.write_string(name);
        transport.write_varint(0);
        transport.write_string(value);
    }
    transport.write_string("");
}

/// A decoded QUERY packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub id: String,
    pub client_info: Option<ClientInfo>,
    pub settings: HashMap<String, String>,
    pub secret: Option<String>,
    pub stage: QueryStage,
    pub compression: Compression,
    pub query: String,
    pub parameters: Option<HashMap<String, String>>,
}

impl QueryRequest {
    /// A plain, uncompressed query with no settings.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            client_info: None,
            settings: HashMap::new(),
            secret: None,
            stage: QueryStage::Complete,
            compression: Compression::Disabled,
            query: query.into(),
            parameters: None,
        }
    }

    /// Read the body that follows the QUERY packet type.
    pub fn read<T: Read + Write>(
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<Self, ProtocolError> {
        let id = transport.read_string()?;
        let client_info = if revision.supports(Feature::ClientInfo) {
            ClientInfo::read(transport, revision)?
        } else {
            None
        };
        let settings = read_string_bag(transport, revision)?;
        let secret = if revision.supports(Feature::InterserverSecret) {
            Some(transport.read_string()?)
        } else {
            None
        };
        let stage = QueryStage::from(transport.read_varint()?);
        let compression = Compression::from(transport.read_varint()?);

        let query = match compression {
            Compression::Disabled => transport.read_string()?,
            Compression::Enabled => {
                let frame = transport.read_binary()?;
                let raw = compress::decompress(&frame)?;
                String::from_utf8(raw).map_err(TransportError::from)?
            }
            Compression::Unknown(flag) => {
                // Some clients put an empty compressed frame ahead of the real query.
                let placeholder = transport.read_binary()?;
                trace!(
                    "compression flag {flag}: skipped {} byte frame",
                    placeholder.len()
                );
                transport.read_string()?
            }
        };

        let parameters = if revision.supports(Feature::Parameters) {
            Some(read_string_bag(transport, revision)?)
        } else {
            None
        };

        Ok(Self {
            id,
            client_info,
            settings,
            secret,
            stage,
            compression,
            query,
            parameters,
        })
    }

    /// Write a full QUERY packet, type included.
    pub fn write<T: Read + Write>(
        &self,
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<(), ProtocolError> {
        transport.write_varint(ClientPacket::Query.into());
        transport.write_string(&self.id);
        if revision.supports(Feature::ClientInfo) {
            match &self.client_info {
                Some(info) => info.write(transport, revision)?,
                None => transport.write_u8(QueryKind::NoQuery.as_byte())?,
            }
        }
        if !self.settings.is_empty() && !revision.supports(Feature::SettingsAsStrings) {
            let name = self.settings.keys().next().cloned().unwrap_or_default();
            return Err(ProtocolError::UnsupportedSetting { name, revision });
        }
        write_string_bag(transport, &self.settings);
        if revision.supports(Feature::InterserverSecret) {
            transport.write_string(self.secret.as_deref().unwrap_or_default());
        }
        transport.write_varint(self.stage.into());
        transport.write_varint(self.compression.into());
        match self.compression {
            Compression::Disabled => transport.write_string(&self.query),
            Compression::Enabled => {
                let frame =
                    compress::compress(self.query.as_bytes(), compress::CompressionMethod::Lz4)?;
                transport.write_binary(&frame);
            }
            Compression::Unknown(_) => {
                transport.write_binary(&[]);
                transport.write_string(&self.query);
            }
        }
        if revision.supports(Feature::Parameters) {
            write_string_bag(transport, self.parameters.as_ref().unwrap_or(&HashMap::new()));
        }
        Ok(())
    }
}

/// Output format the engine is asked to produce.
///
/// The native transport only carries the raw column layout that
/// [`ResultBlock::from_raw`](super::ResultBlock::from_raw) parses, so no stage, compression
/// flag or setting selects anything else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Raw column blocks, re-encoded by [`ResultBlock`](super::ResultBlock).
    #[default]
    Native,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Native => "Native",
        }
    }
}
