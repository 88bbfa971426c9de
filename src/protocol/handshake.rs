//! HELLO exchange.
//!
//! A connection starts in [`HandshakeState::AwaitingHello`]. The first packet must be a
//! client HELLO; anything else drops the connection without a reply because the peer may
//! not speak this framing at all. A successful exchange fixes the negotiated revision,
//! `min(client, server)`, which then gates every optional field on the connection. A
//! later HELLO runs the same procedure again and may replace both the revision and the
//! identity.
use std::{
    fmt,
    io::{Read, Write},
};

use log::info;

use crate::session::Identity;

use super::{
    ProtocolError, ProtocolTransport, TransportError,
    request::ClientPacket,
    response::ServerPacketKind,
    revision::{Feature, Revision, SERVER_REVISION},
};

/// What the server announces about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub display_name: String,
    pub timezone: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub version_patch: u64,
    pub revision: u64,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "CowsDB".into(),
            display_name: "CowsDB".into(),
            timezone: "UTC".into(),
            version_major: 25,
            version_minor: 5,
            version_patch: 2,
            revision: SERVER_REVISION,
        }
    }
}

/// Client HELLO body, in wire order.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub revision: u64,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ClientHello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHello")
            .field("client_name", &self.client_name)
            .field("version_major", &self.version_major)
            .field("version_minor", &self.version_minor)
            .field("revision", &self.revision)
            .field("database", &self.database)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl ClientHello {
    /// Read the body that follows the HELLO packet type.
    pub fn read<T: Read + Write>(
        transport: &mut ProtocolTransport<T>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            client_name: transport.read_string()?,
            version_major: transport.read_varint()?,
            version_minor: transport.read_varint()?,
            revision: transport.read_varint()?,
            database: transport.read_string()?,
            user: transport.read_string()?,
            password: transport.read_string()?,
        })
    }

    /// Write a full HELLO packet, type included.
    pub fn write<T: Read + Write>(&self, transport: &mut ProtocolTransport<T>) {
        transport.write_varint(ClientPacket::Hello.into());
        transport.write_string(&self.client_name);
        transport.write_varint(self.version_major);
        transport.write_varint(self.version_minor);
        transport.write_varint(self.revision);
        transport.write_string(&self.database);
        transport.write_string(&self.user);
        transport.write_string(&self.password);
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.user, &self.password)
    }
}

/// Server HELLO. Optional fields are `Some` exactly when the negotiated revision
/// supports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub revision: u64,
    pub timezone: Option<String>,
    pub display_name: Option<String>,
    pub version_patch: Option<u64>,
    pub password_rules: Option<Vec<(String, String)>>,
    pub nonce: Option<u64>,
}

impl ServerHello {
    pub fn new(info: &ServerInfo, negotiated: Revision) -> Self {
        let mut hello = Self {
            name: info.name.clone(),
            version_major: info.version_major,
            version_minor: info.version_minor,
            revision: info.revision,
            timezone: None,
            display_name: None,
            version_patch: None,
            password_rules: None,
            nonce: None,
        };

        for feature in negotiated.features() {
            match feature {
                Feature::ServerTimezone => hello.timezone = Some(info.timezone.clone()),
                Feature::DisplayName => hello.display_name = Some(info.display_name.clone()),
                Feature::VersionPatch => hello.version_patch = Some(info.version_patch),
                Feature::PasswordComplexityRules => hello.password_rules = Some(Vec::new()),
                Feature::InterserverSecretV2 => hello.nonce = Some(0),
                _ => {}
            }
        }

        hello
    }

    /// Write a full HELLO packet, type included.
    pub fn write<T: Read + Write>(
        &self,
        transport: &mut ProtocolTransport<T>,
        negotiated: Revision,
    ) -> Result<(), TransportError> {
        transport.write_varint(ServerPacketKind::Hello.into());
        transport.write_string(&self.name);
        transport.write_varint(self.version_major);
        transport.write_varint(self.version_minor);
        transport.write_varint(self.revision);

        for feature in negotiated.features().filter(|f| f.in_server_hello()) {
            match feature {
                Feature::ServerTimezone => {
                    transport.write_string(self.timezone.as_deref().unwrap_or_default())
                }
                Feature::DisplayName => {
                    transport.write_string(self.display_name.as_deref().unwrap_or_default())
                }
                Feature::VersionPatch => transport.write_varint(self.version_patch.unwrap_or(0)),
                Feature::PasswordComplexityRules => {
                    let rules = self.password_rules.as_deref().unwrap_or_default();
                    transport.write_varint(rules.len() as u64);
                    for (pattern, message) in rules {
                        transport.write_string(pattern);
                        transport.write_string(message);
                    }
                }
                Feature::InterserverSecretV2 => transport.write_u64(self.nonce.unwrap_or(0))?,
                _ => {}
            }
        }

        Ok(())
    }

    /// Read the body that follows the HELLO packet type. Returns the hello and the
    /// revision both sides settle on.
    pub fn read<T: Read + Write>(
        transport: &mut ProtocolTransport<T>,
        client_revision: u64,
    ) -> Result<(Self, Revision), TransportError> {
        let mut hello = Self {
            name: transport.read_string()?,
            version_major: transport.read_varint()?,
            version_minor: transport.read_varint()?,
            revision: transport.read_varint()?,
            timezone: None,
            display_name: None,
            version_patch: None,
            password_rules: None,
            nonce: None,
        };
        let negotiated = Revision::negotiate(client_revision, hello.revision);

        for feature in negotiated.features().filter(|f| f.in_server_hello()) {
            match feature {
                Feature::ServerTimezone => hello.timezone = Some(transport.read_string()?),
                Feature::DisplayName => hello.display_name = Some(transport.read_string()?),
                Feature::VersionPatch => hello.version_patch = Some(transport.read_varint()?),
                Feature::PasswordComplexityRules => {
                    let count = transport.read_varint()?;
                    let mut rules = Vec::new();
                    for _ in 0..count {
                        rules.push((transport.read_string()?, transport.read_string()?));
                    }
                    hello.password_rules = Some(rules);
                }
                Feature::InterserverSecretV2 => hello.nonce = Some(transport.read_u64()?),
                _ => {}
            }
        }

        Ok((hello, negotiated))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingHello,
    Complete,
}

/// Outcome of a HELLO exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub client: ClientHello,
    pub revision: Revision,
}

/// Runs HELLO exchanges on behalf of connections.
#[derive(Debug, Clone, Default)]
pub struct Negotiator {
    info: ServerInfo,
}

impl Negotiator {
    pub fn new(info: ServerInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Consume a client HELLO whose packet type has already been read and queue the
    /// server HELLO on `transport`.
    pub fn accept<T: Read + Write>(
        &self,
        transport: &mut ProtocolTransport<T>,
        packet: u64,
    ) -> Result<Handshake, ProtocolError> {
        if ClientPacket::try_from(packet) != Ok(ClientPacket::Hello) {
            return Err(ProtocolError::UnexpectedPacket(packet));
        }

        let client = ClientHello::read(transport).map_err(ProtocolError::Handshake)?;
        let revision = Revision::negotiate(client.revision, self.info.revision);
        info!(
            "client {} v{}.{} (rev {}) as '{}' on database '{}', negotiated revision {}",
            client.client_name,
            client.version_major,
            client.version_minor,
            client.revision,
            client.identity(),
            client.database,
            revision
        );

        ServerHello::new(&self.info, revision)
            .write(transport, revision)
            .map_err(ProtocolError::Handshake)?;

        Ok(Handshake { client, revision })
    }
}
