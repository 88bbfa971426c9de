/// Packet types a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPacket {
    Hello = 0,
    Query = 1,
    Data = 2,
    Cancel = 3,
    Ping = 4,
}

impl TryFrom<u64> for ClientPacket {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClientPacket::Hello),
            1 => Ok(ClientPacket::Query),
            2 => Ok(ClientPacket::Data),
            3 => Ok(ClientPacket::Cancel),
            4 => Ok(ClientPacket::Ping),
            other => Err(other),
        }
    }
}

impl From<ClientPacket> for u64 {
    fn from(value: ClientPacket) -> Self {
        value as u64
    }
}

/// How far the client wants the query processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    FetchColumns,
    WithMergeableState,
    Complete,
    Other(u64),
}

impl From<u64> for QueryStage {
    fn from(value: u64) -> Self {
        match value {
            0 => QueryStage::FetchColumns,
            1 => QueryStage::WithMergeableState,
            2 => QueryStage::Complete,
            other => QueryStage::Other(other),
        }
    }
}

impl From<QueryStage> for u64 {
    fn from(value: QueryStage) -> Self {
        match value {
            QueryStage::FetchColumns => 0,
            QueryStage::WithMergeableState => 1,
            QueryStage::Complete => 2,
            QueryStage::Other(other) => other,
        }
    }
}

/// The QUERY compression flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Disabled,
    Enabled,
    /// Any other flag value; still frames a compressed payload on the wire.
    Unknown(u64),
}

impl From<u64> for Compression {
    fn from(value: u64) -> Self {
        match value {
            0 => Compression::Disabled,
            1 => Compression::Enabled,
            other => Compression::Unknown(other),
        }
    }
}

impl From<Compression> for u64 {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Disabled => 0,
            Compression::Enabled => 1,
            Compression::Unknown(other) => other,
        }
    }
}
