//! Server configuration.
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{protocol::ServerInfo, session::SessionMode};

/// Native-protocol server for an embedded columnar query engine.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(version, about, long_about = None)]
pub struct ServerConfig {
    /// Listen for new connections at address
    #[arg(long, default_value = "0.0.0.0:9000")]
    pub address: SocketAddr,

    /// Root directory of per-identity session directories
    #[arg(long, default_value = "/tmp/cowsdb")]
    pub data_dir: PathBuf,

    /// Engine executable, invoked once per query
    #[arg(long, default_value = "cowsdb-engine")]
    pub engine: PathBuf,

    /// Connections served at the same time, 0 for no limit; more are refused
    #[arg(long, default_value_t = 64)]
    pub max_connections: usize,

    /// Seconds a connection may sit idle before it is dropped, 0 to wait forever
    #[arg(long, default_value_t = 300)]
    pub idle_timeout: u64,

    /// Whether queries sharing one session run one at a time
    #[arg(long, value_enum, default_value_t = SessionMode::Serialized)]
    pub session_mode: SessionMode,

    /// Timezone announced to clients
    #[arg(long, default_value = "UTC")]
    pub timezone: String,

    /// Display name announced to clients
    #[arg(long, default_value = "CowsDB")]
    pub display_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 9000)),
            data_dir: PathBuf::from("/tmp/cowsdb"),
            engine: PathBuf::from("cowsdb-engine"),
            max_connections: 64,
            idle_timeout: 300,
            session_mode: SessionMode::Serialized,
            timezone: "UTC".into(),
            display_name: "CowsDB".into(),
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    pub fn connection_limit(&self) -> Option<usize> {
        (self.max_connections > 0).then_some(self.max_connections)
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            timezone: self.timezone.clone(),
            display_name: self.display_name.clone(),
            ..ServerInfo::default()
        }
    }
}
