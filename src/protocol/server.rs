use std::{
    fs,
    io::{self, ErrorKind as IoErrorKind},
    net::{SocketAddr, TcpListener, TcpStream},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    config::ServerConfig,
    engine::Engine,
    session::SessionRegistry,
};

use super::{
    ErrorKind, ProtocolError, TransportError,
    connection::{Connection, ServerContext},
    handshake::Negotiator,
    thread::{ConnectionLimiter, AdmissionError},
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: SocketAddr, source: io::Error },
    #[error("failed to prepare data directory {path}: {source}")]
    DataDir { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Accepts native-protocol connections and runs each on its own thread.
pub struct NativeServer {
    listener: TcpListener,
    limiter: ConnectionLimiter,
    context: Arc<ServerContext>,
    idle_timeout: Option<Duration>,
}

impl NativeServer {
    pub fn bind(config: &ServerConfig, engine: Arc<dyn Engine>) -> Result<Self, ServerError> {
        fs::create_dir_all(&config.data_dir).map_err(|source| ServerError::DataDir {
            path: config.data_dir.clone(),
            source,
        })?;

        let listener = TcpListener::bind(config.address).map_err(|source| ServerError::Bind {
            address: config.address,
            source,
        })?;

        let sessions = SessionRegistry::new(engine, &config.data_dir, config.session_mode);
        let negotiator = Negotiator::new(config.server_info());

        Ok(Self {
            listener,
            limiter: ConnectionLimiter::new(config.connection_limit()),
            context: Arc::new(ServerContext::new(negotiator, sessions)),
            idle_timeout: config.idle_timeout(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Accept connections until the listener fails.
    pub fn serve(self) -> Result<(), ServerError> {
        match self.limiter.limit() {
            Some(limit) => info!("listening at {} (max connections: {limit})", self.local_addr()?),
            None => info!("listening at {}", self.local_addr()?),
        }

        let mut next_id = 0u64;
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    next_id += 1;
                    let id = next_id;
                    if let Err(e) = stream.set_read_timeout(self.idle_timeout) {
                        warn!("connection {id}: failed to set idle timeout: {e}");
                    }
                    let context = Arc::clone(&self.context);
                    match self.limiter.spawn(id, move || handle_connection(id, stream, context)) {
                        Ok(()) => debug!(
                            "connection {id} admitted ({} active)",
                            self.limiter.active()
                        ),
                        // The stream moved into the rejected closure and is closed with it.
                        Err(AdmissionError::Saturated(limit)) => {
                            warn!("refusing connection {id}: max connections ({limit}) reached")
                        }
                        Err(e) => warn!("connection {id}: {e}"),
                    }
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }
}

fn handle_connection(id: u64, stream: TcpStream, context: Arc<ServerContext>) {
    match stream.peer_addr() {
        Ok(peer) => info!("connection {id} from {peer}"),
        Err(_) => info!("connection {id} accepted"),
    }

    let mut connection = Connection::new(id, stream, context);
    match connection.run() {
        Ok(()) => info!("connection {id} closed"),
        Err(e) if e.is_connection_closed() => debug!("connection {id}: peer went away: {e}"),
        Err(e) if is_idle_timeout(&e) => info!("connection {id} idle, closing"),
        Err(e) => match e.kind() {
            ErrorKind::HandshakeFailure => warn!("connection {id}: handshake failed: {e}"),
            ErrorKind::ProtocolViolation => warn!("connection {id}: protocol violation: {e}"),
            ErrorKind::DecodeError => warn!("connection {id}: undecodable packet: {e}"),
        },
    }
}

/// A read hit the socket's idle timeout.
fn is_idle_timeout(error: &ProtocolError) -> bool {
    match error {
        ProtocolError::Transport(TransportError::Io(e))
        | ProtocolError::Handshake(TransportError::Io(e)) => {
            matches!(e.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read, thread, time::Instant};

    use tempdir::TempDir;

    use super::*;
    use crate::{
        engine::testing::ScriptedEngine,
        protocol::{CLIENT_NAME, ClientHello, NativeClient, QueryResponse, SERVER_REVISION},
    };

    fn hello() -> ClientHello {
        ClientHello {
            client_name: CLIENT_NAME.into(),
            version_major: 25,
            version_minor: 5,
            revision: SERVER_REVISION,
            database: "default".into(),
            user: "b".into(),
            password: "b".into(),
        }
    }

    fn start(config: ServerConfig) -> (SocketAddr, Arc<ScriptedEngine>) {
        let engine = Arc::new(ScriptedEngine::default());
        let server = NativeServer::bind(&config, engine.clone()).unwrap();
        let address = server.local_addr().unwrap();
        thread::spawn(move || server.serve());
        (address, engine)
    }

    fn config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            address: "127.0.0.1:0".parse().unwrap(),
            data_dir: dir.path().join("data"),
            max_connections: 4,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn serves_queries_over_tcp() {
        let dir = TempDir::new("server").unwrap();
        let (address, _) = start(config(&dir));

        let mut client = NativeClient::connect(address, "a", "a", "default").unwrap();
        assert_eq!(client.server().unwrap().timezone.as_deref(), Some("UTC"));

        match client.query("SELECT 1 as num").unwrap() {
            QueryResponse::Blocks(blocks) => {
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].columns[0].name, "num");
                assert_eq!(blocks[0].columns[0].display(0).as_deref(), Some("1"));
            }
            other => panic!("unexpected response {other:?}"),
        }

        assert_eq!(
            client.query("CREATE TABLE t (x UInt8) ENGINE = Memory").unwrap(),
            QueryResponse::Blocks(Vec::new())
        );
        assert!(matches!(
            client.query("SELECT bogus_fn()").unwrap(),
            QueryResponse::Exception(message) if message.contains("bogus_fn")
        ));
        client.ping().unwrap();
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn concurrent_clients_share_a_session_per_identity() {
        let dir = TempDir::new("server").unwrap();
        let (address, engine) = start(config(&dir));

        let workers: Vec<_> = (0..3)
            .map(|_| {
                thread::spawn(move || {
                    let mut client = NativeClient::connect(address, "a", "a", "default").unwrap();
                    client.query("SELECT 1 as num").unwrap()
                })
            })
            .collect();
        for worker in workers {
            assert!(matches!(worker.join().unwrap(), QueryResponse::Blocks(_)));
        }

        let mut other = NativeClient::connect(address, "b", "b", "default").unwrap();
        other.query("SELECT 1 as num").unwrap();
        assert_eq!(engine.opened(), 2);
    }

    #[test]
    fn idle_connections_are_dropped() {
        let dir = TempDir::new("server").unwrap();
        let (address, _) = start(ServerConfig {
            idle_timeout: 1,
            ..config(&dir)
        });

        let mut stream = TcpStream::connect(address).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn idle_client_does_not_hold_up_the_next() {
        let dir = TempDir::new("server").unwrap();
        let (address, _) = start(ServerConfig {
            max_connections: 0,
            ..config(&dir)
        });

        let idle: Vec<_> = (0..8)
            .map(|_| NativeClient::connect(address, "a", "a", "default").unwrap())
            .collect();

        let stream = TcpStream::connect(address).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut next = NativeClient::new(stream, hello());
        assert_eq!(next.hello().unwrap().name, "CowsDB");
        next.ping().unwrap();
        drop(idle);
    }

    #[test]
    fn connections_over_the_limit_are_refused() {
        let dir = TempDir::new("server").unwrap();
        let (address, _) = start(ServerConfig {
            max_connections: 1,
            ..config(&dir)
        });

        let first = NativeClient::connect(address, "a", "a", "default").unwrap();

        let mut refused = TcpStream::connect(address).unwrap();
        refused.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(refused.read(&mut buf).unwrap(), 0);

        drop(first);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match NativeClient::connect(address, "a", "a", "default") {
                Ok(mut client) => break client.ping().unwrap(),
                Err(e) => {
                    assert!(Instant::now() < deadline, "slot never freed: {e}");
                    thread::sleep(Duration::from_millis(20));
                }
            }
        }
    }

    #[test]
    fn garbage_gets_no_reply() {
        let dir = TempDir::new("server").unwrap();
        let (address, _) = start(config(&dir));

        let mut stream = TcpStream::connect(address).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        io::Write::write_all(&mut stream, &[4]).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }
}
