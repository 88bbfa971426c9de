pub mod cli;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod session;
pub mod statement;

pub use cli::{CliError, Command, format_block, prompt};
pub use config::ServerConfig;
pub use engine::{CommandEngine, Engine, EngineError, EngineSession};
pub use session::{Identity, SessionHandle, SessionMode, SessionRegistry};
pub use statement::StatementKind;
