//! Query engine collaborator.
//!
//! The server never interprets SQL itself. It asks an [`Engine`] for a session per
//! identity and hands each query text, plus the output format it wants, to that session.
//! Results come back as raw bytes in the layout [`ResultBlock::from_raw`] understands.
//!
//! [`ResultBlock::from_raw`]: crate::protocol::ResultBlock::from_raw
use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::debug;
use thiserror::Error;

use crate::session::Identity;

/// A failed execution. Reported to the client, never fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub trait Engine: Send + Sync {
    /// Open a session rooted at `dir`, which already exists.
    fn open_session(
        &self,
        identity: &Identity,
        dir: &Path,
    ) -> Result<Box<dyn EngineSession>, EngineError>;
}

pub trait EngineSession: Send + Sync {
    fn execute(&self, query: &str, format: &str) -> Result<Vec<u8>, EngineError>;
}

/// Runs every query through an external executable:
///
/// `<program> --path <session dir> --format <format>` with the query on stdin.
///
/// Stdout is the result; a non-zero exit status turns stderr into an [`EngineError`].
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Engine for CommandEngine {
    fn open_session(
        &self,
        identity: &Identity,
        dir: &Path,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        debug!("opening engine session for {identity} at {}", dir.display());
        Ok(Box::new(CommandSession {
            program: self.program.clone(),
            dir: dir.to_path_buf(),
        }))
    }
}

struct CommandSession {
    program: PathBuf,
    dir: PathBuf,
}

impl EngineSession for CommandSession {
    fn execute(&self, query: &str, format: &str) -> Result<Vec<u8>, EngineError> {
        let mut child = Command::new(&self.program)
            .arg("--path")
            .arg(&self.dir)
            .arg("--format")
            .arg(format)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EngineError::new(format!(
                    "failed to start engine '{}': {e}",
                    self.program.display()
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(query.as_bytes()) {
                // The engine may exit without reading; its status tells the story.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(EngineError::new(format!(
                        "failed to send query to engine: {e}"
                    )));
                }
                Ok(()) => {}
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| EngineError::new(format!("engine did not finish: {e}")))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(EngineError::new(format!("engine exited with {}", output.status)))
        } else {
            Err(EngineError::new(stderr))
        }
    }
}
