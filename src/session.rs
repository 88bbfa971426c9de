//! Engine sessions shared by identity.
//!
//! Every connection presenting the same credentials shares one [`SessionHandle`]. The
//! registry lock only covers lookup and creation; executions run outside of it. Whether
//! executions on one handle are additionally serialized is a [`SessionMode`] decision,
//! since not every engine tolerates concurrent use of a single session.
use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use clap::ValueEnum;
use log::{debug, info};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::engine::{Engine, EngineError, EngineSession};

/// Directory name used for the anonymous identity.
pub const ANONYMOUS_KEY: &str = "anonymous";

/// Credentials presented in HELLO. Only ever used as a lookup key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Anonymous,
    User { user: String, password: String },
}

impl Identity {
    /// No user and no password is anonymous; anything else is a distinct identity.
    pub fn new(user: &str, password: &str) -> Self {
        if user.is_empty() && password.is_empty() {
            Identity::Anonymous
        } else {
            Identity::User {
                user: user.to_string(),
                password: password.to_string(),
            }
        }
    }

    pub fn user(&self) -> &str {
        match self {
            Identity::Anonymous => "",
            Identity::User { user, .. } => user,
        }
    }

    /// Stable key, safe to use as a directory name.
    pub fn key(&self) -> String {
        match self {
            Identity::Anonymous => ANONYMOUS_KEY.to_string(),
            Identity::User { user, password } => {
                let mut hasher = Sha256::new();
                hasher.update(user.as_bytes());
                hasher.update(b":");
                hasher.update(password.as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Identity::Anonymous
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => write!(f, "anonymous"),
            Identity::User { user, .. } => write!(f, "{user}"),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => write!(f, "Anonymous"),
            Identity::User { user, .. } => f
                .debug_struct("User")
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

/// How executions on one shared session interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SessionMode {
    /// One execution at a time per session.
    #[default]
    Serialized,
    /// Executions run concurrently; the engine must allow it.
    Shared,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create session directory {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("session registry lock poisoned")]
    Poisoned,
}

/// A reusable engine session.
pub struct SessionHandle {
    id: u64,
    dir: PathBuf,
    mode: SessionMode,
    session: Box<dyn EngineSession>,
    exclusive: Mutex<()>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn execute(&self, query: &str, format: &str) -> Result<Vec<u8>, EngineError> {
        match self.mode {
            SessionMode::Serialized => {
                // The guarded value is `()`, so a poisoned lock carries no broken state.
                let _guard = self.exclusive.lock().unwrap_or_else(PoisonError::into_inner);
                self.session.execute(query, format)
            }
            SessionMode::Shared => self.session.execute(query, format),
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Identity → session map. At most one handle exists per identity; handles live until
/// the registry is dropped.
pub struct SessionRegistry {
    engine: Arc<dyn Engine>,
    root: PathBuf,
    mode: SessionMode,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn Engine>, root: impl Into<PathBuf>, mode: SessionMode) -> Self {
        Self {
            engine,
            root: root.into(),
            mode,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn get_or_create(&self, identity: &Identity) -> Result<Arc<SessionHandle>, SessionError> {
        let key = identity.key();
        let mut sessions = self.sessions.lock().map_err(|_| SessionError::Poisoned)?;

        if let Some(handle) = sessions.get(&key) {
            debug!("reusing session {} for {identity}", handle.id);
            return Ok(Arc::clone(handle));
        }

        let dir = self.root.join(&key);
        fs::create_dir_all(&dir).map_err(|source| SessionError::Directory {
            path: dir.clone(),
            source,
        })?;
        let session = self.engine.open_session(identity, &dir)?;

        let handle = Arc::new(SessionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            dir,
            mode: self.mode,
            session,
            exclusive: Mutex::new(()),
        });
        info!(
            "created session {} for {identity} at {}",
            handle.id,
            handle.dir.display()
        );
        sessions.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .map(|sessions| sessions.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
