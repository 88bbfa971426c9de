use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use log::{debug, error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("connection limit of {0} reached")]
    Saturated(usize),
    #[error("failed to spawn connection thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Counts live connection threads against an optional cap.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    active: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl ConnectionLimiter {
    /// `limit` of `None` admits every connection.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn try_acquire(&self) -> Option<Permit> {
        let admitted = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match self.limit {
                Some(limit) if n >= limit => None,
                _ => Some(n + 1),
            })
            .is_ok();

        admitted.then(|| Permit {
            active: Arc::clone(&self.active),
        })
    }

    /// Run `job` on a thread of its own, holding a permit until it returns or panics.
    pub fn spawn<F>(&self, id: u64, job: F) -> Result<(), AdmissionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = self
            .try_acquire()
            .ok_or(AdmissionError::Saturated(self.limit.unwrap_or_default()))?;

        thread::Builder::new()
            .name(format!("cowsdb-conn-{id}"))
            .spawn(move || {
                let _permit = permit;
                debug!("thread for connection {id} started");
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("connection {id}: handler panicked");
                }
            })?;
        Ok(())
    }
}

/// One admitted connection. Dropping it frees the slot.
#[derive(Debug)]
pub struct Permit {
    active: Arc<AtomicUsize>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
