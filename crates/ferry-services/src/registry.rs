//! Session registry — the set of live, named sessions.
//!
//! The registry is the only state shared between connection tasks. It is
//! guarded by one mutex that is never held across an await point: callers get
//! owned [`SessionHandle`] clones and do their I/O after the lock is released.
//! Handles never touch a socket directly. Everything they send goes through
//! the session's outbound queue, whose writer owns the connection.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::outbound::{Outbound, OutboundTx};

/// Process-unique session identifier. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cheap, cloneable view of one registered session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub name: Arc<str>,
    pub addr: SocketAddr,
    /// Queue drained by the connection's writer task.
    pub outbound: OutboundTx,
    /// Cancelled to force the session's task to tear down.
    pub kick: CancellationToken,
    pub joined_at: Instant,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        name: impl Into<Arc<str>>,
        addr: SocketAddr,
        outbound: OutboundTx,
        kick: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            addr,
            outbound,
            kick,
            joined_at: Instant::now(),
        }
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions whose queue accepted the message.
    pub delivered: usize,
    /// Sessions that were stalled or gone and have been evicted.
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry full ({capacity} sessions)")]
    Full { capacity: usize },
    #[error("session {0} is already registered")]
    DuplicateId(SessionId),
}

pub struct SessionRegistry {
    capacity: usize,
    next_id: AtomicU64,
    sessions: Mutex<BTreeMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Allocate a fresh id. Ids are handed out at accept time, before the
    /// session is registered.
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SessionId, SessionHandle>> {
        // No code path panics while holding the lock; a poisoned map is intact.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session. The capacity check and the insert happen under
    /// one lock acquisition.
    pub fn add(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.lock();
        if sessions.contains_key(&handle.id) {
            return Err(RegistryError::DuplicateId(handle.id));
        }
        if sessions.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        sessions.insert(handle.id, handle);
        Ok(())
    }

    /// Remove a session. Returns `None` if it was already gone.
    pub fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        self.lock().remove(&id)
    }

    /// Remove a session and kick its task.
    pub fn evict(&self, id: SessionId) -> Option<SessionHandle> {
        let handle = self.remove(id)?;
        handle.kick.cancel();
        tracing::info!(session = %id, name = %handle.name, addr = %handle.addr, "session evicted");
        Some(handle)
    }

    /// Earliest-registered live session with this name.
    pub fn find_by_name(&self, name: &str) -> Option<SessionHandle> {
        self.lock()
            .values()
            .find(|h| &*h.name == name)
            .cloned()
    }

    /// Queue `message` on every session except `exclude`.
    ///
    /// Targets are snapshotted and the lock released before anything is sent.
    /// A full or closed queue evicts that session; the rest still receive the
    /// message.
    pub fn broadcast(&self, message: Bytes, exclude: Option<SessionId>) -> BroadcastReport {
        let targets: Vec<SessionHandle> = self
            .lock()
            .values()
            .filter(|h| Some(h.id) != exclude)
            .cloned()
            .collect();

        let mut report = BroadcastReport::default();
        for target in targets {
            match target.outbound.try_send(Outbound::Line(message.clone())) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(session = %target.id, name = %target.name, "outbound queue full, dropping peer");
                    self.evict(target.id);
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(session = %target.id, "outbound queue closed");
                    self.evict(target.id);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    /// All live handles, in registration order.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
