//! Sessions: a scope that owns temp storage and releases it on teardown.
//!
//! The registry lock covers registration and the Active -> Cleaned flip only;
//! resources are released after the lock is dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tieredio_core::config::IoConfig;
use tieredio_core::error::{Error, Result};
use tieredio_core::id::{unique_token, SessionId};
use tieredio_io::{fs, HttpClient};
use tieredio_mem::{BufferContext, MemoryGauge, Resource, SpillTarget};

use crate::manager::Lease;
use crate::metrics::{OpCounters, SessionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Active,
    Cleaned,
}

/// What a session borrows from the manager that created it.
#[derive(Clone)]
pub(crate) struct SessionShared {
    pub config: Arc<IoConfig>,
    pub lease: Arc<Lease>,
    pub gauge: MemoryGauge,
    pub http: HttpClient,
}

/// The session's private directory, created on first use.
///
/// Buffers hold this (not the session) as their spill target, so a buffer
/// registered with a session never keeps the session itself alive.
struct SessionDir {
    session: SessionId,
    path: PathBuf,
    created: OnceCell<()>,
    closed: RwLock<bool>,
}

impl SessionDir {
    /// Refuse further spills and report whether the directory was ever made.
    fn close(&self) -> bool {
        *self.closed.write() = true;
        self.created.get().is_some()
    }
}

impl SpillTarget for SessionDir {
    fn spill_dir(&self) -> Result<PathBuf> {
        // Held across creation so `close` cannot slip in between.
        let closed = self.closed.read();
        if *closed {
            return Err(Error::SessionAlreadyCleaned {
                session: self.session,
            });
        }
        self.created.get_or_try_init(|| {
            fs::ensure_directory(&self.path).map_err(|e| {
                Error::SpillFailed(format!("create session dir {}: {e}", self.path.display()))
            })?;
            tracing::debug!(session = %self.session, path = %self.path.display(), "created session directory");
            Ok::<_, Error>(())
        })?;
        Ok(self.path.clone())
    }
}

struct Registry {
    state: SessionState,
    resources: Vec<Arc<dyn Resource>>,
}

struct SessionInner {
    id: SessionId,
    dir: Arc<SessionDir>,
    shared: SessionShared,
    registry: Mutex<Registry>,
    counters: OpCounters,
}

impl SessionInner {
    fn cleanup(&self) -> Result<()> {
        let resources = {
            let mut reg = self.registry.lock();
            if reg.state == SessionState::Cleaned {
                return Ok(());
            }
            reg.state = SessionState::Cleaned;
            std::mem::take(&mut reg.resources)
        };
        let dir_created = self.dir.close();

        let mut first_err = None;
        let mut released = 0usize;
        for res in resources.iter().rev() {
            if res.is_released() {
                continue;
            }
            match res.release() {
                Ok(()) => released += 1,
                Err(e) => {
                    tracing::warn!(session = %self.id, resource = %res.describe(), error = %e, "failed to release resource");
                    first_err.get_or_insert(e);
                }
            }
        }
        if dir_created {
            if let Err(e) = fs::remove_path(&self.dir.path) {
                first_err.get_or_insert(Error::Io(e));
            }
        }

        if let Err(e) = self.shared.lease.release_if_unused() {
            tracing::debug!(session = %self.id, error = %e, "lease directory left in place");
        }

        tracing::debug!(session = %self.id, released, "session cleaned");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let active = self.registry.get_mut().state == SessionState::Active;
        if !active {
            return;
        }
        let pending = self.registry.get_mut().resources.len();
        if pending > 0 || self.dir.created.get().is_some() {
            tracing::warn!(session = %self.id, pending, "session dropped without cleanup");
        }
        if let Err(e) = self.cleanup() {
            tracing::warn!(session = %self.id, error = %e, "cleanup of dropped session failed");
        }
    }
}

/// Handle to one session. Clones share the same registry.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("dir", &self.inner.dir.path)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(shared: SessionShared) -> Self {
        let id = SessionId::next();
        let path = shared.lease.path.join(format!("session-{}-{}", id.get(), unique_token()));
        tracing::debug!(session = %id, "session created");
        Self {
            inner: Arc::new(SessionInner {
                id,
                dir: Arc::new(SessionDir {
                    session: id,
                    path,
                    created: OnceCell::new(),
                    closed: RwLock::new(false),
                }),
                shared,
                registry: Mutex::new(Registry {
                    state: SessionState::Active,
                    resources: Vec::new(),
                }),
                counters: OpCounters::default(),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Where this session's spill files live. Not created until first needed.
    pub fn dir(&self) -> &Path {
        &self.inner.dir.path
    }

    pub fn state(&self) -> SessionState {
        self.inner.registry.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn config(&self) -> &IoConfig {
        &self.inner.shared.config
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.inner.shared.http
    }

    pub(crate) fn counters(&self) -> &OpCounters {
        &self.inner.counters
    }

    /// Context for buffers whose temp files belong to this session.
    pub fn buffer_context(&self) -> BufferContext {
        BufferContext::new(
            Arc::clone(&self.inner.shared.config),
            Arc::clone(&self.inner.dir) as Arc<dyn SpillTarget>,
            self.inner.shared.gauge.clone(),
        )
    }

    /// The session directory, created if needed. Fails once cleaned.
    pub fn spill_dir(&self) -> Result<PathBuf> {
        self.inner.dir.spill_dir()
    }

    pub fn ensure_active(&self) -> Result<()> {
        match self.state() {
            SessionState::Active => Ok(()),
            SessionState::Cleaned => Err(Error::SessionAlreadyCleaned {
                session: self.inner.id,
            }),
        }
    }

    /// Hand ownership of `resource` to the session. On error the resource is
    /// still the caller's to release.
    pub fn register(&self, resource: Arc<dyn Resource>) -> Result<()> {
        let mut reg = self.inner.registry.lock();
        if reg.state == SessionState::Cleaned {
            return Err(Error::SessionAlreadyCleaned {
                session: self.inner.id,
            });
        }
        tracing::trace!(session = %self.inner.id, resource = %resource.describe(), "registered");
        reg.resources.push(resource);
        Ok(())
    }

    /// Registered resources, including ones the caller already released.
    pub fn resource_count(&self) -> usize {
        self.inner.registry.lock().resources.len()
    }

    pub fn stats(&self) -> SessionStats {
        let (cleaned, resources) = {
            let reg = self.inner.registry.lock();
            (reg.state == SessionState::Cleaned, reg.resources.len())
        };
        SessionStats::snapshot(self.inner.id, cleaned, resources, &self.inner.counters)
    }

    /// Release every registered resource, most recent first, and remove the
    /// session directory. A second call is a no-op.
    ///
    /// Every resource is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn cleanup(&self) -> Result<()> {
        self.inner.cleanup()
    }
}
