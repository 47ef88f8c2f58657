//! The long-lived factory for sessions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tieredio_core::config::IoConfig;
use tieredio_core::error::{Error, Result};
use tieredio_core::id::{unique_token, ManagerId};
use tieredio_io::{fs, HttpClient};
use tieredio_mem::MemoryGauge;

use crate::context::Context;
use crate::session::{Session, SessionShared};

pub const LEASE_PREFIX: &str = "tieredio-";

/// Per-manager directory under the base dir; sessions live inside it.
#[derive(Debug)]
pub(crate) struct Lease {
    pub path: PathBuf,
    closed: AtomicBool,
}

impl Lease {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remove the directory once the manager is closed and nothing is left in it.
    pub fn release_if_unused(&self) -> Result<bool> {
        if !self.is_closed() {
            return Ok(false);
        }
        Ok(fs::remove_dir_if_empty(&self.path)?)
    }
}

struct ManagerInner {
    id: ManagerId,
    config: Arc<IoConfig>,
    lease: Arc<Lease>,
    gauge: MemoryGauge,
    http: HttpClient,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if self.lease.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.lease.release_if_unused() {
            Ok(removed) => tracing::debug!(manager = %self.id, removed, "io manager dropped"),
            Err(e) => tracing::warn!(manager = %self.id, error = %e, "lease directory left after drop"),
        }
    }
}

/// Immutable configuration plus a session factory. Clones share state, so
/// one manager can back any number of concurrent sessions.
#[derive(Clone)]
pub struct IoManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for IoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoManager")
            .field("id", &self.inner.id)
            .field("lease_dir", &self.inner.lease.path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl IoManager {
    /// Validate `config` and lease a directory under its base dir.
    ///
    /// Fails with `ConfigurationInvalid` when the thresholds are misordered or
    /// the base directory cannot be created or written to.
    pub fn new(config: IoConfig) -> Result<Self> {
        config.validate()?;
        let base = config.resolved_base_dir();
        let lease_dir = lease_directory(&base)?;

        let id = ManagerId::next();
        tracing::debug!(manager = %id, lease = %lease_dir.display(), storage = ?config.storage, "io manager ready");

        Ok(Self {
            inner: Arc::new(ManagerInner {
                id,
                gauge: MemoryGauge::new(config.memory_limit),
                http: HttpClient::new(&config.http),
                config: Arc::new(config),
                lease: Arc::new(Lease::new(lease_dir)),
            }),
        })
    }

    /// `IoConfig::from_env()` then [`IoManager::new`].
    pub fn from_env() -> Result<Self> {
        Self::new(IoConfig::from_env())
    }

    pub fn id(&self) -> ManagerId {
        self.inner.id
    }

    pub fn config(&self) -> &IoConfig {
        &self.inner.config
    }

    pub fn lease_dir(&self) -> &Path {
        &self.inner.lease.path
    }

    pub fn gauge(&self) -> &MemoryGauge {
        &self.inner.gauge
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lease.is_closed()
    }

    pub fn new_session(&self) -> Result<Session> {
        if self.is_closed() {
            return Err(Error::ManagerClosed);
        }
        Ok(Session::new(SessionShared {
            config: Arc::clone(&self.inner.config),
            lease: Arc::clone(&self.inner.lease),
            gauge: self.inner.gauge.clone(),
            http: self.inner.http.clone(),
        }))
    }

    /// Run `f` with a context holding a fresh session; the session is cleaned
    /// up on every exit path, including a panic unwinding through `f`.
    ///
    /// An error from `f` wins over a cleanup error.
    pub fn with_session<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Context) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let session = self.new_session()?;
        let guard = CleanupGuard(Some(session.clone()));
        let ctx = Context::background().with_session(session);
        let out = f(&ctx);
        let cleaned = guard.finish();
        let value = out?;
        cleaned?;
        Ok(value)
    }

    /// Close the manager and drop its lease on the base directory.
    ///
    /// Sessions already handed out keep working; the lease directory goes away
    /// with the last of them to clean up.
    pub fn cleanup(&self) -> Result<()> {
        if self.inner.lease.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let removed = self.inner.lease.release_if_unused()?;
        tracing::debug!(manager = %self.inner.id, removed, "io manager closed");
        Ok(())
    }
}

/// Cleans the session up when dropped unless `finish` already did.
struct CleanupGuard(Option<Session>);

impl CleanupGuard {
    fn finish(mut self) -> Result<()> {
        match self.0.take() {
            Some(session) => session.cleanup(),
            None => Ok(()),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            if let Err(e) = session.cleanup() {
                tracing::warn!(session = %session.id(), error = %e, "cleanup during unwind failed");
            }
        }
    }
}

fn lease_directory(base: &Path) -> Result<PathBuf> {
    fs::ensure_directory(base).map_err(|e| {
        Error::ConfigurationInvalid(format!("base dir {} is not usable: {e}", base.display()))
    })?;
    let meta = fs::stat_path(base).map_err(|e| {
        Error::ConfigurationInvalid(format!("base dir {} is not usable: {e}", base.display()))
    })?;
    if !meta.is_dir() {
        return Err(Error::ConfigurationInvalid(format!(
            "base dir {} is not a directory",
            base.display()
        )));
    }

    let lease = base.join(format!("{LEASE_PREFIX}{}", unique_token()));
    // Creating the lease doubles as the writability probe.
    fs::ensure_directory(&lease).map_err(|e| {
        Error::ConfigurationInvalid(format!("base dir {} is not writable: {e}", base.display()))
    })?;
    Ok(lease)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_misordered_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = IoConfig::new(dir.path(), Default::default())
            .with_threshold(10_000)
            .with_spill_threshold(100);
        assert!(matches!(
            IoManager::new(cfg),
            Err(Error::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn rejects_file_as_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = IoManager::new(IoConfig::new(&file, Default::default())).unwrap_err();
        assert!(matches!(err, Error::ConfigurationInvalid(_)));
    }

    #[test]
    fn cleanup_closes_and_removes_empty_lease() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = IoManager::new(IoConfig::new(dir.path(), Default::default())).unwrap();
        let lease = mgr.lease_dir().to_path_buf();
        assert!(lease.is_dir());
        mgr.cleanup().unwrap();
        assert!(!lease.exists());
        assert!(matches!(mgr.new_session(), Err(Error::ManagerClosed)));
        mgr.cleanup().unwrap();
    }

    #[test]
    fn lease_outlives_manager_while_sessions_hold_files() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = IoManager::new(IoConfig::new(dir.path(), Default::default())).unwrap();
        let session = mgr.new_session().unwrap();
        session.spill_dir().unwrap();
        mgr.cleanup().unwrap();
        assert!(mgr.lease_dir().exists());
        assert!(session.is_active());
        session.cleanup().unwrap();
        assert!(!session.dir().exists());
        assert!(!mgr.lease_dir().exists());
    }

    #[test]
    fn dropping_manager_releases_lease() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = IoManager::new(IoConfig::new(dir.path(), Default::default())).unwrap();
        mgr.with_session(|ctx| ctx.session()?.spill_dir().map(drop))
            .unwrap();
        let clone = mgr.clone();
        drop(mgr);
        assert!(clone.lease_dir().exists());
        drop(clone);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dropped_manager_lease_goes_with_last_session() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = IoManager::new(IoConfig::new(dir.path(), Default::default())).unwrap();
        let session = mgr.new_session().unwrap();
        session.spill_dir().unwrap();
        drop(mgr);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        session.cleanup().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn with_session_cleans_up_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = IoManager::new(IoConfig::new(dir.path(), Default::default())).unwrap();
        let mut seen = None;
        let res: Result<()> = mgr.with_session(|ctx| {
            let s = ctx.session()?.clone();
            s.spill_dir()?;
            seen = Some(s);
            Err(Error::Cancelled)
        });
        assert!(matches!(res, Err(Error::Cancelled)));
        let s = seen.unwrap();
        assert!(!s.is_active());
        assert!(!s.dir().exists());
    }
}
