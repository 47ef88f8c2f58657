//! Call-scoped context: the ambient session plus cancellation.

use std::time::{Duration, Instant};

use tieredio_core::cancel::{CancelScope, CancelToken};
use tieredio_core::error::{Error, Result};
use tieredio_io::HttpClient;

use crate::session::Session;

/// Passed by reference into every operation. Cloning is cheap; clones share
/// the cancel token.
#[derive(Debug, Clone, Default)]
pub struct Context {
    session: Option<Session>,
    scope: CancelScope,
    http: Option<HttpClient>,
}

impl Context {
    /// No session, no deadline, never cancelled until [`Context::cancel`].
    pub fn background() -> Self {
        Self::default()
    }

    /// Attach `session`. URL sources opened under this context use the
    /// session's HTTP settings.
    pub fn with_session(&self, session: Session) -> Self {
        let mut ctx = self.clone();
        ctx.http = Some(session.http().clone());
        ctx.session = Some(session);
        ctx
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut ctx = self.clone();
        ctx.scope = ctx.scope.with_timeout(timeout);
        ctx
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.clone();
        ctx.scope = ctx.scope.with_deadline(deadline);
        ctx
    }

    /// Same session with a fresh cancel token; the deadline carries over.
    /// Cancelling the child does not cancel `self`.
    pub fn detached(&self) -> Self {
        let mut scope = CancelScope::new(CancelToken::new());
        if let Some(deadline) = self.scope.deadline() {
            scope = scope.with_deadline(deadline);
        }
        Self {
            session: self.session.clone(),
            scope,
            http: self.http.clone(),
        }
    }

    /// The attached session, or [`Error::NoSessionInContext`].
    pub fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NoSessionInContext)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.scope.token().clone()
    }

    pub fn cancel(&self) {
        self.scope.token().cancel();
    }

    pub fn check(&self) -> Result<()> {
        self.scope.check()
    }

    pub(crate) fn http(&self) -> HttpClient {
        self.http.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_is_an_error() {
        let ctx = Context::background();
        assert!(matches!(ctx.session(), Err(Error::NoSessionInContext)));
        assert!(!ctx.has_session());
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = Context::background();
        let other = ctx.with_timeout(Duration::from_secs(60));
        ctx.cancel();
        assert!(matches!(other.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn detached_context_has_own_token() {
        let ctx = Context::background().with_timeout(Duration::from_secs(60));
        let child = ctx.detached();
        child.cancel();
        assert!(ctx.check().is_ok());
        assert_eq!(child.scope().deadline(), ctx.scope().deadline());
    }

    #[test]
    fn elapsed_deadline_is_reported() {
        let ctx = Context::background().with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }
}
