//! Per-request context threaded through every gateway call.
//!
//! There is no connection-scoped mutable state on the gateway itself; the
//! session, log tags and cancellation signal travel with the request.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

/// Cancellation signal shared between a caller and the work it started.
///
/// Cancelling closes an internal channel, which wakes every waiter at once.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let sender = match self.inner.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleeps for `timeout` unless cancelled first.
    ///
    /// Returns true if the wait ended because of cancellation.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        select! {
            recv(self.inner.rx) -> _ => true,
            default(timeout) => self.is_cancelled(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    /// Client UI session, used to route prompts back to the right window.
    pub session_id: u64,
}

impl Session {
    /// Creates a session for a logged-in user.
    #[must_use]
    pub fn new(username: impl Into<String>, session_id: u64) -> Self {
        Self {
            username: username.into(),
            session_id,
        }
    }
}

/// Request-scoped context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    tags: Vec<&'static str>,
    session: Option<Session>,
    cancel: CancelToken,
    received_at: DateTime<Utc>,
}

impl RequestContext {
    /// Context for a logged-in caller.
    #[must_use]
    pub fn authenticated(session: Session) -> Self {
        Self::build(Some(session))
    }

    /// Context for a caller without a session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::build(None)
    }

    fn build(session: Option<Session>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tags: Vec::new(),
            session,
            cancel: CancelToken::new(),
            received_at: Utc::now(),
        }
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Adds a log tag. Duplicates are ignored.
    #[must_use]
    pub fn with_tag(mut self, tag: &'static str) -> Self {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn tags(&self) -> &[&'static str] {
        &self.tags
    }

    /// Tags joined with `,` for span fields.
    #[must_use]
    pub fn tag_list(&self) -> String {
        self.tags.join(",")
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Returns the session, or `AuthenticationRequired` without one.
    pub fn require_session(&self) -> GatewayResult<&Session> {
        self.session.as_ref().ok_or(GatewayError::AuthenticationRequired)
    }

    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
