//! Per-request context: cancellation, a resettable processing deadline, and
//! the one task-local this crate keeps — a correlation id threaded through
//! a request's lifetime for log correlation.
//!
//! A thread-local request context would leak state across requests in a
//! multi-threaded async runtime, where a single OS thread serves many
//! concurrent requests; `tokio::task_local!` scopes the correlation id to
//! the single task handling one request instead. The cancellation token
//! uses `tokio::sync` primitives rather than hand-rolled atomics, matching
//! `server/connection.rs`'s `tokio::select!`-heavy style throughout.

use crate::http::{request::Request, response::Response};

/// Keys the connection loop stashes the per-request cancellation token and
/// deadline guard under in `Request::state`, so a handler reached through
/// `Handler::handle`'s plain `&Request` parameter (no `RequestContext` in
/// sight) can still reach them via `Request::cancellation`/
/// `Request::reset_processing_deadline` below.
const CANCELLATION_STATE_KEY: &str = "forge_http.cancellation";
const DEADLINE_STATE_KEY: &str = "forge_http.deadline";
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

tokio::task_local! {
    /// A short, per-request correlation id. Set once at the top of
    /// `server/connection.rs`'s dispatch loop and read by `Logger`
    /// implementations that want every log line for a request tagged
    /// consistently without threading an explicit parameter through every
    /// call site.
    pub(crate) static CORRELATION_ID: String;
}

/// Returns the current request's correlation id, if called from within a
/// task that has one set (i.e., during request dispatch). Outside that
/// scope (e.g. server startup logging) this returns `None`.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

/// A cooperative cancellation signal shared by every request on a
/// connection. Set when the connection's shutdown grace period expires, the
/// process receives a shutdown signal, or the connection itself closes.
///
/// Cheap to clone and check (`tokio::sync::watch` underneath); a handler
/// that performs a long-running operation should poll `is_cancelled()`
/// periodically and abort cooperatively rather than being forcibly killed.
#[derive(Clone)]
pub struct CancellationToken(watch::Receiver<bool>);

impl CancellationToken {
    pub(crate) fn new(receiver: watch::Receiver<bool>) -> Self {
        Self(receiver)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the token is cancelled. Intended for use inside a
    /// `tokio::select!` alongside the handler's own work.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|cancelled| *cancelled).await;
    }
}

/// RAII handle letting a handler push its own processing deadline out past
/// `ConnLimits::processing_timeout`'s default, for work it knows will run
/// long (resettable through `RequestContext`).
///
/// Each call to `reset()` tells the connection loop's deadline-watcher task
/// to extend the deadline by `ConnLimits::processing_timeout` from the
/// current instant. Dropping the guard does not cancel anything; it simply
/// stops being usable.
#[derive(Clone)]
pub struct DeadlineGuard {
    deadline: Arc<std::sync::Mutex<Instant>>,
    extension: Duration,
}

impl DeadlineGuard {
    pub(crate) fn new(deadline: Arc<std::sync::Mutex<Instant>>, extension: Duration) -> Self {
        Self { deadline, extension }
    }

    /// Pushes the processing deadline `extension` further into the future
    /// from now. Safe to call repeatedly; each call only ever extends.
    pub fn reset_processing_deadline(&self) {
        let mut deadline = self.deadline.lock().expect("deadline mutex poisoned");
        let candidate = Instant::now() + self.extension;
        if candidate > *deadline {
            *deadline = candidate;
        }
    }

    /// Resolves once the deadline has passed, re-checking after each sleep
    /// in case a handler extended it in the meantime. Raced against the
    /// handler future by `server/connection.rs` via `tokio::select!`.
    pub(crate) async fn wait_until_expired(&self) {
        loop {
            let target = *self.deadline.lock().expect("deadline mutex poisoned");
            let now = Instant::now();
            if now >= target {
                return;
            }
            tokio::time::sleep(target - now).await;
        }
    }
}

/// Everything a [`crate::Handler`] or router-bound controller method can
/// reach about the in-flight request beyond the `Request`/`Response` pair
/// passed directly: a mutable per-request scratch scope, the cancellation
/// token, and the deadline guard.
///
/// The shape (borrowed request, owned extras) mirrors how `ConnectionData`
/// is threaded alongside `&Request`/`&mut Response` in `Handler::handle`.
pub struct RequestContext<'a> {
    request: &'a Request,
    response: &'a mut Response,
    cancellation: CancellationToken,
    deadline: DeadlineGuard,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(
        request: &'a Request,
        response: &'a mut Response,
        cancellation: CancellationToken,
        deadline: DeadlineGuard,
    ) -> Self {
        Self {
            request,
            response,
            cancellation,
            deadline,
        }
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    pub fn response(&mut self) -> &mut Response {
        self.response
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn reset_processing_deadline(&self) {
        self.deadline.reset_processing_deadline();
    }

    pub fn correlation_id(&self) -> Option<String> {
        current_correlation_id()
    }
}

impl Request {
    /// Attaches this request's cancellation token and deadline guard so
    /// later code holding only a plain `&Request` (any `Handler::handle`
    /// body) can still reach them. Called once by the connection loop right
    /// before dispatch; a no-op if called again.
    pub(crate) fn attach_context(&mut self, cancellation: CancellationToken, deadline: DeadlineGuard) {
        self.state_mut().insert(CANCELLATION_STATE_KEY, cancellation);
        self.state_mut().insert(DEADLINE_STATE_KEY, deadline);
    }

    /// The cancellation token for this request, if the connection loop has
    /// dispatched it (always true inside `Handler::handle`). `None` only for
    /// a request built directly in a test via `Request::empty`.
    pub fn cancellation(&self) -> Option<CancellationToken> {
        self.state().get::<CancellationToken>(CANCELLATION_STATE_KEY).cloned()
    }

    /// Pushes this request's processing deadline further out, for a handler
    /// that knows its own work will run long. A no-op outside of dispatch.
    pub fn reset_processing_deadline(&self) {
        if let Some(guard) = self.state().get::<DeadlineGuard>(DEADLINE_STATE_KEY) {
            guard.reset_processing_deadline();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn correlation_id_is_scoped_to_the_task() {
        assert_eq!(current_correlation_id(), None);
        CORRELATION_ID
            .scope("req-1".to_string(), async {
                assert_eq!(current_correlation_id().as_deref(), Some("req-1"));
            })
            .await;
        assert_eq!(current_correlation_id(), None);
    }

    #[tokio::test]
    async fn cancellation_token_reflects_sender_state() {
        let (tx, rx) = watch::channel(false);
        let token = CancellationToken::new(rx);
        assert!(!token.is_cancelled());
        tx.send(true).unwrap();
        let mut token2 = token.clone();
        token2.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[test]
    fn deadline_guard_only_extends_forward() {
        let deadline = Arc::new(std::sync::Mutex::new(Instant::now()));
        let guard = DeadlineGuard::new(deadline.clone(), Duration::from_secs(10));
        let before = *deadline.lock().unwrap();
        guard.reset_processing_deadline();
        assert!(*deadline.lock().unwrap() > before);
    }

    #[tokio::test(start_paused = true)]
    async fn processing_timeout_fires_without_a_reset() {
        let deadline = Arc::new(std::sync::Mutex::new(Instant::now() + Duration::from_secs(5)));
        let guard = DeadlineGuard::new(deadline, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(1), guard.wait_until_expired())
                .await
                .is_err(),
            "deadline should not have expired yet"
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::time::timeout(Duration::from_millis(1), guard.wait_until_expired())
            .await
            .expect("deadline should have expired");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_processing_deadline_postpones_expiry() {
        let deadline = Arc::new(std::sync::Mutex::new(Instant::now() + Duration::from_secs(5)));
        let guard = DeadlineGuard::new(deadline, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        guard.reset_processing_deadline();

        // The reset pushed the deadline to 4s + 5s = 9s from start; at 4s
        // elapsed it should not have expired, even though the original
        // unreset deadline (5s) has already passed.
        assert!(
            tokio::time::timeout(Duration::from_millis(1), guard.wait_until_expired())
                .await
                .is_err(),
            "reset should have postponed expiry"
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::time::timeout(Duration::from_millis(1), guard.wait_until_expired())
            .await
            .expect("deadline should have expired after the extension elapsed");
    }
}
