//! The `Logger` trait: this crate's only observability seam.
//!
//! Follows the same pluggability idiom as `ConnectionFilter` and
//! `ConnectionData` (`server/connection.rs`): both are `Sync + Send` traits
//! with sensible default/no-op implementations, let the embedding binary
//! opt in to exactly as much as it needs, and are invoked from inside the
//! connection loop rather than through a global facade. `Logger` follows
//! the identical shape rather than reaching for a crate like `tracing`,
//! since nothing else in this crate's dependency stack calls for one
//! (see `DESIGN.md`).

use crate::{context::RequestContext, errors::ErrorKind, http::request::Request};
use std::time::Duration;

/// Observes request lifecycle events. Implement this to wire requests into
/// whatever logging/metrics system an embedding binary already uses;
/// the default methods do nothing, so implementing only the hooks you care
/// about is free.
pub trait Logger: Sync + Send {
    /// Called once headers have been parsed, before the handler stack runs.
    /// Useful for access logs that need to record a request even if the
    /// handler never returns (e.g. it times out).
    fn log_request_started(&self, _request: &Request) {}

    /// Called once a request has finished — successfully or with an error
    /// — after the response has been written (or the connection has been
    /// closed without one, for `ErrorKind::EmptyStreamClosed`).
    ///
    /// `error` is `None` for a request a handler completed normally.
    /// [`ErrorKind::EmptyStreamClosed`] is the one kind a well-behaved
    /// `Logger` should surface at debug level only: it fires on every
    /// ordinary keep-alive connection closing, not on anything a deployer
    /// needs paged for.
    fn log_request(
        &self,
        _context: &RequestContext<'_>,
        _error: Option<&ErrorKind>,
        _started_at: std::time::Instant,
        _duration: Duration,
    ) {
    }
}

/// The logger used when an embedding binary doesn't supply one: every hook
/// is the trait's no-op default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_logger_implements_logger() {
        fn assert_logger<L: Logger>() {}
        assert_logger::<NoopLogger>();
    }
}
