//! Server configuration: limits, timeouts, and TLS policy.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Examples
//!
//! ```no_run
//! # forge_http::impt_default_handler!{MyHandler}
//! use forge_http::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_active_requests: 5000, // Higher concurrency
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,      // More headers for complex APIs
//!             body_size: 16 * 1024,  // 16KB for larger payloads
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency, admission, and overload protection.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Handler ] <====== | Is there a free handler? | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// The queue acts as a buffer between connection acceptance and processing.
/// Admission is bounded by an `Arc<Semaphore>` sized to `max_active_requests`:
/// a connection that can't acquire a permit waits in the admission queue
/// (bounded by `max_pending_connections`) using `wait_strategy`, or receives
/// an immediate `503` if the queue itself is full.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of requests processed concurrently (default: `100`).
    ///
    /// Enforced by an `Arc<tokio::sync::Semaphore>` with this many permits;
    /// a connection holds a permit for the duration of request processing.
    pub max_active_requests: usize,

    /// Maximum number of TCP connections waiting in the admission queue (default: `250`).
    ///
    /// All accepted connections first go into this queue. Once a permit is
    /// free, a connection is taken from here. If the queue becomes full, new
    /// connections receive immediate HTTP `503` responses.
    pub max_pending_connections: usize,

    /// Strategy for admission-queue waiting behavior (default: `Sleep(50us)`).
    pub wait_strategy: WaitStrategy,

    /// Dedicated handlers for queue overflow responses (default: `1`).
    ///
    /// When the connection queue becomes full, these handlers immediately send
    /// responses with the [503](crate::StatusCode::ServiceUnavailable) code. Using
    /// multiple handlers prevents bottlenecks in scenarios with a large volume of
    /// rejected requests. Set to 0 to silently close the connection (not recommended
    /// for production HTTP servers).
    pub count_503_handlers: usize,

    /// Grace period for in-flight connections to finish after a shutdown
    /// signal before they are forcibly dropped (default: `5 seconds`).
    pub shutdown_grace_period: Duration,

    /// Honor an `X-HTTP-Method` request header to override the verb used
    /// for routing (default: `false`).
    ///
    /// Enabling this allows overriding a safe verb (`GET`) into an unsafe
    /// one (`DELETE`) at a proxy's request; left off by default since that
    /// is a deployer-facing security decision, not one this crate should
    /// make unilaterally (see `DESIGN.md`'s Open Question decisions).
    pub allow_http_method_override: bool,

    /// Trust a specific request header (e.g. `"x-forwarded-for"`) as the
    /// client's remote IP instead of the socket peer address, for
    /// deployments sitting behind a reverse proxy (default: `None`).
    pub trusted_remote_ip_header: Option<String>,

    /// Format for error responses (default: `true`).
    ///
    /// # Examples
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 55\r
    /// content-type: application/json\r
    /// \r
    /// {"error":"Malformed request","code":"BAD_REQUEST"}
    /// ```
    /// If `false`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 0\r
    /// \r
    /// ```
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_active_requests: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            shutdown_grace_period: Duration::from_secs(5),
            json_errors: true,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available.
///
/// Different strategies optimize for different workload patterns.
/// Choose based on your latency requirements and resource constraints.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`].
    ///
    /// # Note
    /// Busy-polling like this tends to run the CPU at 97-99% load; prefer
    /// `Sleep` unless you have measured otherwise.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`].
    Sleep(Duration),
}

/// Connection-level limits and timeouts.
///
/// Controls individual TCP connection behavior including timeouts,
/// lifetime, and request limits. Default values balance performance,
/// resource usage, and security; only change if you understand the
/// consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for reading data from socket (default: `2 seconds`).
    ///
    /// If no data is received within this time, connection is closed.
    /// This is the primary mechanism for cleaning up stalled connections.
    /// Prevents slowloris attacks and frees resources from inactive clients.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for writing data to socket (default: `3 seconds`).
    ///
    /// If data can't be written in time, connection is terminated.
    /// Applies to individual write operations.
    pub socket_write_timeout: Duration,

    /// Maximum duration to wait for a complete header block (default: `5 seconds`).
    ///
    /// Measured from the first byte of the request line, independent of
    /// `socket_read_timeout`, which resets on every individual read.
    pub header_timeout: Duration,

    /// Maximum duration a handler may run before the connection gives up
    /// and sends `408 Request Timeout` (default: `30 seconds`).
    ///
    /// Resettable per-request through `RequestContext::reset_processing_deadline()`
    /// for handlers that legitimately need longer (see [`crate::context`]).
    pub processing_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`).
    ///
    /// Connection closes after processing this many requests.
    /// Helps prevent potential memory accumulation and maintains connection health.
    /// Combined with `connection_lifetime`, ensures connections don't live indefinitely.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of connection from establishment to closure (default: `2 minutes`).
    ///
    /// Final safety net that guarantees no connection lives longer than this duration.
    /// In practice, connections are typically cleaned up by `socket_read_timeout`
    /// or `max_requests_per_connection` long before this limit is reached.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            header_timeout: Duration::from_secs(5),
            processing_timeout: Duration::from_secs(30),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation hints.
///
/// **SECURITY-FIRST DEFAULTS.** These limits are intentionally conservative
/// to prevent resource exhaustion and various parsing attacks. They work
/// well for simple REST APIs, microservices, internal tools, and
/// low-memory environments. You may need to increase these if you see
/// `413 Payload Too Large` or `414 URI Too Long` for legitimate requests,
/// or `431 Request Header Fields Too Large`.
///
/// # Buffer sizing
///
/// Rather than pre-allocating a single fixed-size buffer per connection,
/// the framing reader used here grows its buffer on demand
/// up to these limits and is freed at the end of each request. The
/// `estimated_buffer_size()` figure below is therefore an *initial capacity
/// hint* passed to `Vec::with_capacity` to avoid repeated reallocation for
/// the common case, not a hard ceiling enforced by allocation size — the
/// limits themselves are enforced by explicit length checks as bytes are
/// consumed.
///
/// ```text
/// Hint = First Line + (Headers x Header Line) + Body + 2
/// ```
///
/// | Component | Formula | Size (default) |
/// |-----------|---------|------|
/// | First Line | `19 + url_size` | 275 B |
/// | Headers | `header_count x Header Line` | 9,280 B |
/// | Header Line | `header_name_size + header_value_size + 4` | 580 B |
/// | Body | `body_size` | 4,096 B |
///
/// ```
/// use forge_http::limits::ReqLimits;
///
/// let limits = ReqLimits::default();
/// let buffer_hint = limits.estimated_buffer_size();
/// println!("connections start with a {buffer_hint}-byte buffer hint");
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in URL (default: `8 segments`).
    pub url_parts: usize,
    /// Maximum query string length (default: `128`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `16 headers`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64 B`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512 B`).
    pub header_value_size: usize,

    /// Maximum request body size in bytes (default: `4 KB`).
    ///
    /// Applies to the bounded Content-Length and urlencoded-form decode
    /// strategies; multipart parts are governed by `multipart_part_size`.
    pub body_size: usize,

    /// Maximum size of a single multipart part, headers plus content
    /// (default: `2 MB`).
    pub multipart_part_size: usize,

    /// Maximum number of parts in a multipart body (default: `32`).
    pub multipart_part_count: usize,

    /// Maximum decoded size of an `application/x-www-form-urlencoded` body
    /// (default: `16 KB`), enforced independently of `body_size` since a
    /// form body is fully materialized into a key/value map rather than
    /// left as raw bytes.
    pub max_url_encoded_form_size: usize,

    /// Automatically decode `multipart/form-data` bodies into
    /// [`crate::Request`]'s `form`/`files` fields (default: `true`). When
    /// `false`, handlers must read the raw body and parse it themselves
    /// via [`crate::http::multipart`].
    pub auto_parse_multipart_form_data: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,

            body_size: 4 * 1024,
            multipart_part_size: 2 * 1024 * 1024,
            multipart_part_count: 32,
            max_url_encoded_form_size: 16 * 1024,
            auto_parse_multipart_form_data: true,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the suggested initial buffer capacity for a connection
    /// configured with these limits.
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self.precalc.req_without_body = self.precalc.buffer - self.body_size;

        self
    }

    #[inline(always)]
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2 + self.body_size
    }

    #[inline(always)]
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) req_without_body: usize,
    pub(crate) h_line: usize,
}

/// Configuration for response processing and memory allocation limits.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity for responses (default: `8192 B`).
    ///
    /// If the response exceeds `max_capacity * 2`, it may be sent in more
    /// than one `write` syscall.
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}

/// TLS policy carried as configuration data. Certificate and private-key
/// loading, and the TLS handshake itself, are out of scope for this crate —
/// these fields exist so a
/// TLS-terminating front-end driving this crate's `Server` has somewhere to
/// record the policy it enforced, and so `RequestContext` can report
/// `tls_protocol`/`client_certificate` faithfully to handlers.
#[derive(Debug, Clone)]
pub struct TlsPolicy {
    /// Reject connections that did not present a client certificate.
    pub ssl_require_client_cert: bool,
    /// Check presented client certificates against a revocation list.
    pub ssl_check_certificate_revocation: bool,
    /// Protocol versions the front-end is permitted to negotiate, e.g.
    /// `["TLSv1.2", "TLSv1.3"]`.
    pub ssl_enabled_protocols: Vec<String>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            ssl_require_client_cert: false,
            ssl_check_certificate_revocation: false,
            ssl_enabled_protocols: vec!["TLSv1.2".to_string(), "TLSv1.3".to_string()],
            _priv: (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precalculate_matches_the_documented_formula() {
        let limits = ReqLimits::default().precalculate();
        let first_line = 19 + limits.url_size;
        let h_line = limits.header_name_size + limits.header_value_size + 4;
        let expected = first_line + limits.header_count * h_line + 2 + limits.body_size;
        assert_eq!(limits.precalc.buffer, expected);
        assert_eq!(limits.estimated_buffer_size(), expected);
    }

    #[test]
    fn precalculate_tracks_req_without_body() {
        let limits = ReqLimits::default().precalculate();
        assert_eq!(limits.precalc.req_without_body, limits.precalc.buffer - limits.body_size);
    }

    #[test]
    fn server_limits_default_keeps_admission_queue_larger_than_active_requests() {
        let limits = ServerLimits::default();
        assert!(limits.max_pending_connections >= limits.max_active_requests);
        assert!(matches!(limits.wait_strategy, WaitStrategy::Sleep(_)));
    }

    #[test]
    fn conn_limits_default_bounds_processing_under_connection_lifetime() {
        let limits = ConnLimits::default();
        assert!(limits.processing_timeout < limits.connection_lifetime);
    }

    #[test]
    fn tls_policy_defaults_to_modern_protocols_only() {
        let policy = TlsPolicy::default();
        assert!(!policy.ssl_require_client_cert);
        assert_eq!(policy.ssl_enabled_protocols, vec!["TLSv1.2", "TLSv1.3"]);
    }
}
