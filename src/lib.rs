//! forge_http - an embeddable HTTP/1.1 server with a pluggable request
//! pipeline and a declarative, attribute-free routing engine.
//!
//! A performance-oriented HTTP server with comprehensive configuration
//! for memory management, connection handling, and request routing.
//! Designed for microservices and internal APIs requiring fine-grained
//! control over resources and request dispatch.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: Full protocol with persistent connections, chunked
//!   transfer-encoding, and cooperative cancellation.
//! - **HTTP/1.0**: Basic protocol support for legacy clients.
//!
//! HTTP/0.9 is out of scope; an unrecognized request line is rejected as a
//! `400 Bad Request` rather than guessed at.
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Built-in overload protection** - bounded admission and concurrent
//!   request processing, with automatic `503` responses once saturated.
//! - **Fully configurable limits and timeouts** for requests, responses, and
//!   connections — see [`limits`].
//! - **Custom connection filtering** - implement the [`ConnectionFilter`]
//!   trait to reject unwanted connections at the TCP level, before a byte of
//!   HTTP is parsed.
//!
//! ## 🚀 Performance & Memory
//! - **Owned, incrementally-framed parsing** - the request reader never
//!   hands a handler a slice that could be overwritten by the next read.
//! - **Streaming multipart decode** - large uploads are scanned a chunk at a
//!   time rather than buffered whole before parsing begins.
//!
//! ## 🧭 Routing
//! - **Declarative route templates** - `{name}`, `{name=default}`,
//!   `{*name}`, and `[optional]` segments compiled to anchored regexes with
//!   precedence-ordered, conflict-checked dispatch. See [`routing`].
//! - **Explicit parameter binding** - a route declares where each named
//!   parameter comes from ([`routing::binder::ParamSource`]: URL capture,
//!   query, form, body, header, or a fixed default) instead of relying on
//!   runtime reflection, which Rust doesn't have.
//! - **Composable middleware** - [`HandlerStack`] chains several
//!   [`Handler`]s by path prefix ahead of the router (static files, auth,
//!   then routed dispatch).
//!
//! ## 🏭 Production Ready
//! - **Graceful performance degradation** - automatic `503` responses when
//!   overloaded, and cooperative shutdown with a configurable grace period.
//! - **Custom error format** - structured JSON (with codes) or a plain HTTP
//!   response, see [`limits::ServerLimits::json_errors`].
//! - **Pluggable logging** - implement [`Logger`] to observe request starts
//!   and completions; a correlation id is threaded through every request's
//!   task for free, see [`context`].
//! - **Resource protection** - automatic closure of connections exceeding
//!   set limits.
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `forge_http` and [`tokio`](https://crates.io/crates/tokio) to your
//! `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! forge_http = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//! ```no_run
//! use forge_http::{Server, Handler, Request, Response, Handled, StatusCode};
//! use tokio::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello World!")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! For routing several endpoints off of one handler, see [`routing`]; for
//! middleware chaining, see [`HandlerStack`].
//!
//! # Use Cases
//!
//! - **High-throughput microservices** - configurable for specific workloads
//! - **Resource-constrained environments** - predictable memory usage
//! - **Internal APIs** - security-conscious defaults, declarative routing
//! - **Legacy system integration** - HTTP/1.0 compatibility
pub(crate) mod http {
    pub mod body;
    pub mod headers;
    pub mod multipart;
    pub(crate) mod percent;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    #[cfg(unix)]
    pub(crate) mod fd_handoff;
    pub(crate) mod server_impl;
}
pub mod context;
pub mod errors;
pub mod limits;
pub mod logging;
pub mod routing {
    pub mod binder;
    pub mod handler_stack;
    pub mod router;
    pub mod template;
}

pub use crate::{
    context::{CancellationToken, DeadlineGuard, RequestContext},
    errors::{ErrorKind, HttpException},
    http::{
        body::parse_urlencoded_form,
        headers::{Cookie, HeaderMap},
        multipart::MultipartItem,
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    logging::{Logger, NoopLogger},
    routing::{handler_stack::HandlerStack, router::Router},
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{Handler, Server, ServerBuilder, ShutdownHandle},
    },
};

#[cfg(unix)]
pub use crate::server::fd_handoff;

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use forge_http::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}
