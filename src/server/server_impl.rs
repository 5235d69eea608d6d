//! The public [`Server`]/[`ServerBuilder`] entry point: accepts connections
//! and dispatches each to its own task against a shared [`HttpConnection`].
//!
//! The fluent `ServerBuilder` (required `listener`/`handler`, optional
//! filter/limits) builds around the `Handler<S>` trait. Admission and
//! concurrency are both `tokio::sync::Semaphore`-gated: every accepted
//! connection gets its own spawned task immediately, subject to one
//! semaphore sized `max_pending_connections` bounding how many connections
//! may be admitted at once, and a second shared `Semaphore` of
//! `max_active_requests` permits handed to every connection's
//! [`HttpConnection::serve`] call, which only holds a permit for the span
//! of actively running a handler (`server/connection.rs`), not for a
//! connection's whole keep-alive lifetime. See `DESIGN.md` for the full
//! writeup.
use crate::{
    context::CancellationToken,
    errors::ErrorKind,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    logging::{Logger, NoopLogger},
    server::connection::{send_error, ConnectionData, HttpConnection},
    ConnectionFilter, Version,
};
use std::{future::Future, marker::PhantomData, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{watch, OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use forge_http::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
///         // Simple echo handler
///         if req.url().target() == "/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use forge_http::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, data: &mut State, req: &Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Immutable reference to the parsed HTTP request
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// `Handled` indicating the request was fully processed — the only way
    /// to produce one is to finish the response (`body`, `body_with`, or
    /// `body_chunked_with`).
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics will terminate the connection.
    fn handle(
        &self,
        connection_data: &mut S,
        request: &crate::Request,
        response: &mut crate::Response,
    ) -> impl Future<Output = crate::Handled> + Send;
}

/// An HTTP server that accepts connections and dispatches each to its own
/// task for processing.
///
/// # Examples
///
/// ```no_run
/// use forge_http::{Server, Handler, Request, Response, Handled, StatusCode};
/// use tokio::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: TcpListener,
    handler: Arc<H>,
    logger: Arc<dyn Logger>,
    connection_filter: Arc<F>,
    _marker: PhantomData<S>,

    request_permits: Arc<Semaphore>,
    pending_permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl<H, S> Server<H, S, ()>
where
    H: Handler<S>,
    S: ConnectionData,
{
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use forge_http::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn builder() -> ServerBuilder<H, S, ()> {
        ServerBuilder {
            listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            logger: None,
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }
}

impl<H, S, F> Server<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// A handle that can signal this server to stop accepting new
    /// connections and begin its shutdown grace period.
    #[inline]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Starts the server: accepts connections until shut down, dispatching
    /// each to its own task.
    ///
    /// On a shutdown signal, stops accepting new connections and waits up to
    /// `ServerLimits::shutdown_grace_period` for in-flight connections to
    /// finish on their own before aborting whatever's left.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use forge_http::Server;
    /// use tokio::net::TcpListener;
    ///
    /// Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build()
    ///     .launch()
    ///     .await
    /// # }
    /// ```
    #[inline]
    pub async fn launch(mut self) {
        let mut tasks = JoinSet::new();
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let Ok((stream, remote_addr)) = accepted else { continue };
                    let Ok(local_addr) = stream.local_addr() else { continue };
                    // Request/response framing writes small, separate chunks
                    // (status line, headers, body); Nagle's algorithm would
                    // only add latency batching them back together.
                    let _ = stream.set_nodelay(true);
                    self.spawn_connection(&mut tasks, stream, remote_addr, local_addr).await;
                }
            }
        }

        let _ = tokio::time::timeout(self.server_limits.shutdown_grace_period, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        tasks.abort_all();
    }

    async fn spawn_connection(
        &self,
        tasks: &mut JoinSet<()>,
        mut stream: TcpStream,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) {
        let permit = match admit(&self.pending_permits, &self.server_limits.wait_strategy).await {
            Some(permit) => permit,
            None => {
                if self.server_limits.count_503_handlers != 0 {
                    let json_errors = self.server_limits.json_errors;
                    let write_timeout = self.conn_limits.socket_write_timeout;
                    tasks.spawn(async move {
                        let _ = send_error(
                            &mut stream,
                            ErrorKind::ServiceUnavailable,
                            Version::Http11,
                            json_errors,
                            write_timeout,
                        )
                        .await;
                    });
                }
                return;
            }
        };

        let handler = self.handler.clone();
        let logger = self.logger.clone();
        let filter = self.connection_filter.clone();
        let limits: AllLimits = (
            self.server_limits.clone(),
            self.conn_limits.clone(),
            self.req_limits.clone(),
            self.resp_limits.clone(),
        );
        let request_permits = self.request_permits.clone();
        let shutdown = CancellationToken::new(self.shutdown_rx.clone());

        tasks.spawn(async move {
            let _admission = permit;
            let mut conn = HttpConnection::new(handler, logger, limits);
            conn.serve(&mut stream, remote_addr, local_addr, &*filter, &request_permits, &shutdown)
                .await;
        });
    }
}

/// Tries to acquire an admission permit immediately; if none are free,
/// waits once according to `wait_strategy` and retries, mirroring
/// `limits::ServerLimits`'s "is there a free handler? wait, else 503"
/// diagram. Returns `None` if still saturated after that single wait.
async fn admit(pending: &Arc<Semaphore>, wait: &WaitStrategy) -> Option<OwnedSemaphorePermit> {
    if let Ok(permit) = pending.clone().try_acquire_owned() {
        return Some(permit);
    }

    match wait {
        WaitStrategy::Yield => tokio::task::yield_now().await,
        WaitStrategy::Sleep(duration) => tokio::time::sleep(*duration).await,
    }

    pending.clone().try_acquire_owned().ok()
}

/// A handle for triggering a [`Server`]'s graceful shutdown from outside its
/// `launch()` task, e.g. from a signal handler.
#[derive(Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    /// Signals the server to stop accepting connections and begin its
    /// shutdown grace period. Idempotent.
    #[inline]
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    logger: Option<Arc<dyn Logger>>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use forge_http::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use forge_http::{Server, Handler, Request, Response, Handled, StatusCode};
    /// use tokio::net::TcpListener;
    ///
    /// struct MyStruct;
    ///
    /// impl Handler for MyStruct {
    ///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
    ///         resp.status(StatusCode::Ok).body("Hello World!")
    ///     }
    /// }
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a logger to observe request starts and completions. Defaults
    /// to [`NoopLogger`] if never called.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use forge_http::{Logger, RequestContext, Server};
    /// use std::time::{Duration, Instant};
    /// use tokio::net::TcpListener;
    ///
    /// struct StderrLogger;
    ///
    /// impl Logger for StderrLogger {
    ///     fn log_request(
    ///         &self, ctx: &RequestContext<'_>, error: Option<&forge_http::ErrorKind>,
    ///         _started_at: Instant, duration: Duration,
    ///     ) {
    ///         eprintln!("{} -> {:?} in {:?}", ctx.request().url().path(), error, duration);
    ///     }
    /// }
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct)
    ///     .logger(StderrLogger)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [ConnectionFilter](crate::ConnectionFilter)
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// use tokio::net::TcpListener;
    /// use std::net::SocketAddr;
    /// use forge_http::{ConnectionFilter, Server, Response, Handled, StatusCode};
    ///
    /// struct MyConnFilter {
    ///     blacklist: Vec<SocketAddr>
    /// }
    ///
    /// impl ConnectionFilter for MyConnFilter {
    ///     fn filter(
    ///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
    ///     ) -> Result<(), Handled> {
    ///         if self.blacklist.contains(&client_addr) {
    ///             Err(err_resp
    ///                 .status(StatusCode::Forbidden)
    ///                 .body("Your IP is permanently banned"))
    ///         } else {
    ///             Ok(())
    ///         }
    ///     }
    /// }
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let filter = MyConnFilter {
    ///     blacklist: vec![
    ///         "192.0.2.1:0".parse().unwrap(),
    ///         "198.51.100.1:0".parse().unwrap(),
    ///     ]
    /// };
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .conn_filter(filter)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listener: self.listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            logger: self.logger,
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
        }
    }

    /// Configures server-level admission and concurrency limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use forge_http::{Server, limits::ServerLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         max_active_requests: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection-level timeouts and lifetime limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use forge_http::{Server, limits::ConnLimits};
    /// use tokio::net::TcpListener;
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         connection_lifetime: Duration::from_secs(200),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing and processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use forge_http::{Server, limits::ReqLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .request_limits(ReqLimits {
    ///         // Your changes
    ///         url_size: 1024,
    ///         url_query_parts: 32,
    ///         url_parts: 20,
    ///         ..ReqLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use forge_http::{Server, limits::RespLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .response_limits(RespLimits {
    ///         // Your changes
    ///         default_capacity: 1024,
    ///         max_capacity: 4096,
    ///         ..RespLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` method must be called to create``
    /// - ``The `handler` method must be called to create``
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `handler` method was not called.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # forge_http::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use forge_http::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H, S, F> {
        let (listener, handler, filter, logger, limits) = self.get_all_parts();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Server {
            listener,
            handler,
            logger,
            connection_filter: filter,
            _marker: PhantomData,

            request_permits: Arc::new(Semaphore::new(limits.0.max_active_requests)),
            pending_permits: Arc::new(Semaphore::new(limits.0.max_pending_connections)),
            shutdown_tx,
            shutdown_rx,

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
        }
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<H>, Arc<F>, Arc<dyn Logger>, AllLimits) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.handler
                .expect("The `handler` method must be called to create"),
            self.connection_filter,
            self.logger.unwrap_or_else(|| Arc::new(NoopLogger)),
            (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default().precalculate(),
                self.response_limits.unwrap_or_default(),
            ),
        )
    }
}

pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admit_returns_a_permit_when_one_is_free() {
        let pending = Arc::new(Semaphore::new(1));
        let permit = admit(&pending, &WaitStrategy::Yield).await;
        assert!(permit.is_some());
        assert_eq!(pending.available_permits(), 0);
    }

    #[tokio::test]
    async fn admit_returns_none_once_saturated() {
        let pending = Arc::new(Semaphore::new(1));
        let _held = pending.clone().try_acquire_owned().unwrap();
        let permit = admit(&pending, &WaitStrategy::Yield).await;
        assert!(permit.is_none());
    }

    #[tokio::test]
    async fn admit_recovers_once_a_permit_is_returned_mid_wait() {
        let pending = Arc::new(Semaphore::new(1));
        let held = pending.clone().try_acquire_owned().unwrap();
        drop(held);
        let permit = admit(&pending, &WaitStrategy::Sleep(std::time::Duration::from_millis(1))).await;
        assert!(permit.is_some());
    }

    #[test]
    fn shutdown_handle_flips_the_receiver() {
        let (tx, rx) = watch::channel(false);
        let handle = ShutdownHandle(tx);
        assert!(!*rx.borrow());
        handle.shutdown();
        assert!(*rx.borrow());
    }

    #[test]
    fn shutdown_handle_is_idempotent() {
        let (tx, rx) = watch::channel(false);
        let handle = ShutdownHandle(tx);
        handle.shutdown();
        handle.shutdown();
        assert!(*rx.borrow());
    }
}
