//! [`Request`], its [`Url`] component, and the [`FramingReader`] that turns a
//! byte stream into framed, length-bounded chunks.
//!
//! Parsing follows a fixed phase split (parse method, parse URL, check
//! version, parse headers, check body), scanning lines and delimiters with
//! `memchr` throughout. A single fixed, reused per-connection buffer handing
//! out `&'static [u8]` slices via `unsafe { mem::transmute }` would be a
//! shared-mutable-buffer hazard — any later read could silently overwrite a
//! slice a caller still held. The `FramingReader` below instead owns a
//! growable `Vec<u8>` and returns **owned copies** (`Vec<u8>`/`String`) for
//! every parsed unit, so a caller can hold a header value or a body chunk
//! across any number of subsequent reads without risking it being
//! overwritten out from under them.

use crate::{
    errors::ErrorKind,
    http::{
        headers::{parse_cookie_header, HeaderMap},
        multipart::MultipartItem,
        percent::decode_path_component,
        query::Query,
        types::{Method, Version},
    },
    limits::ReqLimits,
};
use memchr::memchr;
use std::{
    any::Any,
    collections::HashMap,
    net::SocketAddr,
    time::Duration,
};
use tokio::{io::AsyncReadExt, time::sleep};

/// The parsed, decoded URL of a request.
///
/// `path` is the percent-decoded path used for routing; `original_path`
/// is the same value captured before any internal-redirect rewrite, so a
/// handler further down the chain can still see where the request first
/// landed (the original, pre-rewrite path).
#[derive(Debug, Clone, PartialEq)]
pub struct Url {
    path: String,
    original_path: String,
    raw_query: Option<String>,
    query: HashMap<String, String>,
    target: String,
}

impl Url {
    /// The current, possibly internally-rewritten request path. Always
    /// begins with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path as it was before any internal-redirect rewrite.
    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    /// The raw (undecoded) query string, without the leading `?`.
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    /// Looks up a query parameter by its decoded name. Duplicate names
    /// keep the latest value.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// The full, decoded query parameter mapping.
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// The request-target exactly as it appeared on the wire (undecoded),
    /// e.g. `/search?q=a+b`. Used for access logging.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Rewrites the routable path for an internal redirect, leaving
    /// `original_path()` untouched. The handler stack and router both see
    /// the new value; logging should prefer `original_path()`.
    pub fn rewrite_path(&mut self, new_path: impl Into<String>) {
        self.path = new_path.into();
    }
}

/// An in-memory HTTP/1.1 request, decoded and owned.
///
/// Every field is an owned copy produced once during framing; nothing here
/// borrows from the connection's read buffer (see the module doc comment).
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    body: Option<Vec<u8>>,
    form: HashMap<String, String>,
    files: Vec<MultipartItem>,
    remote_addr: SocketAddr,
    tls_protocol: Option<String>,
    client_certificate: Option<Vec<u8>>,
    content_type: Option<String>,
    user_id: Option<String>,
    body_consumed: bool,
    state: RequestState,
}

impl Request {
    pub(crate) fn empty(remote_addr: SocketAddr) -> Self {
        Self {
            method: Method::Get,
            url: Url {
                path: "/".to_string(),
                original_path: "/".to_string(),
                raw_query: None,
                query: HashMap::new(),
                target: "/".to_string(),
            },
            version: Version::Http11,
            headers: HeaderMap::with_capacity(16),
            cookies: HashMap::new(),
            body: None,
            form: HashMap::new(),
            files: Vec::new(),
            remote_addr,
            tls_protocol: None,
            client_certificate: None,
            content_type: None,
            user_id: None,
            body_consumed: false,
            state: RequestState::default(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.content_length()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The raw request body, if any phase has already populated it. `None`
    /// both before the body has been read and for a bodyless request.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// `form` fields populated once the body has been parsed as
    /// `application/x-www-form-urlencoded` or `multipart/form-data`.
    pub fn form(&self) -> &HashMap<String, String> {
        &self.form
    }

    /// `multipart/form-data` parts that carried a `filename`.
    pub fn files(&self) -> &[MultipartItem] {
        &self.files
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn tls_protocol(&self) -> Option<&str> {
        self.tls_protocol.as_deref()
    }

    pub fn client_certificate(&self) -> Option<&[u8]> {
        self.client_certificate.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }

    /// Records that a handler named `marker` has run for this request.
    /// Intended for a handler that composes another (e.g. an auth handler
    /// that stamps `"auth"` before calling through to a [`crate::Router`]
    /// it holds directly), so a route declared with
    /// [`crate::routing::binder::RouterBuilder::requires`] can later
    /// confirm that handler actually ran before it dispatches.
    pub fn mark_handler_ran(&mut self, marker: impl Into<String>) {
        self.state_mut()
            .get_mut_or_default::<HandlerMarkers>(HANDLER_MARKERS_STATE_KEY)
            .0
            .insert(marker.into());
    }

    /// Whether a handler named `marker` has run for this request (see
    /// [`Self::mark_handler_ran`]).
    pub fn handler_ran(&self, marker: &str) -> bool {
        self.state()
            .get::<HandlerMarkers>(HANDLER_MARKERS_STATE_KEY)
            .is_some_and(|markers| markers.0.contains(marker))
    }

    pub(crate) fn set_tls_info(&mut self, protocol: Option<String>, cert: Option<Vec<u8>>) {
        self.tls_protocol = protocol;
        self.client_certificate = cert;
    }

    /// Overrides the parsed method, for `ServerLimits::allow_http_method_override`
    /// (see `DESIGN.md`'s Open Question decisions).
    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Overrides the socket peer address with a proxy-supplied client IP,
    /// for `ServerLimits::trusted_remote_ip_header`.
    pub(crate) fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = addr;
    }

    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.body = Some(body);
    }

    pub(crate) fn set_form(&mut self, form: HashMap<String, String>) {
        self.form = form;
    }

    pub(crate) fn set_files(&mut self, files: Vec<MultipartItem>) {
        self.files = files;
    }

    pub(crate) fn mark_body_consumed(&mut self) -> bool {
        std::mem::replace(&mut self.body_consumed, true)
    }

    /// Per-handler scratch space for the current request, plus (once the
    /// connection loop dispatches this request) a cancellation token and
    /// deadline guard under the reserved keys used by [`crate::context`].
    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RequestState {
        &mut self.state
    }
}

/// Per-handler scratch space: a mutable, type-erased map for passing data
/// `request_state`: a mutable, type-erased map for passing data between
/// handlers in the stack (e.g. an auth handler stashing a parsed token for
/// the router to read later).
#[derive(Default)]
pub struct RequestState(HashMap<String, Box<dyn Any + Send>>);

impl std::fmt::Debug for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestState").field("len", &self.0.len()).finish()
    }
}

impl RequestState {
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.0.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.0.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn remove<T: Any + Send>(&mut self, key: &str) -> Option<T> {
        self.0.remove(key).and_then(|v| v.downcast().ok()).map(|b| *b)
    }

    pub(crate) fn get_mut_or_default<T: Any + Send + Default>(&mut self, key: &str) -> &mut T {
        self.0
            .entry(key.to_string())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut()
            .expect("state key reused with a different type")
    }
}

const HANDLER_MARKERS_STATE_KEY: &str = "forge_http.handler_markers";

#[derive(Default)]
struct HandlerMarkers(std::collections::HashSet<String>);

/// Parses the request line and headers off `reader` into a fresh
/// [`Request`]. Body decoding is a separate, lazily-triggered phase (see
/// [`crate::http::body`]) so a handler stack entry that never touches the
/// body never pays to read one.
pub(crate) async fn parse_headers<S: AsyncReadExt + Unpin>(
    reader: &mut FramingReader,
    stream: &mut S,
    limits: &ReqLimits,
    idle_timeout: Duration,
    remote_addr: SocketAddr,
) -> Result<Request, ErrorKind> {
    let line = reader.read_line(stream, limits.url_size + 32, idle_timeout).await?;

    let (method, rest) = parse_method(&line)?;
    let (target, raw_target, version) = parse_request_target(rest, limits)?;

    let mut request = Request::empty(remote_addr);
    request.method = method;
    request.version = version;
    request.url = target;
    let _ = raw_target;

    let mut header_budget = limits.header_count * (limits.header_name_size + limits.header_value_size + 4);
    loop {
        let line = reader
            .read_header_line(stream, limits.header_name_size + limits.header_value_size + 4, &mut header_budget, idle_timeout)
            .await?;
        if line.is_empty() {
            break;
        }
        if request.headers.len() >= limits.header_count {
            return Err(ErrorKind::HeaderTooLarge);
        }
        let (name, value) = parse_header_line(&line)?;
        request.headers.insert(name, value);
    }

    if let Some(cookie_header) = request.headers.get("cookie") {
        for (name, value) in parse_cookie_header(cookie_header) {
            request.cookies.insert(name, value);
        }
    }
    request.content_type = request.headers.get_str("content-type").map(|c| c.into_owned());

    Ok(request)
}

fn parse_method(line: &[u8]) -> Result<(Method, &[u8]), ErrorKind> {
    let (method, consumed) = Method::from_bytes(line).map_err(|_| ErrorKind::BadRequest)?;
    Ok((method, &line[consumed..]))
}

fn parse_request_target(rest: &[u8], limits: &ReqLimits) -> Result<(Url, String, Version), ErrorKind> {
    let sp = memchr(b' ', rest).ok_or(ErrorKind::BadRequest)?;
    let (target, version_part) = (&rest[..sp], &rest[sp + 1..]);

    if target.is_empty() || target.len() > limits.url_size || target[0] != b'/' {
        return Err(ErrorKind::BadRequest);
    }
    let version = Version::from_bytes(version_part)?;

    let raw_target = String::from_utf8_lossy(target).into_owned();
    let (raw_path, raw_query) = match memchr(b'?', target) {
        Some(q) => (&target[..q], Some(&target[q + 1..])),
        None => (target, None),
    };

    let path = decode_path_component(raw_path);
    if path.split('/').filter(|s| !s.is_empty()).count() > limits.url_parts {
        return Err(ErrorKind::BadRequest);
    }

    let query: HashMap<String, String> = match raw_query {
        Some(q) if !q.is_empty() => {
            Query::parse(q, limits.url_query_parts).map_err(|_| ErrorKind::BadRequest)?
        }
        _ => HashMap::new(),
    };

    let url = Url {
        path: path.clone(),
        original_path: path,
        raw_query: raw_query.map(|q| String::from_utf8_lossy(q).into_owned()),
        query,
        target: raw_target.clone(),
    };

    Ok((url, raw_target, version))
}

fn parse_header_line(line: &[u8]) -> Result<(String, Vec<u8>), ErrorKind> {
    let colon = memchr(b':', line).ok_or(ErrorKind::BadRequest)?;
    if colon == 0 {
        return Err(ErrorKind::BadRequest);
    }
    let name = std::str::from_utf8(&line[..colon])
        .map_err(|_| ErrorKind::BadRequest)?
        .to_string();
    let value = trim_ows(&line[colon + 1..]).to_vec();
    Ok((name, value))
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != b' ' && *b != b'\t').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| *b != b' ' && *b != b'\t').map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// Byte-accurate, buffer-owning reader over an async stream.
///
/// Holds whatever bytes have already been read off the socket but not yet
/// consumed by a caller, and grows its internal buffer on demand (bounded
/// only by the explicit limits the caller passes to each read call, not by
/// a fixed allocation). Every `read_*` method returns an owned `Vec<u8>`:
/// no slice into `self.buf` is ever handed back, so there is nothing for a
/// later `fill_more` to invalidate out from under a caller still holding
/// one.
pub(crate) struct FramingReader {
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl FramingReader {
    pub(crate) fn new(initial_capacity: usize) -> Self {
        Self {
            buf: vec![0; initial_capacity.max(512)],
            pos: 0,
            filled: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        // Carry over anything read past the current request for the next
        // request on this keep-alive connection: pipelined bytes are not
        // expected ("no pipelining"), but a defensive
        // compaction keeps the invariant true even if a client misbehaves.
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
    }

    /// True if no bytes are currently buffered and unconsumed. Used by the
    /// connection loop to distinguish `EMPTY_STREAM_CLOSED` (nothing ever
    /// arrived for this request) from a mid-request disconnect.
    pub(crate) fn has_pending(&self) -> bool {
        self.pos < self.filled
    }

    fn unread(&self) -> &[u8] {
        &self.buf[self.pos..self.filled]
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
    }

    async fn fill_more<S: AsyncReadExt + Unpin>(
        &mut self,
        stream: &mut S,
        idle_timeout: Duration,
    ) -> Result<usize, ErrorKind> {
        if self.filled == self.buf.len() {
            if self.pos > 0 {
                self.buf.copy_within(self.pos..self.filled, 0);
                self.filled -= self.pos;
                self.pos = 0;
            } else {
                self.buf.resize(self.buf.len() + 8 * 1024, 0);
            }
        }

        tokio::select! {
            biased;

            result = stream.read(&mut self.buf[self.filled..]) => {
                let n = result?;
                self.filled += n;
                Ok(n)
            }
            _ = sleep(idle_timeout) => Err(ErrorKind::Timeout),
        }
    }

    /// Attempts a single fill for the start of a new request. Returns
    /// `Ok(true)` once at least one byte is available, `Ok(false)` if the
    /// peer closed the connection cleanly with nothing buffered and
    /// nothing newly read (`EMPTY_STREAM_CLOSED`, logged not errored).
    pub(crate) async fn await_new_request<S: AsyncReadExt + Unpin>(
        &mut self,
        stream: &mut S,
        idle_timeout: Duration,
    ) -> Result<bool, ErrorKind> {
        if self.has_pending() {
            return Ok(true);
        }
        match self.fill_more(stream, idle_timeout).await {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Reads one CRLF- or LF-terminated line, stripping the terminator.
    /// `max_line` bounds the line's length excluding the terminator.
    pub(crate) async fn read_line<S: AsyncReadExt + Unpin>(
        &mut self,
        stream: &mut S,
        max_line: usize,
        idle_timeout: Duration,
    ) -> Result<Vec<u8>, ErrorKind> {
        loop {
            if let Some(nl) = memchr(b'\n', self.unread()) {
                if nl > max_line {
                    return Err(ErrorKind::HeaderTooLarge);
                }
                let mut line = self.unread()[..nl].to_vec();
                self.consume(nl + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }
            if self.unread().len() > max_line {
                return Err(ErrorKind::HeaderTooLarge);
            }
            if self.fill_more(stream, idle_timeout).await? == 0 {
                return Err(ErrorKind::ClientDisconnected);
            }
        }
    }

    /// Reads one header line, bounded both by a per-line limit and by a
    /// cumulative `remaining_budget` shared across the whole header block
    /// (`ReqLimits::header_value_size` et al.).
    pub(crate) async fn read_header_line<S: AsyncReadExt + Unpin>(
        &mut self,
        stream: &mut S,
        max_line: usize,
        remaining_budget: &mut usize,
        idle_timeout: Duration,
    ) -> Result<Vec<u8>, ErrorKind> {
        let line = self.read_line(stream, max_line, idle_timeout).await?;
        let consumed = line.len() + 2;
        *remaining_budget = remaining_budget
            .checked_sub(consumed)
            .ok_or(ErrorKind::HeaderTooLarge)?;
        Ok(line)
    }

    /// Reads exactly `n` bytes, or fails with `ClientDisconnected` if the
    /// stream ends first.
    pub(crate) async fn read_exact_bytes<S: AsyncReadExt + Unpin>(
        &mut self,
        stream: &mut S,
        n: usize,
        idle_timeout: Duration,
    ) -> Result<Vec<u8>, ErrorKind> {
        let mut out = Vec::with_capacity(n);
        self.copy_to(stream, &mut out, n, idle_timeout).await?;
        Ok(out)
    }

    /// Appends up to `limit` bytes to `dst`, reading from the buffered
    /// backlog first and then the stream. Fails with `ClientDisconnected`
    /// if the stream ends before `limit` bytes have been copied.
    pub(crate) async fn copy_to<S: AsyncReadExt + Unpin>(
        &mut self,
        stream: &mut S,
        dst: &mut Vec<u8>,
        limit: usize,
        idle_timeout: Duration,
    ) -> Result<(), ErrorKind> {
        let mut remaining = limit;
        while remaining > 0 {
            if self.unread().is_empty() {
                if self.fill_more(stream, idle_timeout).await? == 0 {
                    return Err(ErrorKind::ClientDisconnected);
                }
                continue;
            }
            let take = remaining.min(self.unread().len());
            dst.extend_from_slice(&self.unread()[..take]);
            self.consume(take);
            remaining -= take;
        }
        Ok(())
    }

    /// Reads and feeds chunks to `sink` until `limit` bytes have been
    /// consumed, without materializing the whole span at once. Used by
    /// the multipart scanner so a large upload is never fully buffered.
    pub(crate) async fn feed_to<S, F>(
        &mut self,
        stream: &mut S,
        limit: usize,
        idle_timeout: Duration,
        mut sink: F,
    ) -> Result<(), ErrorKind>
    where
        S: AsyncReadExt + Unpin,
        F: FnMut(&[u8]) -> Result<(), ErrorKind>,
    {
        let mut remaining = limit;
        while remaining > 0 {
            if self.unread().is_empty() {
                if self.fill_more(stream, idle_timeout).await? == 0 {
                    return Err(ErrorKind::ClientDisconnected);
                }
                continue;
            }
            let take = remaining.min(self.unread().len());
            sink(&self.unread()[..take])?;
            self.consume(take);
            remaining -= take;
        }
        Ok(())
    }
}

impl From<ErrorKind> for std::io::Error {
    fn from(_: ErrorKind) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, "http error")
    }
}

#[cfg(test)]
impl Request {
    /// Builds a bare request with the given path for routing tests that
    /// don't need a real connection to frame one from.
    pub(crate) fn with_test_path(mut self, path: &str) -> Self {
        self.url.path = path.to_string();
        self.url.original_path = path.to_string();
        self.url.target = path.to_string();
        self
    }

    pub(crate) fn with_test_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub(crate) fn with_test_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }
}

#[cfg(test)]
pub(crate) async fn test_stream(data: &[u8]) -> tokio::io::DuplexStream {
    use tokio::io::AsyncWriteExt;
    let (mut client, server) = tokio::io::duplex(data.len().max(1024));
    client.write_all(data).await.unwrap();
    // Leak the client half so the server side never observes an EOF it
    // didn't ask for; tests only ever read the bytes they wrote.
    std::mem::forget(client);
    server
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ReqLimits {
        ReqLimits::default().precalculate()
    }

    #[tokio::test]
    async fn parses_simple_get() {
        let mut stream = test_stream(b"GET /hello?x=1 HTTP/1.1\r\nHost: a\r\n\r\n").await;
        let mut reader = FramingReader::new(256);
        let req = parse_headers(
            &mut reader,
            &mut stream,
            &limits(),
            Duration::from_secs(1),
            "127.0.0.1:1".parse().unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.url().path(), "/hello");
        assert_eq!(req.url().query("x"), Some("1"));
        assert_eq!(req.header("host"), Some(b"a".as_slice()));
    }

    #[tokio::test]
    async fn rejects_missing_leading_slash() {
        let mut stream = test_stream(b"GET hello HTTP/1.1\r\n\r\n").await;
        let mut reader = FramingReader::new(256);
        let err = parse_headers(
            &mut reader,
            &mut stream,
            &limits(),
            Duration::from_secs(1),
            "127.0.0.1:1".parse().unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ErrorKind::BadRequest));
    }

    #[tokio::test]
    async fn read_line_enforces_max_length() {
        let mut stream = test_stream(b"a very long line indeed\r\n").await;
        let mut reader = FramingReader::new(64);
        let err = reader
            .read_line(&mut stream, 5, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ErrorKind::HeaderTooLarge));
    }

    #[tokio::test]
    async fn header_count_at_limit_succeeds_one_past_it_fails() {
        let limits = ReqLimits { header_count: 4, ..ReqLimits::default() }.precalculate();

        let at_limit = format!(
            "GET / HTTP/1.1\r\n{}\r\n",
            (0..4).map(|i| format!("X-H{i}: v\r\n")).collect::<String>()
        );
        let mut stream = test_stream(at_limit.as_bytes()).await;
        let mut reader = FramingReader::new(256);
        let req = parse_headers(
            &mut reader,
            &mut stream,
            &limits,
            Duration::from_secs(1),
            "127.0.0.1:1".parse().unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(req.headers().len(), 4);

        let over_limit = format!(
            "GET / HTTP/1.1\r\n{}\r\n",
            (0..5).map(|i| format!("X-H{i}: v\r\n")).collect::<String>()
        );
        let mut stream = test_stream(over_limit.as_bytes()).await;
        let mut reader = FramingReader::new(256);
        let err = parse_headers(
            &mut reader,
            &mut stream,
            &limits,
            Duration::from_secs(1),
            "127.0.0.1:1".parse().unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ErrorKind::HeaderTooLarge));
    }

    #[tokio::test]
    async fn copy_to_reads_across_multiple_fills() {
        let mut stream = test_stream(b"0123456789").await;
        let mut reader = FramingReader::new(4);
        let mut out = Vec::new();
        reader
            .copy_to(&mut stream, &mut out, 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, b"0123456789");
    }
}
