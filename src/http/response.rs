//! A fluent, low-allocation HTTP response builder.
//!
//! A fluent `status()` → `header()`/`header_multi()`/`header_params()` →
//! `body()` build order with `debug_assert!`-guarded state transitions, and
//! a content-length backpatch trick (`start_body`/`end_body` reserve a
//! fixed-width placeholder, then overwrite it once the body's length is
//! known). Two additions worth noting:
//!
//! - `cookie()`, emitting a `Set-Cookie` header from [`crate::http::headers::Cookie`].
//! - `body_chunked_with()`, an HTTP/1.1-only alternative to `body_with()`
//!   for a handler that cannot cheaply know its body length up front.
//!   HTTP/1.0 has no chunked transfer coding, so on that version it
//!   degrades to a close-terminated, content-length-less response instead.
//!
//! HTTP/0.9 is out of scope entirely (see `DESIGN.md`).

use crate::{
    http::{
        headers::Cookie,
        types::{StatusCode, Version},
    },
    limits::RespLimits,
};
use std::{borrow::Cow, rc::Rc, sync::Arc};

/// HTTP/1.x response builder.
///
/// Build by chaining in strict order: [`status()`](Response::status) →
/// any number of header methods → exactly one body method. Debug builds
/// assert this order; release builds trust the caller for speed.
#[derive(Debug)]
pub struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
}

#[doc(hidden)]
pub struct Handled(());

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
    }

    #[inline(always)]
    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state == ResponseState::Complete
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

impl Response {
    /// Forces the connection to close after this response.
    ///
    /// # Panics
    /// Debug builds panic if called after the body has been finalized.
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }

    /// Sets the HTTP status code. Must be the first method called.
    ///
    /// # Panics
    /// Debug builds panic if called more than once or after a body method.
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer.extend_from_slice(self.version.as_str().as_bytes());
        self.buffer.push(b' ');
        self.buffer.extend_from_slice(status.into_first_line());
        self.buffer.extend_from_slice(b"\r\n");
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header. Do not set `content-length` (computed automatically)
    /// or `connection` (use [`close()`](Response::close)) this way.
    ///
    /// # Panics
    /// Debug builds panic if called before `status()` or after a body method.
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");
        value.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a multi-value header, e.g. `accept: text/html, text/plain`.
    #[inline]
    #[track_caller]
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut self.buffer);
            for value in iter {
                split.write_to(&mut self.buffer);
                value.write_to(&mut self.buffer);
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a header built from `key[=value]` parameter pairs, e.g.
    /// `cache-control: max-age=3600, must-revalidate`.
    #[inline]
    #[track_caller]
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut self.buffer);
            if let Some(val) = first_val {
                self.buffer.extend_from_slice(b"=");
                val.write_to(&mut self.buffer);
            }
            for (key, value) in iter {
                split.write_to(&mut self.buffer);
                key.write_to(&mut self.buffer);
                if let Some(val) = value {
                    self.buffer.extend_from_slice(b"=");
                    val.write_to(&mut self.buffer);
                }
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a `Set-Cookie` header.
    ///
    /// # Panics
    /// Debug builds panic if called before `status()` or after a body method.
    #[inline]
    #[track_caller]
    pub fn cookie(&mut self, cookie: &Cookie) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        self.buffer.extend_from_slice(b"set-cookie: ");
        self.buffer.extend_from_slice(&cookie.to_header_value());
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Sets the response body and finalizes the response with a computed
    /// `content-length`.
    ///
    /// # Panics
    /// Debug builds panic if called before `status()` or more than once.
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body()
    }

    /// Writes the response body via closure, finalizing with a computed
    /// `content-length`.
    ///
    /// # Panics
    /// Debug builds panic if called before `status()` or more than once.
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut BodyWriter(&mut self.buffer));
        self.end_body()
    }

    /// Writes the response body as a single `transfer-encoding: chunked`
    /// frame instead of computing `content-length` up front — for a
    /// handler whose body length isn't cheap to know before writing it.
    ///
    /// HTTP/1.0 has no chunked transfer coding, so on that version this
    /// falls back to a close-terminated response with no `content-length`
    /// at all (the connection closing is itself the end-of-body signal).
    ///
    /// # Panics
    /// Debug builds panic if called before `status()` or more than once.
    #[inline]
    #[track_caller]
    pub fn body_chunked_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        if self.version == Version::Http10 {
            self.keep_alive = false;
            self.buffer.extend_from_slice(b"connection: close\r\n\r\n");
            f(&mut BodyWriter(&mut self.buffer));
            self.state = ResponseState::Complete;
            return Handled(());
        }

        if let Some(value) = self.connection_header() {
            self.buffer.extend_from_slice(b"connection: ");
            self.buffer.extend_from_slice(value);
            self.buffer.extend_from_slice(b"\r\n");
        }
        self.buffer.extend_from_slice(b"transfer-encoding: chunked\r\n\r\n");

        let mut chunk = Vec::new();
        f(&mut BodyWriter(&mut chunk));
        if !chunk.is_empty() {
            self.buffer.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            self.buffer.extend_from_slice(&chunk);
            self.buffer.extend_from_slice(b"\r\n");
        }
        self.buffer.extend_from_slice(b"0\r\n\r\n");

        self.state = ResponseState::Complete;
        Handled(())
    }
}

impl Response {
    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) -> &mut Self {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        self.buffer.extend_from_slice(b"content-length: ");
        self.posit_length = self.buffer.len();
        self.buffer.extend_from_slice(b"0000000000\r\n\r\n");
        self.start_body = self.buffer.len();
        self
    }

    #[inline(always)]
    fn end_body(&mut self) -> Handled {
        let body_len = self.buffer.len() - self.start_body;
        let (arr, _) = Response::number_to_bytes(body_len as u128);

        let target_range = self.posit_length..self.posit_length + 10;
        self.buffer[target_range].copy_from_slice(&arr[29..39]);
        self.state = ResponseState::Complete;

        Handled(())
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => Some(b"close"),
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body, used by
    /// [`body_with()`](Response::body_with) and
    /// [`body_chunked_with()`](Response::body_chunked_with).
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing a value's wire representation directly to the
    /// response buffer, avoiding an intermediate `format!` allocation for
    /// common cases. Floating-point numbers are deliberately not
    /// implemented: their formatting is locale- and precision-sensitive,
    /// which has no good default for a protocol header or body byte.
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = Response::number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        let abs = value.unsigned_abs();

        let (arr, start) = Response::number_to_bytes(abs);
        buffer.extend_from_slice(&arr[start..]);
    }
}

pub use write::{BodyWriter, WriteBuffer};

#[cfg(test)]
mod tests {
    use super::*;

    fn resp() -> Response {
        Response::new(&RespLimits::default())
    }

    #[test]
    fn basic_body_sets_content_length() {
        let mut r = resp();
        r.status(StatusCode::Ok).header("content-type", "text/plain").body("hi");
        let text = String::from_utf8(r.buffer().to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn close_adds_connection_close_header() {
        let mut r = resp();
        r.status(StatusCode::Ok).close().body("bye");
        let text = String::from_utf8(r.buffer().to_vec()).unwrap();
        assert!(text.contains("connection: close\r\n"));
    }

    #[test]
    fn cookie_header_is_emitted() {
        let mut r = resp();
        let cookie = Cookie::new("session", "abc");
        r.status(StatusCode::Ok).cookie(&cookie).body("ok");
        let text = String::from_utf8(r.buffer().to_vec()).unwrap();
        assert!(text.contains("set-cookie: session=abc\r\n"));
    }

    #[test]
    fn chunked_http11_uses_transfer_encoding() {
        let mut r = resp();
        r.status(StatusCode::Ok).body_chunked_with(|w| w.write("chunked-body"));
        let text = String::from_utf8(r.buffer().to_vec()).unwrap();
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(text.contains("\r\nc\r\nchunked-body\r\n0\r\n\r\n"));
    }

    #[test]
    fn chunked_http10_falls_back_to_close_terminated() {
        let mut r = resp();
        r.set_version(Version::Http10);
        r.status(StatusCode::Ok).body_chunked_with(|w| w.write("body"));
        let text = String::from_utf8(r.buffer().to_vec()).unwrap();
        assert!(!text.contains("transfer-encoding"));
        assert!(!text.contains("content-length"));
        assert!(text.ends_with("body"));
    }
}
