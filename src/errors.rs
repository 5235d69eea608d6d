//! Error kind taxonomy for the request pipeline and its mapping to concrete
//! HTTP responses.
//!
//! An `http_errors!` declarative-macro table holds precomputed response
//! bytes per `(json, kind, version)` for every fixed-message kind.
//! `HttpException` and the `EmptyStreamClosed` kind can't be table-driven
//! (the former carries a caller-supplied message, the latter is never
//! turned into a response at all), so they're handled outside the macro.
use crate::http::types::{StatusCode, Version};
use std::{error, fmt, io};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    HeaderTooLarge,
    EntityTooLarge,
    Timeout,
    ClientDisconnected,
    MethodNotAllowed,
    NotFound,
    Forbidden,
    Internal,
    /// Admission was refused because both the active-request semaphore and
    /// the pending-connection queue are saturated.
    /// Rendered before any request line is ever read, so the response is
    /// always written as HTTP/1.1.
    ServiceUnavailable,
    /// Client closed the connection before sending any bytes. Never turned
    /// into a response; logged through [`crate::logging::Logger`] at debug
    /// level instead.
    EmptyStreamClosed,
    /// A handler-raised exception carrying an explicit status and message.
    Exception(HttpException),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpException {
    pub status: StatusCode,
    pub message: String,
}

impl HttpException {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for HttpException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.message)
    }
}

impl error::Error for HttpException {}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        fn as_http_fixed(&self, version: Version, json: bool) -> Option<&'static [u8]> {
            Some(match (json, self, version) { $(
                (true, Self::$name, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ).as_bytes(),
                (false, Self::$name, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ).as_bytes(),
                (true, Self::$name, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ).as_bytes(),
                (false, Self::$name, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ).as_bytes(),
            )* _ => return None })
        }
    };
}

impl ErrorKind {
    http_errors! {
        BadRequest: "400 Bad Request", "51"
            => r#"{"error":"Malformed request","code":"BAD_REQUEST"}"#;
        HeaderTooLarge: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Header block too large","code":"HEADER_TOO_LARGE"}"#;
        EntityTooLarge: "413 Payload Too Large", "54"
            => r#"{"error":"Request body too large","code":"ENTITY_TOO_LARGE"}"#;
        Timeout: "408 Request Timeout", "42"
            => r#"{"error":"Request timed out","code":"TIMEOUT"}"#;
        ClientDisconnected: "400 Bad Request", "54"
            => r#"{"error":"Client disconnected","code":"CLIENT_DISCONNECTED"}"#;
        MethodNotAllowed: "405 Method Not Allowed", "50"
            => r#"{"error":"Method not allowed","code":"METHOD_NOT_ALLOWED"}"#;
        NotFound: "404 Not Found", "42"
            => r#"{"error":"Resource not found","code":"NOT_FOUND"}"#;
        Forbidden: "403 Forbidden", "40"
            => r#"{"error":"Forbidden","code":"FORBIDDEN"}"#;
        Internal: "500 Internal Server Error", "46"
            => r#"{"error":"Internal server error","code":"INTERNAL"}"#;
        ServiceUnavailable: "503 Service Unavailable", "58"
            => r#"{"error":"Server is at capacity","code":"SERVICE_UNAVAILABLE"}"#;
    }

    /// Renders this error as a complete HTTP response. Returns `None` for
    /// [`ErrorKind::EmptyStreamClosed`], which must never reach a client.
    pub(crate) fn as_http(&self, version: Version, json: bool) -> Option<Vec<u8>> {
        if let Some(fixed) = self.as_http_fixed(version, json) {
            return Some(fixed.to_vec());
        }

        match self {
            ErrorKind::EmptyStreamClosed => None,
            ErrorKind::Exception(exc) => Some(render_exception(exc, version, json)),
            _ => unreachable!("all non-exception, non-empty kinds are table-driven"),
        }
    }

    /// The status this error kind maps to, used for logging and for the
    /// 500/408 mapping rules.
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BadRequest,
            ErrorKind::HeaderTooLarge => StatusCode::RequestHeaderFieldsTooLarge,
            ErrorKind::EntityTooLarge => StatusCode::PayloadTooLarge,
            ErrorKind::Timeout => StatusCode::RequestTimeout,
            ErrorKind::ClientDisconnected => StatusCode::BadRequest,
            ErrorKind::MethodNotAllowed => StatusCode::MethodNotAllowed,
            ErrorKind::NotFound => StatusCode::NotFound,
            ErrorKind::Forbidden => StatusCode::Forbidden,
            ErrorKind::Internal => StatusCode::InternalServerError,
            ErrorKind::ServiceUnavailable => StatusCode::ServiceUnavailable,
            ErrorKind::EmptyStreamClosed => StatusCode::BadRequest,
            ErrorKind::Exception(exc) => exc.status,
        }
    }
}

fn render_exception(exc: &HttpException, version: Version, json: bool) -> Vec<u8> {
    let version_str = match version {
        Version::Http11 => "HTTP/1.1",
        Version::Http10 => "HTTP/1.0",
    };
    let status_line = exc.status.into_first_line();

    let mut out = Vec::with_capacity(128 + exc.message.len());
    out.extend_from_slice(version_str.as_bytes());
    out.push(b' ');
    out.extend_from_slice(status_line);
    out.extend_from_slice(b"\r\nconnection: close\r\n");

    if json {
        let escaped = exc.message.replace('\\', "\\\\").replace('"', "\\\"");
        let body = format!(r#"{{"error":"{}","code":"EXCEPTION"}}"#, escaped);
        out.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
        out.extend_from_slice(b"content-type: application/json\r\n\r\n");
        out.extend_from_slice(body.as_bytes());
    } else {
        out.extend_from_slice(b"content-length: 0\r\n\r\n");
    }
    out
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Exception(exc) => write!(f, "{}", exc),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<HttpException> for ErrorKind {
    fn from(exc: HttpException) -> Self {
        ErrorKind::Exception(exc)
    }
}

/// I/O failures are folded into the closest matching kind rather than kept
/// as a distinct `Io` variant, since every site that produces one already
/// knows whether the connection is merely gone (`ClientDisconnected`),
/// starved (`Timeout`), or broken in a way the caller can't diagnose
/// (`Internal`).
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ErrorKind::ClientDisconnected,
            _ => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_kinds_render_complete_responses() {
        let bytes = ErrorKind::NotFound.as_http(Version::Http11, true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("\"code\":\"NOT_FOUND\""));
    }

    #[test]
    fn empty_stream_closed_has_no_response() {
        assert!(ErrorKind::EmptyStreamClosed
            .as_http(Version::Http11, true)
            .is_none());
    }

    #[test]
    fn exception_carries_caller_message() {
        let exc = HttpException::new(StatusCode::Teapot, "brewing");
        let bytes = ErrorKind::Exception(exc).as_http(Version::Http11, true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("brewing"));
        assert!(text.starts_with("HTTP/1.1 418"));
    }

    #[test]
    fn io_errors_map_to_expected_kinds() {
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert!(matches!(ErrorKind::from(eof), ErrorKind::ClientDisconnected));

        let timeout = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(ErrorKind::from(timeout), ErrorKind::Timeout));
    }
}
