//! Case-insensitive header map, plus request/response cookie handling.
//!
//! A linear-scan `get` by `eq_ignore_ascii_case`, plus a `content_length`
//! fast-path field updated as headers are inserted. Given owned storage per
//! the shared-mutable-buffer fix (see `DESIGN.md`), and extended with
//! cookie parsing/emission.

use crate::http::types::to_lower_case;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) name: String,
    pub(crate) value: Vec<u8>,
}

/// An ordered, case-insensitive multimap of header name/value pairs.
///
/// Lookups are a linear scan: request header counts are bounded low by
/// `ReqLimits::header_count`, so a `HashMap`'s overhead buys nothing here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderMap {
    headers: Vec<Header>,
    content_length: Option<usize>,
}

impl HeaderMap {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            headers: Vec::with_capacity(capacity),
            content_length: None,
        }
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Vec<u8>) {
        let name = name.into();
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = std::str::from_utf8(&value)
                .ok()
                .and_then(|s| s.parse().ok());
        }
        self.headers.push(Header { name, value });
    }

    pub(crate) fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Returns the value of the last header matching `name`, ignoring case:
    /// a repeated header keeps its latest value.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    /// Returns the value of the first header matching `name`, decoded as
    /// UTF-8 lossily. Most header values are ASCII; this is a convenience
    /// for the common case of reading them as text.
    pub fn get_str(&self, name: &str) -> Option<std::borrow::Cow<'_, str>> {
        self.get(name).map(String::from_utf8_lossy)
    }

    /// Returns every header whose name matches `name`, ignoring case, in
    /// the order they appeared on the wire. Needed for headers like
    /// `Cookie` that may legally repeat.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.headers.iter().map(|h| (h.name.as_str(), h.value.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Parses a `Cookie` request header's value into `(name, value)` pairs,
/// split on `;` then the first `=` in each segment. Malformed segments
/// (no `=`) are skipped rather than rejecting the whole header, since one
/// bad cookie set by a misbehaving third party shouldn't take down the
/// request.
pub(crate) fn parse_cookie_header(value: &[u8]) -> Vec<(String, String)> {
    let mut cookies = Vec::new();
    for segment in value.split(|&b| b == b';') {
        let segment = trim_ascii_whitespace(segment);
        if segment.is_empty() {
            continue;
        }
        let Some(eq) = segment.iter().position(|&b| b == b'=') else {
            continue;
        };
        let name = String::from_utf8_lossy(trim_ascii_whitespace(&segment[..eq])).into_owned();
        let value = String::from_utf8_lossy(trim_ascii_whitespace(&segment[eq + 1..])).into_owned();
        if !name.is_empty() {
            cookies.push((name, value));
        }
    }
    cookies
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// A cookie to be emitted via `Set-Cookie` on a response.
///
/// Carries both `max_age_seconds` (the `Max-Age` attribute, relative) and
/// `expires` (the `Expires` attribute, an absolute `HTTP-date` string the
/// caller is responsible for formatting per RFC 7231 §7.1.1.1). A cookie
/// may legally set either, both, or neither — when both are present,
/// `Max-Age` takes precedence in every browser that matters, so `expires`
/// is mostly useful for HTTP/1.0 clients that predate `Max-Age`.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age_seconds: Option<i64>,
    pub expires: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age_seconds: None,
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    /// Renders this cookie as the value of a single `Set-Cookie` header,
    /// e.g. `b"session=abc; Path=/; HttpOnly"`.
    pub(crate) fn to_header_value(&self) -> Vec<u8> {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age_seconds {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if let Some(expires) = &self.expires {
            out.push_str("; Expires=");
            out.push_str(expires);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out.into_bytes()
    }
}

#[inline(always)]
pub(crate) fn eq_ignore_case_ascii(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| to_lower_case(x) == to_lower_case(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_lookup_is_case_insensitive() {
        let mut map = HeaderMap::with_capacity(4);
        map.insert("Content-Type", b"application/json".to_vec());
        assert_eq!(map.get("content-type"), Some(b"application/json".as_slice()));
        assert_eq!(map.get("CONTENT-TYPE"), Some(b"application/json".as_slice()));
    }

    #[test]
    fn header_map_tracks_content_length() {
        let mut map = HeaderMap::with_capacity(4);
        map.insert("Content-Length", b"42".to_vec());
        assert_eq!(map.content_length(), Some(42));
    }

    #[test]
    fn cookie_header_splits_on_semicolon_then_first_equals() {
        let cookies = parse_cookie_header(b"a=1; b=2=3; c");
        assert_eq!(cookies, vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2=3".to_string()),
        ]);
    }

    #[test]
    fn cookie_renders_all_attributes() {
        let mut cookie = Cookie::new("session", "abc");
        cookie.path = Some("/".to_string());
        cookie.http_only = true;
        cookie.secure = true;
        assert_eq!(
            cookie.to_header_value(),
            b"session=abc; Path=/; Secure; HttpOnly".to_vec()
        );
    }
}
