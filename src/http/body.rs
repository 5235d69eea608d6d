//! Body decode dispatch: `Content-Type`-driven selection between the
//! bounded raw-bytes, urlencoded-form, and multipart decode strategies.
//!
//! The body is read eagerly once the headers are parsed, dispatching three
//! ways on `Content-Type`.

use crate::{
    errors::ErrorKind,
    http::{
        multipart::{MultipartItem, MultipartScanner},
        percent::decode_form_component,
        query::Query,
        request::FramingReader,
    },
    limits::ReqLimits,
};
use std::{collections::HashMap, time::Duration};
use tokio::io::AsyncReadExt;

/// The parsed `Content-Type` header: a primary type/subtype token plus its
/// `;`-separated parameters (e.g. `boundary`, `charset`), each optionally
/// double-quoted.
pub(crate) struct ContentType {
    pub(crate) media_type: String,
    params: HashMap<String, String>,
}

impl ContentType {
    pub(crate) fn parse(value: &str) -> Self {
        let mut parts = value.split(';');
        let media_type = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let mut params = HashMap::new();
        for part in parts {
            let Some((key, val)) = part.split_once('=') else {
                continue;
            };
            let val = val.trim().trim_matches('"');
            params.insert(key.trim().to_ascii_lowercase(), val.to_string());
        }
        Self { media_type, params }
    }

    pub(crate) fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Default charset is `utf-8` unless a `charset` parameter says
    /// otherwise; this crate only ever treats text as UTF-8 regardless
    /// (see `http/percent.rs`), so the value is retained for completeness
    /// but never changes decode behavior.
    pub(crate) fn charset(&self) -> &str {
        self.param("charset").unwrap_or("utf-8")
    }
}

pub(crate) enum DecodedBody {
    Raw(Vec<u8>),
    Form(HashMap<String, String>),
    Multipart {
        form: HashMap<String, String>,
        files: Vec<MultipartItem>,
    },
}

/// Reads and decodes the request body according to `Content-Type`,
/// enforcing the relevant size limit for whichever strategy is selected.
/// Returns `Ok(DecodedBody::Raw(vec![]))` for a bodyless request.
pub(crate) async fn decode_body<S: AsyncReadExt + Unpin>(
    reader: &mut FramingReader,
    stream: &mut S,
    content_length: Option<usize>,
    content_type: Option<&str>,
    limits: &ReqLimits,
    idle_timeout: Duration,
) -> Result<DecodedBody, ErrorKind> {
    let Some(len) = content_length else {
        return Ok(DecodedBody::Raw(Vec::new()));
    };
    if len == 0 {
        return Ok(DecodedBody::Raw(Vec::new()));
    }

    let parsed_ct = content_type.map(ContentType::parse);

    if let Some(ct) = &parsed_ct {
        if ct.media_type == "multipart/form-data" && limits.auto_parse_multipart_form_data {
            let boundary = ct.param("boundary").ok_or(ErrorKind::BadRequest)?.to_string();
            return decode_multipart(reader, stream, len, &boundary, limits, idle_timeout).await;
        }
        if ct.media_type == "application/x-www-form-urlencoded" {
            if len > limits.max_url_encoded_form_size {
                return Err(ErrorKind::EntityTooLarge);
            }
            let mut raw = Vec::with_capacity(len);
            reader.copy_to(stream, &mut raw, len, idle_timeout).await?;
            let form: HashMap<String, String> =
                Query::parse(&raw, limits.url_query_parts.max(64)).unwrap_or_default();
            return Ok(DecodedBody::Form(form));
        }
    }

    if len > limits.body_size {
        return Err(ErrorKind::EntityTooLarge);
    }
    let mut raw = Vec::with_capacity(len);
    reader.copy_to(stream, &mut raw, len, idle_timeout).await?;
    Ok(DecodedBody::Raw(raw))
}

async fn decode_multipart<S: AsyncReadExt + Unpin>(
    reader: &mut FramingReader,
    stream: &mut S,
    content_length: usize,
    boundary: &str,
    limits: &ReqLimits,
    idle_timeout: Duration,
) -> Result<DecodedBody, ErrorKind> {
    let mut scanner = MultipartScanner::new(boundary, limits.multipart_part_size, limits.multipart_part_count);
    reader
        .feed_to(stream, content_length, idle_timeout, |chunk| scanner.feed(chunk))
        .await?;
    let items = scanner.finish()?;

    let mut form = HashMap::new();
    let mut files = Vec::new();
    for item in items {
        if item.filename.is_some() {
            files.push(item);
        } else {
            let value = String::from_utf8_lossy(&item.data).into_owned();
            form.insert(item.name.clone(), value);
        }
    }
    Ok(DecodedBody::Multipart { form, files })
}

/// Percent-decodes an already-known-urlencoded buffer into owned key/value
/// pairs, bypassing `Query`'s `?`-prefix handling (a form body has none).
/// Exposed for callers building a form map outside the `decode_body`
/// dispatch (e.g. re-parsing a previously-read raw body).
pub fn parse_urlencoded_form(raw: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in raw.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.iter().position(|&b| b == b'=') {
            Some(idx) => (&pair[..idx], &pair[idx + 1..]),
            None => (pair, &b""[..]),
        };
        map.insert(decode_form_component(key), decode_form_component(value));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parses_media_type_and_params() {
        let ct = ContentType::parse("multipart/form-data; boundary=XYZ");
        assert_eq!(ct.media_type, "multipart/form-data");
        assert_eq!(ct.param("boundary"), Some("XYZ"));
    }

    #[test]
    fn content_type_strips_quotes_from_params() {
        let ct = ContentType::parse(r#"text/plain; charset="utf-8""#);
        assert_eq!(ct.charset(), "utf-8");
    }

    #[test]
    fn parse_urlencoded_form_decodes_pairs() {
        let form = parse_urlencoded_form(b"a=1&b=hello+world");
        assert_eq!(form.get("a").map(String::as_str), Some("1"));
        assert_eq!(form.get("b").map(String::as_str), Some("hello world"));
    }

    #[tokio::test]
    async fn decode_body_returns_empty_raw_without_content_length() {
        let mut stream = crate::http::request::test_stream(b"").await;
        let mut reader = FramingReader::new(16);
        let limits = ReqLimits::default().precalculate();
        let result = decode_body(&mut reader, &mut stream, None, None, &limits, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(result, DecodedBody::Raw(v) if v.is_empty()));
    }
}
