//! Incremental `multipart/form-data` boundary scanner.
//!
//! Uses `memchr::memmem` for multipart boundary search. Unlike the
//! Content-Length-bounded and urlencoded-form decode strategies in
//! `http/body.rs`, a multipart body is never fully materialized before
//! scanning: [`MultipartScanner::feed`] is driven directly by the
//! connection's socket reads, one chunk at a time, so an upload's total
//! size is bounded only by `multipart_part_size * multipart_part_count`
//! rather than by `ReqLimits::body_size`. The scanner keeps a small
//! carry-over buffer across `feed` calls so a boundary (or a part's
//! trailing `\r\n`) split across two TCP reads is still found correctly —
//! this is the property called out as the
//! scanner's central testable behavior.

use crate::{errors::ErrorKind, http::headers::HeaderMap};
use memchr::memmem;

/// One decoded part of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct MultipartItem {
    pub headers: HeaderMap,
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

enum Stage {
    BeforeFirstBoundary,
    /// Just consumed a `--boundary` token; waiting on the two bytes after it
    /// (`--` for the terminator, `\r\n` for the next part) to decide where
    /// to go next. Distinct from `BeforeFirstBoundary` so a `feed()` call
    /// that lands exactly here never re-enters the `first_delim` search —
    /// `BeforeFirstBoundary` searching again would skip past the delimiter
    /// already consumed and find the *next* one instead, silently dropping
    /// the part in between.
    AfterBoundary,
    PartHeaders {
        header_buf: Vec<u8>,
    },
    PartBody {
        headers: HeaderMap,
        name: String,
        filename: Option<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    },
    Done,
}

/// Streaming scanner for one multipart body. Construct with the boundary
/// token from the request's `Content-Type` parameter, `feed()` every chunk
/// read off the socket in order, then `finish()` once the declared body
/// length has been fully consumed.
pub(crate) struct MultipartScanner {
    first_delim: Vec<u8>,
    mid_delim: Vec<u8>,
    carry: Vec<u8>,
    stage: Stage,
    items: Vec<MultipartItem>,
    max_part_bytes: usize,
    max_parts: usize,
}

impl MultipartScanner {
    pub(crate) fn new(boundary: &str, max_part_bytes: usize, max_parts: usize) -> Self {
        Self {
            first_delim: format!("--{boundary}").into_bytes(),
            mid_delim: format!("\r\n--{boundary}").into_bytes(),
            carry: Vec::new(),
            stage: Stage::BeforeFirstBoundary,
            items: Vec::new(),
            max_part_bytes,
            max_parts,
        }
    }

    /// Feeds the next chunk of raw body bytes read off the wire, in order.
    /// May produce zero or more completed [`MultipartItem`]s internally;
    /// call `finish()` after the last chunk to retrieve them.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<(), ErrorKind> {
        self.carry.extend_from_slice(chunk);
        self.drain()
    }

    fn drain(&mut self) -> Result<(), ErrorKind> {
        loop {
            match &mut self.stage {
                Stage::Done => return Ok(()),
                Stage::BeforeFirstBoundary => {
                    let Some(pos) = memmem::find(&self.carry, &self.first_delim) else {
                        if self.carry.len() > self.max_part_bytes {
                            return Err(ErrorKind::EntityTooLarge);
                        }
                        return Ok(());
                    };
                    let after = pos + self.first_delim.len();
                    self.carry.drain(..after);
                    self.stage = Stage::AfterBoundary;
                }
                Stage::AfterBoundary => {
                    if !self.advance_past_boundary_marker()? {
                        return Ok(());
                    }
                }
                Stage::PartHeaders { .. } => {
                    let Some(blank) = memmem::find(&self.carry, b"\r\n\r\n") else {
                        if self.carry.len() > self.max_part_bytes {
                            return Err(ErrorKind::EntityTooLarge);
                        }
                        return Ok(());
                    };
                    let header_bytes: Vec<u8> = self.carry.drain(..blank).collect();
                    self.carry.drain(..4); // consume the blank-line CRLFCRLF
                    let (headers, name, filename, content_type) = parse_part_headers(&header_bytes)?;
                    self.stage = Stage::PartBody {
                        headers,
                        name,
                        filename,
                        content_type,
                        data: Vec::new(),
                    };
                }
                Stage::PartBody { data, .. } => {
                    let Some(pos) = memmem::find(&self.carry, &self.mid_delim) else {
                        if data.len() + self.carry.len() > self.max_part_bytes {
                            return Err(ErrorKind::EntityTooLarge);
                        }
                        return Ok(());
                    };
                    data.extend_from_slice(&self.carry[..pos]);
                    let after = pos + self.mid_delim.len();
                    self.carry.drain(..after);

                    let Stage::PartBody { headers, name, filename, content_type, data } =
                        std::mem::replace(&mut self.stage, Stage::Done)
                    else {
                        unreachable!()
                    };
                    if self.items.len() >= self.max_parts {
                        return Err(ErrorKind::EntityTooLarge);
                    }
                    self.items.push(MultipartItem { headers, name, filename, content_type, data });
                    self.stage = Stage::AfterBoundary;
                }
            }
        }
    }

    /// Having just consumed a boundary token (`--boundary`), looks at what
    /// follows: `--` marks the terminating boundary, `\r\n` starts a new
    /// part's headers. Returns `Ok(true)` if enough bytes were available to
    /// decide and the scanner advanced, `Ok(false)` if more data is needed.
    fn advance_past_boundary_marker(&mut self) -> Result<bool, ErrorKind> {
        if self.carry.len() < 2 {
            return Ok(false);
        }
        if &self.carry[..2] == b"--" {
            self.carry.drain(..2);
            self.stage = Stage::Done;
            return Ok(true);
        }
        if &self.carry[..2] == b"\r\n" {
            self.carry.drain(..2);
            self.stage = Stage::PartHeaders { header_buf: Vec::new() };
            return Ok(true);
        }
        Err(ErrorKind::BadRequest)
    }

    /// Finalizes the scan. Fails with `BadRequest` if the body ended
    /// without a terminating boundary, or with unconsumed trailing bytes.
    pub(crate) fn finish(self) -> Result<Vec<MultipartItem>, ErrorKind> {
        match self.stage {
            Stage::Done if self.carry.iter().all(|b| b.is_ascii_whitespace()) => Ok(self.items),
            _ => Err(ErrorKind::BadRequest),
        }
    }
}

fn parse_part_headers(
    raw: &[u8],
) -> Result<(HeaderMap, String, Option<String>, Option<String>), ErrorKind> {
    let mut headers = HeaderMap::with_capacity(4);
    for line in raw.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let colon = line.iter().position(|&b| b == b':').ok_or(ErrorKind::BadRequest)?;
        let name = String::from_utf8_lossy(&line[..colon]).into_owned();
        let value = trim_ows(&line[colon + 1..]).to_vec();
        headers.insert(name, value);
    }

    let disposition = headers
        .get_str("content-disposition")
        .ok_or(ErrorKind::BadRequest)?
        .into_owned();
    let name = extract_param(&disposition, "name").ok_or(ErrorKind::BadRequest)?;
    let filename = extract_param(&disposition, "filename");
    let content_type = headers.get_str("content-type").map(|c| c.into_owned());

    Ok((headers, name, filename, content_type))
}

fn extract_param(disposition: &str, key: &str) -> Option<String> {
    for segment in disposition.split(';') {
        let segment = segment.trim();
        let prefix = format!("{key}=");
        if let Some(rest) = segment.strip_prefix(&prefix) {
            return Some(rest.trim_matches('"').to_string());
        }
    }
    None
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != b' ' && *b != b'\t').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| *b != b' ' && *b != b'\t').map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(boundary: &str) -> Vec<u8> {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\ndata here\r\n\
             --{b}--\r\n",
            b = boundary
        )
        .into_bytes()
    }

    #[test]
    fn parses_two_parts_fed_whole() {
        let mut scanner = MultipartScanner::new("B", 4096, 8);
        scanner.feed(&body("B")).unwrap();
        let items = scanner.finish().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "field");
        assert_eq!(items[0].data, b"value");
        assert_eq!(items[1].filename.as_deref(), Some("a.txt"));
        assert_eq!(items[1].data, b"data here");
    }

    #[test]
    fn boundary_split_across_feed_calls_is_still_found() {
        let whole = body("B");
        for split in [1usize, 10, 40, whole.len() - 1] {
            let split = split.min(whole.len().saturating_sub(1)).max(1);
            let mut scanner = MultipartScanner::new("B", 4096, 8);
            scanner.feed(&whole[..split]).unwrap();
            scanner.feed(&whole[split..]).unwrap();
            let items = scanner.finish().unwrap();
            assert_eq!(items.len(), 2, "split at {split} produced {} items", items.len());
        }
    }

    #[test]
    fn byte_at_a_time_still_parses() {
        let whole = body("B");
        let mut scanner = MultipartScanner::new("B", 4096, 8);
        for byte in &whole {
            scanner.feed(std::slice::from_ref(byte)).unwrap();
        }
        let items = scanner.finish().unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn oversized_part_is_rejected() {
        let mut scanner = MultipartScanner::new("B", 4, 8);
        let err = scanner.feed(&body("B")).unwrap_err();
        assert!(matches!(err, ErrorKind::EntityTooLarge));
    }

    #[test]
    fn missing_terminating_boundary_is_bad_request() {
        let mut whole = body("B");
        let trimmed_len = whole.len() - 4;
        whole.truncate(trimmed_len);
        let mut scanner = MultipartScanner::new("B", 4096, 8);
        scanner.feed(&whole).unwrap();
        assert!(matches!(scanner.finish(), Err(ErrorKind::BadRequest)));
    }

    #[test]
    fn trailing_junk_after_closing_boundary_is_bad_request() {
        let mut whole = body("B");
        whole.extend_from_slice(b"garbage after the sentinel");
        let mut scanner = MultipartScanner::new("B", 4096, 8);
        scanner.feed(&whole).unwrap();
        assert!(matches!(scanner.finish(), Err(ErrorKind::BadRequest)));
    }

    #[test]
    fn boundary_straddling_every_offset_in_a_range_reconstructs_parts_verbatim() {
        let whole = body("B");
        for split in 0..whole.len() {
            let mut scanner = MultipartScanner::new("B", 4096, 8);
            scanner.feed(&whole[..split]).unwrap();
            scanner.feed(&whole[split..]).unwrap();
            let items = scanner.finish().unwrap();
            assert_eq!(items.len(), 2, "split at {split}");
            assert_eq!(items[0].data, b"value", "split at {split}");
            assert_eq!(items[1].data, b"data here", "split at {split}");
        }
    }

    #[test]
    fn feed_split_immediately_after_a_mid_delimiter_does_not_drop_the_next_part() {
        let whole = body("B");
        let mid_delim = b"\r\n--B";
        let split = memmem::find(&whole, mid_delim).unwrap() + mid_delim.len();
        let mut scanner = MultipartScanner::new("B", 4096, 8);
        scanner.feed(&whole[..split]).unwrap();
        scanner.feed(&whole[split..]).unwrap();
        let items = scanner.finish().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].data, b"value");
        assert_eq!(items[1].data, b"data here");
    }
}
