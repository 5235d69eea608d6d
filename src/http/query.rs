//! URL query string parser.
//!
//! A `memchr`-driven scan for `&` and `=` delimiters, a `QueryCollector`
//! trait letting callers choose `Vec` (order-preserving) or `HashMap`
//! (last-wins) collection, and a small `Error` enum. Values come back
//! owned and percent-decoded (via
//! [`crate::http::percent::decode_form_component`]) rather than as
//! zero-copy slices, so a caller never has to think about borrow lifetimes
//! tied to the request buffer.

use crate::http::percent::decode_form_component;
use memchr::memchr;
use std::{collections::HashMap, error, fmt};

pub struct Query;

impl Query {
    /// Parses a query string (handling an optional leading `?`) into a new
    /// collection, percent-decoding each key and value with `+` treated as
    /// a space, per `application/x-www-form-urlencoded` rules.
    #[inline(always)]
    pub fn parse<C: QueryCollector>(query: &[u8], limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit);
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses a query string into an existing collection, appending to it.
    pub fn parse_into<C: QueryCollector>(
        result: &mut C,
        query: &[u8],
        limit: usize,
    ) -> Result<(), Error> {
        let data = match query.first().ok_or(Error::Empty)? {
            b'?' => &query[1..],
            _ => query,
        };

        let mut start = 0;
        while start < data.len() {
            if result.length() >= limit {
                return Err(Error::OverLimit(limit));
            }

            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let index = memchr(b'=', &data[start..end]).unwrap_or(end - start);
            let split_index = start + index;

            let key = &data[start..split_index];
            let value = match split_index < end {
                true => &data[split_index + 1..end],
                false => &b""[..],
            };

            result.add_param(decode_form_component(key), decode_form_component(value));
            start = end + 1;
        }

        Ok(())
    }
}

/// A collection that can accumulate decoded `(key, value)` query parameters.
pub trait QueryCollector
where
    Self: Sized,
{
    fn add_param(&mut self, key: String, value: String);

    // For `length` instead of `len`, thanks to `clippy` for the tip about
    // adding the `is_empty` method, although it's not needed here
    fn length(&self) -> usize;

    fn with_capacity(capacity: usize) -> Self;
}

impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

impl QueryCollector for HashMap<String, String> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    OverLimit(usize),
    Empty,
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OverLimit(limit) => {
                write!(f, "Query parameter limit exceeded: limit={}", limit)
            }
            Error::Empty => {
                write!(f, "Query string is empty or contains no parameters")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        for line in ["a=1&b=2", "?a=1&b=2"] {
            let params: Vec<(String, String)> = Query::parse(line.as_bytes(), 8).unwrap();

            assert_eq!(params.len(), 2);
            assert_eq!(params[0], ("a".to_string(), "1".to_string()));
            assert_eq!(params[1], ("b".to_string(), "2".to_string()));
        }
    }

    #[test]
    fn full() {
        let line = b"flag&empty=&=val&&key=value";
        let params: Vec<(String, String)> = Query::parse(line, 10).unwrap();

        assert_eq!(params.len(), 5);
        assert_eq!(params[0], ("flag".to_string(), "".to_string()));
        assert_eq!(params[1], ("empty".to_string(), "".to_string()));
        assert_eq!(params[2], ("".to_string(), "val".to_string()));
        assert_eq!(params[3], ("".to_string(), "".to_string()));
        assert_eq!(params[4], ("key".to_string(), "value".to_string()));
    }

    #[test]
    fn not_complete() {
        let params: Vec<(String, String)> = Query::parse(b"flag&empty=&=val", 10).unwrap();

        assert_eq!(params.len(), 3);
        assert_eq!(params[0], ("flag".to_string(), "".to_string()));
        assert_eq!(params[1], ("empty".to_string(), "".to_string()));
        assert_eq!(params[2], ("".to_string(), "val".to_string()));
    }

    #[test]
    fn decodes_plus_and_percent_escapes() {
        let params: Vec<(String, String)> =
            Query::parse(b"name=John+Doe&e=a%40b.com", 10).unwrap();
        assert_eq!(params[0], ("name".to_string(), "John Doe".to_string()));
        assert_eq!(params[1], ("e".to_string(), "a@b.com".to_string()));
    }

    #[test]
    fn limit_error() {
        assert_eq!(
            Query::parse::<Vec<(String, String)>>(b"a&a", 1),
            Err(Error::OverLimit(1))
        );
    }

    #[test]
    fn empty_error() {
        assert_eq!(
            Query::parse::<Vec<(String, String)>>(b"", 10),
            Err(Error::Empty)
        );
    }
}
