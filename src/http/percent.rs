//! Percent-decoding with the two different space conventions RFC 3986 and
//! the `application/x-www-form-urlencoded` media type disagree on.
//!
//! `http/query.rs` used to flag the absence of a decoder as a deliberate
//! zero-copy tradeoff; this module is what fills that gap in.

use percent_encoding::percent_decode;

/// Decodes a path or header-like component: `%XX` escapes are decoded,
/// `+` is left as a literal plus sign. Invalid UTF-8 in the decoded bytes
/// is replaced with `U+FFFD` rather than rejected — a malformed escape in
/// one segment of a path shouldn't take down routing for the whole request.
pub(crate) fn decode_path_component(raw: &[u8]) -> String {
    let decoded = percent_decode(raw).collect::<Vec<u8>>();
    match simdutf8::basic::from_utf8(&decoded) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(&decoded).into_owned(),
    }
}

/// Decodes a query-string or `application/x-www-form-urlencoded` component:
/// `+` is translated to a literal space before `%XX` escapes are resolved,
/// per the form media type's rules (distinct from path decoding above).
pub(crate) fn decode_form_component(raw: &[u8]) -> String {
    let with_spaces: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    let decoded = percent_decode(&with_spaces).collect::<Vec<u8>>();
    match simdutf8::basic::from_utf8(&decoded) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(&decoded).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_component_decodes_escapes_but_not_plus() {
        assert_eq!(decode_path_component(b"a+b%20c"), "a+b c");
        assert_eq!(decode_path_component(b"caf%C3%A9"), "café");
    }

    #[test]
    fn form_component_treats_plus_as_space() {
        assert_eq!(decode_form_component(b"a+b%20c"), "a b c");
        assert_eq!(decode_form_component(b"key%3Dvalue"), "key=value");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let decoded = decode_path_component(b"%ff%fe");
        assert!(decoded.contains('\u{FFFD}'));
    }
}
