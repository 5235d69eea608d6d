//! Route template grammar: compiles a path template string into an
//! anchored [`regex::Regex`] plus the ordered parameter list needed to
//! bind captured values back onto a handler's declared parameters.
//!
//! Routing is explicit registration rather than attribute-based reflection,
//! since Rust has no runtime reflection over types. Compiling the template
//! down to `regex::Regex` rather than a hand-rolled matcher is a common
//! approach for this kind of path-template routing.
//!
//! Grammar:
//! - literal segments match themselves;
//! - `{name}` captures one required path segment (`[^/]+`);
//! - `{name=default}` captures one optional path segment, filled with
//!   `default` when absent;
//! - `{*name}` captures the rest of the path (only legal as the final
//!   segment);
//! - `[...]` marks an optional suffix — anything inside need not be
//!   present for the template to match, and groups may nest
//!   (`/a[/b[/c]]`);
//! - templates are case-sensitive unless built with `case_sensitive:
//!   false`, and a single trailing slash is always optional regardless.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

#[derive(Debug, PartialEq, Eq)]
pub enum TemplateError {
    UnbalancedBrace,
    UnbalancedBracket,
    WildcardNotFinal,
    EmptyParamName,
    InvalidRegex(String),
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::UnbalancedBrace => write!(f, "unbalanced {{}} in route template"),
            TemplateError::UnbalancedBracket => write!(f, "unbalanced [] in route template"),
            TemplateError::WildcardNotFinal => write!(f, "{{*name}} must be the final segment"),
            TemplateError::EmptyParamName => write!(f, "empty parameter name in route template"),
            TemplateError::InvalidRegex(msg) => write!(f, "compiled to an invalid regex: {msg}"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// One named capture in a compiled template, in the order it appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParam {
    pub name: String,
    pub required: bool,
    pub default: Option<String>,
    pub wildcard: bool,
}

/// A route template compiled to an anchored regex, ready to be matched
/// against a decoded request path.
#[derive(Debug)]
pub struct CompiledTemplate {
    pub raw: String,
    pub regex: Regex,
    pub params: Vec<TemplateParam>,
    /// Higher sorts first. `literal_segment_count * 1000 - capture_count *
    /// 10 - (1 if the template ends in a wildcard)`, so a more specific
    /// (more literal, less captured, non-wildcard) template always wins a
    /// tie against a more general one covering the same request.
    pub precedence: i64,
}

impl CompiledTemplate {
    pub fn compile(pattern: &str, case_sensitive: bool) -> Result<Self, TemplateError> {
        let bytes = pattern.as_bytes();
        let mut pos = 0;
        let mut regex_src = String::from("^");
        let mut params = Vec::new();
        let mut saw_wildcard = false;

        parse_segment(bytes, &mut pos, 0, &mut regex_src, &mut params, &mut saw_wildcard)?;
        if pos != bytes.len() {
            return Err(TemplateError::UnbalancedBracket);
        }
        regex_src.push_str("/?$");

        let regex = RegexBuilder::new(&regex_src)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| TemplateError::InvalidRegex(e.to_string()))?;

        let precedence = compute_precedence(pattern, params.len(), saw_wildcard);

        Ok(Self {
            raw: pattern.to_string(),
            regex,
            params,
            precedence,
        })
    }

    /// Attempts to match `path` (already percent-decoded), returning the
    /// bound parameter values — including defaults for optional
    /// parameters that did not participate in the match.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut bound = HashMap::with_capacity(self.params.len());
        for param in &self.params {
            match captures.name(&param.name) {
                Some(m) => {
                    bound.insert(param.name.clone(), m.as_str().to_string());
                }
                None => {
                    if let Some(default) = &param.default {
                        bound.insert(param.name.clone(), default.clone());
                    }
                }
            }
        }
        Some(bound)
    }
}

fn parse_segment(
    bytes: &[u8],
    pos: &mut usize,
    depth: usize,
    regex: &mut String,
    params: &mut Vec<TemplateParam>,
    saw_wildcard: &mut bool,
) -> Result<(), TemplateError> {
    while *pos < bytes.len() {
        match bytes[*pos] {
            b']' if depth > 0 => return Ok(()),
            b'[' => {
                *pos += 1;
                regex.push_str("(?:");
                parse_segment(bytes, pos, depth + 1, regex, params, saw_wildcard)?;
                if *pos >= bytes.len() || bytes[*pos] != b']' {
                    return Err(TemplateError::UnbalancedBracket);
                }
                *pos += 1;
                regex.push_str(")?");
            }
            b'{' => {
                *pos += 1;
                let start = *pos;
                while *pos < bytes.len() && bytes[*pos] != b'}' {
                    *pos += 1;
                }
                if *pos >= bytes.len() {
                    return Err(TemplateError::UnbalancedBrace);
                }
                let inner = std::str::from_utf8(&bytes[start..*pos]).unwrap_or("");
                *pos += 1;

                if *saw_wildcard {
                    return Err(TemplateError::WildcardNotFinal);
                }

                if let Some(name) = inner.strip_prefix('*') {
                    if name.is_empty() {
                        return Err(TemplateError::EmptyParamName);
                    }
                    regex.push_str(&format!("(?P<{name}>.*)"));
                    params.push(TemplateParam {
                        name: name.to_string(),
                        required: true,
                        default: None,
                        wildcard: true,
                    });
                    *saw_wildcard = true;
                } else if let Some((name, default)) = inner.split_once('=') {
                    if name.is_empty() {
                        return Err(TemplateError::EmptyParamName);
                    }
                    regex.push_str(&format!("(?P<{name}>[^/]*)"));
                    params.push(TemplateParam {
                        name: name.to_string(),
                        required: false,
                        default: Some(default.to_string()),
                        wildcard: false,
                    });
                } else {
                    if inner.is_empty() {
                        return Err(TemplateError::EmptyParamName);
                    }
                    regex.push_str(&format!("(?P<{inner}>[^/]+)"));
                    params.push(TemplateParam {
                        name: inner.to_string(),
                        required: true,
                        default: None,
                        wildcard: false,
                    });
                }
            }
            _ => {
                let start = *pos;
                while *pos < bytes.len() && !matches!(bytes[*pos], b'[' | b']' | b'{') {
                    *pos += 1;
                }
                let literal = std::str::from_utf8(&bytes[start..*pos]).unwrap_or("");
                regex.push_str(&regex::escape(literal));
            }
        }
    }
    Ok(())
}

fn compute_precedence(pattern: &str, capture_count: usize, terminal_wildcard: bool) -> i64 {
    let stripped: String = pattern.chars().filter(|&c| c != '[' && c != ']').collect();
    let literal_segments = stripped
        .split('/')
        .filter(|s| !s.is_empty() && !s.contains('{'))
        .count() as i64;

    literal_segments * 1000 - (capture_count as i64) * 10 - if terminal_wildcard { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_template_matches_exactly() {
        let t = CompiledTemplate::compile("/health", true).unwrap();
        assert!(t.match_path("/health").is_some());
        assert!(t.match_path("/health/").is_some());
        assert!(t.match_path("/healthy").is_none());
    }

    #[test]
    fn required_capture_binds_value() {
        let t = CompiledTemplate::compile("/users/{id}", true).unwrap();
        let bound = t.match_path("/users/42").unwrap();
        assert_eq!(bound.get("id").map(String::as_str), Some("42"));
        assert!(t.match_path("/users/").is_none());
    }

    #[test]
    fn optional_capture_uses_default_when_absent() {
        let t = CompiledTemplate::compile("/posts[/{page=1}]", true).unwrap();
        let bound = t.match_path("/posts").unwrap();
        assert_eq!(bound.get("page").map(String::as_str), Some("1"));
        let bound = t.match_path("/posts/3").unwrap();
        assert_eq!(bound.get("page").map(String::as_str), Some("3"));
    }

    #[test]
    fn wildcard_must_be_final_segment() {
        let err = CompiledTemplate::compile("/files/{*rest}/extra", true).unwrap_err();
        assert_eq!(err, TemplateError::WildcardNotFinal);
    }

    #[test]
    fn wildcard_captures_rest_of_path() {
        let t = CompiledTemplate::compile("/files/{*rest}", true).unwrap();
        let bound = t.match_path("/files/a/b/c.txt").unwrap();
        assert_eq!(bound.get("rest").map(String::as_str), Some("a/b/c.txt"));
    }

    #[test]
    fn case_insensitive_flag_relaxes_matching() {
        let t = CompiledTemplate::compile("/Users", false).unwrap();
        assert!(t.match_path("/users").is_some());
        let t_cs = CompiledTemplate::compile("/Users", true).unwrap();
        assert!(t_cs.match_path("/users").is_none());
    }

    #[test]
    fn more_literal_template_outranks_more_general_one() {
        let specific = CompiledTemplate::compile("/users/me", true).unwrap();
        let general = CompiledTemplate::compile("/users/{id}", true).unwrap();
        assert!(specific.precedence > general.precedence);
    }

    #[test]
    fn wildcard_template_has_lowest_precedence_among_equal_captures() {
        let capture = CompiledTemplate::compile("/files/{name}", true).unwrap();
        let wildcard = CompiledTemplate::compile("/files/{*name}", true).unwrap();
        assert!(capture.precedence > wildcard.precedence);
    }
}
