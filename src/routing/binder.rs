//! Explicit route registration: the controller-binding half of the
//! routing engine.
//!
//! Controller discovery is explicit `RouterBuilder` registration rather
//! than attribute/reflection-based, since Rust has no runtime reflection
//! over types. Parameter binding is likewise explicit: a route declares,
//! per named parameter, which part of the request it is pulled from
//! ([`ParamSource`]), and the bound values are handed to the route's
//! action as a [`BoundParams`] bag the handler extracts typed values from
//! — the same shape axum's extractor pattern takes, adapted to a
//! registration table instead of generic function signatures since this
//! crate has no proc-macro layer to generate per-handler extraction code.

use crate::{
    errors::ErrorKind,
    http::{request::Request, response::Response, types::Method},
    routing::template::{CompiledTemplate, TemplateError},
};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

/// Where a declared route parameter's value comes from.
#[derive(Debug, Clone)]
pub enum ParamSource {
    /// Pulled from the authenticated user id a connection-level
    /// authentication hook attached to the request before dispatch
    /// (`Request::user_id`), if any ran.
    Context,
    /// Pulled from the matched URL template capture of the same name.
    Url,
    /// Pulled from the decoded query string.
    Query,
    /// Pulled from a decoded `application/x-www-form-urlencoded` or
    /// `multipart/form-data` field.
    Form,
    /// The entire request body, deserialized as JSON into the type the
    /// handler requests (the default for complex types).
    Body,
    /// Pulled from a named request header.
    Header(String),
    /// A fixed literal value, used when no part of the request carries it.
    Default(String),
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub source: ParamSource,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, source: ParamSource) -> Self {
        Self { name: name.into(), source }
    }
}

/// A named bag of request values bound for one matched route, handed to
/// the route's action. Handlers extract typed values out of it themselves
/// (`scalar::<T>`, `text`, `json::<T>`) rather than receiving them as
/// separate typed function arguments, since that would require macro
/// codegen this crate does not have.
#[derive(Debug, Default)]
pub struct BoundParams {
    values: HashMap<String, String>,
    body: Option<Vec<u8>>,
}

impl BoundParams {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: String) {
        self.values.insert(name.into(), value);
    }

    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.body = Some(body);
    }

    /// The raw text value bound for `name`, if any.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Parses the value bound for `name` via `FromStr`. A value present
    /// but unparsable is a caller bug caught as `Internal`, distinct from
    /// `name` being altogether unbound (also `Internal`): both indicate the
    /// route's declared parameters don't match what its action expects.
    pub fn scalar<T: std::str::FromStr>(&self, name: &str) -> Result<T, ErrorKind> {
        self.text(name)
            .ok_or(ErrorKind::Internal)?
            .parse()
            .map_err(|_| ErrorKind::BadRequest)
    }

    /// Deserializes the bound request body as JSON into `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ErrorKind> {
        let body = self.body.as_deref().unwrap_or(b"");
        serde_json::from_slice(body).map_err(|_| ErrorKind::BadRequest)
    }
}

type BoxFuture<'a> = Pin<Box<dyn Future<Output = crate::http::response::Handled> + Send + 'a>>;

/// A route's action: given the matched request/response pair and its
/// bound parameters, produces the response.
pub type RouteAction =
    Arc<dyn for<'a> Fn(&'a Request, &'a mut Response, BoundParams) -> BoxFuture<'a> + Send + Sync>;

pub struct RouteEntry {
    pub name: String,
    pub methods: Vec<Method>,
    pub template: CompiledTemplate,
    pub params: Vec<ParamDecl>,
    /// Names a request must have been marked with via
    /// [`crate::Request::mark_handler_ran`] before this route may dispatch
    /// (e.g. an auth handler that composes the router directly and stamps
    /// `"auth"` first). Checked on match; a missing marker is a
    /// configuration error, not a client error.
    pub required_markers: Vec<String>,
    pub(crate) action: RouteAction,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RouterBuildError {
    Template(String, TemplateError),
    Conflict { first: String, second: String },
}

impl std::fmt::Display for RouterBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterBuildError::Template(name, err) => write!(f, "route {name}: {err}"),
            RouterBuildError::Conflict { first, second } => {
                write!(f, "routes {first} and {second} can match the same request")
            }
        }
    }
}

impl std::error::Error for RouterBuildError {}

/// A set of routes implemented without macro-generated registration —
/// grouped for reuse across a `RouterBuilder` chain rather than discovered
/// via attribute scanning or reflection.
pub trait RouteCollection {
    fn register(builder: RouterBuilder) -> RouterBuilder;
}

/// Fluent builder accumulating routes before they are compiled and
/// conflict-checked by [`RouterBuilder::build`].
pub struct RouterBuilder {
    case_sensitive: bool,
    entries: Vec<RouteEntry>,
    error: Option<RouterBuildError>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            case_sensitive: true,
            entries: Vec::new(),
            error: None,
        }
    }

    pub fn case_sensitive(mut self, value: bool) -> Self {
        self.case_sensitive = value;
        self
    }

    /// Registers one route. Template-compile failures are deferred to
    /// `build()` so the fluent chain never has to `.unwrap()` mid-stream.
    pub fn route(
        mut self,
        name: impl Into<String>,
        methods: &[Method],
        template: &str,
        params: Vec<ParamDecl>,
        action: RouteAction,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = name.into();
        match CompiledTemplate::compile(template, self.case_sensitive) {
            Ok(compiled) => self.entries.push(RouteEntry {
                name,
                methods: methods.to_vec(),
                template: compiled,
                params,
                required_markers: Vec::new(),
                action,
            }),
            Err(err) => self.error = Some(RouterBuildError::Template(name, err)),
        }
        self
    }

    /// Requires the named handler markers on the most recently registered
    /// route (see [`RouteEntry::required_markers`]). A no-op if no route
    /// has been registered yet or the chain already carries an error.
    pub fn requires(mut self, markers: &[&str]) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.required_markers = markers.iter().map(|m| m.to_string()).collect();
        }
        self
    }

    pub fn collection<C: RouteCollection>(self) -> Self {
        C::register(self)
    }

    /// Compiles and conflict-checks the accumulated routes. A conflict is
    /// two routes whose method sets overlap, whose templates have equal
    /// precedence and capture counts, and whose synthesized probe paths
    /// each match the other's regex — i.e. they could both legally claim
    /// the same concrete request, which is ambiguous at dispatch time.
    pub fn build(self) -> Result<super::router::Router, RouterBuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        for i in 0..self.entries.len() {
            for j in (i + 1)..self.entries.len() {
                let a = &self.entries[i];
                let b = &self.entries[j];
                if methods_overlap(&a.methods, &b.methods) && templates_conflict(&a.template, &b.template) {
                    return Err(RouterBuildError::Conflict {
                        first: a.name.clone(),
                        second: b.name.clone(),
                    });
                }
            }
        }

        let mut entries = self.entries;
        entries.sort_by(|a, b| b.template.precedence.cmp(&a.template.precedence));
        Ok(super::router::Router::new(entries))
    }
}

fn methods_overlap(a: &[Method], b: &[Method]) -> bool {
    a.iter().any(|m| b.contains(m))
}

fn templates_conflict(a: &CompiledTemplate, b: &CompiledTemplate) -> bool {
    if a.precedence != b.precedence || a.params.len() != b.params.len() {
        return false;
    }
    let probe_a = example_path(&a.raw);
    let probe_b = example_path(&b.raw);
    a.regex.is_match(&probe_b) && b.regex.is_match(&probe_a)
}

/// Builds a concrete path that the template would match, realizing every
/// optional group and substituting `x` for every capture — used only to
/// probe two templates for overlap during conflict detection.
fn example_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut pos = 0;
    let mut out = String::new();
    build_example(bytes, &mut pos, &mut out);
    out
}

fn build_example(bytes: &[u8], pos: &mut usize, out: &mut String) {
    while *pos < bytes.len() {
        match bytes[*pos] {
            b']' => return,
            b'[' => {
                *pos += 1;
                build_example(bytes, pos, out);
                if *pos < bytes.len() && bytes[*pos] == b']' {
                    *pos += 1;
                }
            }
            b'{' => {
                *pos += 1;
                while *pos < bytes.len() && bytes[*pos] != b'}' {
                    *pos += 1;
                }
                if *pos < bytes.len() {
                    *pos += 1;
                }
                out.push('x');
            }
            _ => {
                let start = *pos;
                while *pos < bytes.len() && !matches!(bytes[*pos], b'[' | b']' | b'{') {
                    *pos += 1;
                }
                out.push_str(std::str::from_utf8(&bytes[start..*pos]).unwrap_or(""));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_action() -> RouteAction {
        Arc::new(|_req, resp, _params| {
            Box::pin(async move { resp.status(crate::StatusCode::Ok).body("ok") })
        })
    }

    #[test]
    fn build_sorts_by_precedence_descending() {
        let router = RouterBuilder::new()
            .route("wild", &[Method::Get], "/a/{*rest}", vec![], noop_action())
            .route("specific", &[Method::Get], "/a/b", vec![], noop_action())
            .build()
            .unwrap();
        assert_eq!(router.entries()[0].name, "specific");
        assert_eq!(router.entries()[1].name, "wild");
    }

    #[test]
    fn identical_templates_on_overlapping_verbs_conflict() {
        let err = RouterBuilder::new()
            .route("a", &[Method::Get], "/users/{id}", vec![], noop_action())
            .route("b", &[Method::Get], "/users/{id}", vec![], noop_action())
            .build()
            .unwrap_err();
        assert!(matches!(err, RouterBuildError::Conflict { .. }));
    }

    #[test]
    fn same_path_different_verbs_is_not_a_conflict() {
        let router = RouterBuilder::new()
            .route("get", &[Method::Get], "/users/{id}", vec![], noop_action())
            .route("post", &[Method::Post], "/users/{id}", vec![], noop_action())
            .build()
            .unwrap();
        assert_eq!(router.entries().len(), 2);
    }

    #[test]
    fn requires_attaches_markers_to_the_last_registered_route() {
        let router = RouterBuilder::new()
            .route("a", &[Method::Get], "/a", vec![], noop_action())
            .requires(&["auth"])
            .route("b", &[Method::Get], "/b", vec![], noop_action())
            .build()
            .unwrap();
        assert_eq!(router.entries()[0].name, "a");
        assert_eq!(router.entries()[0].required_markers, vec!["auth".to_string()]);
        assert_eq!(router.entries()[1].name, "b");
        assert!(router.entries()[1].required_markers.is_empty());
    }

    #[test]
    fn bound_params_scalar_parses_typed_values() {
        let mut params = BoundParams::new();
        params.insert("id", "42".to_string());
        assert_eq!(params.scalar::<u64>("id").unwrap(), 42);
        assert!(params.scalar::<u64>("missing").is_err());
    }
}
