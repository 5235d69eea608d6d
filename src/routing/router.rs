//! Match → bind → invoke dispatch over a built [`Router`].
//!
//! The router implements the same `Handler<S>` trait
//! (`server/server_impl.rs`) as any other handler, so it slots into a
//! [`crate::routing::handler_stack::HandlerStack`] and is conventionally
//! registered last. Method-mismatch vs no-match distinction (404 vs 405):
//! a path that matches some route under a different verb is a 405, not a
//! 404.

use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
        types::Method,
    },
    routing::binder::{BoundParams, ParamSource, RouteEntry},
};

/// A compiled, conflict-checked, precedence-sorted route table.
///
/// Built exclusively through [`super::binder::RouterBuilder::build`].
pub struct Router {
    entries: Vec<RouteEntry>,
}

impl Router {
    pub(crate) fn new(entries: Vec<RouteEntry>) -> Self {
        Self { entries }
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// Finds the route whose template matches `path` *and* whose method set
    /// contains `method`, walking the table in precedence order. Distinct
    /// from path-only matching: two entries may legally share a template
    /// under disjoint verb sets (`same_path_different_verbs_is_not_a_conflict`
    /// in `binder.rs`), so the method filter must apply per-entry, not only
    /// to whichever entry's path happens to match first.
    fn find_match(&self, path: &str, method: &Method) -> Option<(&RouteEntry, std::collections::HashMap<String, String>)> {
        self.entries.iter().find_map(|entry| {
            entry
                .template
                .match_path(path)
                .filter(|_| entry.methods.contains(method))
                .map(|captures| (entry, captures))
        })
    }

    /// True if some entry's template matches `path`, under any verb — used
    /// only to distinguish "no route at all" (404) from "a route exists for
    /// this path but not this verb" (405).
    fn any_path_matches(&self, path: &str) -> bool {
        self.entries.iter().any(|entry| entry.template.match_path(path).is_some())
    }

    /// Dispatches `request` against the table, binding its declared
    /// parameters and invoking its action. `Ok(Handled)` carries through the
    /// action's own proof that it completed the response; `Err` carries the
    /// error to surface instead (404/405/400) with
    /// nothing yet written to `response`.
    ///
    /// A route whose `required_markers` includes a name the request was
    /// never stamped with (see [`crate::Request::mark_handler_ran`]) fails
    /// closed as `ErrorKind::Internal`: the route is reachable but
    /// misconfigured, not the caller's fault.
    pub async fn dispatch(&self, request: &Request, response: &mut Response) -> Result<Handled, ErrorKind> {
        let path = request.url().path();
        let Some((entry, captures)) = self.find_match(path, request.method()) else {
            return Err(if self.any_path_matches(path) {
                ErrorKind::MethodNotAllowed
            } else {
                ErrorKind::NotFound
            });
        };

        if entry.required_markers.iter().any(|marker| !request.handler_ran(marker)) {
            return Err(ErrorKind::Internal);
        }

        let mut params = BoundParams::new();
        for decl in &entry.params {
            bind_one(&mut params, decl, request, &captures)?;
        }

        Ok((entry.action)(request, response, params).await)
    }
}

fn bind_one(
    params: &mut BoundParams,
    decl: &crate::routing::binder::ParamDecl,
    request: &Request,
    captures: &std::collections::HashMap<String, String>,
) -> Result<(), ErrorKind> {
    match &decl.source {
        ParamSource::Context => {
            if let Some(value) = request.user_id() {
                params.insert(decl.name.clone(), value.to_string());
            }
        }
        ParamSource::Url => {
            let value = captures.get(&decl.name).ok_or(ErrorKind::Internal)?;
            params.insert(decl.name.clone(), value.clone());
        }
        ParamSource::Query => {
            if let Some(value) = request.url().query(&decl.name) {
                params.insert(decl.name.clone(), value.to_string());
            }
        }
        ParamSource::Form => {
            if let Some(value) = request.form().get(&decl.name) {
                params.insert(decl.name.clone(), value.clone());
            }
        }
        ParamSource::Body => {
            if let Some(body) = request.body() {
                params.set_body(body.to_vec());
            }
        }
        ParamSource::Header(name) => {
            if let Some(value) = request.headers().get_str(name) {
                params.insert(decl.name.clone(), value.into_owned());
            }
        }
        ParamSource::Default(value) => {
            params.insert(decl.name.clone(), value.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        routing::binder::{ParamDecl, RouterBuilder},
        StatusCode,
    };
    use std::sync::Arc;

    fn echo_id_action() -> crate::routing::binder::RouteAction {
        Arc::new(|_req, resp, params| {
            Box::pin(async move {
                let id: u64 = params.scalar("id").unwrap_or_default();
                resp.status(StatusCode::Ok).body(id.to_string())
            })
        })
    }

    #[tokio::test]
    async fn matching_route_binds_url_capture_and_invokes_action() {
        let router = RouterBuilder::new()
            .route(
                "get_user",
                &[Method::Get],
                "/users/{id}",
                vec![ParamDecl::new("id", ParamSource::Url)],
                echo_id_action(),
            )
            .build()
            .unwrap();

        let request = Request::empty("127.0.0.1:1".parse().unwrap()).with_test_path("/users/7");
        let mut response = Response::new(&crate::limits::RespLimits::default());
        router.dispatch(&request, &mut response).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let router = RouterBuilder::new().build().unwrap();
        let request = Request::empty("127.0.0.1:1".parse().unwrap()).with_test_path("/nope");
        let mut response = Response::new(&crate::limits::RespLimits::default());
        let err = router.dispatch(&request, &mut response).await.unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn missing_required_marker_fails_as_internal() {
        let router = RouterBuilder::new()
            .route("get_user", &[Method::Get], "/users/{id}", vec![], echo_id_action())
            .requires(&["auth"])
            .build()
            .unwrap();
        let request = Request::empty("127.0.0.1:1".parse().unwrap()).with_test_path("/users/7");
        let mut response = Response::new(&crate::limits::RespLimits::default());
        let err = router.dispatch(&request, &mut response).await.unwrap_err();
        assert!(matches!(err, ErrorKind::Internal));
    }

    #[tokio::test]
    async fn present_required_marker_allows_dispatch() {
        let router = RouterBuilder::new()
            .route("get_user", &[Method::Get], "/users/{id}", vec![], echo_id_action())
            .requires(&["auth"])
            .build()
            .unwrap();
        let mut request = Request::empty("127.0.0.1:1".parse().unwrap()).with_test_path("/users/7");
        request.mark_handler_ran("auth");
        let mut response = Response::new(&crate::limits::RespLimits::default());
        router.dispatch(&request, &mut response).await.unwrap();
    }

    #[tokio::test]
    async fn route_precedence_disambiguates_literal_capture_and_wildcard_siblings() {
        fn name_action(name: &'static str) -> crate::routing::binder::RouteAction {
            Arc::new(move |_req, resp, _params| {
                Box::pin(async move { resp.status(StatusCode::Ok).body(name) })
            })
        }

        let router = RouterBuilder::new()
            .route("users_me", &[Method::Get], "/users/me", vec![], name_action("users_me"))
            .route("users_id", &[Method::Get], "/users/{id}", vec![], name_action("users_id"))
            .route(
                "users_id_detail",
                &[Method::Get],
                "/users/{id}/detail",
                vec![],
                name_action("users_id_detail"),
            )
            .route(
                "users_detail_id",
                &[Method::Get],
                "/users/detail/{id}",
                vec![],
                name_action("users_detail_id"),
            )
            .build()
            .unwrap();

        for (path, expected) in [
            ("/users/me", "users_me"),
            ("/users/7", "users_id"),
            ("/users/7/detail", "users_id_detail"),
            ("/users/detail/7", "users_detail_id"),
        ] {
            let request = Request::empty("127.0.0.1:1".parse().unwrap()).with_test_path(path);
            let mut response = Response::new(&crate::limits::RespLimits::default());
            router.dispatch(&request, &mut response).await.unwrap();
            assert!(
                response.buffer().ends_with(expected.as_bytes()),
                "path {path} should have dispatched to {expected}, got {:?}",
                String::from_utf8_lossy(response.buffer())
            );
        }
    }

    #[tokio::test]
    async fn wrong_verb_on_known_path_is_method_not_allowed() {
        let router = RouterBuilder::new()
            .route("get_user", &[Method::Get], "/users/{id}", vec![], echo_id_action())
            .build()
            .unwrap();
        let request = Request::empty("127.0.0.1:1".parse().unwrap())
            .with_test_path("/users/7")
            .with_test_method(Method::Post);
        let mut response = Response::new(&crate::limits::RespLimits::default());
        let err = router.dispatch(&request, &mut response).await.unwrap_err();
        assert!(matches!(err, ErrorKind::MethodNotAllowed));
    }

    #[tokio::test]
    async fn same_template_under_different_verbs_each_dispatch_to_their_own_action() {
        let router = RouterBuilder::new()
            .route("get_user", &[Method::Get], "/users/{id}", vec![], echo_id_action())
            .route(
                "post_user",
                &[Method::Post],
                "/users/{id}",
                vec![],
                Arc::new(|_req, resp, _params| Box::pin(async move { resp.status(StatusCode::Ok).body("posted") })),
            )
            .build()
            .unwrap();

        let get_request = Request::empty("127.0.0.1:1".parse().unwrap()).with_test_path("/users/7");
        let mut get_response = Response::new(&crate::limits::RespLimits::default());
        router.dispatch(&get_request, &mut get_response).await.unwrap();
        assert!(get_response.buffer().ends_with(b"7"));

        let post_request = Request::empty("127.0.0.1:1".parse().unwrap())
            .with_test_path("/users/7")
            .with_test_method(Method::Post);
        let mut post_response = Response::new(&crate::limits::RespLimits::default());
        router.dispatch(&post_request, &mut post_response).await.unwrap();
        assert!(post_response.buffer().ends_with(b"posted"));
    }
}
