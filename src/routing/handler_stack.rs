//! Prefix-scoped, first-wins handler chaining.
//!
//! `Server` (`server/server_impl.rs`) runs exactly one `Handler<S>` per
//! connection. A real deployment typically needs several — static-file
//! serving ahead of the router, auth middleware ahead of both — without
//! inventing a separate middleware trait, so [`HandlerStack`] is itself a
//! `Handler<S>` that holds an ordered list of others and dispatches to the
//! first whose prefix matches the request path.
//!
//! There is no "try the next handler if this one didn't handle it"
//! fallback: `Handled` can only ever be produced by a `Response` method
//! that finishes the response (`body`, `body_with`, `body_chunked_with`),
//! so a `Handler::handle` call that returns has, by construction, always
//! completed the response. Scoping by prefix up front is therefore the
//! only way to pick among several handlers.
//!
//! A route that requires a marker (`RouterBuilder::requires`) therefore
//! cannot rely on stack order to guarantee some earlier handler ran first;
//! a handler composing the router directly (stamping a marker via
//! `Request::mark_handler_ran` before calling through) is how that
//! guarantee is made in this model instead of by chaining.
//!
//! `Handler::handle` returns `impl Future` rather than a boxed one, which
//! makes the trait itself not object-safe — `dyn Handler<S>` doesn't compile.
//! Each pushed handler is wrapped in an `Arc<H>` and adapted into a plain
//! boxed-closure type instead, the same technique [`super::binder`] uses
//! for route actions.

use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
    },
    routing::router::Router,
    server::connection::ConnectionData,
    server::server_impl::Handler,
    StatusCode,
};
use std::{future::Future, pin::Pin, sync::Arc};

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Handled> + Send + 'a>>;
type BoxedHandler<S> = Arc<dyn for<'a> Fn(&'a mut S, &'a Request, &'a mut Response) -> BoxFuture<'a> + Send + Sync>;

fn box_handler<S, H>(handler: H) -> BoxedHandler<S>
where
    S: ConnectionData + 'static,
    H: Handler<S> + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |data: &mut S, request: &Request, response: &mut Response| {
        let handler = Arc::clone(&handler);
        Box::pin(async move { handler.handle(data, request, response).await })
    })
}

struct StackEntry<S> {
    prefix: String,
    handler: BoxedHandler<S>,
}

/// An ordered chain of handlers, each scoped to a path prefix. The request
/// path is matched against each entry's prefix in declaration order; the
/// first match dispatches and its response is final.
///
/// An empty prefix (`""`) matches every path, so a catch-all handler (the
/// router, conventionally) belongs last.
pub struct HandlerStack<S: ConnectionData = ()> {
    entries: Vec<StackEntry<S>>,
}

impl<S: ConnectionData> Default for HandlerStack<S> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<S: ConnectionData + 'static> HandlerStack<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler scoped to `prefix`. Handlers are tried in the
    /// order they were pushed, so put more specific prefixes first.
    pub fn push(mut self, prefix: impl Into<String>, handler: impl Handler<S> + 'static) -> Self {
        self.entries.push(StackEntry {
            prefix: prefix.into(),
            handler: box_handler(handler),
        });
        self
    }
}

impl<S: ConnectionData + 'static> Handler<S> for HandlerStack<S> {
    async fn handle(&self, connection_data: &mut S, request: &Request, response: &mut Response) -> Handled {
        let path = request.url().path();
        for entry in &self.entries {
            if path.starts_with(entry.prefix.as_str()) {
                return (entry.handler)(connection_data, request, response).await;
            }
        }
        response.status(StatusCode::NotFound).body("not found")
    }
}

/// Adapts a [`Router`] into a `Handler<S>`, so it can be pushed onto a
/// [`HandlerStack`] (or used alone as the server's only handler) alongside
/// handlers that have nothing to do with routing.
pub struct RouterHandler {
    router: Router,
}

impl RouterHandler {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl<S: ConnectionData> Handler<S> for RouterHandler {
    async fn handle(&self, _connection_data: &mut S, request: &Request, response: &mut Response) -> Handled {
        match self.router.dispatch(request, response).await {
            Ok(handled) => handled,
            Err(ErrorKind::NotFound) => response.status(StatusCode::NotFound).body("not found"),
            Err(ErrorKind::MethodNotAllowed) => {
                response.status(StatusCode::MethodNotAllowed).body("method not allowed")
            }
            Err(err) => response.status(err.status()).body("request failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{http::types::Method, limits::RespLimits, routing::binder::RouterBuilder};

    struct StaticOk;
    impl Handler for StaticOk {
        async fn handle(&self, _: &mut (), _req: &Request, resp: &mut Response) -> Handled {
            resp.status(StatusCode::Ok).body("static")
        }
    }

    struct Fallback;
    impl Handler for Fallback {
        async fn handle(&self, _: &mut (), _req: &Request, resp: &mut Response) -> Handled {
            resp.status(StatusCode::Ok).body("fallback")
        }
    }

    #[tokio::test]
    async fn first_matching_prefix_wins() {
        let stack: HandlerStack = HandlerStack::new().push("/static", StaticOk).push("", Fallback);
        let request = Request::empty("127.0.0.1:1".parse().unwrap()).with_test_path("/static/a.css");
        let mut response = Response::new(&RespLimits::default());
        let mut data = ();
        stack.handle(&mut data, &request, &mut response).await;
        assert!(response.is_complete());
    }

    #[tokio::test]
    async fn router_handler_reports_not_found() {
        let router = RouterBuilder::new().build().unwrap();
        let handler = RouterHandler::new(router);
        let request = Request::empty("127.0.0.1:1".parse().unwrap())
            .with_test_path("/missing")
            .with_test_method(Method::Get);
        let mut response = Response::new(&RespLimits::default());
        let mut data: () = ();
        Handler::<()>::handle(&handler, &mut data, &request, &mut response).await;
        assert!(response.is_complete());
    }
}
