//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the first matching route for a request
//! - Dispatch to the route's handler, or answer 404
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in configuration order; first match wins

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::config::{RouteConfig, RouteKind};
use crate::files::StaticFiles;
use crate::http::{Handler, HandlerError, Reply, Request, RequestBody, Response};
use crate::routing::handlers::{Echo, WebSocketEcho};
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// Error building a router from configuration.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route '{0}' is of kind static but has no root")]
    MissingRoot(String),
}

/// A compiled route.
pub struct Route {
    pub name: String,
    matcher: Box<dyn Matcher>,
    handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Dispatches each request to the first route whose matcher accepts it.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Routes are tried in insertion order.
    pub fn route<H: Handler>(mut self, name: impl Into<String>, matcher: impl Matcher + 'static, handler: H) -> Self {
        self.routes.push(Route {
            name: name.into(),
            matcher: Box::new(matcher),
            handler: Arc::new(handler),
        });
        self
    }

    /// Compile the configured routes.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut router = Router::new();
        for route in routes {
            let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
            if let Some(host) = &route.host {
                matchers.push(Box::new(HostMatcher::new(host.as_str())));
            }
            if let Some(prefix) = &route.path_prefix {
                matchers.push(Box::new(PathPrefixMatcher::new(prefix.as_str())));
            }
            let matcher = AndMatcher::new(matchers);

            router = match route.kind {
                RouteKind::Echo => router.route(&route.name, matcher, Echo),
                RouteKind::WebsocketEcho => router.route(&route.name, matcher, WebSocketEcho),
                RouteKind::Static => {
                    let root = route
                        .root
                        .as_ref()
                        .ok_or_else(|| RouteError::MissingRoot(route.name.clone()))?;
                    let mut files = StaticFiles::new(root);
                    if let Some(prefix) = &route.path_prefix {
                        files = files.with_prefix(prefix.as_str());
                    }
                    router.route(&route.name, matcher, files)
                }
            };
            tracing::debug!(route = %route.name, kind = ?route.kind, "Route registered");
        }
        Ok(router)
    }

    /// First route matching `request`.
    pub fn lookup(&self, request: &Request) -> Option<&Route> {
        self.routes.iter().find(|r| r.matcher.matches(request))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Handler for Router {
    fn call<'a>(
        &'a self,
        request: &'a Request,
        body: RequestBody<'a>,
    ) -> BoxFuture<'a, Result<Reply, HandlerError>> {
        match self.lookup(request) {
            Some(route) => {
                tracing::trace!(route = %route.name, target = %request.target, "Route matched");
                route.handler.call(request, body)
            }
            None => {
                tracing::debug!(target = %request.target, "No route matched");
                Box::pin(async { Ok(Response::error(404).into()) })
            }
        }
    }
}
