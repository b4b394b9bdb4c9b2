//! Ordered try-in-sequence dispatch.

use std::sync::Arc;

use tracing::trace;

use crate::context::Context;
use crate::error::RouterError;
use crate::handler::{Handler, HandlerResult, Outcome};

use super::{Router, RouterClass};

/// An entry of a [`ListRouter`].
#[derive(Debug, Clone)]
pub enum Route {
    Handler(Handler),
    Router(Router),
}

impl Route {
    fn sort_key(&self) -> i32 {
        match self {
            Self::Handler(h) => h.priority(),
            Self::Router(r) => r.priority().unwrap_or(i32::MIN),
        }
    }
}

/// Handlers and nested routers tried one after another.
///
/// The first entry that does not skip ends dispatch with
/// [`Outcome::Processed`].
#[derive(Debug, Clone)]
pub struct ListRouter {
    priority: Option<i32>,
    routes: Vec<Route>,
}

/// An empty terminal router, the root of an application without plugins.
impl Default for ListRouter {
    fn default() -> Self {
        Self::from_routes(Vec::new())
    }
}

impl ListRouter {
    pub fn new(priority: i32) -> Self {
        Self {
            priority: Some(priority),
            routes: Vec::new(),
        }
    }

    /// Builds a terminal router from routes in their final order.
    pub(crate) fn from_routes(routes: Vec<Route>) -> Self {
        Self {
            priority: None,
            routes,
        }
    }

    /// `None` once this router is the result of a merge.
    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Adds a handler after every entry of at least its priority.
    pub fn add_handler(&mut self, handler: Handler) {
        self.insert(Route::Handler(handler));
    }

    /// Nests a router, ordered by its priority like a handler.
    pub fn add_router(&mut self, router: Router) {
        self.insert(Route::Router(router));
    }

    fn insert(&mut self, route: Route) {
        let key = route.sort_key();
        let idx = self.routes.partition_point(|r| r.sort_key() >= key);
        self.routes.insert(idx, route);
    }

    pub(crate) fn prepare(&mut self, prefixes: &[String]) {
        for route in &mut self.routes {
            if let Route::Router(router) = route {
                router.prepare(prefixes);
            }
        }
    }

    /// Merges same-class routers.
    ///
    /// Sources are ordered by descending priority (stable), then their
    /// entries are concatenated in that order.
    pub fn merge(sources: Vec<Self>) -> Result<Self, RouterError> {
        Self::merge_as(sources, RouterClass::List)
    }

    pub(crate) fn merge_as(mut sources: Vec<Self>, class: RouterClass) -> Result<Self, RouterError> {
        if sources.is_empty() {
            return Err(RouterError::Empty);
        }
        if sources.iter().any(|s| s.priority.is_none()) {
            return Err(RouterError::AlreadyMerged(class));
        }

        sources.sort_by(|a, b| b.priority.cmp(&a.priority));
        let routes = sources.into_iter().flat_map(|s| s.routes).collect();
        Ok(Self::from_routes(routes))
    }

    pub async fn handle(&self, ctx: &Arc<Context>) -> HandlerResult {
        for (idx, route) in self.routes.iter().enumerate() {
            let outcome = match route {
                Route::Handler(handler) => handler.call(ctx).await?,
                Route::Router(router) => router.handle(ctx).await?,
            };
            if outcome != Outcome::Skipped {
                trace!(route = idx, "Update processed");
                return Ok(Outcome::Processed);
            }
        }
        Ok(Outcome::Skipped)
    }
}
