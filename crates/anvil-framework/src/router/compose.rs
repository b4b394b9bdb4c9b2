//! Root router composition.

use tracing::debug;

use crate::error::RouterError;

use super::list::{ListRouter, Route};
use super::{Router, RouterClass};

/// Builds the root router from the routers of every plugin.
///
/// Routers are sorted by descending priority (stable, so plugins registered
/// first come first). Within one priority they are grouped by kind, kinds
/// ordered by first appearance, and each group is merged into one terminal
/// router. The merged routers are prepared for `prefixes` and returned in
/// dispatch order inside a terminal [`ListRouter`].
pub fn compose(mut routers: Vec<Router>, prefixes: &[String]) -> Result<ListRouter, RouterError> {
    if let Some(merged) = routers.iter().find(|r| r.priority().is_none()) {
        return Err(RouterError::AlreadyMerged(merged.class()));
    }

    routers.sort_by(|a, b| b.priority().cmp(&a.priority()));

    let mut routes = Vec::new();
    let mut rest = routers.into_iter().peekable();
    while let Some(first) = rest.next() {
        let priority = first.priority();

        let mut groups: Vec<(RouterClass, Vec<Router>)> = Vec::new();
        let mut push = |router: Router| {
            let class = router.class();
            match groups.iter_mut().find(|(c, _)| *c == class) {
                Some((_, group)) => group.push(router),
                None => groups.push((class, vec![router])),
            }
        };
        push(first);
        while let Some(router) = rest.next_if(|r| r.priority() == priority) {
            push(router);
        }

        for (class, group) in groups {
            let count = group.len();
            let mut merged = Router::merge(group)?;
            merged.prepare(prefixes);
            debug!(
                router = ?class,
                priority = priority.unwrap_or_default(),
                merged = count,
                "Router group composed"
            );
            routes.push(Route::Router(merged));
        }
    }

    Ok(ListRouter::from_routes(routes))
}
