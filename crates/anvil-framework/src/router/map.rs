//! Key-indexed dispatch shared by the keyed routers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::context::Context;
use crate::error::RouterError;
use crate::handler::{Handler, HandlerResult, Outcome, insert_sorted};

use super::RouterClass;

/// Handlers grouped by key.
///
/// The concrete router decides which keys an update yields; this type only
/// stores the per-key handler lists and walks them.
#[derive(Debug, Clone)]
pub struct MapRouter<K> {
    priority: Option<i32>,
    handlers: HashMap<K, Vec<Handler>>,
}

impl<K: Eq + Hash + Clone> MapRouter<K> {
    pub fn new(priority: i32) -> Self {
        Self {
            priority: Some(priority),
            handlers: HashMap::new(),
        }
    }

    /// `None` once this router is the result of a merge.
    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn add_handler(&mut self, key: K, handler: Handler) {
        insert_sorted(self.handlers.entry(key).or_default(), handler);
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.handlers.keys()
    }

    pub fn handlers(&self, key: &K) -> &[Handler] {
        self.handlers.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Merges same-class routers.
    ///
    /// Sources are ordered by descending priority (stable), then each key's
    /// handler lists are concatenated in that order.
    pub fn merge(mut sources: Vec<Self>, class: RouterClass) -> Result<Self, RouterError> {
        if sources.is_empty() {
            return Err(RouterError::Empty);
        }
        if sources.iter().any(|s| s.priority.is_none()) {
            return Err(RouterError::AlreadyMerged(class));
        }

        sources.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut handlers: HashMap<K, Vec<Handler>> = HashMap::new();
        for source in sources {
            for (key, list) in source.handlers {
                handlers.entry(key).or_default().extend(list);
            }
        }

        Ok(Self {
            priority: None,
            handlers,
        })
    }

    /// Tries every key in order, and every handler of a key in order, until
    /// one does not skip.
    pub async fn handle_keys(&self, keys: Vec<K>, ctx: &Arc<Context>) -> HandlerResult {
        for key in &keys {
            let Some(list) = self.handlers.get(key) else {
                continue;
            };
            for handler in list {
                if handler.call(ctx).await? != Outcome::Skipped {
                    return Ok(Outcome::Processed);
                }
            }
        }
        Ok(Outcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::testing::message_ctx;
    use anvil_core::Message;

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, outcome: Outcome) -> Handler {
        let log = log.clone();
        Handler::new(move || {
            let log = log.clone();
            async move {
                log.lock().push(name);
                outcome
            }
        })
    }

    #[test]
    fn merge_concatenates_per_key_by_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut low = MapRouter::new(1);
        low.add_handler("a", recording(&log, "low-a", Outcome::Skipped).named("low-a"));
        let mut high = MapRouter::new(7);
        high.add_handler("a", recording(&log, "high-a", Outcome::Skipped).named("high-a"));
        high.add_handler("b", recording(&log, "high-b", Outcome::Skipped).named("high-b"));

        let merged = MapRouter::merge(vec![low, high], RouterClass::Commands).unwrap();
        assert_eq!(merged.priority(), None);

        let names: Vec<_> = merged.handlers(&"a").iter().filter_map(Handler::name).collect();
        assert_eq!(names, ["high-a", "low-a"]);
        assert_eq!(merged.handlers(&"b").len(), 1);
        assert!(merged.handlers(&"c").is_empty());

        let err = MapRouter::merge(vec![merged], RouterClass::Commands).unwrap_err();
        assert_eq!(err, RouterError::AlreadyMerged(RouterClass::Commands));
    }

    #[tokio::test]
    async fn keys_are_tried_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = MapRouter::new(0);
        router.add_handler("x", recording(&log, "x1", Outcome::Skipped));
        router.add_handler("x", recording(&log, "x2", Outcome::Skipped));
        router.add_handler("y", recording(&log, "y1", Outcome::Processed));
        router.add_handler("y", recording(&log, "y2", Outcome::Processed));

        let (ctx, _) = message_ctx(Message::private("1", "")).await;
        let outcome = router.handle_keys(vec!["none", "x", "y"], &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(*log.lock(), ["x1", "x2", "y1"]);

        let outcome = router.handle_keys(vec!["none"], &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped);
    }
}
