use std::sync::Arc;

use regex::Regex;
use tower::{ServiceExt, service_fn};

use crate::context::{Context, FieldValue, fields};
use crate::error::RouterError;
use crate::handler::{Handler, HandlerResult, Outcome};

use super::RouterClass;
use super::list::ListRouter;

/// Routes messages whose text matches a regular expression.
///
/// Entries are tried in order. The first pattern that matches writes its
/// capture groups to the context's `match` field and runs its handler.
#[derive(Debug, Clone)]
pub struct RegexRouter {
    inner: ListRouter,
}

impl RegexRouter {
    pub fn new(priority: i32) -> Self {
        Self {
            inner: ListRouter::new(priority),
        }
    }

    pub fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    pub fn add_handler(&mut self, pattern: Regex, handler: Handler) {
        self.inner.add_handler(guard(pattern, handler));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn merge(sources: Vec<Self>) -> Result<Self, RouterError> {
        let inner = ListRouter::merge_as(
            sources.into_iter().map(|s| s.inner).collect(),
            RouterClass::Regex,
        )?;
        Ok(Self { inner })
    }

    pub async fn handle(&self, ctx: &Arc<Context>) -> HandlerResult {
        if !ctx.update().is_message() {
            return Ok(Outcome::Skipped);
        }
        self.inner.handle(ctx).await
    }
}

/// Wraps `handler` so it only runs when `pattern` matches the message text.
fn guard(pattern: Regex, handler: Handler) -> Handler {
    let priority = handler.priority();
    let name = handler.name().map(str::to_string);
    let inner = handler.service().clone();

    let guarded = Handler::from_service(service_fn(move |ctx: Arc<Context>| {
        let pattern = pattern.clone();
        let inner = inner.clone();
        async move {
            let groups: Option<Vec<Option<String>>> = ctx.message().and_then(|m| {
                pattern.captures(&m.text).map(|caps| {
                    caps.iter()
                        .map(|g| g.map(|m| m.as_str().to_string()))
                        .collect()
                })
            });
            match groups {
                Some(groups) => {
                    ctx.set_field(fields::MATCH, FieldValue::Captures(groups));
                    inner.oneshot(ctx).await
                }
                None => Ok(Outcome::Skipped),
            }
        }
    }))
    .with_priority(priority);

    match name {
        Some(name) => guarded.named(name),
        None => guarded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::extractor::Captures;
    use crate::testing::message_ctx;
    use anvil_core::Message;

    #[tokio::test]
    async fn first_matching_pattern_wins() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut router = RegexRouter::new(5);

        let slot = seen.clone();
        router.add_handler(
            Regex::new(r"^roll (\d+)d(\d+)$").unwrap(),
            Handler::new(move |Captures(groups): Captures| {
                let slot = slot.clone();
                async move {
                    slot.lock().push(groups);
                }
            }),
        );
        let slot = seen.clone();
        router.add_handler(
            Regex::new(r"roll").unwrap(),
            Handler::new(move || {
                let slot = slot.clone();
                async move {
                    slot.lock().push(vec![Some("fallback".to_string())]);
                }
            }),
        );

        let (ctx, _) = message_ctx(Message::private("1", "roll 2d6")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);
        let (ctx, _) = message_ctx(Message::private("1", "please roll")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);

        assert_eq!(
            *seen.lock(),
            vec![
                vec![
                    Some("roll 2d6".to_string()),
                    Some("2".to_string()),
                    Some("6".to_string())
                ],
                vec![Some("fallback".to_string())],
            ]
        );
    }

    #[tokio::test]
    async fn no_match_is_skipped_without_capture() {
        let mut router = RegexRouter::new(5);
        router.add_handler(Regex::new(r"^\d+$").unwrap(), Handler::new(|| async {}));

        let (ctx, _) = message_ctx(Message::private("1", "abc")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Skipped);
        assert_eq!(ctx.captures(), None);
    }

    #[test]
    fn guard_keeps_priority_and_name() {
        let handler = guard(
            Regex::new("x").unwrap(),
            Handler::new(|| async {}).with_priority(4).named("x"),
        );
        assert_eq!(handler.priority(), 4);
        assert_eq!(handler.name(), Some("x"));
    }
}
