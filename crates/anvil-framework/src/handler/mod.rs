//! Handlers and their outcomes.
//!
//! A handler receives a [`Context`] and reports whether it acted on the
//! update. Routers walk their handlers in order and stop at the first one
//! that does not return [`Outcome::Skipped`].
//!
//! - **Functions** ([`traits`]) – async functions with [`FromContext`]
//!   arguments become handlers through [`FromCtxFn`]
//! - **Service** ([`service`]) – [`HandlerService`] adapts such a function to
//!   `tower::Service`, and [`IntoOutcome`] maps return values to outcomes
//! - **Handler** – the type-erased, clonable service stored by routers, with
//!   its priority
//!
//! ```rust,ignore
//! let handler = Handler::new(echo).with_priority(10);
//! let handler = handler.layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(5)));
//! ```
//!
//! [`FromContext`]: crate::extractor::FromContext

pub mod service;
pub mod traits;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tower::util::BoxCloneSyncService;
use tower::{BoxError, Layer, Service, ServiceExt};

use crate::context::Context;

pub use service::{HandlerService, IntoOutcome};
pub use traits::FromCtxFn;

/// What a handler or router did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The update was handled; dispatch stops here.
    Processed,
    /// The update was not for this handler; dispatch continues.
    Skipped,
}

impl Outcome {
    pub fn is_processed(self) -> bool {
        self == Self::Processed
    }

    pub fn is_skipped(self) -> bool {
        self == Self::Skipped
    }
}

/// Result of running a handler or a router.
pub type HandlerResult = Result<Outcome, BoxError>;

/// The boxed service type every handler is erased to.
pub type BoxedHandlerService = BoxCloneSyncService<Arc<Context>, Outcome, BoxError>;

/// A registered handler: a clonable service plus its priority.
///
/// Inside one router, handlers with a higher priority run first; equal
/// priorities keep registration order.
#[derive(Clone)]
pub struct Handler {
    service: BoxedHandlerService,
    priority: i32,
    name: Option<Cow<'static, str>>,
}

impl Handler {
    /// Wraps an async function.
    pub fn new<F, T>(f: F) -> Self
    where
        F: FromCtxFn<T>,
        T: 'static,
    {
        Self::from_service(HandlerService::new(f))
    }

    /// Wraps any tower service over `Arc<Context>`.
    pub fn from_service<S>(service: S) -> Self
    where
        S: Service<Arc<Context>, Response = Outcome, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            service: BoxCloneSyncService::new(service),
            priority: 0,
            name: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Names the handler for log output.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Wraps the handler's service in a tower layer.
    pub fn layer<L>(self, layer: L) -> Self
    where
        L: Layer<BoxedHandlerService>,
        L::Service: Service<Arc<Context>, Response = Outcome, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Arc<Context>>>::Future: Send + 'static,
    {
        Self {
            service: BoxCloneSyncService::new(layer.layer(self.service)),
            priority: self.priority,
            name: self.name,
        }
    }

    /// The erased service, for building wrappers around this handler.
    pub fn service(&self) -> &BoxedHandlerService {
        &self.service
    }

    /// Runs the handler once.
    pub async fn call(&self, ctx: &Arc<Context>) -> HandlerResult {
        self.service.clone().oneshot(Arc::clone(ctx)).await
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Conversion into a [`Handler`].
///
/// Lets registration methods accept both plain async functions and
/// preconfigured handlers. `M` only disambiguates the two impls.
pub trait IntoHandler<M> {
    fn into_handler(self) -> Handler;
}

impl IntoHandler<()> for Handler {
    fn into_handler(self) -> Handler {
        self
    }
}

impl<F, T> IntoHandler<fn(T)> for F
where
    F: FromCtxFn<T>,
    T: 'static,
{
    fn into_handler(self) -> Handler {
        Handler::new(self)
    }
}

/// Inserts `handler` keeping the list sorted by descending priority.
///
/// Equal priorities stay in insertion order.
pub(crate) fn insert_sorted(handlers: &mut Vec<Handler>, handler: Handler) {
    let idx = handlers.partition_point(|h| h.priority >= handler.priority);
    handlers.insert(idx, handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::testing::message_ctx;
    use anvil_core::Message;

    #[tokio::test]
    async fn unit_return_is_processed() {
        let (ctx, _) = message_ctx(Message::private("1", "hi")).await;
        let handler = Handler::new(|| async {});
        assert_eq!(handler.call(&ctx).await.unwrap(), Outcome::Processed);
    }

    #[tokio::test]
    async fn none_return_is_skipped() {
        let (ctx, _) = message_ctx(Message::private("1", "hi")).await;
        let handler = Handler::new(|| async { None::<()> });
        assert_eq!(handler.call(&ctx).await.unwrap(), Outcome::Skipped);
    }

    #[tokio::test]
    async fn string_return_replies() {
        let (ctx, backend) = message_ctx(Message::private("7", "hi")).await;
        let handler = Handler::new(|| async { String::from("pong") });
        assert_eq!(handler.call(&ctx).await.unwrap(), Outcome::Processed);

        let sent = backend.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target_id, "7");
        assert_eq!(sent[0].text, "pong");
    }

    #[tokio::test]
    async fn error_return_propagates() {
        let (ctx, _) = message_ctx(Message::private("1", "hi")).await;
        let handler = Handler::new(|| async { Err::<(), _>(std::io::Error::other("boom")) });
        let err = handler.call(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn failed_extraction_skips_without_calling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = Handler::new(move |_cmd: crate::extractor::Command| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (ctx, _) = message_ctx(Message::private("1", "hi")).await;
        assert_eq!(handler.call(&ctx).await.unwrap(), Outcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn insertion_keeps_priority_order() {
        let mut handlers = Vec::new();
        insert_sorted(&mut handlers, Handler::new(|| async {}).named("a"));
        insert_sorted(&mut handlers, Handler::new(|| async {}).named("b").with_priority(5));
        insert_sorted(&mut handlers, Handler::new(|| async {}).named("c"));
        insert_sorted(&mut handlers, Handler::new(|| async {}).named("d").with_priority(5));

        let names: Vec<_> = handlers.iter().filter_map(Handler::name).collect();
        assert_eq!(names, ["b", "d", "a", "c"]);
    }
}
