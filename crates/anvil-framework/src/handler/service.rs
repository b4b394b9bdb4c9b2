//! The tower service wrapping a single handler.
//!
//! [`HandlerService<F, T>`] implements `tower::Service<Arc<Context>>` so that
//! cross-cutting concerns (timeouts, rate limits, logging) can be stacked on
//! top of any handler as ordinary tower layers.

use std::marker::PhantomData;
use std::sync::Arc;
use std::task::Poll;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{BoxError, Service};

use super::traits::FromCtxFn;
use super::{HandlerResult, Outcome};
use crate::context::Context;

// ============================================================================
// IntoOutcome
// ============================================================================

/// Types that can be returned from handlers.
///
/// | Return type       | Effect                                         |
/// |-------------------|------------------------------------------------|
/// | `()`              | [`Outcome::Processed`]                         |
/// | [`Outcome`]       | itself                                         |
/// | `String`, `&str`  | replied to the update, then `Processed`        |
/// | `Option<T>`       | `None` is [`Outcome::Skipped`]                 |
/// | `Result<T, E>`    | `Err` is reported to the exception hooks       |
#[async_trait]
pub trait IntoOutcome: Send {
    async fn into_outcome(self, ctx: &Arc<Context>) -> HandlerResult;
}

#[async_trait]
impl IntoOutcome for () {
    async fn into_outcome(self, _ctx: &Arc<Context>) -> HandlerResult {
        Ok(Outcome::Processed)
    }
}

#[async_trait]
impl IntoOutcome for Outcome {
    async fn into_outcome(self, _ctx: &Arc<Context>) -> HandlerResult {
        Ok(self)
    }
}

#[async_trait]
impl IntoOutcome for String {
    async fn into_outcome(self, ctx: &Arc<Context>) -> HandlerResult {
        ctx.reply(&self).await?;
        Ok(Outcome::Processed)
    }
}

#[async_trait]
impl IntoOutcome for &'static str {
    async fn into_outcome(self, ctx: &Arc<Context>) -> HandlerResult {
        ctx.reply(self).await?;
        Ok(Outcome::Processed)
    }
}

#[async_trait]
impl<T: IntoOutcome> IntoOutcome for Option<T> {
    async fn into_outcome(self, ctx: &Arc<Context>) -> HandlerResult {
        match self {
            Some(t) => t.into_outcome(ctx).await,
            None => Ok(Outcome::Skipped),
        }
    }
}

#[async_trait]
impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<BoxError> + Send + 'static,
{
    async fn into_outcome(self, ctx: &Arc<Context>) -> HandlerResult {
        match self {
            Ok(t) => t.into_outcome(ctx).await,
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// HandlerService
// ============================================================================

/// A tower [`Service`] that calls a single handler function.
///
/// ```rust,ignore
/// let svc = HandlerService::new(echo);
/// let handler = Handler::from_service(TimeoutLayer::new(Duration::from_secs(5)).layer(svc));
/// ```
pub struct HandlerService<F, T> {
    handler: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> HandlerService<F, T> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<F: Clone, T> Clone for HandlerService<F, T> {
    fn clone(&self) -> Self {
        Self::new(self.handler.clone())
    }
}

impl<F, T> Service<Arc<Context>> for HandlerService<F, T>
where
    F: FromCtxFn<T>,
    T: 'static,
{
    type Response = Outcome;
    type Error = BoxError;
    type Future = BoxFuture<'static, HandlerResult>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<Context>) -> Self::Future {
        self.handler.clone().call(ctx).boxed()
    }
}
