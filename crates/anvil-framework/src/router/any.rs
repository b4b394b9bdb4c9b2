//! Catch-all routers filtered by update type.

use std::sync::Arc;

use crate::context::Context;
use crate::error::RouterError;
use crate::handler::{Handler, HandlerResult, Outcome};

use super::RouterClass;
use super::list::ListRouter;

/// Runs its handlers for every message.
#[derive(Debug, Clone)]
pub struct AnyMessageRouter {
    inner: ListRouter,
}

impl AnyMessageRouter {
    pub fn new(priority: i32) -> Self {
        Self {
            inner: ListRouter::new(priority),
        }
    }

    pub fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    pub fn add_handler(&mut self, handler: Handler) {
        self.inner.add_handler(handler);
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
            RouterClass::AnyMessage,
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

/// Runs its handlers for every update that is not a message.
#[derive(Debug, Clone)]
pub struct AnyUpdateRouter {
    inner: ListRouter,
}

impl AnyUpdateRouter {
    pub fn new(priority: i32) -> Self {
        Self {
            inner: ListRouter::new(priority),
        }
    }

    pub fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    pub fn add_handler(&mut self, handler: Handler) {
        self.inner.add_handler(handler);
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
            RouterClass::AnyUpdate,
        )?;
        Ok(Self { inner })
    }

    pub async fn handle(&self, ctx: &Arc<Context>) -> HandlerResult {
        if ctx.update().is_message() {
            return Ok(Outcome::Skipped);
        }
        self.inner.handle(ctx).await
    }
}
