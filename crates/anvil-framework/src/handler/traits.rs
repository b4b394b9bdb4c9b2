//! Blanket handler implementations for async functions.
//!
//! Any async function whose arguments all implement [`FromContext`] and whose
//! return type implements [`IntoOutcome`] is a handler:
//!
//! ```rust,ignore
//! use anvil_framework::prelude::*;
//!
//! async fn ping() -> &'static str {
//!     "pong"
//! }
//!
//! async fn echo(Body(body): Body) -> String {
//!     body
//! }
//!
//! async fn only_admins(ctx: Arc<Context>, Msg(msg): Msg) -> Outcome {
//!     if msg.sender_id != "1" {
//!         return Outcome::Skipped;
//!     }
//!     let _ = ctx.reply("hello, admin").await;
//!     Outcome::Processed
//! }
//! ```
//!
//! If any extractor fails the handler is not called and the result is
//! [`Outcome::Skipped`], so the next candidate gets a chance.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::HandlerResult;
use super::service::IntoOutcome;
use crate::context::Context;
use crate::extractor::FromContext;
use crate::handler::Outcome;

/// A function that can be called with arguments extracted from a [`Context`].
#[async_trait]
pub trait FromCtxFn<T>: Clone + Send + Sync + 'static {
    async fn call(self, ctx: Arc<Context>) -> HandlerResult;
}

macro_rules! impl_from_ctx_fn {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> FromCtxFn<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoOutcome + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            async fn call(self, ctx: Arc<Context>) -> HandlerResult {
                $(
                    let $ty = match $ty::from_context(&ctx) {
                        Ok(value) => value,
                        Err(e) => {
                            trace!(error = %e, "Extractor rejected update");
                            return Ok(Outcome::Skipped);
                        }
                    };
                )*

                let res = (self)($($ty,)*).await;
                res.into_outcome(&ctx).await
            }
        }
    };
}

impl_from_ctx_fn!();
impl_from_ctx_fn!(T1);
impl_from_ctx_fn!(T1, T2);
impl_from_ctx_fn!(T1, T2, T3);
impl_from_ctx_fn!(T1, T2, T3, T4);
impl_from_ctx_fn!(T1, T2, T3, T4, T5);
impl_from_ctx_fn!(T1, T2, T3, T4, T5, T6);
impl_from_ctx_fn!(T1, T2, T3, T4, T5, T6, T7);
impl_from_ctx_fn!(T1, T2, T3, T4, T5, T6, T7, T8);
