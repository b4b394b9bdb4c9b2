//! # Anvil Framework
//!
//! Building blocks for bot plugins and backends.
//!
//! This layer provides:
//! - Axum-style handlers: async functions with [`FromContext`] arguments,
//!   erased into tower services ([`Handler`])
//! - The router hierarchy ([`router`]) with merge and root composition
//! - The per-update [`Context`] with persisted group/user state
//! - The [`Backend`] contract and the [`UpdateSink`] backends push into
//! - [`Plugin`], bundling routers with lifecycle hooks
//!
//! The runtime crate owns the dispatch loop; everything here is usable on
//! its own, which is how the unit tests drive routers.

pub mod app;
pub mod backend;
pub mod context;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod plugin;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{AppHandle, DEFAULT_CONCURRENCY, DEFAULT_STORAGE, DispatchConfig};
pub use backend::{Backend, BoxedBackend, Params, QueuedUpdate, UpdateSink};
pub use context::{Context, FieldValue, MAX_MESSAGE_CHARS, SharedError, fields};
pub use error::{
    BoxError, ContextError, ContextResult, ExtractError, ExtractResult, HookError, RouterError,
};
pub use extractor::{Body, Captures, Command, FromContext, Msg, Payload, Prefix};
pub use handler::{
    BoxedHandlerService, FromCtxFn, Handler, HandlerResult, HandlerService, IntoHandler,
    IntoOutcome, Outcome,
};
pub use plugin::{AppHook, ContextHook, HookRegistry, HookResult, Plugin, panic_message};
pub use router::{
    AnyMessageRouter, AnyUpdateRouter, AttachmentsRouter, CommandsRouter, ListRouter, MapRouter,
    PayloadsRouter, RegexRouter, Route, Router, RouterClass, compose,
};

pub use regex::Regex;

/// Prelude for plugin authors.
pub mod prelude {
    pub use std::sync::Arc;

    pub use super::{
        AppHandle, Backend, Body, Captures, Command, Context, ContextError, FromContext, Handler,
        Msg, Outcome, Payload, Plugin, Prefix, Regex, UpdateSink,
    };
    pub use anvil_core::prelude::*;
}
