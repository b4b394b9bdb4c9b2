//! Router hierarchy.
//!
//! Plugins register handlers into routers; the runtime merges the routers of
//! all plugins into one root and consults it for every update.
//!
//! | Router                | Strategy | Selects by                         | Default priority |
//! |-----------------------|----------|------------------------------------|------------------|
//! | [`CommandsRouter`]    | keyed    | prefix + command name              | 6                |
//! | [`RegexRouter`]       | ordered  | regex over the message text        | 5                |
//! | [`PayloadsRouter`]    | keyed    | structured message payload         | 4                |
//! | [`AttachmentsRouter`] | keyed    | attachment kinds, in message order | 3                |
//! | [`AnyMessageRouter`]  | ordered  | any message                        | 0                |
//! | [`AnyUpdateRouter`]   | ordered  | any non-message update             | 0                |
//! | [`ListRouter`]        | ordered  | nothing, tries every entry         | n/a              |
//!
//! Keyed routers derive candidate keys from the update and try each key's
//! handlers in order; ordered routers try every entry in order. Both stop at
//! the first handler that does not return [`Outcome::Skipped`].
//!
//! # Merging
//!
//! [`Router::merge`] combines routers of the same kind into one terminal
//! router (priority `None`), ordering the sources by descending priority.
//! A terminal router cannot be merged again.
//!
//! [`compose`] builds the root: routers are sorted by priority, grouped by
//! (priority, kind), each group is merged, and the merged routers are tried
//! in that order.
//!
//! [`Outcome::Skipped`]: crate::Outcome::Skipped

pub mod any;
pub mod attachments;
pub mod commands;
pub mod compose;
pub mod list;
pub mod map;
pub mod pattern;
pub mod payloads;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::error::RouterError;
use crate::handler::HandlerResult;

pub use any::{AnyMessageRouter, AnyUpdateRouter};
pub use attachments::AttachmentsRouter;
pub use commands::CommandsRouter;
pub use compose::compose;
pub use list::{ListRouter, Route};
pub use map::MapRouter;
pub use pattern::RegexRouter;
pub use payloads::PayloadsRouter;

/// Default router priorities used by the plugin registration helpers.
pub mod priority {
    pub const COMMANDS: i32 = 6;
    pub const REGEX: i32 = 5;
    pub const PAYLOADS: i32 = 4;
    pub const ATTACHMENTS: i32 = 3;
    pub const ANY_MESSAGE: i32 = 0;
    pub const ANY_UPDATE: i32 = 0;
    /// Catch-alls that only see what nothing else processed.
    pub const UNPROCESSED: i32 = -1;
}

/// The concrete kind of a [`Router`]. Only routers of one kind merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterClass {
    List,
    Commands,
    Regex,
    Payloads,
    Attachments,
    AnyMessage,
    AnyUpdate,
}

/// Any router.
#[derive(Debug, Clone)]
pub enum Router {
    List(ListRouter),
    Commands(CommandsRouter),
    Regex(RegexRouter),
    Payloads(PayloadsRouter),
    Attachments(AttachmentsRouter),
    AnyMessage(AnyMessageRouter),
    AnyUpdate(AnyUpdateRouter),
}

macro_rules! merge_class {
    ($sources:expr, $variant:ident, $ty:ty) => {{
        let inner: Vec<$ty> = $sources
            .into_iter()
            .filter_map(|r| match r {
                Router::$variant(r) => Some(r),
                _ => None,
            })
            .collect();
        <$ty>::merge(inner).map(Router::$variant)
    }};
}

impl Router {
    /// An empty router of `class` at `priority`.
    pub fn empty(class: RouterClass, priority: i32) -> Self {
        match class {
            RouterClass::List => Self::List(ListRouter::new(priority)),
            RouterClass::Commands => Self::Commands(CommandsRouter::new(priority)),
            RouterClass::Regex => Self::Regex(RegexRouter::new(priority)),
            RouterClass::Payloads => Self::Payloads(PayloadsRouter::new(priority)),
            RouterClass::Attachments => Self::Attachments(AttachmentsRouter::new(priority)),
            RouterClass::AnyMessage => Self::AnyMessage(AnyMessageRouter::new(priority)),
            RouterClass::AnyUpdate => Self::AnyUpdate(AnyUpdateRouter::new(priority)),
        }
    }

    pub fn class(&self) -> RouterClass {
        match self {
            Self::List(_) => RouterClass::List,
            Self::Commands(_) => RouterClass::Commands,
            Self::Regex(_) => RouterClass::Regex,
            Self::Payloads(_) => RouterClass::Payloads,
            Self::Attachments(_) => RouterClass::Attachments,
            Self::AnyMessage(_) => RouterClass::AnyMessage,
            Self::AnyUpdate(_) => RouterClass::AnyUpdate,
        }
    }

    /// `None` once the router is the result of a merge.
    pub fn priority(&self) -> Option<i32> {
        match self {
            Self::List(r) => r.priority(),
            Self::Commands(r) => r.priority(),
            Self::Regex(r) => r.priority(),
            Self::Payloads(r) => r.priority(),
            Self::Attachments(r) => r.priority(),
            Self::AnyMessage(r) => r.priority(),
            Self::AnyUpdate(r) => r.priority(),
        }
    }

    /// Merges routers of one kind into a terminal router.
    pub fn merge(sources: Vec<Router>) -> Result<Router, RouterError> {
        let Some(first) = sources.first() else {
            return Err(RouterError::Empty);
        };
        let class = first.class();

        for source in &sources {
            if source.class() != class {
                return Err(RouterError::ClassMismatch {
                    expected: class,
                    got: source.class(),
                });
            }
            if source.priority().is_none() {
                return Err(RouterError::AlreadyMerged(class));
            }
        }

        match class {
            RouterClass::List => merge_class!(sources, List, ListRouter),
            RouterClass::Commands => merge_class!(sources, Commands, CommandsRouter),
            RouterClass::Regex => merge_class!(sources, Regex, RegexRouter),
            RouterClass::Payloads => merge_class!(sources, Payloads, PayloadsRouter),
            RouterClass::Attachments => merge_class!(sources, Attachments, AttachmentsRouter),
            RouterClass::AnyMessage => merge_class!(sources, AnyMessage, AnyMessageRouter),
            RouterClass::AnyUpdate => merge_class!(sources, AnyUpdate, AnyUpdateRouter),
        }
    }

    /// Compiles whatever can be compiled ahead of dispatch.
    pub fn prepare(&mut self, prefixes: &[String]) {
        match self {
            Self::Commands(r) => r.prepare(prefixes),
            Self::List(r) => r.prepare(prefixes),
            _ => {}
        }
    }

    /// Dispatches the update held by `ctx`.
    pub fn handle<'a>(&'a self, ctx: &'a Arc<Context>) -> BoxFuture<'a, HandlerResult> {
        match self {
            Self::List(r) => Box::pin(r.handle(ctx)),
            Self::Commands(r) => Box::pin(r.handle(ctx)),
            Self::Regex(r) => Box::pin(r.handle(ctx)),
            Self::Payloads(r) => Box::pin(r.handle(ctx)),
            Self::Attachments(r) => Box::pin(r.handle(ctx)),
            Self::AnyMessage(r) => Box::pin(r.handle(ctx)),
            Self::AnyUpdate(r) => Box::pin(r.handle(ctx)),
        }
    }
}
