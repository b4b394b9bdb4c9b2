//! Plugins: routers plus lifecycle hooks.
//!
//! A [`Plugin`] is built once with its registration methods and handed to the
//! runtime, which merges its routers with those of every other plugin and
//! collects its hooks into a [`HookRegistry`].
//!
//! ```rust,ignore
//! use anvil_framework::prelude::*;
//!
//! async fn echo(Body(body): Body) -> String {
//!     body
//! }
//!
//! async fn fallback() -> &'static str {
//!     "Unknown command"
//! }
//!
//! let plugin = Plugin::new("echo")
//!     .with_description("Repeats what you say")
//!     .on_commands(["echo", "say"], echo)
//!     .on_any_unprocessed_message(fallback)
//!     .on_exception(|ctx: Arc<Context>| async move {
//!         ctx.reply("Something went wrong").await?;
//!         Ok::<_, ContextError>(())
//!     });
//! ```
//!
//! # Hooks
//!
//! | Hook         | Runs                                              | On failure            |
//! |--------------|---------------------------------------------------|-----------------------|
//! | `start`      | once, before any backend starts                   | startup is aborted    |
//! | `completion` | after an update was dispatched without error      | logged                |
//! | `exception`  | after a handler failed (never on cancellation)    | logged                |
//! | `shutdown`   | once, concurrently with the backends' teardown    | logged, others finish |

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anvil_core::AttachmentKind;
use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use tower::BoxError;
use tracing::{debug, error};

use crate::app::AppHandle;
use crate::context::Context;
use crate::error::HookError;
use crate::handler::IntoHandler;
use crate::router::{Router, RouterClass, priority};

/// Result returned by lifecycle hooks.
pub type HookResult = Result<(), BoxError>;

/// A hook receiving the application handle (`start`, `shutdown`).
pub type AppHook = Arc<dyn Fn(Arc<AppHandle>) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// A hook receiving the context of one update (`exception`, `completion`).
pub type ContextHook = Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, HookResult> + Send + Sync>;

#[derive(Clone, Default)]
struct PluginHooks {
    start: Vec<AppHook>,
    exception: Vec<ContextHook>,
    completion: Vec<ContextHook>,
    shutdown: Vec<AppHook>,
}

fn app_hook<F, Fut, E>(f: F) -> AppHook
where
    F: Fn(Arc<AppHandle>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move |app| {
        let fut = f(app);
        Box::pin(async move { fut.await.map_err(Into::into) })
    })
}

fn context_hook<F, Fut, E>(f: F) -> ContextHook
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move |ctx| {
        let fut = f(ctx);
        Box::pin(async move { fut.await.map_err(Into::into) })
    })
}

/// A named bundle of routers and lifecycle hooks.
#[derive(Clone)]
pub struct Plugin {
    name: String,
    description: String,
    routers: Vec<Router>,
    hooks: PluginHooks,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            routers: Vec::new(),
            hooks: PluginHooks::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Routers in registration order.
    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    /// Returns this plugin's router of `class` at `priority`, creating it on
    /// first use.
    fn router_slot(&mut self, class: RouterClass, priority: i32) -> &mut Router {
        let idx = match self
            .routers
            .iter()
            .position(|r| r.class() == class && r.priority() == Some(priority))
        {
            Some(idx) => idx,
            None => {
                self.routers.push(Router::empty(class, priority));
                self.routers.len() - 1
            }
        };
        &mut self.routers[idx]
    }

    // ─── Handlers ────────────────────────────────────────────────────────────

    /// Handles messages like `/echo text` for any of `commands`.
    pub fn on_commands<I, S, M>(mut self, commands: I, handler: impl IntoHandler<M>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Router::Commands(router) = self.router_slot(RouterClass::Commands, priority::COMMANDS) {
            router.add_handler(commands, handler.into_handler());
        }
        self
    }

    /// Handles messages whose text matches `pattern`.
    pub fn on_match<M>(mut self, pattern: Regex, handler: impl IntoHandler<M>) -> Self {
        if let Router::Regex(router) = self.router_slot(RouterClass::Regex, priority::REGEX) {
            router.add_handler(pattern, handler.into_handler());
        }
        self
    }

    /// Handles messages carrying one of `payloads`.
    pub fn on_payloads<I, M>(mut self, payloads: I, handler: impl IntoHandler<M>) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        if let Router::Payloads(router) = self.router_slot(RouterClass::Payloads, priority::PAYLOADS) {
            router.add_handler(payloads, handler.into_handler());
        }
        self
    }

    /// Handles messages with an attachment of one of `kinds`.
    pub fn on_attachments<I, M>(mut self, kinds: I, handler: impl IntoHandler<M>) -> Self
    where
        I: IntoIterator<Item = AttachmentKind>,
    {
        if let Router::Attachments(router) =
            self.router_slot(RouterClass::Attachments, priority::ATTACHMENTS)
        {
            router.add_handler(kinds, handler.into_handler());
        }
        self
    }

    /// Handles every message, after the keyed routers had their chance.
    pub fn on_any_message<M>(self, handler: impl IntoHandler<M>) -> Self {
        self.any_message_at(priority::ANY_MESSAGE, handler)
    }

    /// Handles messages nothing else processed.
    pub fn on_any_unprocessed_message<M>(self, handler: impl IntoHandler<M>) -> Self {
        self.any_message_at(priority::UNPROCESSED, handler)
    }

    /// Handles every update that is not a message.
    pub fn on_any_update<M>(self, handler: impl IntoHandler<M>) -> Self {
        self.any_update_at(priority::ANY_UPDATE, handler)
    }

    /// Handles non-message updates nothing else processed.
    pub fn on_any_unprocessed_update<M>(self, handler: impl IntoHandler<M>) -> Self {
        self.any_update_at(priority::UNPROCESSED, handler)
    }

    fn any_message_at<M>(mut self, priority: i32, handler: impl IntoHandler<M>) -> Self {
        if let Router::AnyMessage(router) = self.router_slot(RouterClass::AnyMessage, priority) {
            router.add_handler(handler.into_handler());
        }
        self
    }

    fn any_update_at<M>(mut self, priority: i32, handler: impl IntoHandler<M>) -> Self {
        if let Router::AnyUpdate(router) = self.router_slot(RouterClass::AnyUpdate, priority) {
            router.add_handler(handler.into_handler());
        }
        self
    }

    /// Adds a router built by hand, e.g. one with a non-default priority.
    pub fn with_router(mut self, router: Router) -> Self {
        self.routers.push(router);
        self
    }

    // ─── Hooks ───────────────────────────────────────────────────────────────

    pub fn on_start<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<AppHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.hooks.start.push(app_hook(f));
        self
    }

    pub fn on_exception<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.hooks.exception.push(context_hook(f));
        self
    }

    pub fn on_completion<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.hooks.completion.push(context_hook(f));
        self
    }

    pub fn on_shutdown<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<AppHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.hooks.shutdown.push(app_hook(f));
        self
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("routers", &self.routers.len())
            .field("start_hooks", &self.hooks.start.len())
            .field("exception_hooks", &self.hooks.exception.len())
            .field("completion_hooks", &self.hooks.completion.len())
            .field("shutdown_hooks", &self.hooks.shutdown.len())
            .finish()
    }
}

// ─── HookRegistry ─────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Registered<H> {
    plugin: Arc<str>,
    hook: H,
}

/// The hooks of all plugins, per event, in plugin registration order.
#[derive(Clone, Default)]
pub struct HookRegistry {
    start: Vec<Registered<AppHook>>,
    exception: Vec<Registered<ContextHook>>,
    completion: Vec<Registered<ContextHook>>,
    shutdown: Vec<Registered<AppHook>>,
}

impl HookRegistry {
    pub fn collect<'a>(plugins: impl IntoIterator<Item = &'a Plugin>) -> Self {
        let mut registry = Self::default();
        for plugin in plugins {
            let name: Arc<str> = Arc::from(plugin.name.as_str());
            let tag = |hooks: &[AppHook]| {
                hooks
                    .iter()
                    .map(|hook| Registered {
                        plugin: name.clone(),
                        hook: hook.clone(),
                    })
                    .collect::<Vec<_>>()
            };
            registry.start.extend(tag(&plugin.hooks.start));
            registry.shutdown.extend(tag(&plugin.hooks.shutdown));

            let tag = |hooks: &[ContextHook]| {
                hooks
                    .iter()
                    .map(|hook| Registered {
                        plugin: name.clone(),
                        hook: hook.clone(),
                    })
                    .collect::<Vec<_>>()
            };
            registry.exception.extend(tag(&plugin.hooks.exception));
            registry.completion.extend(tag(&plugin.hooks.completion));
        }
        registry
    }

    pub fn start_len(&self) -> usize {
        self.start.len()
    }

    pub fn exception_len(&self) -> usize {
        self.exception.len()
    }

    pub fn completion_len(&self) -> usize {
        self.completion.len()
    }

    pub fn shutdown_len(&self) -> usize {
        self.shutdown.len()
    }

    /// Runs start hooks one after another, stopping at the first failure.
    pub async fn run_start(&self, app: &Arc<AppHandle>) -> Result<(), HookError> {
        for Registered { plugin, hook } in &self.start {
            debug!(plugin = %plugin, "Running start hook");
            hook(Arc::clone(app)).await.map_err(|source| HookError {
                plugin: plugin.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Runs exception hooks in order. Failures are logged.
    pub async fn run_exception(&self, ctx: &Arc<Context>) {
        run_context_hooks(&self.exception, ctx, "exception").await;
    }

    /// Runs completion hooks in order. Failures are logged.
    pub async fn run_completion(&self, ctx: &Arc<Context>) {
        run_context_hooks(&self.completion, ctx, "completion").await;
    }

    /// One independent future per shutdown hook, each logging its own failure.
    pub fn shutdown_tasks(&self, app: &Arc<AppHandle>) -> Vec<BoxFuture<'static, ()>> {
        self.shutdown
            .iter()
            .map(|Registered { plugin, hook }| {
                let plugin = plugin.clone();
                let fut = hook(Arc::clone(app));
                Box::pin(async move {
                    if let Err(e) = fut.await {
                        error!(plugin = %plugin, error = %e, "Shutdown hook failed");
                    }
                }) as BoxFuture<'static, ()>
            })
            .collect()
    }
}

/// Runs `hooks` in order. A failing or panicking hook is logged and the
/// next one still runs.
async fn run_context_hooks(hooks: &[Registered<ContextHook>], ctx: &Arc<Context>, kind: &str) {
    for Registered { plugin, hook } in hooks {
        let run = AssertUnwindSafe(async { hook(Arc::clone(ctx)).await }).catch_unwind();
        match run.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(plugin = %plugin, hook = kind, error = %e, "Hook failed"),
            Err(panic) => error!(
                plugin = %plugin,
                hook = kind,
                panic = %panic_message(&*panic),
                "Hook panicked"
            ),
        }
    }
}

/// Text of a panic payload, for logs and error messages.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("start", &self.start.len())
            .field("exception", &self.exception.len())
            .field("completion", &self.completion.len())
            .field("shutdown", &self.shutdown.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::extractor::Body;
    use crate::testing::{message_ctx, test_app};
    use crate::{Handler, Outcome};
    use anvil_core::Message;

    async fn echo(Body(body): Body) -> String {
        body
    }

    #[test]
    fn registrations_share_routers_per_class_and_priority() {
        let plugin = Plugin::new("demo")
            .on_commands(["echo"], echo)
            .on_commands(["say"], Handler::new(echo).with_priority(3))
            .on_any_message(|| async {})
            .on_any_unprocessed_message(|| async {})
            .on_attachments([AttachmentKind::Image], || async {});

        let summary: Vec<_> = plugin
            .routers()
            .iter()
            .map(|r| (r.class(), r.priority()))
            .collect();
        assert_eq!(
            summary,
            [
                (RouterClass::Commands, Some(6)),
                (RouterClass::AnyMessage, Some(0)),
                (RouterClass::AnyMessage, Some(-1)),
                (RouterClass::Attachments, Some(3)),
            ]
        );

        match &plugin.routers()[0] {
            Router::Commands(r) => assert_eq!(r.commands(), ["echo", "say"]),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn hooks_run_in_plugin_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = {
            let order = order.clone();
            Plugin::new("first").on_completion(move |_ctx| {
                let order = order.clone();
                async move {
                    order.lock().push("first");
                    Ok::<_, BoxError>(())
                }
            })
        };
        let second = {
            let order = order.clone();
            Plugin::new("second")
                .on_completion(|_ctx| async { Err::<(), _>(std::io::Error::other("nope")) })
                .on_completion(move |_ctx| {
                    let order = order.clone();
                    async move {
                        order.lock().push("second");
                        Ok::<_, BoxError>(())
                    }
                })
        };

        let registry = HookRegistry::collect([&first, &second]);
        assert_eq!(registry.completion_len(), 3);

        let (ctx, _) = message_ctx(Message::private("1", "")).await;
        registry.run_completion(&ctx).await;
        assert_eq!(*order.lock(), ["first", "second"]);
    }

    #[tokio::test]
    async fn panicking_hook_does_not_skip_later_plugins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let panicky = Plugin::new("a").on_completion(|_ctx| async {
            if true {
                panic!("completion exploded");
            }
            Ok::<_, BoxError>(())
        });
        let counting = Plugin::new("b").on_completion(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(()) }
        });

        let registry = HookRegistry::collect([&panicky, &counting]);
        let (ctx, _) = message_ctx(Message::private("1", "")).await;
        registry.run_completion(&ctx).await;
        registry.run_exception(&ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(panic_message(&"plain"), "plain");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&7_u8), "non-string panic payload");
    }

    #[tokio::test]
    async fn failing_start_hook_names_plugin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let broken = Plugin::new("broken")
            .on_start(|_app| async { Err::<(), _>(std::io::Error::other("no db")) });
        let later = Plugin::new("later").on_start(move |_app| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(()) }
        });

        let registry = HookRegistry::collect([&broken, &later]);
        let err = registry.run_start(&test_app()).await.unwrap_err();
        assert_eq!(err.plugin, "broken");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_tasks_are_independent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let plugin = Plugin::new("p")
            .on_shutdown(|_app| async { Err::<(), _>(std::io::Error::other("x")) })
            .on_shutdown(move |_app| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(()) }
            });

        let registry = HookRegistry::collect([&plugin]);
        futures::future::join_all(registry.shutdown_tasks(&test_app())).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plugin_routers_dispatch() {
        let plugin = Plugin::new("demo").on_commands(["echo"], echo);
        let root = crate::router::compose(plugin.routers().to_vec(), &[".".to_string()]).unwrap();

        let (ctx, backend) = message_ctx(Message::private("1", ".echo hi there")).await;
        assert_eq!(root.handle(&ctx).await.unwrap(), Outcome::Processed);
        assert_eq!(backend.sent()[0].text, "hi there");
    }
}
