//! The dispatch loop.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use anvil_runtime::App;
//!
//! // Loads anvil.toml from the current directory if there is one
//! let mut app = App::new();
//! app.add_plugin(echo_plugin())?;
//! app.add_backend(MyBackend::connect().await?);
//! app.run().await?;
//! ```
//!
//! # Lifecycle
//!
//! 1. Every storage is initialized.
//! 2. Start hooks of all plugins run in registration order; the first
//!    failure aborts the start.
//! 3. Every backend's `on_start` runs, then one producer task per backend
//!    feeds a shared queue holding at most `dispatch.concurrency` updates.
//! 4. For every update a permit is taken from a semaphore of the same size,
//!    a [`Context`] is built and handed to the backend's `setup_context`,
//!    and the root router runs in its own task. The permit is released when
//!    that task ends, however it ends.
//! 5. On a shutdown signal in-flight tasks are cancelled. When all backends
//!    stop producing instead, in-flight tasks are allowed to finish.
//! 6. Backend teardowns and shutdown hooks run concurrently; one failing
//!    does not stop the others. A backend failing to start triggers the
//!    same teardown for the backends started before it.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all, try_join_all};
use tokio::signal;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use anvil_core::{BackendError, BoxedStorage, MemoryStorage, Storage, Update};
use anvil_framework::{
    AppHandle, Backend, BoxedBackend, Context, HandlerResult, HookRegistry, ListRouter, Plugin,
    QueuedUpdate, UpdateSink, compose, panic_message,
};

use crate::config::{AnvilConfig, ConfigLoader, ConfigResult, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// A bot application: plugins, backends and storages around one dispatch
/// loop.
pub struct App {
    config: AnvilConfig,
    plugins: Vec<Plugin>,
    /// Composed from the routers of every plugin, rebuilt on registration.
    root: Arc<ListRouter>,
    backends: Vec<BoxedBackend>,
    storages: HashMap<String, BoxedStorage>,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl App {
    /// Creates an application configured from the default locations,
    /// falling back to defaults when loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                AnvilConfig::default()
            });

        Self::with_valid_config(config)
    }

    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Creates an application from an already loaded configuration and
    /// initializes logging from it.
    pub fn from_config(config: AnvilConfig) -> ConfigResult<Self> {
        validate_config(&config)?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: AnvilConfig) -> Self {
        logging::init_from_config(&config.logging);

        let mut storages = HashMap::new();
        storages.insert(
            config.dispatch.storage.clone(),
            Arc::new(MemoryStorage::new(config.storage.max_keys)) as BoxedStorage,
        );

        info!(
            log_level = %config.logging.level,
            concurrency = config.dispatch.concurrency,
            prefixes = ?config.dispatch.prefixes,
            "Application configured"
        );

        Self {
            permits: Arc::new(Semaphore::new(config.dispatch.concurrency)),
            config,
            plugins: Vec::new(),
            root: Arc::new(ListRouter::default()),
            backends: Vec::new(),
            storages,
            tasks: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &AnvilConfig {
        &self.config
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// The router every update is dispatched through.
    pub fn root(&self) -> &ListRouter {
        &self.root
    }

    /// Registers a plugin and recomposes the root router.
    ///
    /// Fails, leaving the application unchanged, if a plugin of the same
    /// name is registered or the routers cannot be composed.
    pub fn add_plugin(&mut self, plugin: Plugin) -> RuntimeResult<&mut Self> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(RuntimeError::PluginExists(plugin.name().to_string()));
        }

        self.plugins.push(plugin);
        let routers = self
            .plugins
            .iter()
            .flat_map(|p| p.routers().iter().cloned())
            .collect();
        match compose(routers, &self.config.dispatch.prefixes) {
            Ok(root) => self.root = Arc::new(root),
            Err(e) => {
                self.plugins.pop();
                return Err(e.into());
            }
        }

        if let Some(plugin) = self.plugins.last() {
            info!(
                plugin = plugin.name(),
                routers = plugin.routers().len(),
                "Registered plugin"
            );
        }
        Ok(self)
    }

    pub fn add_backend(&mut self, backend: impl Backend) -> &mut Self {
        self.add_shared_backend(Arc::new(backend))
    }

    /// Registers a backend the caller keeps a reference to.
    pub fn add_shared_backend(&mut self, backend: BoxedBackend) -> &mut Self {
        info!(backend = backend.identity(), "Registered backend");
        self.backends.push(backend);
        self
    }

    /// Registers a storage under `name`, replacing any storage of that name.
    /// The storage named by `dispatch.storage` holds group and user states.
    pub fn add_storage<S: Storage + 'static>(
        &mut self,
        name: impl Into<String>,
        storage: S,
    ) -> &mut Self {
        self.storages.insert(name.into(), Arc::new(storage));
        self
    }

    /// Permits not held by an in-flight update.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Updates currently being handled.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Runs until Ctrl+C or SIGTERM, or until every backend stopped.
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("Anvil is running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` resolves, or until every backend stopped.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let (app, hooks) = self.start().await?;

        let (tx, rx) = mpsc::channel(self.config.dispatch.concurrency);
        let mut producers = self.spawn_producers(&tx);
        drop(tx);

        let cancel = CancellationToken::new();
        tokio::select! {
            () = shutdown => {
                info!(in_flight = self.in_flight(), "Shutdown requested, cancelling in-flight updates");
                cancel.cancel();
            }
            () = self.dispatch_loop(rx, &app, &hooks, &cancel) => {
                info!(in_flight = self.in_flight(), "All backends stopped, draining in-flight updates");
            }
        }

        producers.shutdown().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();

        self.stop(&app, &hooks).await;
        Ok(())
    }

    async fn start(&self) -> RuntimeResult<(Arc<AppHandle>, Arc<HookRegistry>)> {
        try_join_all(self.storages.iter().map(|(name, storage)| async move {
            storage
                .init()
                .await
                .map_err(|source| RuntimeError::StorageInit {
                    name: name.clone(),
                    source,
                })
        }))
        .await?;

        let app = Arc::new(AppHandle::new(
            self.config.dispatch.clone(),
            self.storages.clone(),
            self.config.plugins.clone(),
        ));

        let hooks = Arc::new(HookRegistry::collect(&self.plugins));
        hooks.run_start(&app).await?;

        for (started, backend) in self.backends.iter().enumerate() {
            if let Err(source) = backend.on_start(&app).await {
                error!(backend = backend.identity(), error = %source, "Backend failed to start");
                self.teardown(&self.backends[..started], &app, &hooks).await;
                return Err(RuntimeError::BackendStart {
                    backend: backend.identity().to_string(),
                    source,
                });
            }
            debug!(backend = backend.identity(), "Backend started");
        }

        info!(
            plugins = self.plugins.len(),
            backends = self.backends.len(),
            storages = self.storages.len(),
            "Anvil started"
        );
        Ok((app, hooks))
    }

    fn spawn_producers(&self, tx: &mpsc::Sender<QueuedUpdate>) -> JoinSet<()> {
        let mut producers = JoinSet::new();
        for backend in &self.backends {
            let sink = UpdateSink::new(tx.clone(), Arc::clone(backend));
            let backend = Arc::clone(backend);
            producers.spawn(async move {
                match backend.acquire_updates(sink).await {
                    Ok(()) | Err(BackendError::Closed) => {
                        debug!(backend = backend.identity(), "Backend stopped producing updates");
                    }
                    Err(e) => {
                        error!(backend = backend.identity(), error = %e, "Backend failed while producing updates");
                    }
                }
            });
        }
        producers
    }

    /// Returns once the queue is closed and empty.
    async fn dispatch_loop(
        &self,
        mut rx: mpsc::Receiver<QueuedUpdate>,
        app: &Arc<AppHandle>,
        hooks: &Arc<HookRegistry>,
        cancel: &CancellationToken,
    ) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let Some((update, backend)) = rx.recv().await else {
                break;
            };

            let Some(ctx) = build_context(app, update, backend).await else {
                continue;
            };

            let span = info_span!(
                "dispatch",
                update_kind = %ctx.update().kind(),
                backend = %ctx.backend().identity(),
            );
            let task = process(
                Arc::clone(&self.root),
                Arc::clone(hooks),
                ctx,
                cancel.clone(),
                permit,
            );
            self.tasks.spawn(task.instrument(span));
        }
    }

    async fn stop(&self, app: &Arc<AppHandle>, hooks: &HookRegistry) {
        self.teardown(&self.backends, app, hooks).await;
        info!("Anvil stopped");
    }

    /// Shuts down `backends` and runs every shutdown hook, all at once.
    /// Failures and panics are logged and do not stop the others.
    async fn teardown(&self, backends: &[BoxedBackend], app: &Arc<AppHandle>, hooks: &HookRegistry) {
        let mut teardown: Vec<BoxFuture<'static, ()>> = backends
            .iter()
            .map(|backend| {
                let backend = Arc::clone(backend);
                let app = Arc::clone(app);
                async move {
                    if let Err(e) = backend.on_shutdown(&app).await {
                        error!(backend = backend.identity(), error = %e, "Backend shutdown failed");
                    }
                }
                .boxed()
            })
            .collect();
        teardown.extend(hooks.shutdown_tasks(app));

        let panicked = join_all(
            teardown
                .into_iter()
                .map(|task| AssertUnwindSafe(task).catch_unwind()),
        )
        .await
        .into_iter()
        .filter(Result::is_err)
        .count();
        if panicked > 0 {
            error!(panicked, "Shutdown tasks panicked");
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("plugins", &self.plugins.iter().map(Plugin::name).collect::<Vec<_>>())
            .field(
                "backends",
                &self.backends.iter().map(|b| b.identity()).collect::<Vec<_>>(),
            )
            .field("storages", &self.storages.keys().collect::<Vec<_>>())
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

/// Builds the context of one update. Failures are logged and the update
/// is dropped.
async fn build_context(
    app: &Arc<AppHandle>,
    update: Update,
    backend: BoxedBackend,
) -> Option<Arc<Context>> {
    let mut ctx = match Context::create(Arc::clone(app), update, Arc::clone(&backend)).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(backend = backend.identity(), error = %e, "Failed to build context, update dropped");
            return None;
        }
    };

    if let Err(e) = backend.setup_context(&mut ctx).await {
        warn!(backend = backend.identity(), error = %e, "Backend rejected context, update dropped");
        return None;
    }

    Some(Arc::new(ctx))
}

/// Runs one update to completion or cancellation. Holds the permit for
/// as long as it runs.
async fn process(
    root: Arc<ListRouter>,
    hooks: Arc<HookRegistry>,
    ctx: Arc<Context>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => debug!("Update cancelled"),
        () = handle_update(&root, &hooks, &ctx) => {}
    }
}

async fn handle_update(root: &ListRouter, hooks: &HookRegistry, ctx: &Arc<Context>) {
    let result: HandlerResult = AssertUnwindSafe(root.handle(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(RuntimeError::HandlerPanicked(panic_message(&*panic)).into()));

    match result {
        Ok(outcome) => {
            trace!(processed = outcome.is_processed(), "Update handled");
            hooks.run_completion(ctx).await;
        }
        Err(error) => {
            error!(user = ctx.user_uid(), error = %error, "Handler failed");
            ctx.set_exception(Arc::from(error));
            hooks.run_exception(ctx).await;
        }
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c() => {}
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            // Without a signal the application runs until its backends stop.
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// AppBuilder
// =============================================================================

/// Builds an [`App`] from a customized [`ConfigLoader`].
///
/// ```rust,ignore
/// let app = App::builder()
///     .config_file("deploy/anvil.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct AppBuilder {
    config_loader: ConfigLoader,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Configuration built in code, below files and environment variables.
    pub fn merge(mut self, config: AnvilConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<App> {
        let config = self.config_loader.load()?;
        Ok(App::with_valid_config(config))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
