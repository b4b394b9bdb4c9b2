//! Per-update context.
//!
//! One [`Context`] is created for every update taken off the queue and shared
//! as `Arc<Context>` by all routers and handlers that look at that update.
//! It carries:
//!
//! - the update, the backend that received it and the [`AppHandle`]
//! - the sender's chat identifiers (`group_uid` / `user_uid`) and the
//!   persisted group and user state loaded for them
//! - dynamic fields written by routers: `prefix`, `command`, `body`, `match`
//!   and `payload` (see [`fields`])
//! - a typed extension map for backend- or plugin-specific data
//!
//! Interior state sits behind a mutex so handlers can write through a shared
//! reference. The lock is never held across an await point.
//!
//! # State identifiers
//!
//! | Update              | `group_uid`               | `user_uid`                          |
//! |---------------------|---------------------------|-------------------------------------|
//! | group message       | `{recipient}/{backend}`   | `{sender}/{recipient}/{backend}`    |
//! | private message     | empty                     | `{sender}/{backend}`                |
//! | raw update          | empty                     | empty                               |
//!
//! States are persisted under `_sg:{group_uid}` and `_su:{user_uid}` in the
//! storage named by [`DispatchConfig::storage`](crate::DispatchConfig::storage).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{trace, warn};

use anvil_core::{Attachment, BoxedStorage, Message, Update};

use crate::app::AppHandle;
use crate::backend::{BoxedBackend, Params};
use crate::error::{ContextError, ContextResult};

/// Maximum number of characters sent in one outgoing message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Storage key prefix for group state.
pub const GROUP_STATE_PREFIX: &str = "_sg:";

/// Storage key prefix for user state.
pub const USER_STATE_PREFIX: &str = "_su:";

/// Names of the dynamic fields written by the built-in routers.
pub mod fields {
    /// Command prefix as typed by the user.
    pub const PREFIX: &str = "prefix";
    /// Lower-cased command name.
    pub const COMMAND: &str = "command";
    /// Trimmed text after the command.
    pub const BODY: &str = "body";
    /// Capture groups of the regex that matched.
    pub const MATCH: &str = "match";
    /// Structured message payload.
    pub const PAYLOAD: &str = "payload";
}

/// Value of a dynamic context field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Captures(Vec<Option<String>>),
    Json(Value),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A recorded handler failure, shared with the exception hooks.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

#[derive(Default)]
struct Slots {
    group_state: String,
    user_state: String,
    default_target_id: Option<String>,
    fields: HashMap<String, FieldValue>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    exception: Option<SharedError>,
}

/// Everything a handler knows about the update it is processing.
pub struct Context {
    app: Arc<AppHandle>,
    update: Update,
    backend: BoxedBackend,
    storage: BoxedStorage,
    group_uid: String,
    user_uid: String,
    slots: Mutex<Slots>,
}

impl Context {
    /// Creates the context for `update` and loads its persisted states.
    pub async fn create(
        app: Arc<AppHandle>,
        update: Update,
        backend: BoxedBackend,
    ) -> ContextResult<Self> {
        let storage_name = &app.config().storage;
        let storage = app
            .storage(storage_name)
            .cloned()
            .ok_or_else(|| ContextError::MissingStorage(storage_name.clone()))?;

        let identity = backend.identity();
        let (group_uid, user_uid, default_target_id) = match &update {
            Update::Message(msg) if msg.is_group() => (
                format!("{}/{}", msg.recipient_id, identity),
                format!("{}/{}/{}", msg.sender_id, msg.recipient_id, identity),
                Some(msg.recipient_id.clone()),
            ),
            Update::Message(msg) => (
                String::new(),
                format!("{}/{}", msg.sender_id, identity),
                Some(msg.recipient_id.clone()),
            ),
            Update::Raw(_) => (String::new(), String::new(), None),
        };

        let (group_state, user_state) = futures::try_join!(
            load_state(&storage, GROUP_STATE_PREFIX, &group_uid),
            load_state(&storage, USER_STATE_PREFIX, &user_uid),
        )?;

        Ok(Self {
            app,
            update,
            backend,
            storage,
            group_uid,
            user_uid,
            slots: Mutex::new(Slots {
                group_state,
                user_state,
                default_target_id,
                ..Slots::default()
            }),
        })
    }

    // ─── Update and environment ──────────────────────────────────────────────

    pub fn update(&self) -> &Update {
        &self.update
    }

    /// The update as a message, if it is one.
    pub fn message(&self) -> Option<&Message> {
        self.update.as_message()
    }

    pub fn app(&self) -> &Arc<AppHandle> {
        &self.app
    }

    pub fn backend(&self) -> &BoxedBackend {
        &self.backend
    }

    /// The storage holding group and user states.
    pub fn storage(&self) -> &BoxedStorage {
        &self.storage
    }

    /// Group chat identifier; empty outside group chats.
    pub fn group_uid(&self) -> &str {
        &self.group_uid
    }

    /// Sender identifier, scoped to the group chat if there is one.
    pub fn user_uid(&self) -> &str {
        &self.user_uid
    }

    /// Where [`reply`](Self::reply) sends to.
    pub fn default_target_id(&self) -> Option<String> {
        self.slots.lock().default_target_id.clone()
    }

    /// Overrides the reply target, typically from
    /// [`Backend::setup_context`](crate::Backend::setup_context).
    pub fn set_default_target(&self, target_id: impl Into<String>) {
        self.slots.lock().default_target_id = Some(target_id.into());
    }

    // ─── Persisted states ────────────────────────────────────────────────────

    /// Group state as loaded or last set. Empty when never set.
    pub fn group_state(&self) -> String {
        self.slots.lock().group_state.clone()
    }

    /// User state as loaded or last set. Empty when never set.
    pub fn user_state(&self) -> String {
        self.slots.lock().user_state.clone()
    }

    /// Persists new states. `None` leaves a state untouched.
    ///
    /// Fails with [`ContextError::NoGroupChannel`] when a group state is given
    /// for an update outside a group chat; nothing is written in that case.
    ///
    /// The group state is written first. If the user state then cannot be
    /// saved, the previous group state is written back before the error is
    /// returned, and neither cached state changes. Storage offers no
    /// transactions, so a failure of that restore leaves the new group state
    /// stored; it is logged.
    pub async fn set_state(
        &self,
        group_state: Option<&str>,
        user_state: Option<&str>,
    ) -> ContextResult<()> {
        if group_state.is_some() && self.group_uid.is_empty() {
            return Err(ContextError::NoGroupChannel);
        }
        if user_state.is_some() && self.user_uid.is_empty() {
            return Err(ContextError::NoUserChannel);
        }

        let group_key = format!("{GROUP_STATE_PREFIX}{}", self.group_uid);
        if let Some(state) = group_state {
            self.storage.save(&group_key, Value::from(state)).await?;
        }
        if let Some(state) = user_state {
            let key = format!("{USER_STATE_PREFIX}{}", self.user_uid);
            if let Err(e) = self.storage.save(&key, Value::from(state)).await {
                if group_state.is_some() {
                    let previous = self.group_state();
                    if let Err(restore) = self.storage.save(&group_key, Value::from(previous)).await {
                        warn!(group_uid = %self.group_uid, error = %restore, "Failed to restore group state");
                    }
                }
                return Err(e.into());
            }
        }

        let mut slots = self.slots.lock();
        if let Some(state) = group_state {
            slots.group_state = state.to_string();
        }
        if let Some(state) = user_state {
            slots.user_state = state.to_string();
        }
        drop(slots);

        trace!(group_uid = %self.group_uid, user_uid = %self.user_uid, "States updated");
        Ok(())
    }

    // ─── Dynamic fields ──────────────────────────────────────────────────────

    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.slots.lock().fields.get(name).cloned()
    }

    pub fn set_field(&self, name: impl Into<String>, value: FieldValue) {
        self.slots.lock().fields.insert(name.into(), value);
    }

    pub fn remove_field(&self, name: &str) -> Option<FieldValue> {
        self.slots.lock().fields.remove(name)
    }

    fn text_field(&self, name: &str) -> Option<String> {
        match self.slots.lock().fields.get(name) {
            Some(FieldValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn prefix(&self) -> Option<String> {
        self.text_field(fields::PREFIX)
    }

    pub fn command(&self) -> Option<String> {
        self.text_field(fields::COMMAND)
    }

    pub fn body(&self) -> Option<String> {
        self.text_field(fields::BODY)
    }

    pub fn captures(&self) -> Option<Vec<Option<String>>> {
        match self.slots.lock().fields.get(fields::MATCH) {
            Some(FieldValue::Captures(groups)) => Some(groups.clone()),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<Value> {
        match self.slots.lock().fields.get(fields::PAYLOAD) {
            Some(FieldValue::Json(v)) => Some(v.clone()),
            _ => None,
        }
    }

    // ─── Extensions ──────────────────────────────────────────────────────────

    /// Stores a typed value. One value per type; later calls overwrite.
    pub fn insert_extension<T: Send + Sync + 'static>(&self, value: T) {
        self.slots
            .lock()
            .extensions
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn extension<T: Clone + 'static>(&self) -> Option<T> {
        self.slots
            .lock()
            .extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_extension<T: 'static>(&self) -> bool {
        self.slots
            .lock()
            .extensions
            .contains_key(&TypeId::of::<T>())
    }

    pub fn take_extension<T: 'static>(&self) -> Option<T> {
        self.slots
            .lock()
            .extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    // ─── Failure record ──────────────────────────────────────────────────────

    /// The error that aborted dispatch of this update, if any.
    pub fn exception(&self) -> Option<SharedError> {
        self.slots.lock().exception.clone()
    }

    /// Records the error that aborted dispatch. Called by the runtime before
    /// the exception hooks run.
    pub fn set_exception(&self, error: SharedError) {
        self.slots.lock().exception = Some(error);
    }

    // ─── Outgoing ────────────────────────────────────────────────────────────

    /// Replies with plain text to the default target.
    pub async fn reply(&self, text: impl AsRef<str>) -> ContextResult<Vec<Value>> {
        self.reply_with(text, Vec::new(), Params::new()).await
    }

    /// Replies to the default target with attachments and backend parameters.
    pub async fn reply_with(
        &self,
        text: impl AsRef<str>,
        attachments: Vec<Attachment>,
        params: Params,
    ) -> ContextResult<Vec<Value>> {
        let target = self.default_target_id().ok_or(ContextError::NoReplyTarget)?;
        self.send_message(&target, text, attachments, params).await
    }

    /// Sends a message, split into chunks of at most [`MAX_MESSAGE_CHARS`]
    /// characters.
    ///
    /// Attachments and `params` go with the last chunk only. Returns one
    /// backend response per chunk.
    pub async fn send_message(
        &self,
        target_id: &str,
        text: impl AsRef<str>,
        attachments: Vec<Attachment>,
        params: Params,
    ) -> ContextResult<Vec<Value>> {
        let chunks = split_text(text.as_ref(), MAX_MESSAGE_CHARS);
        let last = chunks.len() - 1;
        let empty = Params::new();

        let mut responses = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let response = if i == last {
                self.backend
                    .perform_send(target_id, chunk, &attachments, &params)
                    .await?
            } else {
                self.backend.perform_send(target_id, chunk, &[], &empty).await?
            };
            responses.push(response);
        }
        Ok(responses)
    }

    /// Calls a backend-specific API method.
    pub async fn request(&self, method: &str, params: Params) -> ContextResult<Value> {
        Ok(self.backend.perform_api_call(method, &params).await?)
    }

    /// Downloads an attachment's content through the backend.
    pub async fn fetch_attachment(&self, attachment: &Attachment) -> ContextResult<Vec<u8>> {
        if let Some(content) = &attachment.content {
            return Ok(content.clone());
        }
        Ok(self.backend.fetch_attachment(attachment).await?)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("update", &self.update.kind())
            .field("backend", &self.backend.identity())
            .field("group_uid", &self.group_uid)
            .field("user_uid", &self.user_uid)
            .finish_non_exhaustive()
    }
}

async fn load_state(storage: &BoxedStorage, prefix: &str, uid: &str) -> ContextResult<String> {
    if uid.is_empty() {
        return Ok(String::new());
    }
    let value = storage.load(&format!("{prefix}{uid}")).await?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default())
}

/// Splits `text` into pieces of at most `limit` characters.
///
/// Always returns at least one piece so that an empty text with attachments
/// is still sent.
pub(crate) fn split_text(text: &str, limit: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![""];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(i, _)| i);
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    use anvil_core::{Document, MemoryStorage, Storage, StorageError, StorageResult};

    use crate::app::{DEFAULT_STORAGE, DispatchConfig};
    use crate::testing::{message_ctx, message_ctx_in, raw_ctx, test_app};

    #[test]
    fn split_respects_char_boundaries() {
        assert_eq!(split_text("", 4), vec![""]);
        assert_eq!(split_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(split_text("абвгд", 2), vec!["аб", "вг", "д"]);
        assert_eq!(split_text("abcd", 4), vec!["abcd"]);
    }

    #[tokio::test]
    async fn group_message_identifiers() {
        let (ctx, _) = message_ctx(Message::group("u1", "g1", "hi")).await;
        assert_eq!(ctx.group_uid(), "g1/test");
        assert_eq!(ctx.user_uid(), "u1/g1/test");
        assert_eq!(ctx.default_target_id().as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn private_message_identifiers() {
        let (ctx, _) = message_ctx(Message::private("u1", "hi")).await;
        assert_eq!(ctx.group_uid(), "");
        assert_eq!(ctx.user_uid(), "u1/test");
        assert_eq!(ctx.default_target_id().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn states_persist_across_contexts() {
        let app = test_app();
        let (ctx, _) = message_ctx_in(app.clone(), Message::group("u1", "g1", "hi")).await;
        assert_eq!(ctx.group_state(), "");
        assert_ok!(ctx.set_state(Some("lobby"), Some("asked_name")).await);
        assert_eq!(ctx.group_state(), "lobby");

        let (next, _) = message_ctx_in(app.clone(), Message::group("u1", "g1", "bob")).await;
        assert_eq!(next.group_state(), "lobby");
        assert_eq!(next.user_state(), "asked_name");

        let storage = app.storage("default").unwrap();
        assert_eq!(
            storage.load("_su:u1/g1/test").await.unwrap(),
            Some(json!("asked_name"))
        );

        let (other, _) = message_ctx_in(app, Message::group("u2", "g1", "")).await;
        assert_eq!(other.group_state(), "lobby");
        assert_eq!(other.user_state(), "");
    }

    #[tokio::test]
    async fn group_state_requires_group_channel() {
        let (ctx, _) = message_ctx(Message::private("u1", "hi")).await;
        let err = ctx.set_state(Some("x"), Some("y")).await.unwrap_err();
        assert!(matches!(err, ContextError::NoGroupChannel));
        assert_eq!(ctx.user_state(), "");

        assert_ok!(ctx.set_state(None, Some("y")).await);
        assert_eq!(ctx.user_state(), "y");
    }

    /// Memory storage refusing every write to user states.
    struct NoUserWrites(MemoryStorage);

    #[async_trait::async_trait]
    impl Storage for NoUserWrites {
        async fn put(&self, key: &str, data: Document) -> StorageResult<Document> {
            if key.starts_with(USER_STATE_PREFIX) {
                return Err(StorageError::Backend("disk full".into()));
            }
            self.0.put(key, data).await
        }

        async fn get(&self, key: &str) -> StorageResult<Option<Document>> {
            self.0.get(key).await
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.0.delete(key).await
        }
    }

    #[tokio::test]
    async fn failed_user_write_restores_group_state() {
        let storage: BoxedStorage = Arc::new(NoUserWrites(MemoryStorage::default()));
        let app = Arc::new(AppHandle::new(
            DispatchConfig::default(),
            HashMap::from([(DEFAULT_STORAGE.to_string(), Arc::clone(&storage))]),
            HashMap::new(),
        ));
        let (ctx, _) = message_ctx_in(app, Message::group("u1", "g1", "hi")).await;

        assert_ok!(ctx.set_state(Some("lobby"), None).await);
        let err = ctx.set_state(Some("game"), Some("playing")).await.unwrap_err();
        assert!(matches!(err, ContextError::Storage(StorageError::Backend(_))));

        assert_eq!(ctx.group_state(), "lobby");
        assert_eq!(ctx.user_state(), "");
        assert_eq!(
            storage.load("_sg:g1/test").await.unwrap(),
            Some(json!("lobby"))
        );
    }

    #[tokio::test]
    async fn long_replies_are_split() {
        let (ctx, backend) = message_ctx(Message::private("u1", "hi")).await;
        let text = "x".repeat(MAX_MESSAGE_CHARS * 2 + 10);
        let mut params = Params::new();
        params.insert("silent".into(), json!(true));

        let responses = ctx
            .reply_with(&text, vec![Attachment::existing("a1", anvil_core::AttachmentKind::Image)], params)
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);

        let sent = backend.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].text.chars().count(), MAX_MESSAGE_CHARS);
        assert!(sent[0].attachments.is_empty());
        assert!(sent[1].params.is_empty());
        assert_eq!(sent[2].text.len(), 10);
        assert_eq!(sent[2].attachments.len(), 1);
        assert_eq!(sent[2].params.get("silent"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn raw_updates_cannot_reply() {
        let (ctx, _) = raw_ctx(json!({})).await;
        assert!(matches!(ctx.reply("hi").await, Err(ContextError::NoReplyTarget)));

        ctx.set_default_target("chan");
        assert_ok!(ctx.reply("hi").await);
    }

    #[tokio::test]
    async fn extensions_are_typed() {
        #[derive(Clone, PartialEq, Debug)]
        struct Locale(&'static str);

        let (ctx, _) = message_ctx(Message::private("u1", "hi")).await;
        assert!(!ctx.has_extension::<Locale>());
        ctx.insert_extension(Locale("en"));
        assert_eq!(ctx.extension::<Locale>(), Some(Locale("en")));
        assert_eq!(ctx.take_extension::<Locale>(), Some(Locale("en")));
        assert!(ctx.extension::<Locale>().is_none());
    }
}
