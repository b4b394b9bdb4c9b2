use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace};

use anvil_core::{Attachment, BackendError, BackendResult, Message, Update};
use anvil_framework::{AppHandle, Backend, Params, UpdateSink};

use crate::record::{ApiCall, Records, SentMessage};

/// State shared between the backend and its handles.
#[derive(Debug)]
struct Shared {
    inbox: Mutex<Option<mpsc::UnboundedSender<Update>>>,
    records: Mutex<Records>,
    sent_changed: Notify,
    next_message_id: AtomicU64,
}

/// A backend living entirely in the process.
///
/// Updates are injected through a [`DebugHandle`]; everything the
/// application sends is recorded instead of delivered.
#[derive(Debug)]
pub struct DebugBackend {
    identity: String,
    updates: Mutex<Option<mpsc::UnboundedReceiver<Update>>>,
    start_error: Option<String>,
    shutdown_error: Option<String>,
    shared: Arc<Shared>,
}

impl DebugBackend {
    pub fn new(identity: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            identity: identity.into(),
            updates: Mutex::new(Some(rx)),
            start_error: None,
            shutdown_error: None,
            shared: Arc::new(Shared {
                inbox: Mutex::new(Some(tx)),
                records: Mutex::new(Records::default()),
                sent_changed: Notify::new(),
                next_message_id: AtomicU64::new(1),
            }),
        }
    }

    /// Makes `on_start` fail with `message`.
    pub fn with_start_error(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Makes `on_shutdown` fail with `message`.
    pub fn with_shutdown_error(mut self, message: impl Into<String>) -> Self {
        self.shutdown_error = Some(message.into());
        self
    }

    pub fn handle(&self) -> DebugHandle {
        DebugHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for DebugBackend {
    fn default() -> Self {
        Self::new("debug")
    }
}

#[async_trait]
impl Backend for DebugBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn on_start(&self, _app: &AppHandle) -> BackendResult<()> {
        if let Some(message) = &self.start_error {
            return Err(BackendError::Other(message.clone()));
        }
        self.shared.records.lock().started = true;
        Ok(())
    }

    /// Forwards injected updates until every handle closed the inbox. Can
    /// run once per backend.
    async fn acquire_updates(&self, sink: UpdateSink) -> BackendResult<()> {
        let mut updates = self
            .updates
            .lock()
            .take()
            .ok_or_else(|| BackendError::Other("updates are already being acquired".into()))?;

        while let Some(update) = updates.recv().await {
            trace!(backend = %self.identity, kind = %update.kind(), "Forwarding update");
            sink.push(update).await?;
        }

        debug!(backend = %self.identity, "Debug inbox closed");
        Ok(())
    }

    async fn perform_send(
        &self,
        target_id: &str,
        text: &str,
        attachments: &[Attachment],
        params: &Params,
    ) -> BackendResult<Value> {
        let message_id = self.shared.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.shared.records.lock().sent.push(SentMessage {
            target_id: target_id.to_string(),
            text: text.to_string(),
            attachments: attachments.to_vec(),
            params: params.clone(),
        });
        self.shared.sent_changed.notify_waiters();
        Ok(json!({ "message_id": message_id }))
    }

    async fn perform_api_call(&self, method: &str, params: &Params) -> BackendResult<Value> {
        let mut records = self.shared.records.lock();
        records.api_calls.push(ApiCall {
            method: method.to_string(),
            params: params.clone(),
        });
        records.script.next(method)
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> BackendResult<Vec<u8>> {
        self.shared.records.lock().file(attachment)
    }

    async fn on_shutdown(&self, _app: &AppHandle) -> BackendResult<()> {
        self.shared.records.lock().shut_down = true;
        match &self.shutdown_error {
            Some(message) => Err(BackendError::Other(message.clone())),
            None => Ok(()),
        }
    }
}

/// Injects updates into a [`DebugBackend`] and inspects what it recorded.
#[derive(Debug, Clone)]
pub struct DebugHandle {
    shared: Arc<Shared>,
}

impl DebugHandle {
    /// Queues an update. Fails with [`BackendError::Closed`] after
    /// [`close`](Self::close).
    pub fn push_update(&self, update: impl Into<Update>) -> BackendResult<()> {
        self.shared
            .inbox
            .lock()
            .as_ref()
            .ok_or(BackendError::Closed)?
            .send(update.into())
            .map_err(|_| BackendError::Closed)
    }

    pub fn push_message(&self, message: Message) -> BackendResult<()> {
        self.push_update(message)
    }

    /// Queues a private text message from `sender_id`.
    pub fn push_text(&self, sender_id: &str, text: &str) -> BackendResult<()> {
        self.push_message(Message::private(sender_id, text))
    }

    /// Queues a text message posted by `sender_id` in `group_id`.
    pub fn push_group_text(&self, group_id: &str, sender_id: &str, text: &str) -> BackendResult<()> {
        self.push_message(Message::group(sender_id, group_id, text))
    }

    /// Queues a non-message platform event.
    pub fn push_raw(&self, event: Value) -> BackendResult<()> {
        self.push_update(Update::Raw(event))
    }

    /// Stops accepting updates. Queued updates are still delivered, then
    /// `acquire_updates` returns.
    pub fn close(&self) {
        self.shared.inbox.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inbox.lock().is_none()
    }

    /// Queues a response for the next call of `method`.
    pub fn respond(&self, method: &str, response: Value) {
        self.shared.records.lock().script.push(method, Ok(response));
    }

    /// Makes the next call of `method` fail.
    pub fn fail(&self, method: &str, message: &str) {
        self.shared
            .records
            .lock()
            .script
            .push(method, Err(BackendError::request(method, message)));
    }

    /// Bytes served by `fetch_attachment` for the attachment with `id`.
    pub fn add_file(&self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.shared
            .records
            .lock()
            .files
            .insert(id.into(), bytes.into());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.shared.records.lock().sent.clone()
    }

    /// Texts of all sent messages, in send order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.shared
            .records
            .lock()
            .sent
            .iter()
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut self.shared.records.lock().sent)
    }

    pub fn api_calls(&self) -> Vec<ApiCall> {
        self.shared.records.lock().api_calls.clone()
    }

    /// Waits until at least `count` messages were sent in total.
    pub async fn wait_for_sent(&self, count: usize) {
        loop {
            let changed = self.shared.sent_changed.notified();
            if self.shared.records.lock().sent.len() >= count {
                return;
            }
            changed.await;
        }
    }

    pub fn started(&self) -> bool {
        self.shared.records.lock().started
    }

    pub fn shut_down(&self) -> bool {
        self.shared.records.lock().shut_down
    }
}
