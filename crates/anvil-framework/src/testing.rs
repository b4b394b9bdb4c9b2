//! Test fixtures shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use anvil_core::{Attachment, BackendResult, Message, Update};

use crate::app::{AppHandle, DispatchConfig};
use crate::backend::{Backend, Params, UpdateSink};
use crate::context::Context;

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub target_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub params: Params,
}

/// Backend that records outgoing messages and produces no updates.
#[derive(Default)]
pub struct RecordingBackend {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingBackend {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn identity(&self) -> &str {
        "test"
    }

    async fn acquire_updates(&self, _sink: UpdateSink) -> BackendResult<()> {
        Ok(())
    }

    async fn perform_send(
        &self,
        target_id: &str,
        text: &str,
        attachments: &[Attachment],
        params: &Params,
    ) -> BackendResult<Value> {
        let mut sent = self.sent.lock();
        sent.push(SentMessage {
            target_id: target_id.to_string(),
            text: text.to_string(),
            attachments: attachments.to_vec(),
            params: params.clone(),
        });
        Ok(json!({ "message_id": sent.len() }))
    }

    async fn perform_api_call(&self, method: &str, params: &Params) -> BackendResult<Value> {
        Ok(json!({ "method": method, "params": params }))
    }
}

pub fn test_app() -> Arc<AppHandle> {
    Arc::new(AppHandle::new(
        DispatchConfig::default(),
        HashMap::new(),
        HashMap::new(),
    ))
}

pub async fn ctx_in(app: Arc<AppHandle>, update: Update) -> (Arc<Context>, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let ctx = Context::create(app, update, backend.clone())
        .await
        .expect("context");
    (Arc::new(ctx), backend)
}

pub async fn message_ctx_in(
    app: Arc<AppHandle>,
    message: Message,
) -> (Arc<Context>, Arc<RecordingBackend>) {
    ctx_in(app, Update::Message(message)).await
}

pub async fn message_ctx(message: Message) -> (Arc<Context>, Arc<RecordingBackend>) {
    message_ctx_in(test_app(), message).await
}

pub async fn raw_ctx(raw: Value) -> (Arc<Context>, Arc<RecordingBackend>) {
    ctx_in(test_app(), Update::Raw(raw)).await
}
