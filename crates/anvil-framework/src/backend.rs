//! The backend contract.
//!
//! A [`Backend`] connects Anvil to one messaging platform. It produces
//! updates, enriches contexts and performs outgoing calls; the runtime
//! drives it through this lifecycle:
//!
//! ```text
//! on_start ──► acquire_updates (one task per backend) ──► on_shutdown
//!                   │
//!                   └── sink.push(update) ──► dispatch queue
//!                                                 │
//!                      setup_context(&mut ctx) ◄──┘ (per update)
//! ```
//!
//! ```rust,ignore
//! struct Console;
//!
//! #[async_trait]
//! impl Backend for Console {
//!     fn identity(&self) -> &str {
//!         "console"
//!     }
//!
//!     async fn acquire_updates(&self, sink: UpdateSink) -> BackendResult<()> {
//!         let mut lines = BufReader::new(tokio::io::stdin()).lines();
//!         while let Some(line) = lines.next_line().await.map_err(BackendError::transport)? {
//!             sink.push(Message::private("console", line)).await?;
//!         }
//!         Ok(())
//!     }
//!
//!     async fn perform_send(&self, _: &str, text: &str, _: &[Attachment], _: &Params) -> BackendResult<Value> {
//!         println!("{text}");
//!         Ok(Value::Null)
//!     }
//!
//!     async fn perform_api_call(&self, method: &str, _: &Params) -> BackendResult<Value> {
//!         Err(BackendError::Unsupported("api calls"))
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use anvil_core::{Attachment, BackendError, BackendResult, Update};

use crate::app::AppHandle;
use crate::context::Context;

/// Backend-specific parameters of an outgoing call.
pub type Params = Map<String, Value>;

/// A messaging platform integration.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Short, stable name of this backend instance.
    ///
    /// Part of every state key, so changing it orphans persisted states.
    fn identity(&self) -> &str;

    /// Called once before updates are acquired.
    async fn on_start(&self, _app: &AppHandle) -> BackendResult<()> {
        Ok(())
    }

    /// Produces updates until the source is exhausted or the sink closes.
    ///
    /// Runs in its own task. Returning ends this backend's contribution to
    /// the dispatch queue; the application stops once every backend has
    /// returned and the queue is drained.
    async fn acquire_updates(&self, sink: UpdateSink) -> BackendResult<()>;

    /// Adds backend-specific data to a freshly created context.
    async fn setup_context(&self, _ctx: &mut Context) -> BackendResult<()> {
        Ok(())
    }

    /// Sends one message. Text is already split to the platform limit.
    async fn perform_send(
        &self,
        target_id: &str,
        text: &str,
        attachments: &[Attachment],
        params: &Params,
    ) -> BackendResult<Value>;

    /// Calls a platform API method.
    async fn perform_api_call(&self, method: &str, params: &Params) -> BackendResult<Value>;

    /// Downloads the content of an attachment.
    async fn fetch_attachment(&self, _attachment: &Attachment) -> BackendResult<Vec<u8>> {
        Err(BackendError::Unsupported("fetch_attachment"))
    }

    /// Called once after dispatch has stopped.
    async fn on_shutdown(&self, _app: &AppHandle) -> BackendResult<()> {
        Ok(())
    }
}

/// A shared backend trait object.
pub type BoxedBackend = Arc<dyn Backend>;

/// An update waiting in the dispatch queue, with the backend it came from.
pub type QueuedUpdate = (Update, BoxedBackend);

/// Write end of the dispatch queue handed to [`Backend::acquire_updates`].
///
/// `push` waits while the queue is full, so a backend producing faster than
/// the application handles updates is slowed down.
#[derive(Clone)]
pub struct UpdateSink {
    tx: mpsc::Sender<QueuedUpdate>,
    backend: BoxedBackend,
}

impl UpdateSink {
    pub fn new(tx: mpsc::Sender<QueuedUpdate>, backend: BoxedBackend) -> Self {
        Self { tx, backend }
    }

    /// Enqueues an update. Fails with [`BackendError::Closed`] once the
    /// application stopped accepting updates.
    pub async fn push(&self, update: impl Into<Update>) -> BackendResult<()> {
        self.tx
            .send((update.into(), Arc::clone(&self.backend)))
            .await
            .map_err(|_| BackendError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the application stops accepting updates.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl std::fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSink")
            .field("backend", &self.backend.identity())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::Message;
    use tokio_test::{assert_err, assert_ok};

    use crate::testing::RecordingBackend;

    #[tokio::test]
    async fn sink_tags_updates_with_backend() {
        let (tx, mut rx) = mpsc::channel(4);
        let backend: BoxedBackend = Arc::new(RecordingBackend::default());
        let sink = UpdateSink::new(tx, backend);

        assert_ok!(sink.push(Message::private("1", "hi")).await);
        let (update, from) = rx.recv().await.unwrap();
        assert!(update.is_message());
        assert_eq!(from.identity(), "test");

        drop(rx);
        assert!(sink.is_closed());
        assert!(matches!(
            assert_err!(sink.push(Message::private("1", "late")).await),
            BackendError::Closed
        ));
    }

    #[tokio::test]
    async fn fetch_attachment_defaults_to_unsupported() {
        let backend = RecordingBackend::default();
        let attachment = Attachment::existing("a", anvil_core::AttachmentKind::Image);
        assert!(matches!(
            backend.fetch_attachment(&attachment).await,
            Err(BackendError::Unsupported(_))
        ));
    }
}
