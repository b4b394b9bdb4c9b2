use std::sync::Arc;

use anvil_core::AttachmentKind;

use crate::context::Context;
use crate::error::RouterError;
use crate::handler::{Handler, HandlerResult, Outcome};

use super::RouterClass;
use super::map::MapRouter;

/// Routes messages by the kinds of their attachments.
///
/// Kinds are tried in attachment order, each kind once; the first kind with
/// a handler that does not skip wins.
#[derive(Debug, Clone)]
pub struct AttachmentsRouter {
    inner: MapRouter<AttachmentKind>,
}

impl AttachmentsRouter {
    pub fn new(priority: i32) -> Self {
        Self {
            inner: MapRouter::new(priority),
        }
    }

    pub fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    pub fn add_handler<I>(&mut self, kinds: I, handler: Handler)
    where
        I: IntoIterator<Item = AttachmentKind>,
    {
        for kind in kinds {
            self.inner.add_handler(kind, handler.clone());
        }
    }

    pub fn handlers(&self, kind: &AttachmentKind) -> &[Handler] {
        self.inner.handlers(kind)
    }

    pub fn merge(sources: Vec<Self>) -> Result<Self, RouterError> {
        let inner = MapRouter::merge(
            sources.into_iter().map(|s| s.inner).collect(),
            RouterClass::Attachments,
        )?;
        Ok(Self { inner })
    }

    pub async fn handle(&self, ctx: &Arc<Context>) -> HandlerResult {
        let Some(message) = ctx.message() else {
            return Ok(Outcome::Skipped);
        };

        let mut kinds: Vec<AttachmentKind> = Vec::with_capacity(message.attachments.len());
        for kind in message.attachment_kinds() {
            if !kinds.contains(kind) {
                kinds.push(kind.clone());
            }
        }
        if kinds.is_empty() {
            return Ok(Outcome::Skipped);
        }

        self.inner.handle_keys(kinds, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::testing::message_ctx;
    use anvil_core::{Attachment, Message};

    #[tokio::test]
    async fn later_kind_can_match() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut router = AttachmentsRouter::new(3);
        router.add_handler(
            [AttachmentKind::Image],
            Handler::new(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        let message = Message::private("1", "")
            .with_attachment(Attachment::existing("v", AttachmentKind::Voice))
            .with_attachment(Attachment::existing("i", AttachmentKind::Image));
        let (ctx, _) = message_ctx(message).await;

        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_kinds_are_tried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut router = AttachmentsRouter::new(3);
        router.add_handler(
            [AttachmentKind::Image],
            Handler::new(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Outcome::Skipped
                }
            }),
        );

        let message = Message::private("1", "")
            .with_attachment(Attachment::existing("a", AttachmentKind::Image))
            .with_attachment(Attachment::existing("b", AttachmentKind::Image));
        let (ctx, _) = message_ctx(message).await;

        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plain_text_is_skipped() {
        let mut router = AttachmentsRouter::new(3);
        router.add_handler([AttachmentKind::Image], Handler::new(|| async {}));

        let (ctx, _) = message_ctx(Message::private("1", "hello")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Skipped);
    }
}
