//! Handler argument extraction.
//!
//! Any type implementing [`FromContext`] can be used as a handler argument.
//! Extraction that fails makes the handler report [`Outcome::Skipped`]
//! without being called; wrap an argument in `Option<T>` to accept updates
//! where it is missing.
//!
//! | Extractor        | Source                                              |
//! |------------------|-----------------------------------------------------|
//! | `Arc<Context>`   | the context itself                                  |
//! | [`Update`]       | the raw update                                      |
//! | [`Msg`]          | the message, fails for non-message updates          |
//! | [`Prefix`]       | the command prefix found by the commands router     |
//! | [`Command`]      | the lower-cased command name                        |
//! | [`Body`]         | the text after the command                          |
//! | [`Captures`]     | regex groups (index 0 is the whole match)           |
//! | [`Payload<T>`]   | the message payload, deserialized into `T`          |
//! | `Arc<AppHandle>` | application-wide configuration and storages         |
//! | [`BoxedBackend`] | the backend that received the update               |
//!
//! [`Outcome::Skipped`]: crate::Outcome::Skipped

use std::sync::Arc;

use serde::de::DeserializeOwned;

use anvil_core::{Message, Update};

use crate::app::AppHandle;
use crate::backend::BoxedBackend;
use crate::context::{Context, fields};
use crate::error::{ExtractError, ExtractResult};

/// Types that can be extracted from a [`Context`].
pub trait FromContext: Sized {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self>;
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

impl FromContext for Arc<Context> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx))
    }
}

impl FromContext for Update {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(ctx.update().clone())
    }
}

impl FromContext for Arc<AppHandle> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx.app()))
    }
}

impl FromContext for BoxedBackend {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx.backend()))
    }
}

/// The message being handled.
#[derive(Debug, Clone)]
pub struct Msg(pub Message);

impl FromContext for Msg {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.message().cloned().map(Msg).ok_or(ExtractError::NotAMessage)
    }
}

/// The command prefix that matched, as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix(pub String);

impl FromContext for Prefix {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.prefix()
            .map(Prefix)
            .ok_or(ExtractError::MissingField(fields::PREFIX))
    }
}

/// The matched command name, lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(pub String);

impl FromContext for Command {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.command()
            .map(Command)
            .ok_or(ExtractError::MissingField(fields::COMMAND))
    }
}

/// Trimmed text following the command. Empty when there is none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body(pub String);

impl FromContext for Body {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.body()
            .map(Body)
            .ok_or(ExtractError::MissingField(fields::BODY))
    }
}

/// Capture groups of the pattern that selected this handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures(pub Vec<Option<String>>);

impl Captures {
    /// Returns group `index`, or `None` if it did not participate.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|g| g.as_deref())
    }
}

impl FromContext for Captures {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.captures()
            .map(Captures)
            .ok_or(ExtractError::MissingField(fields::MATCH))
    }
}

/// The message payload deserialized into `T`.
///
/// Reads the payload recorded by the payloads router, falling back to the
/// message's own payload so it also works in catch-all handlers.
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

impl<T: DeserializeOwned> FromContext for Payload<T> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        let value = ctx
            .payload()
            .or_else(|| ctx.message().and_then(Message::payload))
            .ok_or(ExtractError::MissingField(fields::PAYLOAD))?;
        serde_json::from_value(value)
            .map(Payload)
            .map_err(|e| ExtractError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    use crate::context::FieldValue;
    use crate::testing::{message_ctx, raw_ctx};

    #[tokio::test]
    async fn message_extractors() {
        let (ctx, _) = message_ctx(Message::private("1", "hi")).await;
        let Msg(msg) = Msg::from_context(&ctx).unwrap();
        assert_eq!(msg.text, "hi");

        assert!(Command::from_context(&ctx).is_err());
        assert_eq!(Option::<Command>::from_context(&ctx).unwrap(), None);

        ctx.set_field(fields::COMMAND, FieldValue::Text("echo".into()));
        assert_eq!(Command::from_context(&ctx).unwrap(), Command("echo".into()));
    }

    #[tokio::test]
    async fn raw_update_has_no_message() {
        let (ctx, _) = raw_ctx(json!({ "type": "typing" })).await;
        assert!(matches!(Msg::from_context(&ctx), Err(ExtractError::NotAMessage)));
        assert!(Update::from_context(&ctx).is_ok());
    }

    #[tokio::test]
    async fn payload_deserializes() {
        #[derive(Deserialize)]
        struct Buy {
            item: String,
        }

        let msg = Message::private("1", "").with_raw(json!({ "payload": { "item": "apple" } }));
        let (ctx, _) = message_ctx(msg).await;
        let Payload(buy) = Payload::<Buy>::from_context(&ctx).unwrap();
        assert_eq!(buy.item, "apple");

        assert!(matches!(
            Payload::<u32>::from_context(&ctx),
            Err(ExtractError::Payload(_))
        ));
    }

    #[tokio::test]
    async fn captures_index_lookup() {
        let (ctx, _) = message_ctx(Message::private("1", "x")).await;
        ctx.set_field(
            fields::MATCH,
            FieldValue::Captures(vec![Some("ab".into()), None, Some("b".into())]),
        );
        let caps = Captures::from_context(&ctx).unwrap();
        assert_eq!(caps.get(0), Some("ab"));
        assert_eq!(caps.get(1), None);
        assert_eq!(caps.get(2), Some("b"));
        assert_eq!(caps.get(3), None);
    }
}
