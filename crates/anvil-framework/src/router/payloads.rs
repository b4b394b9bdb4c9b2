use std::sync::Arc;

use serde_json::{Map, Value};

use crate::context::{Context, FieldValue, fields};
use crate::error::RouterError;
use crate::handler::{Handler, HandlerResult, Outcome};

use super::RouterClass;
use super::map::MapRouter;

/// Routes messages by their structured payload (button presses and the like).
///
/// Payloads are compared structurally: `{"a":1,"b":2}` and `{"b":2,"a":1}`
/// select the same handlers.
#[derive(Debug, Clone)]
pub struct PayloadsRouter {
    inner: MapRouter<String>,
}

impl PayloadsRouter {
    pub fn new(priority: i32) -> Self {
        Self {
            inner: MapRouter::new(priority),
        }
    }

    pub fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    pub fn add_handler<I>(&mut self, payloads: I, handler: Handler)
    where
        I: IntoIterator<Item = Value>,
    {
        for payload in payloads {
            self.inner.add_handler(canonical_key(&payload), handler.clone());
        }
    }

    pub fn handlers(&self, payload: &Value) -> &[Handler] {
        self.inner.handlers(&canonical_key(payload))
    }

    pub fn merge(sources: Vec<Self>) -> Result<Self, RouterError> {
        let inner = MapRouter::merge(
            sources.into_iter().map(|s| s.inner).collect(),
            RouterClass::Payloads,
        )?;
        Ok(Self { inner })
    }

    pub async fn handle(&self, ctx: &Arc<Context>) -> HandlerResult {
        let Some(payload) = ctx.message().and_then(|m| m.payload()) else {
            return Ok(Outcome::Skipped);
        };

        let key = canonical_key(&payload);
        if self.inner.handlers(&key).is_empty() {
            return Ok(Outcome::Skipped);
        }

        ctx.set_field(fields::PAYLOAD, FieldValue::Json(payload));
        self.inner.handle_keys(vec![key], ctx).await
    }
}

/// Serializes `value` with object keys in sorted order.
fn canonical_key(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::extractor::Payload;
    use crate::testing::message_ctx;
    use anvil_core::Message;

    #[test]
    fn keys_ignore_field_order() {
        assert_eq!(
            canonical_key(&json!({ "b": [{ "y": 1, "x": 2 }], "a": 1 })),
            canonical_key(&json!({ "a": 1, "b": [{ "x": 2, "y": 1 }] })),
        );
        assert_ne!(canonical_key(&json!("1")), canonical_key(&json!(1)));
    }

    #[tokio::test]
    async fn dispatches_on_payload() {
        let mut router = PayloadsRouter::new(4);
        router.add_handler(
            [json!({ "cmd": "buy", "qty": 1 })],
            Handler::new(|Payload(p): Payload<Value>| async move {
                Some(()).filter(|_| p["cmd"] == "buy")
            }),
        );

        let msg = Message::private("1", "")
            .with_raw(json!({ "payload": "{\"qty\":1,\"cmd\":\"buy\"}" }));
        let (ctx, _) = message_ctx(msg).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);
        assert_eq!(ctx.payload(), Some(json!({ "cmd": "buy", "qty": 1 })));

        let msg = Message::private("1", "").with_raw(json!({ "payload": { "cmd": "sell" } }));
        let (ctx, _) = message_ctx(msg).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Skipped);
        assert_eq!(ctx.payload(), None);

        let (ctx, _) = message_ctx(Message::private("1", "no payload")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Skipped);
    }
}
