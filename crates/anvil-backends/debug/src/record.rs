//! What the debug backend was asked to do.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use anvil_core::{Attachment, BackendError, BackendResult};
use anvil_framework::Params;

/// One `perform_send` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub target_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub params: Params,
}

/// One `perform_api_call` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: String,
    pub params: Params,
}

/// Queued responses per API method. Unscripted calls answer `null`.
#[derive(Debug, Default)]
pub(crate) struct Script {
    responses: HashMap<String, VecDeque<BackendResult<Value>>>,
}

impl Script {
    pub(crate) fn push(&mut self, method: &str, response: BackendResult<Value>) {
        self.responses
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn next(&mut self, method: &str) -> BackendResult<Value> {
        self.responses
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(Value::Null))
    }
}

/// Everything recorded by one backend instance.
#[derive(Debug, Default)]
pub(crate) struct Records {
    pub(crate) sent: Vec<SentMessage>,
    pub(crate) api_calls: Vec<ApiCall>,
    pub(crate) script: Script,
    pub(crate) files: HashMap<String, Vec<u8>>,
    pub(crate) started: bool,
    pub(crate) shut_down: bool,
}

impl Records {
    pub(crate) fn file(&self, attachment: &Attachment) -> BackendResult<Vec<u8>> {
        attachment
            .id
            .as_ref()
            .and_then(|id| self.files.get(id))
            .cloned()
            .ok_or_else(|| {
                BackendError::request("fetch_attachment", "no bytes registered for attachment")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scripted_responses_are_consumed_in_order() {
        let mut script = Script::default();
        script.push("get_me", Ok(json!({ "id": 1 })));
        script.push("get_me", Err(BackendError::request("get_me", "rate limited")));

        assert_eq!(script.next("get_me").unwrap(), json!({ "id": 1 }));
        assert!(script.next("get_me").is_err());
        assert_eq!(script.next("get_me").unwrap(), Value::Null);
        assert_eq!(script.next("other").unwrap(), Value::Null);
    }
}
