//! Prefix + command matching.

use std::borrow::Cow;
use std::sync::Arc;

use regex::Regex;
use tracing::{trace, warn};

use crate::context::{Context, FieldValue, fields};
use crate::error::RouterError;
use crate::handler::{Handler, HandlerResult, Outcome};

use super::map::MapRouter;
use super::RouterClass;

/// Routes messages like `/echo hello` by their lower-cased command name.
///
/// On a match the router writes `prefix`, `command`, `body` and `match` to
/// the context before calling the command's handlers. Text matching no
/// registered prefix and command leaves the context untouched.
#[derive(Debug, Clone)]
pub struct CommandsRouter {
    inner: MapRouter<String>,
    matcher: Option<Regex>,
}

impl CommandsRouter {
    pub fn new(priority: i32) -> Self {
        Self {
            inner: MapRouter::new(priority),
            matcher: None,
        }
    }

    pub fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    /// Registers `handler` for each of `commands` (case-insensitive).
    pub fn add_handler<I, S>(&mut self, commands: I, handler: Handler)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for command in commands {
            self.inner
                .add_handler(command.as_ref().to_lowercase(), handler.clone());
        }
        self.matcher = None;
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }

    pub fn handlers(&self, command: &str) -> &[Handler] {
        self.inner.handlers(&command.to_lowercase())
    }

    pub fn merge(sources: Vec<Self>) -> Result<Self, RouterError> {
        let inner = MapRouter::merge(
            sources.into_iter().map(|s| s.inner).collect(),
            RouterClass::Commands,
        )?;
        Ok(Self {
            inner,
            matcher: None,
        })
    }

    /// Compiles the matcher for `prefixes` ahead of dispatch.
    pub fn prepare(&mut self, prefixes: &[String]) {
        self.matcher = build_matcher(prefixes, &self.commands());
    }

    pub fn is_prepared(&self) -> bool {
        self.matcher.is_some()
    }

    pub async fn handle(&self, ctx: &Arc<Context>) -> HandlerResult {
        let Some(message) = ctx.message() else {
            return Ok(Outcome::Skipped);
        };

        let matcher = match &self.matcher {
            Some(matcher) => Cow::Borrowed(matcher),
            None => match build_matcher(&ctx.app().config().prefixes, &self.commands()) {
                Some(matcher) => Cow::Owned(matcher),
                None => return Ok(Outcome::Skipped),
            },
        };

        let Some(caps) = matcher.captures(&message.text) else {
            return Ok(Outcome::Skipped);
        };

        let prefix = caps.name("prefix").map_or("", |m| m.as_str()).to_string();
        let command = caps
            .name("command")
            .map_or(String::new(), |m| m.as_str().to_lowercase());
        let body = caps.name("body").map_or("", |m| m.as_str().trim()).to_string();
        let groups = caps
            .iter()
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect();
        drop(caps);

        trace!(prefix = %prefix, command = %command, "Command matched");
        ctx.set_field(fields::PREFIX, FieldValue::Text(prefix));
        ctx.set_field(fields::COMMAND, FieldValue::Text(command.clone()));
        ctx.set_field(fields::BODY, FieldValue::Text(body));
        ctx.set_field(fields::MATCH, FieldValue::Captures(groups));

        self.inner.handle_keys(vec![command], ctx).await
    }
}

/// Builds `^\s*(prefix)\s*(command)(\s+body)?\s*$`, case-insensitive.
///
/// Alternatives are sorted longest first so that `echoall` is not read as
/// `echo` followed by `all`.
fn build_matcher(prefixes: &[String], commands: &[&str]) -> Option<Regex> {
    if prefixes.is_empty() || commands.is_empty() {
        return None;
    }

    let alternation = |items: Vec<&str>| {
        let mut items = items;
        items.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        items
            .into_iter()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|")
    };

    let prefixes = alternation(prefixes.iter().map(String::as_str).collect());
    let commands = alternation(commands.to_vec());
    let pattern = format!(
        r"(?is)^\s*(?P<prefix>{prefixes})\s*(?P<command>{commands})(?:\s+(?P<body>.*?))?\s*$"
    );

    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(error = %e, "Failed to compile command matcher");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::extractor::{Body, Command, Prefix};
    use crate::testing::message_ctx;
    use anvil_core::Message;

    fn prefixes(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn matches_case_insensitively() {
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let mut router = CommandsRouter::new(6);
        router.add_handler(
            ["echo"],
            Handler::new(move |Prefix(p): Prefix, Command(c): Command, Body(b): Body| {
                let slot = slot.clone();
                async move {
                    *slot.lock() = Some((p, c, b));
                }
            }),
        );
        router.prepare(&prefixes(&["."]));

        let (ctx, _) = message_ctx(Message::private("1", ".ECHO hello")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);
        assert_eq!(
            seen.lock().clone(),
            Some((".".to_string(), "echo".to_string(), "hello".to_string()))
        );
        assert_eq!(ctx.command().as_deref(), Some("echo"));
        assert_eq!(ctx.body().as_deref(), Some("hello"));
        assert_eq!(ctx.prefix().as_deref(), Some("."));
    }

    #[tokio::test]
    async fn unmatched_text_leaves_fields_unset() {
        let mut router = CommandsRouter::new(6);
        router.add_handler(["echo"], Handler::new(|| async {}));
        router.prepare(&prefixes(&["."]));

        for text in ["echo hi", "/echo hi", ".echoes", ".ping", ""] {
            let (ctx, _) = message_ctx(Message::private("1", text)).await;
            assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Skipped, "{text:?}");
            assert_eq!(ctx.command(), None);
            assert_eq!(ctx.body(), None);
            assert_eq!(ctx.prefix(), None);
            assert_eq!(ctx.captures(), None);
        }
    }

    #[tokio::test]
    async fn body_is_trimmed_and_may_be_empty() {
        let mut router = CommandsRouter::new(6);
        router.add_handler(["say", "sayall"], Handler::new(|| async {}));
        router.prepare(&prefixes(&["/", "!!"]));

        let (ctx, _) = message_ctx(Message::private("1", "  !!SayAll   two\nlines  ")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);
        assert_eq!(ctx.prefix().as_deref(), Some("!!"));
        assert_eq!(ctx.command().as_deref(), Some("sayall"));
        assert_eq!(ctx.body().as_deref(), Some("two\nlines"));

        let (ctx, _) = message_ctx(Message::private("1", "/say")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);
        assert_eq!(ctx.body().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn unprepared_router_uses_configured_prefixes() {
        let mut router = CommandsRouter::new(6);
        router.add_handler(["ping"], Handler::new(|| async {}));
        assert!(!router.is_prepared());

        let (ctx, _) = message_ctx(Message::private("1", "/ping")).await;
        assert_eq!(router.handle(&ctx).await.unwrap(), Outcome::Processed);
        assert!(!router.is_prepared());
    }

    #[test]
    fn merge_combines_commands() {
        let mut a = CommandsRouter::new(6);
        a.add_handler(["Echo"], Handler::new(|| async {}));
        let mut b = CommandsRouter::new(6);
        b.add_handler(["echo", "ping"], Handler::new(|| async {}));

        let merged = CommandsRouter::merge(vec![a, b]).unwrap();
        assert_eq!(merged.priority(), None);
        assert_eq!(merged.commands(), ["echo", "ping"]);
        assert_eq!(merged.handlers("ECHO").len(), 2);
    }
}
