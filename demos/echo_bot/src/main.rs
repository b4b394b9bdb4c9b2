//! Echo bot demo.
//!
//! Drives a plugin with a few commands through the in-process debug
//! backend: scripted messages go in, the replies are printed at the end.
//!
//! ```text
//! cargo run -p echo-bot
//! ```

use anvil::prelude::*;
use anvil_backend_debug::{DebugBackend, DebugHandle};
use serde_json::json;

/// Logs every message before the keyed routers see it.
async fn log_message(Msg(message): Msg) -> Outcome {
    info!(
        sender = %message.sender_id,
        chat = %message.recipient_id,
        text = %message.text,
        "Received message"
    );
    Outcome::Skipped
}

async fn echo(Body(body): Body) -> Option<String> {
    let body = body.trim().to_string();
    (!body.is_empty()).then_some(body)
}

async fn ping() -> &'static str {
    "pong"
}

async fn help() -> &'static str {
    "Commands: .echo <text>, .ping, .help"
}

/// Counts how many times the user talked to the bot, kept in user state.
async fn count(ctx: Arc<Context>) -> Result<String, ContextError> {
    let seen = ctx.user_state().parse::<u32>().unwrap_or(0) + 1;
    ctx.set_state(None, Some(seen.to_string().as_str())).await?;
    Ok(format!("seen {seen}"))
}

async fn fallback(Msg(message): Msg) -> String {
    format!("unknown input: {}", message.text)
}

fn echo_plugin() -> Plugin {
    Plugin::new("echo")
        .with_description("Echo, ping and help commands")
        .on_commands(["echo"], echo)
        .on_commands(["ping"], ping)
        .on_commands(["help"], help)
        .on_commands(["count"], count)
        .on_any_message(log_message)
        .on_any_unprocessed_message(fallback)
        .on_start(|_app| async {
            info!("Echo plugin started");
            Ok::<_, BoxError>(())
        })
        .on_exception(|ctx: Arc<Context>| async move {
            if let Some(e) = ctx.exception() {
                error!(error = %e, "Handler failed");
            }
            Ok::<_, BoxError>(())
        })
        .on_shutdown(|_app| async {
            info!("Echo plugin stopped");
            Ok::<_, BoxError>(())
        })
}

/// Builds the app around a debug backend.
///
/// Updates are handled one at a time, so the `.count` replies of one user
/// observe each other's state writes.
fn build_app() -> anyhow::Result<(App, DebugHandle)> {
    let mut defaults = AnvilConfig::default();
    defaults.dispatch.concurrency = 1;
    let mut app = App::builder().merge(defaults).build()?;
    app.add_plugin(echo_plugin())?;

    let backend = DebugBackend::new("debug");
    let handle = backend.handle();
    app.add_backend(backend);
    Ok((app, handle))
}

fn push_script(handle: &DebugHandle) -> anyhow::Result<()> {
    handle.push_text("alice", ".help")?;
    handle.push_text("alice", ".echo hello anvil")?;
    handle.push_text("alice", "/ping")?;
    handle.push_group_text("lobby", "bob", ".count")?;
    handle.push_group_text("lobby", "bob", ".count")?;
    handle.push_text("alice", "what is this?")?;
    handle.push_raw(json!({ "type": "member_joined", "user": "carol" }))?;
    handle.close();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (app, handle) = build_app()?;
    push_script(&handle)?;

    // The debug inbox is closed, so the run ends once every update was handled.
    app.run_until(std::future::pending::<()>()).await?;

    for sent in handle.sent() {
        println!("-> {}: {}", sent.target_id, sent.text);
    }
    Ok(())
}
