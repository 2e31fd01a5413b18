//! Child side: serves commands over this process's stdin/stdout.

use anyhow::{anyhow, Result};
use ipc_bridge::{CommandHandler, EventHandler, IpcBridge, StreamTransport};
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::info;

pub async fn run() -> Result<()> {
    let bridge = IpcBridge::new(StreamTransport::stdio()?)?;

    let reporter = bridge.clone();
    bridge.handle(
        "add",
        CommandHandler::from_fn(move |_, args| {
            let mut sum = 0i64;
            for (index, arg) in args.iter().enumerate() {
                sum += arg
                    .as_i64()
                    .ok_or_else(|| anyhow!("argument {} is not an integer", index))?;
                reporter.call("progress", vec![json!(index + 1), json!(args.len())])?;
            }
            Ok(json!(sum))
        }),
    )?;

    bridge.handle_once(
        "greet",
        CommandHandler::new(|event, args| async move {
            let name = args.first().and_then(Value::as_str).unwrap_or("stranger").to_string();
            info!("Greeting {} (origin {})", name, event.origin_id());
            Ok(json!(format!("hello {}, from process {}", name, std::process::id())))
        }),
    )?;

    bridge.handle(
        "fail",
        CommandHandler::from_fn(|_, _| Err(anyhow!("the child refused"))),
    )?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let shutdown_tx = Mutex::new(Some(shutdown_tx));
    bridge.once(
        "shutdown",
        EventHandler::new(move |event, _| {
            info!("Shutdown requested by process {}", event.origin_id());
            if let Some(tx) = shutdown_tx.lock().ok().and_then(|mut tx| tx.take()) {
                let _ = tx.send(());
            }
        }),
    )?;

    bridge.send("status", vec![json!("ready"), json!(std::process::id())])?;
    info!("Child ready");

    tokio::select! {
        _ = shutdown_rx => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    bridge.destroy()?;
    Ok(())
}
