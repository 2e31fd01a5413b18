//! Parent side: spawns the child and drives every interaction pattern.

use anyhow::{Context, Result};
use ipc_bridge::{EventHandler, IpcBridge, StreamTransport};
use serde_json::json;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(timeout_ms: i64, debug: bool) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let mut command = Command::new(exe);
    command.arg("child").stderr(Stdio::inherit()).kill_on_drop(true);
    if debug {
        command.arg("--debug");
    }

    let (transport, mut child) = StreamTransport::spawn_child(command)?;
    let bridge = IpcBridge::builder(transport)
        .response_timeout_ms(timeout_ms)
        .build()?;
    info!(
        "Spawned child {:?}, response timeout {:?}",
        child.id(),
        bridge.response_timeout()
    );

    // Listeners are registered before the first await, so the single-threaded
    // runtime cannot dispatch the child's ready event ahead of them.
    let (ready_tx, ready_rx) = oneshot::channel();
    let ready_tx = Mutex::new(Some(ready_tx));
    bridge.once(
        "status",
        EventHandler::new(move |event, args| {
            info!("Child {} reported {:?}", event.origin_id(), args);
            if let Some(tx) = ready_tx.lock().ok().and_then(|mut tx| tx.take()) {
                let _ = tx.send(());
            }
        }),
    )?;
    bridge.receive(
        "progress",
        EventHandler::new(|_, args| {
            if let [done, total] = args {
                println!("progress: {}/{}", done, total);
            }
        }),
    )?;

    tokio::time::timeout(READY_TIMEOUT, ready_rx)
        .await
        .context("Child never reported ready")?
        .context("Child bridge went away before ready")?;

    let sum: i64 = bridge.invoke_as("add", vec![json!(2), json!(3), json!(4)]).await?;
    println!("add(2, 3, 4) = {}", sum);

    for attempt in 1..=2 {
        match bridge.invoke("greet", vec![json!("parent")])?.await {
            Ok(greeting) => println!("greet #{}: {}", attempt, greeting),
            Err(e) => println!("greet #{} failed: {}", attempt, e),
        }
    }

    match bridge.invoke("fail", vec![])?.await {
        Ok(value) => warn!("fail unexpectedly returned {}", value),
        Err(e) => println!("fail: {}", e),
    }

    match bridge.invoke("missing", vec![])?.await {
        Ok(value) => warn!("missing unexpectedly returned {}", value),
        Err(e) => println!("missing: {}", e),
    }

    bridge.send("shutdown", vec![])?;
    bridge.destroy()?;

    let status = child.wait().await?;
    info!("Child exited with {}", status);
    Ok(())
}
