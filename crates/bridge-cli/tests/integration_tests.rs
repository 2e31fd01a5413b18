//! Integration tests for the ipc-bridge demo binary.
//!
//! These spawn the real binary, either as a full parent run or as a child
//! driven from the test over framed stdio.

use ipc_bridge::{BridgeError, EventHandler, IpcBridge, StreamTransport};
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

const RUN_TIMEOUT: Duration = Duration::from_secs(30);

fn binary() -> &'static str {
    env!("CARGO_BIN_EXE_ipc-bridge")
}

#[tokio::test]
async fn test_parent_run_reports_every_outcome() {
    let output = tokio::time::timeout(
        RUN_TIMEOUT,
        Command::new(binary())
            .args(["parent", "--timeout-ms", "300"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .expect("parent run timed out")
    .expect("failed to run parent");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "parent exited with {}: {}", output.status, stdout);

    let lines: Vec<&str> = stdout.lines().collect();
    let has = |prefix: &str| lines.iter().any(|line| line.starts_with(prefix));

    assert!(lines.contains(&"add(2, 3, 4) = 9"), "stdout: {}", stdout);
    assert!(lines.contains(&"progress: 3/3"), "stdout: {}", stdout);
    assert!(has("greet #1: \"hello parent"), "stdout: {}", stdout);
    assert!(
        lines
            .iter()
            .any(|line| line.starts_with("greet #2 failed:") && line.contains("timed out")),
        "stdout: {}",
        stdout
    );
    assert!(lines.contains(&"fail: the child refused"), "stdout: {}", stdout);
    assert!(
        lines
            .iter()
            .any(|line| line.starts_with("missing:") && line.contains("timed out")),
        "stdout: {}",
        stdout
    );
}

#[tokio::test]
async fn test_child_serves_commands_over_stdio() {
    let mut command = Command::new(binary());
    command.arg("child").stderr(Stdio::null()).kill_on_drop(true);

    let (transport, mut child) = StreamTransport::spawn_child(command).expect("spawn child");
    let bridge = IpcBridge::builder(transport)
        .response_timeout_ms(2_000)
        .build()
        .unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let p = progress.clone();
    bridge
        .receive(
            "progress",
            EventHandler::new(move |_, args| p.lock().unwrap().push(args.to_vec())),
        )
        .unwrap();

    let sum = tokio::time::timeout(
        RUN_TIMEOUT,
        bridge.invoke("add", vec![json!(1), json!(2)]).unwrap(),
    )
    .await
    .expect("add timed out")
    .unwrap();
    assert_eq!(sum, json!(3));

    // Calls are written before the response, so they are dispatched first.
    assert_eq!(
        *progress.lock().unwrap(),
        vec![vec![json!(1), json!(2)], vec![json!(2), json!(2)]]
    );

    let err = bridge
        .invoke("add", vec![json!("one")])
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::RemoteHandler { .. }));
    assert_eq!(err.to_string(), "argument 0 is not an integer");

    let greeting: Value = bridge.invoke("greet", vec![json!("tests")]).unwrap().await.unwrap();
    assert!(greeting.as_str().unwrap().starts_with("hello tests"));

    // Destroying drops the transport, which closes the child's stdin after the
    // queued shutdown event is written.
    bridge.send("shutdown", vec![]).unwrap();
    bridge.destroy().unwrap();

    let status = tokio::time::timeout(RUN_TIMEOUT, child.wait())
        .await
        .expect("child did not exit")
        .unwrap();
    assert!(status.success());
}
