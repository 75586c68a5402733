#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Command, Output};

use mtlipc::frame::{self, FrameWriter, MessageId, ResponseKind};

const BIN: &str = env!("CARGO_BIN_EXE_mtlipc");

fn mtlipc(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("mtlipc should run")
}

/// Arguments that make mtlipc drive its own stub controller.
fn stub_remote<'a>(extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec!["--program", BIN, "--arg", "stub"];
    for arg in extra {
        args.push("--arg");
        args.push(arg);
    }
    args
}

fn temp_file(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "mtlipc-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

#[test]
fn commands_lists_stable_codes() {
    let output = mtlipc(&["commands"]);
    assert!(output.status.success());

    let rows: Vec<serde_json::Value> =
        serde_json::from_slice(&output.stdout).expect("commands output should be JSON");
    assert_eq!(rows.len(), 26);
    assert!(rows
        .iter()
        .any(|row| row["name"] == "IPC_HIT_BREAKPOINT" && row["code"] == 102));
}

#[test]
fn send_round_trips_through_stub_controller() {
    let mut args = vec!["send"];
    args.extend(stub_remote(&["--owner", "56"]));
    args.extend(["ipc-get-teamside", "--json", r#"{"player":56}"#]);

    let output = mtlipc(&args);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let response: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("response should be JSON");
    assert_eq!(response["command"], "IPC_GET_TEAMSIDE");
    assert_eq!(response["kind"], "SUCCESS");
    assert_eq!(response["detail"]["teamside"], 1);
}

#[test]
fn send_check_fails_on_error_reply() {
    let mut args = vec!["send"];
    args.extend(stub_remote(&[]));
    args.extend(["help", "--check"]);

    let output = mtlipc(&args);
    assert_eq!(output.status.code(), Some(1));

    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["kind"], "ERROR");
    assert_eq!(response["detail"], "DEBUGGER_UNRECOGNIZED_COMMAND");
}

#[test]
fn watch_prints_breakpoint_event() {
    let mut args = vec!["watch"];
    args.extend(stub_remote(&["--owner", "3", "--break-on-continue"]));
    args.extend(["--count", "1"]);

    let output = mtlipc(&args);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let event: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(event["event"], "IPC_HIT_BREAKPOINT");
    assert_eq!(event["owner"], 3);
}

#[test]
fn decode_reads_captured_frames() {
    let path = temp_file("capture");
    let mut writer = FrameWriter::new(Vec::new());
    writer
        .send_response(
            &MessageId::random(),
            frame::Command::IpcPause,
            ResponseKind::Success,
            br#"{"firstPlayerID":56}"#,
        )
        .unwrap();
    std::fs::write(&path, writer.into_inner()).unwrap();

    let output = mtlipc(&["decode", path.to_str().unwrap()]);
    let _ = std::fs::remove_file(&path);

    assert!(output.status.success());
    let row: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(row["command"], "IPC_PAUSE");
    assert_eq!(row["payload"], r#"{"firstPlayerID":56}"#);
}

#[test]
fn missing_controller_is_usage_error() {
    let output = mtlipc(&["send", "launch"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn unstartable_controller_is_transport_error() {
    let output = mtlipc(&["send", "--program", "/nonexistent/mtldbg", "launch"]);
    assert_eq!(output.status.code(), Some(3));
}
