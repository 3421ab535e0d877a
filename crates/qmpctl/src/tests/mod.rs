//! Runtime tests driving `run` against a scripted QMP socket.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use rstest::rstest;
use serde_json::{Value, json};
use tempfile::TempDir;

use super::*;

/// What the fake VM does in response to a command.
enum Action {
    Send(Value),
    Close,
}

type Script = fn(&Value) -> Vec<Action>;

fn ok() -> Action {
    Action::Send(json!({ "return": {} }))
}

fn event(name: &str, data: Value) -> Action {
    Action::Send(json!({
        "event": name,
        "data": data,
        "timestamp": { "seconds": 1_700_000_000, "microseconds": 5 }
    }))
}

fn acknowledge(_: &Value) -> Vec<Action> {
    vec![ok()]
}

/// QMP endpoint on a temporary Unix socket serving one connection.
struct FakeQmpServer {
    _dir: TempDir,
    socket: PathBuf,
    commands: Arc<Mutex<Vec<Value>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeQmpServer {
    fn spawn(script: Script) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("qmp.sock");
        let listener = UnixListener::bind(&socket).expect("bind failed");
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&commands);
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept failed");
            serve(&stream, script, &recorded);
        });
        Self {
            _dir: dir,
            socket,
            commands,
            handle: Some(handle),
        }
    }

    fn args(&self, command: &[&str]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "qmpctl".into(),
            "--socket".into(),
            self.socket.clone().into_os_string(),
            "--timeout".into(),
            "5".into(),
        ];
        args.extend(command.iter().map(OsString::from));
        args
    }

    /// Waits for the connection to end and returns the commands received.
    fn finish(mut self) -> Vec<Value> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("server panicked");
        }
        self.commands.lock().expect("lock").clone()
    }
}

fn serve(stream: &UnixStream, script: Script, recorded: &Mutex<Vec<Value>>) {
    let mut writer = stream.try_clone().expect("clone stream");
    let greeting = json!({
        "QMP": {
            "version": { "qemu": { "major": 2, "minor": 4, "micro": 0 }, "package": "" },
            "capabilities": ["oob"]
        }
    });
    writeln!(writer, "{greeting}").expect("send greeting");

    let reader = BufReader::new(stream.try_clone().expect("clone stream"));
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let command: Value = serde_json::from_str(&line).expect("command is not JSON");
        recorded.lock().expect("lock").push(command.clone());
        for action in script(&command) {
            match action {
                Action::Send(value) => {
                    if writeln!(writer, "{value}").is_err() {
                        return;
                    }
                }
                Action::Close => {
                    let _ = stream.shutdown(Shutdown::Both);
                    return;
                }
            }
        }
    }
}

struct Outcome {
    exit: ExitCode,
    stdout: String,
    stderr: String,
}

fn run_cli(args: Vec<OsString>) -> Outcome {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = run(args, &mut stdout, &mut stderr);
    Outcome {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

fn names(commands: &[Value]) -> Vec<&str> {
    commands
        .iter()
        .filter_map(|command| command["execute"].as_str())
        .collect()
}

#[rstest]
#[case("stop")]
#[case("cont")]
#[case("capabilities")]
fn simple_commands_negotiate_capabilities_first(#[case] subcommand: &str) {
    let server = FakeQmpServer::spawn(acknowledge);

    let outcome = run_cli(server.args(&[subcommand]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    let commands = server.finish();
    let expected: Vec<&str> = match subcommand {
        "capabilities" => vec!["qmp_capabilities"],
        other => vec!["qmp_capabilities", other],
    };
    assert_eq!(names(&commands), expected);
}

#[rstest]
fn version_prints_greeting_without_negotiating() {
    let server = FakeQmpServer::spawn(acknowledge);

    let outcome = run_cli(server.args(&["version"]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    let printed: Value = serde_json::from_str(&outcome.stdout).expect("stdout is JSON");
    assert_eq!(
        printed,
        json!({ "major": 2, "minor": 4, "micro": 0, "capabilities": ["oob"] })
    );
    assert!(server.finish().is_empty());
}

#[rstest]
fn exec_prints_return_payload() {
    let server = FakeQmpServer::spawn(|command| match command["execute"].as_str() {
        Some("query-status") => vec![Action::Send(
            json!({ "return": { "running": true, "status": "running" } }),
        )],
        _ => vec![ok()],
    });

    let outcome = run_cli(server.args(&["exec", "query-status", "--args", r#"{"verbose":true}"#]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "{\"running\":true,\"status\":\"running\"}\n");
    let commands = server.finish();
    assert_eq!(
        commands.get(1).map(|command| &command["arguments"]),
        Some(&json!({ "verbose": true }))
    );
}

#[rstest]
fn exec_waits_for_requested_event() {
    let server = FakeQmpServer::spawn(|command| match command["execute"].as_str() {
        Some("device_del") => vec![ok(), event("DEVICE_DELETED", json!({ "device": "disk1" }))],
        _ => vec![ok()],
    });

    let outcome = run_cli(server.args(&[
        "exec",
        "device_del",
        "--args",
        r#"{"id":"disk1"}"#,
        "--wait-event",
        "DEVICE_DELETED",
        "--event-key",
        "device",
        "--event-value",
        "disk1",
    ]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "{}\n");
    server.finish();
}

#[rstest]
#[case("[1, 2]", "--args must be a JSON object")]
#[case("{", "--args must be valid JSON")]
fn exec_rejects_bad_arguments(#[case] raw: &str, #[case] message: &str) {
    let server = FakeQmpServer::spawn(acknowledge);

    let outcome = run_cli(server.args(&["exec", "stop", "--args", raw]));

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains(message), "stderr: {}", outcome.stderr);
    assert_eq!(names(&server.finish()), vec!["qmp_capabilities"]);
}

#[rstest]
fn device_del_waits_for_deletion() {
    let server = FakeQmpServer::spawn(|command| match command["execute"].as_str() {
        Some("device_del") => vec![
            ok(),
            event("DEVICE_DELETED", json!({ "device": "other0" })),
            event("DEVICE_DELETED", json!({ "device": "net0" })),
        ],
        _ => vec![ok()],
    });

    let outcome = run_cli(server.args(&["device-del", "net0"]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    let commands = server.finish();
    assert_eq!(
        commands.get(1).map(|command| &command["arguments"]),
        Some(&json!({ "id": "net0" }))
    );
}

#[rstest]
fn powerdown_waits_for_shutdown() {
    let server = FakeQmpServer::spawn(|command| match command["execute"].as_str() {
        Some("system_powerdown") => vec![ok(), event("SHUTDOWN", json!({ "guest": true }))],
        _ => vec![ok()],
    });

    let outcome = run_cli(server.args(&["powerdown"]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    server.finish();
}

#[rstest]
fn command_failure_is_reported() {
    let server = FakeQmpServer::spawn(|command| match command["execute"].as_str() {
        Some("cont") => vec![Action::Send(json!({
            "error": { "class": "GenericError", "desc": "guest is not paused" }
        }))],
        _ => vec![ok()],
    });

    let outcome = run_cli(server.args(&["cont"]));

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(
        outcome.stderr.contains("guest is not paused"),
        "stderr: {}",
        outcome.stderr
    );
    server.finish();
}

#[rstest]
fn events_stops_after_count() {
    let server = FakeQmpServer::spawn(|_| {
        vec![
            ok(),
            event("STOP", json!({})),
            event("RESUME", json!({})),
            event("SHUTDOWN", json!({})),
        ]
    });

    let outcome = run_cli(server.args(&["events", "--count", "2"]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    let lines: Vec<Value> = outcome
        .stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("event is JSON"))
        .collect();
    let [first, second] = lines.as_slice() else {
        panic!("expected two events, got {lines:?}");
    };
    assert_eq!(first["event"], "STOP");
    assert_eq!(second["event"], "RESUME");
    assert_eq!(second["timestamp"]["microseconds"], 5);
    server.finish();
}

#[rstest]
fn events_ends_when_vm_disconnects() {
    let server = FakeQmpServer::spawn(|_| {
        vec![
            ok(),
            event("DEVICE_DELETED", json!({ "device": "net0" })),
            Action::Close,
        ]
    });

    let outcome = run_cli(server.args(&["events"]));

    assert_eq!(outcome.exit, ExitCode::SUCCESS, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout.lines().count(), 1);
    server.finish();
}

#[rstest]
fn unreachable_socket_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let socket = dir.path().join("missing.sock");

    let outcome = run_cli(vec![
        "qmpctl".into(),
        "--socket".into(),
        socket.into_os_string(),
        "stop".into(),
    ]);

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(
        outcome.stderr.contains("failed to connect to QMP socket"),
        "stderr: {}",
        outcome.stderr
    );
}

#[rstest]
fn help_is_written_to_stdout() {
    let outcome = run_cli(vec!["qmpctl".into(), "--help".into()]);

    assert_eq!(outcome.exit, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("device-del"));
    assert!(outcome.stderr.is_empty());
}

#[rstest]
fn event_value_requires_event_key() {
    let outcome = run_cli(vec![
        "qmpctl".into(),
        "--socket".into(),
        "/tmp/qmp.sock".into(),
        "exec".into(),
        "device_del".into(),
        "--event-value".into(),
        "net0".into(),
    ]);

    assert_eq!(outcome.exit, ExitCode::FAILURE);
    assert!(outcome.stderr.contains("--event-key"), "stderr: {}", outcome.stderr);
}

#[rstest]
#[case(r#"{"id": "net0"}"#, true)]
#[case("42", false)]
#[case("not json", false)]
fn parses_argument_objects(#[case] raw: &str, #[case] accepted: bool) {
    assert_eq!(parse_arguments(raw).is_ok(), accepted);
}
