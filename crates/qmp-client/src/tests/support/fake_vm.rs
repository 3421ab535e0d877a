//! Scripted VM end of a QMP connection.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serde_json::{Value, json};

/// How long the fake VM waits for the client to write a command.
const COMMAND_WAIT: Duration = Duration::from_secs(5);

/// The VM side of a socket pair, driven line by line from a test.
pub struct FakeVm {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl FakeVm {
    /// Creates a connected pair: the client stream and the fake VM.
    pub fn pair() -> (UnixStream, Self) {
        let (client, vm) = UnixStream::pair().expect("socket pair");
        (client, Self::from_stream(vm))
    }

    /// Wraps an accepted VM-side stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        let writer = stream.try_clone().expect("clone VM stream");
        Self {
            reader: BufReader::new(stream),
            writer,
        }
    }

    /// Sends the greeting of a QEMU 2.4.0 VM offering `oob`.
    pub fn send_greeting(&mut self) {
        self.send_value(&json!({
            "QMP": {
                "version": {
                    "qemu": { "major": 2, "minor": 4, "micro": 0 },
                    "package": ""
                },
                "capabilities": ["oob"]
            }
        }));
    }

    /// Writes `line` followed by a newline.
    pub fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .expect("VM write failed");
    }

    /// Writes `value` as one JSON line.
    pub fn send_value(&mut self, value: &Value) {
        self.send_line(&value.to_string());
    }

    /// Replies `{"return": {}}`.
    pub fn reply_ok(&mut self) {
        self.reply_return(json!({}));
    }

    /// Replies with `payload` as the return value.
    pub fn reply_return(&mut self, payload: Value) {
        self.send_value(&json!({ "return": payload }));
    }

    /// Replies with an error reply.
    pub fn reply_error(&mut self, class: &str, desc: &str) {
        self.send_value(&json!({ "error": { "class": class, "desc": desc } }));
    }

    /// Emits an event carrying `data`.
    pub fn send_event(&mut self, name: &str, data: Value) {
        self.send_value(&json!({
            "event": name,
            "data": data,
            "timestamp": { "seconds": 1_700_000_000, "microseconds": 250 }
        }));
    }

    /// Reads the next raw line written by the client.
    pub fn read_raw(&mut self) -> String {
        self.reader
            .get_ref()
            .set_read_timeout(Some(COMMAND_WAIT))
            .expect("set read timeout");
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).expect("VM read failed");
        assert!(read > 0, "client closed the connection");
        line
    }

    /// Reads the next command and returns it as JSON.
    pub fn read_command(&mut self) -> Value {
        serde_json::from_str(&self.read_raw()).expect("command is not JSON")
    }

    /// Reads the next command, asserts its name and returns its arguments.
    pub fn expect_command(&mut self, name: &str) -> Value {
        let command = self.read_command();
        assert_eq!(command["execute"], name, "unexpected command {command}");
        command.get("arguments").cloned().unwrap_or(Value::Null)
    }

    /// Asserts the client writes nothing within `window`.
    pub fn assert_no_command(&mut self, window: Duration) {
        self.reader
            .get_ref()
            .set_read_timeout(Some(window))
            .expect("set read timeout");
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Err(error) if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Ok(0) => {}
            other => panic!("client wrote unexpectedly: {other:?} {line:?}"),
        }
    }

    /// Returns true once the client has closed its end.
    pub fn client_closed(&mut self) -> bool {
        self.reader
            .get_ref()
            .set_read_timeout(Some(COMMAND_WAIT))
            .expect("set read timeout");
        let mut line = String::new();
        matches!(self.reader.read_line(&mut line), Ok(0))
    }

    /// Stops writing to the client while still reading what it sends.
    pub fn hang_up(&self) {
        self.writer
            .shutdown(Shutdown::Write)
            .expect("VM write shutdown failed");
    }

    /// Closes the VM end of the connection.
    pub fn close(&self) {
        // The client may have closed first.
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}
