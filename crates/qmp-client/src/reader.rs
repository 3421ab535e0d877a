//! Background thread that splits the inbound stream into lines.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::engine::EngineInput;

/// Log target mirroring every line received from the VM.
pub(crate) const WIRE_TARGET: &str = "qmp_client::wire";

/// Longest accepted line, terminator included.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Spawns the reader thread.
///
/// The thread forwards each non-blank line to `inbox` and sends
/// [`EngineInput::ReaderClosed`] exactly once when the stream ends, fails or
/// carries a line longer than [`MAX_LINE_BYTES`].
pub(crate) fn spawn_line_reader(
    reader: Box<dyn Read + Send>,
    inbox: Sender<EngineInput>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("qmp-reader".to_owned())
        .spawn(move || {
            read_lines(BufReader::new(reader), &inbox);
            // The engine may already be gone during teardown.
            let _ = inbox.send(EngineInput::ReaderClosed);
        })
}

fn read_lines(mut reader: impl BufRead, inbox: &Sender<EngineInput>) {
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX);
        match (&mut reader).take(limit).read_until(b'\n', &mut buffer) {
            Ok(0) => {
                debug!(target: WIRE_TARGET, "QMP stream reached end of file");
                return;
            }
            Ok(read) if read >= MAX_LINE_BYTES && !buffer.ends_with(b"\n") => {
                warn!(
                    target: WIRE_TARGET,
                    limit = MAX_LINE_BYTES,
                    "QMP line exceeds the size limit; dropping the connection"
                );
                return;
            }
            Ok(_) => {
                let line = trim_line_ending(&buffer);
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                trace!(
                    target: WIRE_TARGET,
                    line = %String::from_utf8_lossy(line),
                    "received"
                );
                if inbox.send(EngineInput::Line(line.to_vec())).is_err() {
                    return;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                debug!(target: WIRE_TARGET, error = %error, "QMP stream read failed");
                return;
            }
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let without_newline = line.strip_suffix(b"\n").unwrap_or(line);
    without_newline
        .strip_suffix(b"\r")
        .unwrap_or(without_newline)
}
