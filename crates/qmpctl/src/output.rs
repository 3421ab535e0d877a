//! JSON line rendering of greetings, return values and events.

use std::io::Write;
use std::time::UNIX_EPOCH;

use qmp_client::QmpEvent;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::AppError;

/// Event as printed by `qmpctl events`, mirroring the wire shape.
#[derive(Debug, Serialize)]
pub(crate) struct EventRecord<'a> {
    event: &'a str,
    data: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
struct Timestamp {
    seconds: u64,
    microseconds: u32,
}

impl<'a> From<&'a QmpEvent> for EventRecord<'a> {
    fn from(event: &'a QmpEvent) -> Self {
        let timestamp = event
            .timestamp
            .and_then(|instant| instant.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| Timestamp {
                seconds: elapsed.as_secs(),
                microseconds: elapsed.subsec_micros(),
            });
        Self {
            event: &event.name,
            data: &event.data,
            timestamp,
        }
    }
}

/// Writes `value` as one JSON line and flushes.
pub(crate) fn write_json_line<W, T>(writer: &mut W, value: &T) -> Result<(), AppError>
where
    W: Write,
    T: Serialize + ?Sized,
{
    serde_json::to_writer(&mut *writer, value).map_err(AppError::SerialiseOutput)?;
    writeln!(writer).map_err(AppError::WriteOutput)?;
    writer.flush().map_err(AppError::WriteOutput)
}
