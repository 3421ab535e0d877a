//! Decoding of the QMP greeting sent when a connection opens.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::session::SESSION_TARGET;

/// Version and capabilities announced by the VM in its greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QmpVersion {
    /// Major QEMU version.
    pub major: u32,
    /// Minor QEMU version.
    pub minor: u32,
    /// Micro QEMU version.
    pub micro: u32,
    /// Optional protocol capabilities offered by the VM.
    pub capabilities: Vec<String>,
}

#[derive(Deserialize)]
struct Greeting {
    #[serde(rename = "QMP")]
    qmp: GreetingBody,
}

#[derive(Deserialize)]
struct GreetingBody {
    version: GreetingVersion,
    capabilities: Vec<Value>,
}

#[derive(Deserialize)]
struct GreetingVersion {
    qemu: QemuVersion,
}

#[derive(Deserialize)]
struct QemuVersion {
    major: u32,
    minor: u32,
    micro: u32,
}

/// Parses the greeting payload.
///
/// Returns `None` and logs the raw payload when any required field is
/// missing or has the wrong type. Capability entries that are not strings
/// are skipped.
pub(crate) fn parse_greeting(payload: &[u8]) -> Option<QmpVersion> {
    let greeting: Greeting = match serde_json::from_slice(payload) {
        Ok(greeting) => greeting,
        Err(err) => {
            error!(
                target: SESSION_TARGET,
                payload = %String::from_utf8_lossy(payload),
                error = %err,
                "invalid QMP greeting"
            );
            return None;
        }
    };

    let GreetingBody {
        version,
        capabilities,
    } = greeting.qmp;
    let capabilities = capabilities
        .into_iter()
        .filter_map(|capability| match capability {
            Value::String(name) => Some(name),
            _ => None,
        })
        .collect();

    Some(QmpVersion {
        major: version.qemu.major,
        minor: version.qemu.minor,
        micro: version.qemu.micro,
        capabilities,
    })
}
