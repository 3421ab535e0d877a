//! Typed wrappers for the commands used to manage a VM.
//!
//! Each wrapper fixes the command name, the argument shape and, where the VM
//! finishes the work asynchronously, the event that completes it.

use serde_json::{Map, Value, json};

use crate::cancel::Cancellation;
use crate::errors::QmpError;
use crate::filter::EventFilter;
use crate::session::QmpSession;

impl QmpSession {
    /// Leaves capabilities negotiation mode so other commands are accepted.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn qmp_capabilities(&self, cancellation: &Cancellation) -> Result<(), QmpError> {
        self.execute("qmp_capabilities", None, None, cancellation)
    }

    /// Pauses the VM.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn stop(&self, cancellation: &Cancellation) -> Result<(), QmpError> {
        self.execute("stop", None, None, cancellation)
    }

    /// Resumes a paused VM.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn cont(&self, cancellation: &Cancellation) -> Result<(), QmpError> {
        self.execute("cont", None, None, cancellation)
    }

    /// Terminates the VM process immediately.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn quit(&self, cancellation: &Cancellation) -> Result<(), QmpError> {
        self.execute("quit", None, None, cancellation)
    }

    /// Asks the guest to power down and waits for `SHUTDOWN`.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn system_powerdown(&self, cancellation: &Cancellation) -> Result<(), QmpError> {
        self.execute(
            "system_powerdown",
            None,
            Some(EventFilter::named("SHUTDOWN")),
            cancellation,
        )
    }

    /// Adds a raw block device backed by the file at `device`.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn blockdev_add(
        &self,
        device: &str,
        blockdev_id: &str,
        cancellation: &Cancellation,
    ) -> Result<(), QmpError> {
        let arguments = object(json!({
            "options": {
                "driver": "raw",
                "file": {
                    "driver": "file",
                    "filename": device,
                },
                "id": blockdev_id,
            }
        }));
        self.execute("blockdev-add", Some(arguments), None, cancellation)
    }

    /// Removes a block device added with [`Self::blockdev_add`].
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn x_blockdev_del(
        &self,
        blockdev_id: &str,
        cancellation: &Cancellation,
    ) -> Result<(), QmpError> {
        let arguments = object(json!({ "id": blockdev_id }));
        self.execute("x-blockdev-del", Some(arguments), None, cancellation)
    }

    /// Attaches a guest device using the block device `blockdev_id`.
    ///
    /// `bus` is omitted from the request when empty.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn device_add(
        &self,
        blockdev_id: &str,
        dev_id: &str,
        driver: &str,
        bus: &str,
        cancellation: &Cancellation,
    ) -> Result<(), QmpError> {
        self.execute(
            "device_add",
            Some(device_add_arguments(blockdev_id, dev_id, driver, bus)),
            None,
            cancellation,
        )
    }

    /// Detaches a guest device and waits for its `DEVICE_DELETED` event.
    ///
    /// # Errors
    ///
    /// See [`QmpSession::execute_with_return`].
    pub fn device_del(&self, dev_id: &str, cancellation: &Cancellation) -> Result<(), QmpError> {
        let arguments = object(json!({ "id": dev_id }));
        self.execute(
            "device_del",
            Some(arguments),
            Some(device_deleted(dev_id)),
            cancellation,
        )
    }
}

/// Filter matching the `DEVICE_DELETED` event for `dev_id`.
pub(crate) fn device_deleted(dev_id: &str) -> EventFilter {
    EventFilter::with_data("DEVICE_DELETED", "device", dev_id)
}

fn device_add_arguments(
    blockdev_id: &str,
    dev_id: &str,
    driver: &str,
    bus: &str,
) -> Map<String, Value> {
    let mut arguments = object(json!({
        "id": dev_id,
        "driver": driver,
        "drive": blockdev_id,
    }));
    if !bus.is_empty() {
        arguments.insert("bus".to_owned(), Value::from(bus));
    }
    arguments
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
