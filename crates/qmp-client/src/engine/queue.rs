//! Outstanding commands, in submission order.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use serde_json::{Map, Value};
use tracing::debug;

use super::ENGINE_TARGET;
use crate::cancel::Cancellation;
use crate::errors::QmpError;
use crate::filter::EventFilter;
use crate::message::QmpEvent;

/// Terminal outcome delivered to a caller.
pub(crate) type CommandResult = Result<Value, QmpError>;

/// What an event did to the head command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventMatch {
    /// The event is unrelated to the head command.
    Unrelated,
    /// The event matched before the reply; the reply alone now completes it.
    Armed,
    /// The event matched after a successful reply; the command is complete.
    Completed,
}

/// One submitted command and the handoff back to its caller.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    name: String,
    arguments: Option<Map<String, Value>>,
    filter: Option<EventFilter>,
    cancellation: Cancellation,
    responder: SyncSender<CommandResult>,
    reply: Option<Value>,
}

impl PendingCommand {
    /// Builds a command and the receiver its caller waits on.
    ///
    /// The handoff holds one result so delivery never blocks the engine.
    pub(crate) fn new(
        name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
        filter: Option<EventFilter>,
        cancellation: Cancellation,
    ) -> (Self, Receiver<CommandResult>) {
        let (responder, results) = mpsc::sync_channel(1);
        let command = Self {
            name: name.into(),
            arguments,
            filter,
            cancellation,
            responder,
            reply: None,
        };
        (command, results)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn arguments(&self) -> Option<&Map<String, Value>> {
        self.arguments.as_ref()
    }

    /// True while a successful reply is held back waiting for an event.
    pub(crate) const fn reply_received(&self) -> bool {
        self.reply.is_some()
    }

    /// True while the command still needs its event.
    pub(crate) const fn awaiting_event(&self) -> bool {
        self.filter.is_some()
    }

    /// True once the caller has stopped waiting.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.cancellation.is_fired()
    }

    /// Holds a successful reply until the filtered event arrives.
    pub(crate) fn record_reply(&mut self, payload: Value) {
        self.reply = Some(payload);
    }

    /// Applies an event to this command's filter.
    pub(crate) fn observe_event(&mut self, event: &QmpEvent) -> EventMatch {
        if !self.filter.as_ref().is_some_and(|filter| filter.matches(event)) {
            return EventMatch::Unrelated;
        }
        if self.reply.is_some() {
            EventMatch::Completed
        } else {
            self.filter = None;
            EventMatch::Armed
        }
    }

    /// Takes the held reply payload, if any.
    pub(crate) fn take_reply(&mut self) -> Option<Value> {
        self.reply.take()
    }

    /// Hands `result` to the caller unless it has stopped waiting.
    pub(crate) fn deliver(self, result: CommandResult) {
        if self.is_abandoned() {
            debug!(
                target: ENGINE_TARGET,
                command = %self.name,
                "caller abandoned command; discarding result"
            );
            return;
        }
        match self.responder.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!(
                    target: ENGINE_TARGET,
                    command = %self.name,
                    "caller went away before the result arrived"
                );
            }
            Err(TrySendError::Full(_)) => {
                debug!(
                    target: ENGINE_TARGET,
                    command = %self.name,
                    "result already delivered"
                );
            }
        }
    }
}

/// FIFO of outstanding commands.
///
/// Only the head may have been written to the transport. Filters of heads
/// retired before their event arrived are kept in `retired` until a matching
/// event consumes them.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    commands: VecDeque<PendingCommand>,
    head_written: bool,
    retired: VecDeque<EventFilter>,
}

impl CommandQueue {
    pub(crate) fn push_back(&mut self, command: PendingCommand) {
        self.commands.push_back(command);
    }

    pub(crate) fn head(&self) -> Option<&PendingCommand> {
        self.commands.front()
    }

    pub(crate) fn head_mut(&mut self) -> Option<&mut PendingCommand> {
        self.commands.front_mut()
    }

    /// Removes the head; the next command becomes unwritten head.
    pub(crate) fn pop_head(&mut self) -> Option<PendingCommand> {
        self.head_written = false;
        self.commands.pop_front()
    }

    /// True when a head exists that has not yet been written.
    pub(crate) fn needs_write(&self) -> bool {
        !self.head_written && !self.commands.is_empty()
    }

    pub(crate) fn mark_head_written(&mut self) {
        self.head_written = true;
    }

    /// Removes the head and remembers the event it was still owed.
    pub(crate) fn retire_head(&mut self) -> Option<PendingCommand> {
        let mut head = self.pop_head()?;
        if let Some(filter) = head.filter.take() {
            self.retired.push_back(filter);
        }
        Some(head)
    }

    /// Consumes the oldest retired filter that `event` satisfies.
    ///
    /// Returns true when the event belonged to a retired command and must not
    /// be credited to the current head.
    pub(crate) fn absorb_retired(&mut self, event: &QmpEvent) -> bool {
        let Some(index) = self
            .retired
            .iter()
            .position(|filter| filter.matches(event))
        else {
            return false;
        };
        self.retired.remove(index);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    /// Empties the queue in submission order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = PendingCommand> + '_ {
        self.head_written = false;
        self.retired.clear();
        self.commands.drain(..)
    }
}
