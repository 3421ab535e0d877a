//! The session engine: a single thread that owns the transport, the command
//! queue and the event subscriber.
//!
//! Everything that can change protocol state arrives on one channel, so the
//! engine needs no locks. Callers submit commands, the reader thread forwards
//! lines and reports closure, and the session handle requests shutdown.

mod queue;

use std::io::Read;
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::thread::JoinHandle;

use tracing::{debug, info, trace, warn};

use crate::errors::QmpError;
use crate::greeting::{QmpVersion, parse_greeting};
use crate::message::{CommandRequest, InboundMessage, QmpEvent, Reply};
use crate::reader::{WIRE_TARGET, spawn_line_reader};
use crate::signal::DisconnectSignal;
use crate::transport::Transport;

pub(crate) use self::queue::{CommandResult, EventMatch, PendingCommand};
use self::queue::CommandQueue;

/// Log target for engine activity.
pub(crate) const ENGINE_TARGET: &str = "qmp_client::engine";

/// Input consumed by the engine thread.
#[derive(Debug)]
pub(crate) enum EngineInput {
    /// A caller submitted a command.
    Submit(PendingCommand),
    /// The reader received one line.
    Line(Vec<u8>),
    /// The reader hit end-of-file or an error and has exited.
    ReaderClosed,
    /// The session handle asked the engine to stop.
    Shutdown,
}

/// Outcome of the greeting, reported once to whoever started the session.
pub(crate) type Startup = Result<QmpVersion, QmpError>;

/// State owned by the engine thread.
pub(crate) struct Engine<T: Transport> {
    transport: T,
    queue: CommandQueue,
    events: Option<Sender<QmpEvent>>,
    inbox: Receiver<EngineInput>,
    accepting: bool,
    reader: Option<JoinHandle<()>>,
}

impl<T: Transport> Engine<T> {
    pub(crate) fn new(
        transport: T,
        inbox: Receiver<EngineInput>,
        events: Option<Sender<QmpEvent>>,
    ) -> Self {
        Self {
            transport,
            queue: CommandQueue::default(),
            events,
            inbox,
            accepting: true,
            reader: None,
        }
    }

    /// Starts the line reader on `stream` and runs until it reports closure.
    ///
    /// `feed` is the sending half of the engine's own inbox. `ready` receives
    /// the startup outcome exactly once. `disconnected` is fired after every
    /// queued command has been resolved and the transport released.
    pub(crate) fn run(
        mut self,
        stream: Box<dyn Read + Send>,
        feed: Sender<EngineInput>,
        ready: SyncSender<Startup>,
        disconnected: DisconnectSignal,
    ) {
        match spawn_line_reader(stream, feed) {
            Ok(reader) => self.reader = Some(reader),
            Err(source) => {
                let _ = ready.try_send(Err(QmpError::Spawn {
                    thread: "reader",
                    source,
                }));
                self.teardown(&disconnected);
                return;
            }
        }

        let reader_open = match self.await_greeting() {
            None => {
                let _ = ready.try_send(Err(QmpError::ConnectionLost));
                false
            }
            Some(greeting) => {
                self.write_head();
                match parse_greeting(&greeting) {
                    Some(version) => {
                        info!(
                            target: ENGINE_TARGET,
                            major = version.major,
                            minor = version.minor,
                            micro = version.micro,
                            "QMP session established"
                        );
                        let _ = ready.try_send(Ok(version));
                    }
                    None => {
                        let _ = ready.try_send(Err(QmpError::HandshakeFailed));
                        self.begin_shutdown();
                    }
                }
                true
            }
        };
        // Startup is over; nobody else reads this channel.
        drop(ready);

        if reader_open {
            self.process_inputs();
        }
        self.teardown(&disconnected);
    }

    /// Queues submissions until the first line arrives.
    fn await_greeting(&mut self) -> Option<Vec<u8>> {
        while let Ok(input) = self.inbox.recv() {
            match input {
                EngineInput::Submit(command) => self.enqueue(command),
                EngineInput::Line(line) => return Some(line),
                EngineInput::ReaderClosed => return None,
                EngineInput::Shutdown => self.begin_shutdown(),
            }
        }
        None
    }

    fn process_inputs(&mut self) {
        while let Ok(input) = self.inbox.recv() {
            self.retire_abandoned_head();
            match input {
                EngineInput::Submit(command) => {
                    self.enqueue(command);
                    self.write_head();
                }
                EngineInput::Line(line) => self.handle_line(&line),
                EngineInput::ReaderClosed => return,
                EngineInput::Shutdown => self.begin_shutdown(),
            }
        }
    }

    fn enqueue(&mut self, command: PendingCommand) {
        if !self.accepting {
            command.deliver(Err(QmpError::ConnectionClosed));
            return;
        }
        debug!(
            target: ENGINE_TARGET,
            command = %command.name(),
            queued = self.queue.len() + 1,
            "command queued"
        );
        self.queue.push_back(command);
    }

    fn handle_line(&mut self, line: &[u8]) {
        match InboundMessage::from_bytes(line) {
            Ok(InboundMessage::Event(event)) => self.handle_event(event),
            Ok(InboundMessage::Reply(reply)) => self.handle_reply(reply),
            Ok(InboundMessage::Unrecognised) => {
                warn!(
                    target: ENGINE_TARGET,
                    line = %String::from_utf8_lossy(line),
                    "ignoring message that is neither an event nor a reply"
                );
            }
            Err(error) => {
                warn!(
                    target: ENGINE_TARGET,
                    line = %String::from_utf8_lossy(line),
                    error = %error,
                    "discarding undecodable QMP message"
                );
            }
        }
    }

    fn handle_event(&mut self, event: QmpEvent) {
        if self.queue.absorb_retired(&event) {
            debug!(
                target: ENGINE_TARGET,
                event = %event.name,
                "event belongs to a retired command"
            );
            self.publish(event);
            return;
        }
        let outcome = self
            .queue
            .head_mut()
            .map_or(EventMatch::Unrelated, |head| head.observe_event(&event));
        match outcome {
            EventMatch::Unrelated => {}
            EventMatch::Armed => debug!(
                target: ENGINE_TARGET,
                event = %event.name,
                "awaited event arrived before the reply"
            ),
            EventMatch::Completed => {
                let payload = self
                    .queue
                    .head_mut()
                    .and_then(PendingCommand::take_reply)
                    .unwrap_or_default();
                self.finalise_head(Ok(payload));
            }
        }
        self.publish(event);
    }

    fn publish(&mut self, event: QmpEvent) {
        let Some(sink) = &self.events else {
            return;
        };
        if sink.send(event).is_err() {
            debug!(
                target: ENGINE_TARGET,
                "event subscriber hung up; no longer publishing events"
            );
            self.events = None;
        }
    }

    fn handle_reply(&mut self, reply: Reply) {
        let Some(head) = self.queue.head_mut() else {
            warn!(target: ENGINE_TARGET, "unexpected reply with no command in flight");
            return;
        };
        match reply {
            Reply::Failure(reply_error) => {
                let error = QmpError::command_failed(head.name(), reply_error);
                self.finalise_head(Err(error));
            }
            Reply::Success(payload) if head.awaiting_event() => {
                debug!(
                    target: ENGINE_TARGET,
                    command = %head.name(),
                    "reply received; waiting for event"
                );
                head.record_reply(payload);
            }
            Reply::Success(payload) => self.finalise_head(Ok(payload)),
        }
    }

    /// Drops a head whose caller has given up after its reply arrived.
    ///
    /// A head still waiting for its reply is kept: the VM will answer it and
    /// that answer must not be credited to the next command. A retired head's
    /// filter stays with the queue so its late event is not credited either.
    fn retire_abandoned_head(&mut self) {
        let retire = self
            .queue
            .head()
            .is_some_and(|head| head.reply_received() && head.is_abandoned());
        if !retire {
            return;
        }
        if let Some(head) = self.queue.retire_head() {
            debug!(
                target: ENGINE_TARGET,
                command = %head.name(),
                "retiring command abandoned while waiting for its event"
            );
        }
        self.write_head();
    }

    fn finalise_head(&mut self, result: CommandResult) {
        if let Some(head) = self.queue.pop_head() {
            debug!(
                target: ENGINE_TARGET,
                command = %head.name(),
                success = result.is_ok(),
                "command finished"
            );
            head.deliver(result);
        }
        self.write_head();
    }

    /// Writes the head if it has not been written yet.
    ///
    /// A head that cannot be encoded or written is failed and removed, and
    /// the next command is tried.
    fn write_head(&mut self) {
        while self.accepting && self.queue.needs_write() {
            let Some(head) = self.queue.head() else {
                return;
            };
            let command = head.name().to_owned();
            let written = CommandRequest::new(head.name(), head.arguments())
                .to_line()
                .map_err(|source| QmpError::Encode {
                    command: command.clone(),
                    source,
                })
                .and_then(|line| {
                    trace!(
                        target: WIRE_TARGET,
                        line = %String::from_utf8_lossy(&line).trim_end(),
                        "sent"
                    );
                    self.transport
                        .send(&line)
                        .map_err(|source| QmpError::Write {
                            command: command.clone(),
                            source,
                        })
                });
            match written {
                Ok(()) => self.queue.mark_head_written(),
                Err(error) => {
                    warn!(
                        target: ENGINE_TARGET,
                        command = %command,
                        error = %error,
                        "failed to send command"
                    );
                    if let Some(head) = self.queue.pop_head() {
                        head.deliver(Err(error));
                    }
                }
            }
        }
    }

    /// Stops accepting work and closes the transport so the reader exits.
    fn begin_shutdown(&mut self) {
        if !self.accepting {
            return;
        }
        debug!(target: ENGINE_TARGET, "shutting down QMP session");
        self.accepting = false;
        self.close_transport();
    }

    fn close_transport(&mut self) {
        if let Err(error) = self.transport.close() {
            debug!(target: ENGINE_TARGET, error = %error, "failed to close transport");
        }
    }

    fn teardown(mut self, disconnected: &DisconnectSignal) {
        self.accepting = false;
        let pending = self.queue.len();
        for command in self.queue.drain() {
            command.deliver(Err(QmpError::ConnectionClosed));
        }
        self.events = None;
        self.close_transport();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!(target: ENGINE_TARGET, "QMP reader thread panicked");
            }
        }
        // Submissions racing with teardown still get an answer.
        while let Ok(input) = self.inbox.try_recv() {
            if let EngineInput::Submit(command) = input {
                command.deliver(Err(QmpError::ConnectionClosed));
            }
        }
        info!(
            target: ENGINE_TARGET,
            cancelled = pending,
            "QMP session disconnected"
        );
        disconnected.fire();
    }
}
