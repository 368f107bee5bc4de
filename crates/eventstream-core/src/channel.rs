use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::{
    session::SessionEventSink,
    types::{ControllerEvent, SessionMessage, StreamCommand},
};

/// Broadcast event stream type used by controller observers.
pub type EventStream = broadcast::Receiver<ControllerEvent>;

/// Errors returned by controller channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// The controller task exited while a caller was waiting on it.
    #[error("controller task has exited")]
    ControllerGone,
    /// The controller refused the command.
    #[error("command rejected ({code}): {message}")]
    CommandRejected { code: String, message: String },
}

/// Receiving halves consumed by the controller task.
#[derive(Debug)]
pub struct ControllerReceivers {
    /// Lifecycle commands in issuance order.
    pub commands: mpsc::Receiver<StreamCommand>,
    /// Messages delivered by account sessions.
    pub sessions: mpsc::UnboundedReceiver<SessionMessage>,
}

/// Command, session and event channel set shared by the controller and its
/// callers.
#[derive(Clone, Debug)]
pub struct ControllerChannels {
    command_tx: mpsc::Sender<StreamCommand>,
    session_tx: mpsc::UnboundedSender<SessionMessage>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl ControllerChannels {
    /// Create a new channel set and return it with the receiving halves.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, ControllerReceivers) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                session_tx,
                event_tx,
            },
            ControllerReceivers {
                commands: command_rx,
                sessions: session_rx,
            },
        )
    }

    /// Subscribe to emitted controller events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the controller.
    pub async fn send_command(&self, command: StreamCommand) -> Result<(), ControllerChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ControllerChannelError::CommandChannelClosed)
    }

    /// Session sinks and event emission for the controller task.
    ///
    /// It carries no command sender, so the command channel closes once every
    /// `ControllerChannels` clone is dropped.
    pub fn publisher(&self) -> ControllerPublisher {
        ControllerPublisher {
            session_tx: self.session_tx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Session sinks and event emission, without the ability to send commands.
#[derive(Clone, Debug)]
pub struct ControllerPublisher {
    session_tx: mpsc::UnboundedSender<SessionMessage>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl ControllerPublisher {
    /// Build a sink for one account and attach cycle.
    pub fn session_sink(&self, account_id: &str, generation: u64) -> SessionEventSink {
        SessionEventSink::new(account_id, generation, self.session_tx.clone())
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ControllerEvent) {
        let _ = self.event_tx.send(event);
    }
}
