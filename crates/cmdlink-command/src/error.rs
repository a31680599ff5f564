use crate::server::ServerState;

/// Errors that can occur in command server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] cmdlink_transport::TransportError),

    /// Frame-level error (truncated frame, bad payload, I/O).
    #[error("frame error: {0}")]
    Frame(#[from] cmdlink_frame::FrameError),

    /// A handler is already registered under this name.
    #[error("command {0:?} is already registered")]
    DuplicateCommand(String),

    /// No handler is registered under this name.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// The operation is not allowed in the server's current state.
    #[error("cannot {operation} while server is {state}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },

    /// The connection closed, or sent only a probe, before any command arrived.
    #[error("connection closed before a command was received")]
    EmptyCommand,

    /// A handler returned an error.
    #[error("command {command:?} failed: {source}")]
    Handler {
        command: String,
        #[source]
        source: HandlerError,
    },

    /// A handler panicked.
    #[error("command {0:?} panicked")]
    HandlerPanicked(String),

    /// The accept-loop thread panicked.
    #[error("accept loop panicked")]
    AcceptLoopPanicked,

    /// A thread could not be started.
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Errors returned from command handler bodies.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Sending a reply failed.
    #[error("reply failed: {0}")]
    Reply(#[from] cmdlink_frame::FrameError),

    /// The command's data did not have the expected shape.
    #[error("invalid command data: {0}")]
    InvalidData(String),

    /// Any other handler failure.
    #[error("{0}")]
    Failed(String),
}

pub type HandlerResult = std::result::Result<(), HandlerError>;
