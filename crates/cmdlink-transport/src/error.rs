use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the loopback listener.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket transport only talks to the local machine.
    #[error("address {0} is not a loopback address")]
    NotLoopback(SocketAddr),

    /// Failed to create or open a pipe.
    #[error("pipe error at {path}: {source}")]
    Pipe {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The operation is not supported by this kind of stream.
    #[error("{operation} is not supported on {transport} streams")]
    Unsupported {
        operation: &'static str,
        transport: &'static str,
    },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
