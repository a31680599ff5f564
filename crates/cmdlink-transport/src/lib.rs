//! Local transport layer for cmdlink.
//!
//! Two interchangeable byte-stream transports sit behind one [`IpcStream`]
//! type:
//! - Loopback TCP sockets ([`LoopbackListener`])
//! - OS pipes, anonymous or named ([`pipe`])
//!
//! Everything above this crate (framing, command dispatch) only ever sees an
//! [`IpcStream`] or a plain `Read + Write`.

pub mod error;
#[cfg(unix)]
pub mod pipe;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::LoopbackListener;
pub use traits::IpcStream;

#[cfg(unix)]
pub use pipe::{anonymous, duplex, NamedPipe, OpenOrder, PipeReader, PipeWriter};
