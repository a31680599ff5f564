use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected duplex stream. Implements `Read` and `Write`.
///
/// This is the fundamental I/O type returned by transport operations.
/// It wraps either a loopback TCP stream or a pair of pipe ends (one read
/// end, one write end) that together behave like a single duplex stream.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Pipe {
        reader: std::fs::File,
        // `None` once the write half has been shut down.
        writer: Option<std::fs::File>,
    },
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            IpcStreamInner::Pipe { reader, .. } => reader.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            IpcStreamInner::Pipe { writer, .. } => match writer {
                Some(writer) => writer.write(buf),
                None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
            },
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            IpcStreamInner::Pipe { writer, .. } => match writer {
                Some(writer) => writer.flush(),
                None => Ok(()),
            },
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a connected TCP stream.
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: IpcStreamInner::Tcp(stream),
        }
    }

    /// Combine a pipe read end and a pipe write end into one duplex stream.
    #[cfg(unix)]
    pub fn from_pipes(reader: crate::pipe::PipeReader, writer: crate::pipe::PipeWriter) -> Self {
        Self {
            inner: IpcStreamInner::Pipe {
                reader: reader.into_file(),
                writer: Some(writer.into_file()),
            },
        }
    }

    /// Duplex stream over this process's stdin (read) and stdout (write).
    ///
    /// Intended for worker processes spawned with piped stdio. The standard
    /// descriptors are duplicated, so the process-wide handles stay open.
    #[cfg(unix)]
    pub fn from_stdio() -> Result<Self> {
        use std::os::fd::AsFd;

        let stdin = std::io::stdin().as_fd().try_clone_to_owned()?;
        let stdout = std::io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self {
            inner: IpcStreamInner::Pipe {
                reader: std::fs::File::from(stdin),
                writer: Some(std::fs::File::from(stdout)),
            },
        })
    }

    /// Set read timeout on the underlying stream.
    ///
    /// Pipes only accept `None`; blocking reads are their only mode.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            IpcStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            IpcStreamInner::Pipe { .. } => pipe_timeout(timeout, "read timeout"),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            IpcStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            IpcStreamInner::Pipe { .. } => pipe_timeout(timeout, "write timeout"),
        }
    }

    /// Try to clone this stream (creates new file descriptors).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            IpcStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            #[cfg(unix)]
            IpcStreamInner::Pipe { reader, writer } => {
                let writer = match writer {
                    Some(writer) => Some(writer.try_clone()?),
                    None => None,
                };
                Ok(Self {
                    inner: IpcStreamInner::Pipe {
                        reader: reader.try_clone()?,
                        writer,
                    },
                })
            }
        }
    }

    /// Close the write half so the peer observes end-of-stream.
    ///
    /// Reading remains possible until the peer closes its side.
    pub fn shutdown_write(&mut self) -> Result<()> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => match stream.shutdown(Shutdown::Write) {
                Ok(()) => Ok(()),
                // Peer already went away; nothing left to close.
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            #[cfg(unix)]
            IpcStreamInner::Pipe { writer, .. } => {
                if writer.take().is_some() {
                    debug!("closed pipe write end");
                }
                Ok(())
            }
        }
    }

    /// Address of the connected peer (TCP only).
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            IpcStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            #[cfg(unix)]
            IpcStreamInner::Pipe { .. } => None,
        }
    }

    /// Whether `TCP_NODELAY` is set. `None` for pipes.
    pub fn nodelay(&self) -> Option<bool> {
        match &self.inner {
            IpcStreamInner::Tcp(stream) => stream.nodelay().ok(),
            #[cfg(unix)]
            IpcStreamInner::Pipe { .. } => None,
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            IpcStreamInner::Tcp(_) => "tcp-loopback",
            #[cfg(unix)]
            IpcStreamInner::Pipe { .. } => "pipe",
        }
    }
}

#[cfg(unix)]
fn pipe_timeout(timeout: Option<std::time::Duration>, operation: &'static str) -> Result<()> {
    match timeout {
        None => Ok(()),
        Some(_) => Err(TransportError::Unsupported {
            operation,
            transport: "pipe",
        }),
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            IpcStreamInner::Tcp(stream) => f
                .debug_struct("IpcStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
            #[cfg(unix)]
            IpcStreamInner::Pipe { writer, .. } => f
                .debug_struct("IpcStream")
                .field("type", &"pipe")
                .field("write_open", &writer.is_some())
                .finish(),
        }
    }
}
