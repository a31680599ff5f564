use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Loopback-only TCP transport.
///
/// Binds to `127.0.0.1` and refuses to connect anywhere that is not a
/// loopback address. There is no authentication on this surface: any local
/// process can connect.
pub struct LoopbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl LoopbackListener {
    /// Bind and listen on `127.0.0.1:port`.
    ///
    /// Port `0` asks the OS for an ephemeral port; use [`port`](Self::port)
    /// to find out which one was chosen.
    pub fn bind(port: u16) -> Result<Self> {
        let requested = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(requested).map_err(|e| TransportError::Bind {
            addr: requested,
            source: e,
        })?;
        let addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: requested,
            source: e,
        })?;

        info!(%addr, "listening on loopback");

        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok(IpcStream::from_tcp(stream))
    }

    /// Connect to a listening loopback socket (blocking).
    pub fn connect(addr: SocketAddr) -> Result<IpcStream> {
        if !addr.ip().is_loopback() {
            return Err(TransportError::NotLoopback(addr));
        }
        let stream =
            TcpStream::connect(addr).map_err(|e| TransportError::Connect { addr, source: e })?;
        // Frames are small and latency-sensitive; don't let Nagle hold them back.
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to loopback socket");
        Ok(IpcStream::from_tcp(stream))
    }

    /// The address this listener is bound to, with the real port.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp-loopback"
    }
}

impl std::fmt::Debug for LoopbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackListener")
            .field("addr", &self.addr)
            .finish()
    }
}
