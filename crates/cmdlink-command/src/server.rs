use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cmdlink_frame::{FrameConfig, JsonSerializer, Received, Serializer, StreamChannel};
use cmdlink_transport::{IpcStream, LoopbackListener};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{CommandError, HandlerResult, Result};
use crate::message::{CommandMessage, SHUTDOWN_ACK};
use crate::notify::{ErrorEvent, ErrorNotifier};
use crate::registry::{CommandHandler, CommandRegistry, Connection};

const ACCEPT_THREAD_NAME: &str = "cmdlink-accept";

/// Lifecycle of a [`CommandServer`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::Listening => "listening",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Server behavior configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Frame limits and socket timeouts applied to every accepted connection.
    pub frame: FrameConfig,
    /// Worker threads are named `{prefix}-{n}`.
    pub worker_name_prefix: String,
    /// How long `stop` waits before sending another wake-up probe.
    pub probe_retry_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            worker_name_prefix: "cmdlink-worker".to_string(),
            probe_retry_interval: Duration::from_millis(200),
        }
    }
}

/// Loopback command server.
///
/// Each accepted connection carries exactly one [`CommandMessage`]. The
/// message is decoded on a dedicated worker thread and routed by name to a
/// registered handler, which may send any number of replies before the
/// connection is closed. Faults on a connection are published through the
/// server's [`ErrorNotifier`] and never stop the accept loop.
pub struct CommandServer<S: Serializer = JsonSerializer> {
    registry: Arc<CommandRegistry<S>>,
    notifier: Arc<ErrorNotifier>,
    serializer: S,
    config: ServerConfig,
    state: Mutex<ServerState>,
    state_changed: Condvar,
    bound: OnceLock<SocketAddr>,
    next_worker_id: AtomicU64,
    active_workers: Arc<AtomicUsize>,
}

impl CommandServer<JsonSerializer> {
    /// Create an idle JSON server with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_serializer(JsonSerializer, config)
    }
}

impl Default for CommandServer<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> CommandServer<S> {
    /// Create an idle server that encodes values with `serializer`.
    pub fn with_serializer(serializer: S, config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(CommandRegistry::new()),
            notifier: Arc::new(ErrorNotifier::new()),
            serializer,
            config,
            state: Mutex::new(ServerState::Idle),
            state_changed: Condvar::new(),
            bound: OnceLock::new(),
            next_worker_id: AtomicU64::new(1),
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a closure under `name`.
    pub fn register_command<F>(&mut self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Value, &mut Connection<S>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(name, Arc::new(handler))
    }

    /// Register a handler under `name`.
    ///
    /// Only allowed while the server is idle. A name that is already bound
    /// fails with [`CommandError::DuplicateCommand`] and keeps its handler.
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler<S>>,
    ) -> Result<()> {
        let state = *self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let invalid = CommandError::InvalidState {
            operation: "register a command",
            state,
        };
        if state != ServerState::Idle {
            return Err(invalid);
        }
        match Arc::get_mut(&mut self.registry) {
            Some(registry) => registry.register(name, handler),
            None => Err(invalid),
        }
    }

    /// Call `callback` for every fault the server reports.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback);
    }

    pub fn notifier(&self) -> &Arc<ErrorNotifier> {
        &self.notifier
    }

    pub fn registry(&self) -> &CommandRegistry<S> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.lock_state()
    }

    /// Address the server is bound to, once it has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get().copied()
    }

    /// Number of workers currently serving a connection.
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Bind to `127.0.0.1:port` and run the accept loop on this thread.
    ///
    /// Returns once [`stop`](Self::stop) completes, or with the transport
    /// error that ended the loop. Port `0` picks an ephemeral port; read it
    /// back with [`local_addr`](Self::local_addr).
    pub fn start(&self, port: u16) -> Result<()> {
        let listener = self.bind(port)?;
        self.serve(listener)
    }

    /// Bind on this thread, then run the accept loop on a background thread.
    pub fn spawn(self: &Arc<Self>, port: u16) -> Result<ServerHandle> {
        let listener = self.bind(port)?;
        let addr = listener.local_addr();
        let server = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(ACCEPT_THREAD_NAME.to_string())
            .spawn(move || server.serve(listener));
        match spawned {
            Ok(thread) => Ok(ServerHandle { addr, thread }),
            Err(err) => {
                self.set_state(ServerState::Stopped);
                Err(CommandError::Spawn(err))
            }
        }
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    ///
    /// Workers already running are not interrupted. Stopping an idle server
    /// moves it straight to `Stopped`; stopping a stopped server does nothing.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            ServerState::Idle => {
                *state = ServerState::Stopped;
                self.state_changed.notify_all();
                info!("command server stopped before starting");
                return Ok(());
            }
            ServerState::Stopped => return Ok(()),
            ServerState::Listening => {
                *state = ServerState::Stopping;
                self.state_changed.notify_all();
            }
            ServerState::Stopping => {}
        }
        let Some(addr) = self.local_addr() else {
            return Err(CommandError::InvalidState {
                operation: "stop",
                state: *state,
            });
        };
        drop(state);

        info!(%addr, "stopping command server");
        loop {
            self.send_stop_probe(addr);
            let state = self.lock_state();
            let (state, _) = self
                .state_changed
                .wait_timeout_while(state, self.config.probe_retry_interval, |state| {
                    *state != ServerState::Stopped
                })
                .unwrap_or_else(PoisonError::into_inner);
            if *state == ServerState::Stopped {
                return Ok(());
            }
            debug!(%addr, "accept loop still running, probing again");
        }
    }

    fn bind(&self, port: u16) -> Result<LoopbackListener> {
        let mut state = self.lock_state();
        if *state != ServerState::Idle {
            return Err(CommandError::InvalidState {
                operation: "start",
                state: *state,
            });
        }
        let listener = LoopbackListener::bind(port)?;
        let addr = listener.local_addr();
        // Idle is left exactly once, so the slot is always empty here.
        let _ = self.bound.set(addr);
        *state = ServerState::Listening;
        self.state_changed.notify_all();
        info!(%addr, commands = ?self.registry.names(), "command server listening");
        Ok(listener)
    }

    fn serve(&self, listener: LoopbackListener) -> Result<()> {
        let result = loop {
            let stream = match listener.accept() {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "accept failed, shutting down");
                    self.notifier
                        .publish(ErrorEvent::accept_loop(format!("accept failed: {err}")));
                    break Err(CommandError::from(err));
                }
            };

            if self.state() == ServerState::Listening {
                self.dispatch(stream);
                continue;
            }

            self.acknowledge_shutdown(stream);
            break Ok(());
        };

        drop(listener);
        self.set_state(ServerState::Stopped);
        info!("command server stopped");
        result
    }

    fn dispatch(&self, stream: IpcStream) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let worker = Worker {
            registry: Arc::clone(&self.registry),
            notifier: Arc::clone(&self.notifier),
            serializer: self.serializer.clone(),
            frame: self.config.frame.clone(),
            _active: ActiveWorker::enter(&self.active_workers),
        };
        let spawned = thread::Builder::new()
            .name(format!("{}-{id}", self.config.worker_name_prefix))
            .spawn(move || worker.run(stream));
        if let Err(err) = spawned {
            self.notifier
                .publish(ErrorEvent::accept_loop(CommandError::Spawn(err).to_string()));
        }
    }

    /// Reply to the connection that woke a stopping accept loop.
    fn acknowledge_shutdown(&self, stream: IpcStream) {
        let config = self.probe_frame_config();
        let mut channel = match StreamChannel::with_config_ipc(stream, self.serializer.clone(), config)
        {
            Ok(channel) => channel,
            Err(err) => {
                debug!(error = %err, "could not configure wake-up connection");
                return;
            }
        };
        // Drain the wake-up frame so closing does not reset the connection.
        let _ = channel.receive_frame();
        if let Err(err) = channel.send(SHUTDOWN_ACK).and_then(|()| channel.finish()) {
            debug!(error = %err, "shutdown acknowledgement not delivered");
        }
    }

    fn send_stop_probe(&self, addr: SocketAddr) {
        let stream = match LoopbackListener::connect(addr) {
            Ok(stream) => stream,
            Err(err) => {
                debug!(%addr, error = %err, "stop probe could not connect");
                return;
            }
        };
        let config = self.probe_frame_config();
        let mut channel = match StreamChannel::with_config_ipc(stream, self.serializer.clone(), config)
        {
            Ok(channel) => channel,
            Err(err) => {
                debug!(error = %err, "could not configure stop probe");
                return;
            }
        };
        if let Err(err) = channel.send_probe() {
            debug!(error = %err, "stop probe not sent");
            return;
        }
        match channel.receive_value::<String>() {
            Ok(Some(ack)) if ack == SHUTDOWN_ACK => debug!("shutdown acknowledged"),
            Ok(other) => debug!(reply = ?other, "unexpected reply to stop probe"),
            Err(err) => debug!(error = %err, "no shutdown acknowledgement"),
        }
    }

    fn probe_frame_config(&self) -> FrameConfig {
        FrameConfig {
            read_timeout: Some(self.config.probe_retry_interval),
            write_timeout: Some(self.config.probe_retry_interval),
            ..self.config.frame.clone()
        }
    }

    fn set_state(&self, next: ServerState) {
        *self.lock_state() = next;
        self.state_changed.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Serializer> std::fmt::Debug for CommandServer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandServer")
            .field("state", &self.state())
            .field("addr", &self.local_addr())
            .field("registry", &self.registry)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

/// Handle to an accept loop running on its own thread.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    thread: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the accept loop to exit and return how it ended.
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .unwrap_or(Err(CommandError::AcceptLoopPanicked))
    }
}

/// Counts a worker as active for as long as it is alive.
struct ActiveWorker(Arc<AtomicUsize>);

impl ActiveWorker {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker<S: Serializer> {
    registry: Arc<CommandRegistry<S>>,
    notifier: Arc<ErrorNotifier>,
    serializer: S,
    frame: FrameConfig,
    _active: ActiveWorker,
}

impl<S: Serializer> Worker<S> {
    fn run(self, stream: IpcStream) {
        let peer = stream.peer_addr();
        if let Err(err) = self.serve_connection(stream) {
            self.notifier.publish(ErrorEvent::worker(err.to_string(), peer));
        }
    }

    fn serve_connection(&self, stream: IpcStream) -> Result<()> {
        let mut conn =
            StreamChannel::with_config_ipc(stream, self.serializer.clone(), self.frame.clone())?;
        let outcome = self.dispatch(&mut conn);
        let closed = conn.finish();
        outcome?;
        closed.map_err(CommandError::from)
    }

    fn dispatch(&self, conn: &mut Connection<S>) -> Result<()> {
        let CommandMessage { name, data } = match conn.receive::<CommandMessage>()? {
            Some(Received::Value(message)) => message,
            Some(Received::Probe) | None => return Err(CommandError::EmptyCommand),
        };
        let Some(handler) = self.registry.get(&name) else {
            return Err(CommandError::UnknownCommand(name));
        };

        debug!(command = %name, "dispatching command");
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(data, conn))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(CommandError::Handler {
                command: name,
                source,
            }),
            Err(_) => Err(CommandError::HandlerPanicked(name)),
        }
    }
}
