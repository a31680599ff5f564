use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, RwLock};

use tracing::{debug, warn};

/// Where a reported fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// The accept loop (bind, accept, worker spawn).
    AcceptLoop,
    /// A per-connection worker.
    Worker,
}

impl std::fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSource::AcceptLoop => f.write_str("accept-loop"),
            ErrorSource::Worker => f.write_str("worker"),
        }
    }
}

/// One fault reported by a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub source: ErrorSource,
    pub message: String,
    /// Remote end of the connection involved, when there was one.
    pub peer: Option<SocketAddr>,
}

impl ErrorEvent {
    pub fn accept_loop(message: impl Into<String>) -> Self {
        Self {
            source: ErrorSource::AcceptLoop,
            message: message.into(),
            peer: None,
        }
    }

    pub fn worker(message: impl Into<String>, peer: Option<SocketAddr>) -> Self {
        Self {
            source: ErrorSource::Worker,
            message: message.into(),
            peer,
        }
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.peer {
            Some(peer) => write!(f, "[{} {peer}] {}", self.source, self.message),
            None => write!(f, "[{}] {}", self.source, self.message),
        }
    }
}

/// Returns `false` once the subscriber wants no further events.
type Subscriber = Box<dyn Fn(&ErrorEvent) -> bool + Send + Sync>;

/// Fan-out of server faults to any number of subscribers.
///
/// The accept thread and every worker publish through the same notifier, so
/// publishing only takes a shared lock. Subscribing may happen at any time.
/// A subscriber that panics, or a channel whose receiver is gone, is
/// removed on the publish that notices it.
#[derive(Default)]
pub struct ErrorNotifier {
    subscribers: RwLock<Vec<(u64, Subscriber)>>,
    next_id: AtomicU64,
}

impl ErrorNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` for every event published from now on.
    ///
    /// Callbacks run on the publishing thread and should return quickly.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.add(Box::new(move |event| {
            callback(event);
            true
        }));
    }

    /// Receive every event published from now on through a channel.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe_channel(&self) -> mpsc::Receiver<ErrorEvent> {
        let (tx, rx) = mpsc::channel();
        self.add(Box::new(move |event| tx.send(event.clone()).is_ok()));
        rx
    }

    /// Deliver `event` to every subscriber.
    pub fn publish(&self, event: ErrorEvent) {
        debug!(source = %event.source, peer = ?event.peer, message = %event.message, "server error");
        let mut finished = Vec::new();
        {
            let subscribers = match self.subscribers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (id, subscriber) in subscribers.iter() {
                match panic::catch_unwind(AssertUnwindSafe(|| subscriber(&event))) {
                    Ok(true) => {}
                    Ok(false) => finished.push(*id),
                    Err(_) => {
                        warn!(subscriber = *id, "error subscriber panicked, removing it");
                        finished.push(*id);
                    }
                }
            }
        }
        if !finished.is_empty() {
            self.write_subscribers()
                .retain(|(id, _)| !finished.contains(id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn add(&self, subscriber: Subscriber) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write_subscribers().push((id, subscriber));
    }

    fn write_subscribers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(u64, Subscriber)>> {
        match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for ErrorNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
