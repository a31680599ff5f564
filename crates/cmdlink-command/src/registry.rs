use std::collections::HashMap;
use std::sync::Arc;

use cmdlink_frame::{JsonSerializer, Serializer, StreamChannel};
use cmdlink_transport::IpcStream;
use serde_json::Value;

use crate::error::{CommandError, HandlerResult, Result};

/// The open connection a handler replies on.
pub type Connection<S = JsonSerializer> = StreamChannel<IpcStream, S>;

/// A named command implementation.
///
/// Runs synchronously on the worker that received the command and may send
/// any number of reply frames on `conn` before returning. The connection is
/// closed once `handle` returns.
pub trait CommandHandler<S: Serializer = JsonSerializer>: Send + Sync + 'static {
    fn handle(&self, data: Value, conn: &mut Connection<S>) -> HandlerResult;
}

impl<S, F> CommandHandler<S> for F
where
    S: Serializer,
    F: Fn(Value, &mut Connection<S>) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, data: Value, conn: &mut Connection<S>) -> HandlerResult {
        self(data, conn)
    }
}

/// Name-keyed table of command handlers.
pub struct CommandRegistry<S: Serializer = JsonSerializer> {
    handlers: HashMap<String, Arc<dyn CommandHandler<S>>>,
}

impl<S: Serializer> CommandRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind `name` to `handler`.
    ///
    /// Fails with [`CommandError::DuplicateCommand`] if `name` is taken; the
    /// existing binding is left untouched.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler<S>>) -> Result<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(CommandError::DuplicateCommand(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Look up the handler for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler<S>>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S: Serializer> Default for CommandRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> std::fmt::Debug for CommandRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}
