//! Named-command dispatch over loopback framed channels.
//!
//! A [`CommandServer`] owns a registry of named handlers and serves one
//! [`CommandMessage`] per accepted connection on its own worker thread. A
//! [`CommandClient`] opens a connection, sends one command and waits for the
//! reply. Faults inside a connection are published through the server's
//! [`ErrorNotifier`] and never reach other connections.

pub mod client;
pub mod error;
pub mod message;
pub mod notify;
pub mod registry;
pub mod server;

pub use client::{call, ClientConfig, CommandClient};
pub use error::{CommandError, HandlerError, HandlerResult, Result};
pub use message::{CommandMessage, SHUTDOWN_ACK};
pub use notify::{ErrorEvent, ErrorNotifier, ErrorSource};
pub use registry::{CommandHandler, CommandRegistry, Connection};
pub use server::{CommandServer, ServerConfig, ServerHandle, ServerState};
