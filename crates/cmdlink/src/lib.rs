//! Framed loopback and pipe channels with named-command dispatch.
//!
//! Values travel as length-prefixed frames over loopback TCP or OS pipes.
//! On top of that, a small command server routes one request per connection
//! to a named handler on its own worker thread.
//!
//! # Crate Structure
//!
//! - [`transport`]: loopback sockets, anonymous and named pipes
//! - [`frame`]: length-prefixed framing, serializers and [`frame::StreamChannel`]
//! - [`command`]: command server, client and error notifications (behind `command` feature)

/// Re-export transport types.
pub mod transport {
    pub use cmdlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cmdlink_frame::*;
}

/// Re-export command types (requires `command` feature).
#[cfg(feature = "command")]
pub mod command {
    pub use cmdlink_command::*;
}
