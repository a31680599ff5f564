use std::net::{IpAddr, SocketAddr};

use cmdlink_frame::{FrameConfig, JsonSerializer, Received, Serializer, StreamChannel};
use cmdlink_transport::LoopbackListener;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Result;
use crate::message::CommandMessage;
use crate::registry::Connection;

/// Client connection configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Frame limits and socket timeouts applied to each call.
    pub frame: FrameConfig,
}

/// Sends commands to a [`CommandServer`](crate::CommandServer).
///
/// Every call opens a fresh connection, sends one command, reads the
/// reply and closes.
#[derive(Debug, Clone)]
pub struct CommandClient<S: Serializer = JsonSerializer> {
    addr: SocketAddr,
    config: ClientConfig,
    serializer: S,
}

impl CommandClient<JsonSerializer> {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self::with_config(address, port, ClientConfig::default())
    }

    pub fn with_config(address: IpAddr, port: u16, config: ClientConfig) -> Self {
        Self::with_serializer(address, port, JsonSerializer, config)
    }
}

impl<S: Serializer> CommandClient<S> {
    pub fn with_serializer(address: IpAddr, port: u16, serializer: S, config: ClientConfig) -> Self {
        Self {
            addr: SocketAddr::new(address, port),
            config,
            serializer,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send `command` and return the first reply.
    ///
    /// `Ok(None)` means the server closed the connection without replying,
    /// which is what an unknown or failed command looks like from here.
    pub fn call<T: DeserializeOwned>(&self, command: &CommandMessage) -> Result<Option<T>> {
        let mut conn = self.open()?;
        conn.send(command)?;
        let reply = conn.receive_value::<T>()?;
        debug!(command = %command.name, replied = reply.is_some(), "call complete");
        Ok(reply)
    }

    /// Send `command` and collect every reply until the server closes.
    ///
    /// Probe frames in the reply stream are skipped.
    pub fn call_all<T: DeserializeOwned>(&self, command: &CommandMessage) -> Result<Vec<T>> {
        let mut conn = self.open()?;
        conn.send(command)?;
        let mut replies = Vec::new();
        while let Some(received) = conn.receive::<T>()? {
            if let Received::Value(value) = received {
                replies.push(value);
            }
        }
        debug!(command = %command.name, replies = replies.len(), "call complete");
        Ok(replies)
    }

    /// Send `command` without waiting for a reply.
    pub fn send(&self, command: &CommandMessage) -> Result<()> {
        let mut conn = self.open()?;
        conn.send(command)?;
        conn.finish()?;
        Ok(())
    }

    fn open(&self) -> Result<Connection<S>> {
        let stream = LoopbackListener::connect(self.addr)?;
        let conn =
            StreamChannel::with_config_ipc(stream, self.serializer.clone(), self.config.frame.clone())?;
        Ok(conn)
    }
}

/// One-shot JSON call to the server at `address:port`.
pub fn call<T: DeserializeOwned>(
    address: IpAddr,
    port: u16,
    command: &CommandMessage,
) -> Result<Option<T>> {
    CommandClient::new(address, port).call(command)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::Duration;

    use cmdlink_frame::FrameError;
    use cmdlink_transport::TransportError;
    use serde_json::{json, Value};

    use super::*;
    use crate::error::CommandError;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Accept one connection, read the command and run `reply` on it.
    fn fake_server<F>(reply: F) -> (u16, thread::JoinHandle<CommandMessage>)
    where
        F: FnOnce(&mut Connection) + Send + 'static,
    {
        let listener = LoopbackListener::bind(0).expect("bind");
        let port = listener.port();
        let server = thread::spawn(move || {
            let stream = listener.accept().expect("accept");
            let mut conn = StreamChannel::new(stream);
            let command: CommandMessage = conn
                .receive_value()
                .expect("receive")
                .expect("a command");
            reply(&mut conn);
            conn.finish().expect("finish");
            command
        });
        (port, server)
    }

    #[test]
    fn call_sends_envelope_and_reads_reply() {
        let (port, server) = fake_server(|conn| conn.send(&json!([1, 2])).expect("reply"));

        let reply: Option<Vec<u8>> = call(LOCALHOST, port, &CommandMessage::new("list", json!({ "n": 2 })))
            .expect("call should succeed");

        assert_eq!(reply, Some(vec![1, 2]));
        let seen = server.join().expect("server thread");
        assert_eq!(seen, CommandMessage::new("list", json!({ "n": 2 })));
    }

    #[test]
    fn call_without_reply_is_none() {
        let (port, server) = fake_server(|_| {});
        let reply: Option<Value> = CommandClient::new(LOCALHOST, port)
            .call(&CommandMessage::named("quiet"))
            .expect("call should succeed");
        assert_eq!(reply, None);
        server.join().expect("server thread");
    }

    #[test]
    fn call_all_collects_until_close() {
        let (port, server) = fake_server(|conn| {
            conn.send("a").expect("reply");
            conn.send_probe().expect("probe");
            conn.send("b").expect("reply");
        });
        let replies: Vec<String> = CommandClient::new(LOCALHOST, port)
            .call_all(&CommandMessage::named("many"))
            .expect("call_all should succeed");
        assert_eq!(replies, vec!["a", "b"]);
        server.join().expect("server thread");
    }

    #[test]
    fn send_does_not_wait_for_reply() {
        let (port, server) = fake_server(|_| {});
        CommandClient::new(LOCALHOST, port)
            .send(&CommandMessage::named("fire"))
            .expect("send should succeed");
        assert_eq!(server.join().expect("server thread").name, "fire");
    }

    #[test]
    fn wrong_reply_type_is_serialization_error() {
        let (port, server) = fake_server(|conn| conn.send("text").expect("reply"));
        let err = call::<u32>(LOCALHOST, port, &CommandMessage::named("x")).unwrap_err();
        assert!(matches!(err, CommandError::Frame(FrameError::Serialization(_))));
        server.join().expect("server thread");
    }

    #[test]
    fn refused_connection_propagates() {
        let port = {
            let listener = LoopbackListener::bind(0).expect("bind");
            listener.port()
        };
        let err = call::<Value>(LOCALHOST, port, &CommandMessage::named("x")).unwrap_err();
        assert!(matches!(err, CommandError::Transport(TransportError::Connect { .. })));
    }

    #[test]
    fn non_loopback_address_is_rejected() {
        let err = call::<Value>(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 9, &CommandMessage::named("x"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Transport(TransportError::NotLoopback(_))));
    }

    #[test]
    fn read_timeout_applies_to_calls() {
        let listener = LoopbackListener::bind(0).expect("bind");
        let port = listener.port();
        let server = thread::spawn(move || {
            let _stream = listener.accept().expect("accept");
            thread::sleep(Duration::from_millis(500));
        });

        let config = ClientConfig {
            frame: FrameConfig {
                read_timeout: Some(Duration::from_millis(50)),
                ..FrameConfig::default()
            },
        };
        let err = CommandClient::with_config(LOCALHOST, port, config)
            .call::<Value>(&CommandMessage::named("slow"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Frame(FrameError::Io(_))));
        server.join().expect("server thread");
    }
}
