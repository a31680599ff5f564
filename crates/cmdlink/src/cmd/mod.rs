use std::net::{IpAddr, Ipv4Addr};

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod pipe_echo;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command server with the built-in commands.
    Serve(ServeArgs),
    /// Send one command and print the reply.
    Call(CallArgs),
    /// Echo frames from stdin back to stdout until stdin closes.
    PipeEcho(PipeEchoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::PipeEcho(args) => pipe_echo::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Loopback port to bind (0 picks a free port).
    #[arg(long, env = "CMDLINK_PORT", default_value_t = 0)]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Command name.
    pub name: String,
    /// Command data as JSON. Default: null.
    #[arg(long)]
    pub data: Option<String>,
    /// Server port.
    #[arg(long, env = "CMDLINK_PORT")]
    pub port: u16,
    /// Server address (must be loopback).
    #[arg(long, env = "CMDLINK_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub addr: IpAddr,
    /// Read every reply until the server closes, not just the first.
    #[arg(long)]
    pub all: bool,
    /// Maximum time to wait on the socket (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug, Default)]
pub struct PipeEchoArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
