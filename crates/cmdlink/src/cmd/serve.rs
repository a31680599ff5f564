use std::sync::Arc;

use cmdlink_command::message::data_as;
use cmdlink_command::{CommandServer, Connection, HandlerError, HandlerResult};
use serde_json::Value;

use crate::cmd::ServeArgs;
use crate::exit::{command_error, CliError, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

/// Upper bound for the `count` command, to keep a typo from flooding a client.
const MAX_COUNT: u64 = 10_000;

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut server = CommandServer::new();
    register_builtins(&mut server).map_err(|err| command_error("register failed", err))?;
    server.subscribe(|event| {
        tracing::warn!(source = %event.source, peer = ?event.peer, "{}", event.message);
    });

    let server = Arc::new(server);
    let handle = server
        .spawn(args.port)
        .map_err(|err| command_error("bind failed", err))?;
    install_ctrlc_handler(Arc::clone(&server))?;
    print_listening(handle.addr(), &server.registry().names(), format);

    handle
        .join()
        .map_err(|err| command_error("accept loop failed", err))?;
    Ok(SUCCESS)
}

pub fn register_builtins(server: &mut CommandServer) -> cmdlink_command::Result<()> {
    server.register_command("echo", echo)?;
    server.register_command("ping", ping)?;
    server.register_command("sum", sum)?;
    server.register_command("count", count)?;
    Ok(())
}

fn echo(data: Value, conn: &mut Connection) -> HandlerResult {
    conn.send(&data)?;
    Ok(())
}

fn ping(_: Value, conn: &mut Connection) -> HandlerResult {
    conn.send("pong")?;
    Ok(())
}

fn sum(data: Value, conn: &mut Connection) -> HandlerResult {
    let values: Vec<f64> = data_as(data)?;
    conn.send(&values.iter().sum::<f64>())?;
    Ok(())
}

fn count(data: Value, conn: &mut Connection) -> HandlerResult {
    let n: u64 = data_as(data)?;
    if n > MAX_COUNT {
        return Err(HandlerError::InvalidData(format!(
            "count {n} exceeds the limit of {MAX_COUNT}"
        )));
    }
    for i in 0..n {
        conn.send(&i)?;
    }
    Ok(())
}

fn install_ctrlc_handler(server: Arc<CommandServer>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, stopping");
        if let Err(err) = server.stop() {
            tracing::warn!(error = %err, "stop failed");
        }
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
