use std::time::Duration;

use cmdlink_command::{ClientConfig, CommandClient, CommandMessage};
use cmdlink_frame::FrameConfig;
use serde_json::Value;

use crate::cmd::CallArgs;
use crate::exit::{command_error, CliError, CliResult, NO_REPLY, SUCCESS, USAGE};
use crate::output::{print_replies, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let command = CommandMessage::new(args.name.as_str(), parse_data(args.data.as_deref())?);
    let config = ClientConfig {
        frame: FrameConfig {
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            ..FrameConfig::default()
        },
    };
    let client = CommandClient::with_config(args.addr, args.port, config);

    let replies: Vec<Value> = if args.all {
        client.call_all(&command)
    } else {
        client.call(&command).map(|reply| reply.into_iter().collect())
    }
    .map_err(|err| command_error("call failed", err))?;

    tracing::debug!(command = %command.name, replies = replies.len(), "call finished");
    print_replies(&command.name, &replies, format);
    if replies.is_empty() {
        return Ok(NO_REPLY);
    }
    Ok(SUCCESS)
}

fn parse_data(raw: Option<&str>) -> CliResult<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| CliError::new(USAGE, format!("--data is not valid JSON: {err}"))),
        None => Ok(Value::Null),
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
