use crate::cmd::PipeEchoArgs;
use crate::exit::CliResult;

#[cfg(unix)]
pub fn run(_args: PipeEchoArgs) -> CliResult<i32> {
    use cmdlink_frame::StreamChannel;
    use cmdlink_transport::IpcStream;

    use crate::exit::{frame_error, transport_error, SUCCESS};

    let stream = IpcStream::from_stdio().map_err(|err| transport_error("stdio unavailable", err))?;
    let mut channel = StreamChannel::new(stream);

    let mut echoed = 0usize;
    while let Some(frame) = channel
        .receive_frame()
        .map_err(|err| frame_error("receive failed", err))?
    {
        let sent = if frame.is_probe() {
            channel.send_probe()
        } else {
            channel.send_bytes(&frame.payload)
        };
        sent.map_err(|err| frame_error("echo send failed", err))?;
        echoed = echoed.saturating_add(1);
        tracing::debug!(size = frame.payload.len(), "echoed frame");
    }

    tracing::info!(frames = echoed, "input closed");
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub fn run(_args: PipeEchoArgs) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "pipe-echo needs unix pipes",
    ))
}
