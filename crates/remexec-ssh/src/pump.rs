//! I/O pump for a started command
//!
//! Runs as one tokio task per started command. It forwards stdin to the
//! channel, delivers channel output to the attached sinks, records the exit
//! status and hands the channel back to the session when the command ends.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Cause;
use crate::streams::{BoxedReader, BoxedWriter, Streams};
use crate::transport::{ChannelEvent, CommandChannel, Signal};

const STDIN_CHUNK: usize = 8 * 1024;

/// Requests from the session to a running pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    /// Signal the remote process and stop pumping
    Terminate,
}

pub(crate) struct PumpOutcome {
    pub(crate) channel: Box<dyn CommandChannel>,
    pub(crate) result: Result<(), Cause>,
}

pub(crate) async fn pump(
    mut channel: Box<dyn CommandChannel>,
    streams: Streams,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> PumpOutcome {
    let Streams {
        mut stdin,
        stdout,
        stderr,
    } = streams;
    let mut stdout = stdout.into_sink();
    let mut stderr = stderr.into_sink();

    let mut buf = vec![0u8; STDIN_CHUNK];
    let mut stdin_open = stdin.is_some();
    let mut control_open = true;

    let mut exit_status = None;
    let mut exit_signal = None;
    let mut failure = None;

    if !stdin_open {
        send_eof(&mut *channel).await;
    }

    loop {
        tokio::select! {
            biased;

            request = control.recv(), if control_open => match request {
                Some(Control::Terminate) => {
                    return terminate(channel, stdout, stderr, failure).await;
                }
                None => control_open = false,
            },

            event = channel.next_event() => match event {
                Some(ChannelEvent::Stdout(data)) => {
                    let delivery = deliver(&mut stdout, "stdout", &data, &mut failure);
                    if interrupted(delivery, &mut control, &mut control_open).await {
                        return terminate(channel, stdout, stderr, failure).await;
                    }
                }
                Some(ChannelEvent::Stderr(data)) => {
                    let delivery = deliver(&mut stderr, "stderr", &data, &mut failure);
                    if interrupted(delivery, &mut control, &mut control_open).await {
                        return terminate(channel, stdout, stderr, failure).await;
                    }
                }
                Some(ChannelEvent::ExitStatus(status)) => {
                    debug!(status, "remote process exited");
                    exit_status = Some(status);
                }
                Some(ChannelEvent::ExitSignal(signal)) => {
                    debug!(signal = %signal, "remote process killed by signal");
                    exit_signal = Some(signal);
                }
                Some(ChannelEvent::Eof) => {}
                Some(ChannelEvent::Closed) | None => break,
            },

            read = read_chunk(&mut stdin, &mut buf), if stdin_open => match read {
                Ok(0) => {
                    stdin_open = false;
                    send_eof(&mut *channel).await;
                }
                Ok(n) => {
                    if let Err(e) = channel.send(&buf[..n]).await {
                        debug!(error = %e, "remote stdin closed");
                        stdin_open = false;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "failed to read stdin");
                    stdin_open = false;
                    send_eof(&mut *channel).await;
                }
            },
        }
    }

    flush(stdout, "stdout", &mut failure).await;
    flush(stderr, "stderr", &mut failure).await;

    PumpOutcome {
        channel,
        result: classify(exit_status, exit_signal, failure),
    }
}

/// An exit status wins over an exit signal; a sink failure only surfaces
/// when the command itself succeeded
fn classify(
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    failure: Option<Cause>,
) -> Result<(), Cause> {
    match (exit_status, exit_signal) {
        (Some(0), _) => failure.map_or(Ok(()), Err),
        (Some(status), _) => Err(Cause::Exited(status)),
        (None, Some(signal)) => Err(Cause::Signaled(signal)),
        (None, None) => Err(Cause::ExitStatusMissing),
    }
}

/// Signal the remote process and hand the channel back
async fn terminate(
    mut channel: Box<dyn CommandChannel>,
    stdout: Option<BoxedWriter>,
    stderr: Option<BoxedWriter>,
    mut failure: Option<Cause>,
) -> PumpOutcome {
    if let Err(e) = channel.signal(Signal::Term).await {
        debug!(error = %e, "failed to signal remote process");
    }
    flush(stdout, "stdout", &mut failure).await;
    flush(stderr, "stderr", &mut failure).await;
    PumpOutcome {
        channel,
        result: Err(Cause::Terminated),
    }
}

/// Run a delivery unless a terminate request arrives first
///
/// Returns `true` when the pump must stop. A sink that never drains would
/// otherwise keep the request from being seen.
async fn interrupted(
    delivery: impl Future<Output = ()>,
    control: &mut mpsc::UnboundedReceiver<Control>,
    control_open: &mut bool,
) -> bool {
    if !*control_open {
        delivery.await;
        return false;
    }

    tokio::select! {
        biased;

        request = control.recv() => match request {
            Some(Control::Terminate) => true,
            None => {
                // the session is gone
                *control_open = false;
                true
            }
        },
        () = delivery => false,
    }
}

async fn read_chunk(reader: &mut Option<BoxedReader>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn send_eof(channel: &mut dyn CommandChannel) {
    if let Err(e) = channel.send_eof().await {
        debug!(error = %e, "failed to send eof");
    }
}

/// Write to a sink; a failing sink is dropped and the first failure kept
async fn deliver(
    sink: &mut Option<BoxedWriter>,
    stream: &'static str,
    data: &[u8],
    failure: &mut Option<Cause>,
) {
    let Some(writer) = sink.as_mut() else {
        return;
    };
    if let Err(source) = writer.write_all(data).await {
        warn!(stream, error = %source, "output sink failed, discarding further output");
        *sink = None;
        if failure.is_none() {
            *failure = Some(Cause::Stream { stream, source });
        }
    }
}

async fn flush(sink: Option<BoxedWriter>, stream: &'static str, failure: &mut Option<Cause>) {
    let Some(mut writer) = sink else {
        return;
    };
    if let Err(source) = writer.flush().await
        && failure.is_none()
    {
        *failure = Some(Cause::Stream { stream, source });
    }
}
