//! Remote session lifecycle
//!
//! A [`Session`] owns one SSH connection and one command channel and runs
//! exactly one rendered script on it:
//!
//! ```text
//! Ready --run--------------------> Finished
//! Ready --start--> Running --wait-> Finished
//! any   --close------------------> Closed
//! ```
//!
//! A session is not reusable. After a failure, build a new one.
//! There are no timeouts; wrap `run`/`wait` in `tokio::time::timeout` and
//! call [`Session::close`] when the deadline passes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use remexec_script::{Arguments, Script};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::composer::compose;
use crate::descriptor::ConnectionSource;
use crate::error::{Cause, Operation, SessionError};
use crate::known_hosts::host_key_policy;
use crate::options::SessionOptions;
use crate::pump::{Control, PumpOutcome, pump};
use crate::ssh::SshTransport;
use crate::streams::{OutputPipe, OutputSlot, Streams};
use crate::terminal::{Console, RawModeGuard, StdConsole, pty_request};
use crate::transport::{Client, CommandChannel, Credentials, DialTarget, Transport};

/// How long `close` waits for a terminated command's I/O task
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Running,
    Finished,
    Closed,
}

/// A started command: the pump task and its control line
struct Job {
    control: mpsc::UnboundedSender<Control>,
    handle: JoinHandle<PumpOutcome>,
}

/// One script execution on one remote host
pub struct Session {
    script: Arc<dyn Script>,
    command: String,
    client: Option<Box<dyn Client>>,
    channel: Option<Box<dyn CommandChannel>>,
    console: Arc<dyn Console>,
    options: SessionOptions,
    streams: Streams,
    job: Option<Job>,
    phase: Phase,
    exit_code: i32,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("script", &self.script.name())
            .field("phase", &self.phase)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect with the default transport, console and options
    ///
    /// # Errors
    /// Returns a `SessionError` with exit code `-1` if the command cannot be
    /// composed, the trust store cannot be loaded, or dialling or opening the
    /// channel fails.
    pub async fn connect<C>(
        source: &C,
        script: Arc<dyn Script>,
        arguments: &Arguments,
    ) -> Result<Self, SessionError>
    where
        C: ConnectionSource + ?Sized,
    {
        SessionBuilder::new(script)
            .arguments(arguments.clone())
            .connect(source)
            .await
    }

    /// Composed command text
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn script(&self) -> &Arc<dyn Script> {
        &self.script
    }

    /// Whether a started command has not been waited for yet
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Last recorded exit code
    ///
    /// `0` on success, the remote exit status after a nonzero exit, `-1`
    /// after a failure without exit status. Reads `0` before any run, so only
    /// consult it once `run` or `wait` has returned.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Feed the remote command's stdin from `reader`
    ///
    /// Without a reader, `start` sends end of file immediately and `run`
    /// forwards the console's stdin.
    ///
    /// # Panics
    /// Panics if the command was already started.
    pub fn set_stdin_reader(&mut self, reader: impl AsyncRead + Send + Unpin + 'static) {
        self.assert_attachable("stdin");
        self.streams.stdin = Some(Box::new(reader));
    }

    /// Write the remote stdout to `writer`
    ///
    /// # Panics
    /// Panics if the command was already started or stdout is piped.
    pub fn set_stdout_writer(&mut self, writer: impl AsyncWrite + Send + Unpin + 'static) {
        self.assert_attachable("stdout");
        assert!(!self.streams.stdout.is_pipe(), "stdout is already piped");
        self.streams.stdout = OutputSlot::Writer(Box::new(writer));
    }

    /// Write the remote stderr to `writer`
    ///
    /// # Panics
    /// Panics if the command was already started or stderr is piped.
    pub fn set_stderr_writer(&mut self, writer: impl AsyncWrite + Send + Unpin + 'static) {
        self.assert_attachable("stderr");
        assert!(!self.streams.stderr.is_pipe(), "stderr is already piped");
        self.streams.stderr = OutputSlot::Writer(Box::new(writer));
    }

    /// Stream the remote stdout instead of writing it to a fixed sink
    ///
    /// # Errors
    /// Returns a stream setup error if stdout already has a writer or pipe,
    /// or the command was already started.
    pub fn stdout_pipe(&mut self) -> Result<OutputPipe, SessionError> {
        self.open_pipe(Operation::StdoutPipe)
    }

    /// Stream the remote stderr instead of writing it to a fixed sink
    ///
    /// # Errors
    /// Returns a stream setup error if stderr already has a writer or pipe,
    /// or the command was already started.
    pub fn stderr_pipe(&mut self) -> Result<OutputPipe, SessionError> {
        self.open_pipe(Operation::StderrPipe)
    }

    /// Run the command and wait for it to finish
    ///
    /// Forwards the console's stdin unless a reader was attached. When stdin
    /// is an interactive terminal, the terminal is switched to raw mode for
    /// the duration of the call and a matching pseudo-terminal is requested.
    ///
    /// With [`StdConsole`], stdin is read on a blocking thread that cannot be
    /// cancelled: one read may still be pending after `run` returns and will
    /// consume the next line typed, and it can delay runtime shutdown until
    /// stdin produces input or closes. Attach a reader with
    /// [`Session::set_stdin_reader`] when the process keeps using stdin.
    ///
    /// # Errors
    /// Returns a `SessionError` carrying the remote exit status if the command
    /// exits nonzero, or `-1` if it could not be run.
    #[instrument(skip(self), fields(script = %self.script.name()))]
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.ensure_ready(Operation::Run)?;

        let _terminal = self.prepare_terminal().await?;

        if self.streams.stdin.is_none() {
            self.streams.stdin = Some(self.console.stdin());
        }

        debug!(command = %self.command, "running command");
        self.launch(Operation::Run).await?;
        self.join(Operation::Run).await
    }

    /// Start the command without waiting for it
    ///
    /// # Errors
    /// Returns a `SessionError` with exit code `-1` if the command could not
    /// be started.
    #[instrument(skip(self), fields(script = %self.script.name()))]
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.ensure_ready(Operation::Start)?;
        self.launch(Operation::Start).await
    }

    /// Wait for a started command to finish
    ///
    /// The session is no longer running once this returns, whatever the
    /// outcome. If the returned future is dropped early, the command keeps
    /// running and [`Session::close`] terminates it.
    ///
    /// # Errors
    /// Returns a `SessionError` carrying the remote exit status if the command
    /// exited nonzero, or `-1` for any other failure.
    #[instrument(skip(self), fields(script = %self.script.name()))]
    pub async fn wait(&mut self) -> Result<(), SessionError> {
        self.join(Operation::Wait).await
    }

    /// Release the channel and the connection
    ///
    /// A running command is sent `TERM` first. Its I/O task gets a short
    /// grace period to stop and is aborted after that, so a stalled output
    /// sink cannot block `close`. Every step is best effort: failures are
    /// logged and never stop the remaining steps. Safe to call any number of
    /// times.
    #[instrument(skip(self), fields(script = %self.script.name()))]
    pub async fn close(&mut self) {
        if let Some(mut job) = self.job.take() {
            if job.control.send(Control::Terminate).is_err() {
                debug!("I/O task already stopped");
            }
            match tokio::time::timeout(TERMINATE_GRACE, &mut job.handle).await {
                Ok(Ok(outcome)) => self.channel = Some(outcome.channel),
                Ok(Err(e)) => warn!(error = %e, "I/O task ended abnormally"),
                Err(_) => {
                    warn!(
                        grace = ?TERMINATE_GRACE,
                        "I/O task did not stop after terminate, aborting it"
                    );
                    job.handle.abort();
                }
            }
        }

        if let Some(mut channel) = self.channel.take()
            && let Err(e) = channel.close().await
        {
            debug!(error = %e, "failed to close channel");
        }

        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!(error = %e, "failed to close connection");
            } else {
                info!("session closed");
            }
        }

        self.phase = Phase::Closed;
    }

    fn assert_attachable(&self, stream: &str) {
        assert!(
            self.phase == Phase::Ready,
            "{stream} must be attached before the command is started"
        );
    }

    fn open_pipe(&mut self, operation: Operation) -> Result<OutputPipe, SessionError> {
        let stream = if operation == Operation::StdoutPipe {
            "stdout"
        } else {
            "stderr"
        };

        if self.phase != Phase::Ready {
            return Err(self.reject(operation, Cause::StreamAfterStart(stream)));
        }

        let slot = if operation == Operation::StdoutPipe {
            &self.streams.stdout
        } else {
            &self.streams.stderr
        };
        if slot.is_attached() {
            return Err(self.reject(operation, Cause::StreamTaken(stream)));
        }

        let slot = if operation == Operation::StdoutPipe {
            &mut self.streams.stdout
        } else {
            &mut self.streams.stderr
        };
        Ok(slot.open_pipe())
    }

    fn ensure_ready(&self, operation: Operation) -> Result<(), SessionError> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Closed => Err(self.reject(operation, Cause::Closed)),
            Phase::Running | Phase::Finished => Err(self.reject(operation, Cause::AlreadyStarted)),
        }
    }

    /// Raw mode and remote PTY when stdin is a terminal
    async fn prepare_terminal(&mut self) -> Result<Option<RawModeGuard>, SessionError> {
        if !self.console.is_interactive() {
            debug!("stdin is not a terminal, running without pseudo-terminal");
            return Ok(None);
        }

        let guard = self
            .console
            .enter_raw_mode()
            .map_err(|e| self.fail(Operation::Run, Cause::Terminal(e)))?;
        let size = self
            .console
            .size()
            .map_err(|e| self.fail(Operation::Run, Cause::Terminal(e)))?;

        let request = pty_request(&self.options.term, size, self.options.baud_rate);
        let result = match self.channel.as_mut() {
            Some(channel) => channel.request_pty(&request).await.map_err(Cause::Pty),
            None => Err(Cause::Closed),
        };
        result.map_err(|cause| self.fail(Operation::Run, cause))?;

        debug!(cols = size.cols, rows = size.rows, term = %request.term, "pseudo-terminal allocated");
        Ok(Some(guard))
    }

    /// Exec the command and spawn its I/O pump
    async fn launch(&mut self, operation: Operation) -> Result<(), SessionError> {
        let Some(mut channel) = self.channel.take() else {
            return Err(self.reject(operation, Cause::Closed));
        };

        if let Err(e) = channel.exec(&self.command).await {
            self.channel = Some(channel);
            self.phase = Phase::Finished;
            return Err(self.fail(operation, Cause::Exec(e)));
        }

        let streams = std::mem::take(&mut self.streams);
        let (control, requests) = mpsc::unbounded_channel();
        let handle = tokio::spawn(pump(channel, streams, requests));

        self.job = Some(Job { control, handle });
        self.phase = Phase::Running;
        debug!("command started");
        Ok(())
    }

    /// Wait for the pump and classify the outcome
    async fn join(&mut self, operation: Operation) -> Result<(), SessionError> {
        let Some(job) = self.job.as_mut() else {
            let cause = if self.phase == Phase::Closed {
                Cause::Closed
            } else {
                Cause::NotStarted
            };
            return Err(self.reject(operation, cause));
        };

        let joined = (&mut job.handle).await;
        self.job = None;
        self.phase = Phase::Finished;

        let result = match joined {
            Ok(outcome) => {
                self.channel = Some(outcome.channel);
                outcome.result
            }
            Err(e) => Err(Cause::Pump(e.to_string())),
        };

        match result {
            Ok(()) => {
                self.exit_code = 0;
                debug!("command finished");
                Ok(())
            }
            Err(cause) => Err(self.fail(operation, cause)),
        }
    }

    /// Wrap a call made in the wrong state; the recorded exit code is kept
    fn reject(&self, operation: Operation, cause: Cause) -> SessionError {
        debug!(%operation, error = %cause, "session operation rejected");
        SessionError::new(operation, &self.script, Some(&self.command), cause)
    }

    /// Record the failure's exit code and wrap it in an envelope
    fn fail(&mut self, operation: Operation, cause: Cause) -> SessionError {
        let err = SessionError::new(operation, &self.script, Some(&self.command), cause);
        self.exit_code = err.exit_code();
        debug!(exit_code = self.exit_code, error = %err, "session operation failed");
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            warn!("session dropped while its command was running");
            job.handle.abort();
        }
    }
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    script: Arc<dyn Script>,
    arguments: Arguments,
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    console: Arc<dyn Console>,
}

impl SessionBuilder {
    /// Builder for `script` with no arguments, the russh transport and the
    /// process console
    pub fn new(script: Arc<dyn Script>) -> Self {
        Self {
            script,
            arguments: Arguments::new(),
            options: SessionOptions::default(),
            transport: Arc::new(SshTransport::new()),
            console: Arc::new(StdConsole),
        }
    }

    /// Set script arguments
    #[must_use]
    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set session options
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom transport
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Use a custom console
    #[must_use]
    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Compose the command, dial the host and open the command channel
    ///
    /// Nothing touches the network when the command cannot be composed or
    /// the trust store cannot be loaded.
    ///
    /// # Errors
    /// Returns a `SessionError` with exit code `-1` for every failure; no
    /// session is produced.
    #[instrument(skip_all, fields(script = %self.script.name()))]
    pub async fn connect<C>(self, source: &C) -> Result<Session, SessionError>
    where
        C: ConnectionSource + ?Sized,
    {
        let fail = |cause| SessionError::new(Operation::Connect, &self.script, None, cause);

        let descriptor = source.to_descriptor();
        descriptor.check_kind();

        let command = compose(self.script.as_ref(), &self.arguments).map_err(fail)?;
        let host_keys =
            host_key_policy(descriptor.insecure, self.options.known_hosts.as_deref())
                .map_err(fail)?;

        let target = DialTarget {
            host: descriptor.host.clone(),
            port: descriptor.port,
            credentials: Credentials {
                user: descriptor.user.clone(),
                password: descriptor.secret.clone(),
            },
            host_keys,
        };

        let mut client = self.transport.dial(&target).await.map_err(|source| {
            fail(Cause::Dial {
                address: target.address(),
                source,
            })
        })?;

        let channel = match client.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    debug!(error = %close_err, "failed to close connection after channel error");
                }
                return Err(fail(Cause::OpenChannel(e)));
            }
        };

        info!(address = %target.address(), "session ready");

        Ok(Session {
            script: self.script.clone(),
            command,
            client: Some(client),
            channel: Some(channel),
            console: self.console,
            options: self.options,
            streams: Streams::default(),
            job: None,
            phase: Phase::Ready,
            exit_code: 0,
        })
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("script", &self.script.name())
            .field("arguments", &self.arguments)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
