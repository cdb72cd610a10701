//! Error envelope for remexec-ssh
//!
//! Every failing session operation returns a [`SessionError`]: the operation,
//! the script it ran for, the command text once composed, the exit code and
//! the underlying [`Cause`].

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::sync::{Arc, Weak};

use remexec_script::{Script, ScriptError};
use thiserror::Error;

use crate::transport::TransportError;

/// Exit code recorded for failures that have no remote exit status
pub const NO_EXIT_STATUS: i32 = -1;

/// Public operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    StdoutPipe,
    StderrPipe,
    Run,
    Start,
    Wait,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::StdoutPipe => "stdout pipe",
            Operation::StderrPipe => "stderr pipe",
            Operation::Run => "run",
            Operation::Start => "start",
            Operation::Wait => "wait",
        };
        f.write_str(name)
    }
}

/// Failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Script invalid or arguments could not be rendered; nothing was sent
    Composition,
    /// Trust store, dial or channel open failed
    Connection,
    /// An output pipe could not be created
    StreamSetup,
    /// The remote command ran and did not exit cleanly
    RemoteProcess,
    /// The command could not be run or waited on
    Execution,
}

/// Underlying cause of a [`SessionError`]
#[derive(Error, Debug)]
pub enum Cause {
    #[error("script failed to parse: {0}")]
    ScriptInvalid(#[source] ScriptError),

    #[error("cannot render script: {0}")]
    Render(#[source] ScriptError),

    #[error("cannot read rendered script: {0}")]
    ReadBody(#[source] io::Error),

    #[error("rendered script is not valid UTF-8: {0}")]
    BodyEncoding(#[source] FromUtf8Error),

    #[error("cannot find home directory of current user")]
    HomeDirNotFound,

    #[error("cannot access known_hosts file {}: {source}", path.display())]
    KnownHosts {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("cannot open session channel: {0}")]
    OpenChannel(#[source] TransportError),

    #[error("{0} is already attached")]
    StreamTaken(&'static str),

    #[error("cannot attach {0} after the command was started")]
    StreamAfterStart(&'static str),

    #[error("command was already started")]
    AlreadyStarted,

    #[error("command was not started")]
    NotStarted,

    #[error("session is closed")]
    Closed,

    #[error("cannot configure local terminal: {0}")]
    Terminal(#[source] io::Error),

    #[error("pseudo-terminal request failed: {0}")]
    Pty(#[source] TransportError),

    #[error("cannot start command: {0}")]
    Exec(#[source] TransportError),

    #[error("cannot copy {stream}: {source}")]
    Stream {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("I/O task ended abnormally: {0}")]
    Pump(String),

    #[error("remote process exited with status {0}")]
    Exited(u32),

    #[error("remote process was killed by signal {0}")]
    Signaled(String),

    #[error("remote process exited without reporting a status")]
    ExitStatusMissing,

    #[error("command was terminated")]
    Terminated,
}

impl Cause {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Cause::ScriptInvalid(_)
            | Cause::Render(_)
            | Cause::ReadBody(_)
            | Cause::BodyEncoding(_) => ErrorKind::Composition,
            Cause::HomeDirNotFound
            | Cause::KnownHosts { .. }
            | Cause::Dial { .. }
            | Cause::OpenChannel(_) => ErrorKind::Connection,
            Cause::StreamTaken(_) | Cause::StreamAfterStart(_) => ErrorKind::StreamSetup,
            Cause::Exited(_) | Cause::Signaled(_) => ErrorKind::RemoteProcess,
            _ => ErrorKind::Execution,
        }
    }

    /// Remote exit status, or `-1` when the cause carries none
    ///
    /// A process killed by a signal reports `128 + signal number` the way a
    /// shell does; unrecognized signal names report `128`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Cause::Exited(status) => i32::try_from(*status).unwrap_or(i32::MAX),
            Cause::Signaled(signal) => SIGNAL_EXIT_BASE + signal_number(signal).unwrap_or(0),
            _ => NO_EXIT_STATUS,
        }
    }
}

const SIGNAL_EXIT_BASE: i32 = 128;

/// POSIX number of a signal named as in the SSH protocol (`TERM`, `KILL`, ...)
fn signal_number(name: &str) -> Option<i32> {
    let number = match name {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "ABRT" => 6,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        _ => return None,
    };
    Some(number)
}

/// Error returned by every failing session operation
#[derive(Error, Debug)]
#[error("{operation} script \"{script_name}\": {cause}")]
pub struct SessionError {
    operation: Operation,
    script_name: String,
    script: Weak<dyn Script>,
    command: Option<String>,
    exit_code: i32,
    #[source]
    cause: Cause,
}

impl SessionError {
    pub(crate) fn new(
        operation: Operation,
        script: &Arc<dyn Script>,
        command: Option<&str>,
        cause: Cause,
    ) -> Self {
        Self {
            operation,
            script_name: script.name().to_string(),
            script: Arc::downgrade(script),
            command: command.map(str::to_string),
            exit_code: cause.exit_code(),
            cause,
        }
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    /// Originating script, if it is still alive
    #[must_use]
    pub fn script(&self) -> Option<Arc<dyn Script>> {
        self.script.upgrade()
    }

    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Composed command text, `None` if composition never succeeded
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Remote exit status, `-1` for local or transport failures
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    #[must_use]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    #[must_use]
    pub fn into_cause(self) -> Cause {
        self.cause
    }

    /// Whether a fresh session might succeed
    ///
    /// Only dial and channel-open failures qualify. Nothing in this crate
    /// retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.cause, Cause::Dial { .. } | Cause::OpenChannel(_))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use remexec_script::ShellScript;

    use super::*;

    fn script() -> Arc<dyn Script> {
        Arc::new(ShellScript::bash("deploy", "echo ok"))
    }

    #[test]
    fn test_exit_code_follows_cause() {
        let script = script();

        let exited = SessionError::new(Operation::Run, &script, Some("cmd"), Cause::Exited(3));
        assert_eq!(exited.exit_code(), 3);
        assert_eq!(exited.kind(), ErrorKind::RemoteProcess);

        let signaled = SessionError::new(
            Operation::Wait,
            &script,
            Some("cmd"),
            Cause::Signaled("TERM".into()),
        );
        assert_eq!(signaled.exit_code(), 143);
        assert_eq!(signaled.kind(), ErrorKind::RemoteProcess);

        let closed = SessionError::new(
            Operation::Start,
            &script,
            Some("cmd"),
            Cause::Exec(TransportError::ChannelClosed),
        );
        assert_eq!(closed.exit_code(), -1);
        assert_eq!(closed.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_signal_exit_codes() {
        assert_eq!(Cause::Signaled("KILL".into()).exit_code(), 137);
        assert_eq!(Cause::Signaled("INT".into()).exit_code(), 130);
        assert_eq!(Cause::Signaled("XCPU".into()).exit_code(), 128);
    }

    #[test]
    fn test_display_is_stable() {
        let script = script();
        let err = SessionError::new(
            Operation::Connect,
            &script,
            None,
            Cause::Dial {
                address: "10.0.0.5:22".into(),
                source: TransportError::AuthenticationFailed("ops".into()),
            },
        );

        assert_eq!(
            err.to_string(),
            "connect script \"deploy\": cannot dial 10.0.0.5:22: authentication failed for user ops"
        );
        assert!(err.command().is_none());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cause_chain() {
        let script = script();
        let err = SessionError::new(
            Operation::Connect,
            &script,
            None,
            Cause::Dial {
                address: "h:22".into(),
                source: TransportError::UnknownHostKey {
                    host: "h".into(),
                    port: 22,
                },
            },
        );

        let transport = err
            .source()
            .and_then(|cause| cause.source())
            .and_then(|inner| inner.downcast_ref::<TransportError>());

        assert!(matches!(
            transport,
            Some(TransportError::UnknownHostKey { port: 22, .. })
        ));
    }

    #[test]
    fn test_script_reference_is_weak() {
        let script = script();
        let err = SessionError::new(
            Operation::Run,
            &script,
            None,
            Cause::ScriptInvalid(ScriptError::Unclosed(0)),
        );

        assert_eq!(err.script().map(|s| s.name().to_string()), Some("deploy".into()));

        drop(script);
        assert!(err.script().is_none());
        assert_eq!(err.script_name(), "deploy");
        assert_eq!(err.kind(), ErrorKind::Composition);
    }
}
