//! remexec-ssh: Remote script sessions over SSH
//!
//! A [`Session`] runs one rendered script on one remote host over one
//! dedicated SSH connection, exposing start, output streaming, wait and
//! termination. Every failure is reported as a [`SessionError`] carrying
//! the script, the command text and the exit code.

pub mod composer;
pub mod descriptor;
pub mod error;
pub mod known_hosts;
pub mod options;
mod pump;
pub mod session;
pub mod ssh;
pub mod streams;
pub mod terminal;
pub mod transport;

pub use descriptor::{Connection, ConnectionDescriptor, ConnectionSource};
pub use error::{Cause, ErrorKind, Operation, SessionError};
pub use known_hosts::{KnownHost, KnownHosts, default_known_hosts_path};
pub use options::SessionOptions;
pub use session::{Session, SessionBuilder};
pub use ssh::SshTransport;
pub use streams::OutputPipe;
pub use terminal::{Console, RawModeGuard, StdConsole, TerminalSize};
pub use transport::{
    ChannelEvent, Client, CommandChannel, Credentials, DialTarget, HostKeyPolicy, PtyRequest,
    Signal, TerminalMode, Transport, TransportError,
};

pub use remexec_script::{Arguments, Script, ScriptError, Shell, ShellScript};
