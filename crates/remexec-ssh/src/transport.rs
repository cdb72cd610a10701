//! Transport seam between a session and the SSH library
//!
//! The session only talks to these traits. [`crate::ssh::SshTransport`]
//! implements them on top of russh; tests implement them with scripted fakes.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::known_hosts::KnownHosts;
use crate::terminal::TerminalSize;

/// Errors reported by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The remote host key is not listed in the trust store
    #[error("host key for {host}:{port} is not in known_hosts")]
    UnknownHostKey {
        /// Host as dialled
        host: String,
        /// Port as dialled
        port: u16,
    },

    /// The trust store lists a different key, or could not be checked
    #[error("host key verification failed for {host}:{port}: {reason}")]
    HostKeyMismatch {
        /// Host as dialled
        host: String,
        /// Port as dialled
        port: u16,
        /// Reason reported by the trust store
        reason: String,
    },

    /// Credentials were refused
    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// A channel request was answered with a failure
    #[error("{0} request rejected by remote host")]
    RequestRejected(&'static str),

    /// The channel was closed before the request completed
    #[error("channel closed")]
    ChannelClosed,

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error on the underlying connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Password credentials
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the remote host key is verified
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Accept any host key; only for trusted or test networks
    AcceptAny,
    /// Verify against a known_hosts file
    KnownHosts(KnownHosts),
}

/// Everything needed to dial one host
#[derive(Debug, Clone)]
pub struct DialTarget {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub host_keys: HostKeyPolicy,
}

impl DialTarget {
    /// `host:port` as used in log lines and errors
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Terminal modes sent with a pseudo-terminal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    Echo,
    EchoCtl,
    InputSpeed,
    OutputSpeed,
}

/// Remote pseudo-terminal request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub size: TerminalSize,
    pub modes: Vec<(TerminalMode, u32)>,
}

/// Signals that can be delivered to the remote process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Int,
    Hup,
}

/// Events read from a command channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    ExitSignal(String),
    Eof,
    Closed,
}

/// Dials hosts
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect, verify the host key and authenticate
    async fn dial(&self, target: &DialTarget) -> Result<Box<dyn Client>, TransportError>;
}

/// An authenticated connection
#[async_trait]
pub trait Client: Send {
    /// Open one command channel
    async fn open_channel(&mut self) -> Result<Box<dyn CommandChannel>, TransportError>;

    /// Disconnect
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// One command channel
#[async_trait]
pub trait CommandChannel: Send {
    async fn request_pty(&mut self, request: &PtyRequest) -> Result<(), TransportError>;

    /// Execute a command without waiting for it to finish
    async fn exec(&mut self, command: &str) -> Result<(), TransportError>;

    /// Forward stdin data
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Signal end of stdin
    async fn send_eof(&mut self) -> Result<(), TransportError>;

    async fn signal(&mut self, signal: Signal) -> Result<(), TransportError>;

    /// Next event, `None` once the channel is gone
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
