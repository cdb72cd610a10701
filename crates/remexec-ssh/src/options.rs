//! Session options

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tunables for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Terminal type announced in the pseudo-terminal request
    #[serde(default = "default_term")]
    pub term: String,
    /// known_hosts file to use instead of `~/.ssh/known_hosts`
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    /// Input and output baud rate announced in the pseudo-terminal request
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_baud_rate() -> u32 {
    14_400
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            term: default_term(),
            known_hosts: None,
            baud_rate: default_baud_rate(),
        }
    }
}

impl SessionOptions {
    /// Set terminal type
    #[must_use]
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    /// Set known_hosts path
    #[must_use]
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Set baud rate
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::default();

        assert_eq!(options.term, "xterm-256color");
        assert_eq!(options.baud_rate, 14_400);
        assert!(options.known_hosts.is_none());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let options: SessionOptions =
            serde_json::from_str(r#"{"known_hosts": "/etc/ssh/ssh_known_hosts"}"#).unwrap();

        assert_eq!(options.term, "xterm-256color");
        assert_eq!(
            options.known_hosts,
            Some(PathBuf::from("/etc/ssh/ssh_known_hosts"))
        );
        assert_eq!(options, SessionOptions::default().with_known_hosts("/etc/ssh/ssh_known_hosts"));
    }
}
