//! Connection descriptors
//!
//! Callers describe a host either with the typed [`Connection`] record or
//! with a string map using the keys `Type`, `Host`, `Port`, `User`,
//! `Password` and `Insecure`. Both normalize to a [`ConnectionDescriptor`].
//! Normalization never fails: unparsable map values fall back to zero
//! values and the dial step reports the problem.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Connection kind handled by this crate
pub const SSH_KIND: &str = "ssh";

/// Canonical description of how to reach a host
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Connection kind, expected to be `"ssh"`
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Password
    pub secret: String,
    /// Accept any host key instead of consulting known_hosts
    pub insecure: bool,
}

impl ConnectionDescriptor {
    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log a warning when the kind is not `"ssh"`
    ///
    /// The kind is a caller convention and is never rejected.
    pub(crate) fn check_kind(&self) {
        if self.kind != SSH_KIND {
            warn!(kind = %self.kind, "connection kind is not \"ssh\"");
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// Anything that can describe a connection
pub trait ConnectionSource {
    fn to_descriptor(&self) -> ConnectionDescriptor;
}

/// Typed connection record
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Connection {
    /// Must be `"ssh"`
    #[serde(rename = "Type", default = "default_kind")]
    pub kind: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub insecure: bool,
}

fn default_kind() -> String {
    SSH_KIND.to_string()
}

fn default_port() -> u16 {
    22
}

impl Connection {
    /// Create an SSH connection record on port 22
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            kind: default_kind(),
            host: host.into(),
            port: default_port(),
            user: user.into(),
            password: password.into(),
            insecure: false,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Skip host key verification
    #[must_use]
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .finish()
    }
}

impl ConnectionSource for Connection {
    fn to_descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            kind: self.kind.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            secret: self.password.clone(),
            insecure: self.insecure,
        }
    }
}

impl ConnectionSource for ConnectionDescriptor {
    fn to_descriptor(&self) -> ConnectionDescriptor {
        self.clone()
    }
}

impl<S: BuildHasher> ConnectionSource for HashMap<String, String, S> {
    fn to_descriptor(&self) -> ConnectionDescriptor {
        from_pairs(self.iter())
    }
}

impl ConnectionSource for BTreeMap<String, String> {
    fn to_descriptor(&self) -> ConnectionDescriptor {
        from_pairs(self.iter())
    }
}

fn from_pairs<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> ConnectionDescriptor {
    let mut descriptor = ConnectionDescriptor::default();
    for (key, value) in pairs {
        match key.as_str() {
            "Type" => descriptor.kind.clone_from(value),
            "Host" => descriptor.host.clone_from(value),
            "Port" => descriptor.port = parse_port(value),
            "User" => descriptor.user.clone_from(value),
            "Password" => descriptor.secret.clone_from(value),
            "Insecure" => descriptor.insecure = parse_bool(value),
            _ => {}
        }
    }
    descriptor
}

/// Unsigned base-10 port, `0` when unparsable
fn parse_port(value: &str) -> u16 {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    value.parse().unwrap_or(0)
}

/// Case-insensitive boolean, `false` when unparsable
fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "t" | "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_struct_and_map_agree() {
        let typed = Connection::new("web-01", "deploy", "hunter2")
            .with_port(2222)
            .insecure(true);
        let loose = map(&[
            ("Type", "ssh"),
            ("Host", "web-01"),
            ("Port", "2222"),
            ("User", "deploy"),
            ("Password", "hunter2"),
            ("Insecure", "TRUE"),
        ]);

        assert_eq!(typed.to_descriptor(), loose.to_descriptor());

        let ordered: BTreeMap<String, String> = loose.clone().into_iter().collect();
        assert_eq!(ordered.to_descriptor(), loose.to_descriptor());
    }

    #[test]
    fn test_unparsable_values_fail_closed() {
        for bad_port in ["", "abc", "-1", "+22", " 22", "65536", "99999999999"] {
            let descriptor = map(&[("Port", bad_port)]).to_descriptor();
            assert_eq!(descriptor.port, 0, "port {bad_port:?}");
        }

        for bad_bool in ["yes", "on", "", "2", "truthy"] {
            let descriptor = map(&[("Insecure", bad_bool)]).to_descriptor();
            assert!(!descriptor.insecure, "insecure {bad_bool:?}");
        }
    }

    #[test]
    fn test_bool_spellings() {
        for truthy in ["1", "t", "T", "true", "True", "TRUE"] {
            assert!(map(&[("Insecure", truthy)]).to_descriptor().insecure);
        }
        for falsy in ["0", "f", "F", "false", "FALSE"] {
            assert!(!map(&[("Insecure", falsy)]).to_descriptor().insecure);
        }
    }

    #[test]
    fn test_port_bounds() {
        assert_eq!(map(&[("Port", "65535")]).to_descriptor().port, 65535);
        assert_eq!(map(&[("Port", "0022")]).to_descriptor().port, 22);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let descriptor = map(&[("Host", "db"), ("Color", "blue"), ("host", "ignored")]).to_descriptor();

        assert_eq!(descriptor.host, "db");
        assert_eq!(descriptor.kind, "");
        assert_eq!(descriptor.port, 0);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let descriptor = Connection::new("h", "u", "s3cret").to_descriptor();

        let rendered = format!("{descriptor:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_connection() {
        let connection: Connection = serde_json::from_str(
            r#"{"Host": "10.0.0.7", "User": "root", "Password": "pw", "Insecure": true}"#,
        )
        .unwrap();

        assert_eq!(connection.kind, "ssh");
        assert_eq!(connection.port, 22);
        assert_eq!(connection.to_descriptor().address(), "10.0.0.7:22");
        assert!(connection.insecure);
    }
}
