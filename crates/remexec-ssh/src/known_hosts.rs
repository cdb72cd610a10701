//! known_hosts trust store

use std::io;
use std::path::{Path, PathBuf};

use russh::keys::PublicKey;
use tracing::{debug, warn};

use crate::error::Cause;
use crate::transport::HostKeyPolicy;

/// Default known_hosts location of the current user
pub fn default_known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// One host key line of a known_hosts file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHost {
    /// Comma separated host patterns, plain or hashed (`|1|salt|hash`)
    pub hosts: String,
    pub key: PublicKey,
    /// 1-based line number in the file
    pub line: usize,
    /// `@cert-authority` or `@revoked` marker, if any
    pub marker: Option<String>,
}

/// A parsed known_hosts file
///
/// Every entry is validated when the file is loaded. Host keys are matched
/// against the file at connection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<KnownHost>,
}

impl KnownHosts {
    /// Load and parse a known_hosts file
    ///
    /// # Errors
    /// Returns the I/O error if the file cannot be read, or an
    /// `InvalidData` error naming the first malformed line.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;
        let entries = parse(&content)?;

        debug!(path = %path.display(), entries = entries.len(), "loaded known_hosts");

        Ok(Self { path, entries })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn entries(&self) -> &[KnownHost] {
        &self.entries
    }
}

fn parse(content: &str) -> io::Result<Vec<KnownHost>> {
    let mut entries = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let mut fields = text.split_whitespace().peekable();
        let marker = fields
            .next_if(|field| field.starts_with('@'))
            .map(str::to_string);
        let (Some(hosts), Some(_algorithm), Some(encoded)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(line, "expected host patterns, key type and key"));
        };

        let key = russh::keys::parse_public_key_base64(encoded)
            .map_err(|e| malformed(line, &format!("invalid host key: {e}")))?;

        entries.push(KnownHost {
            hosts: hosts.to_string(),
            key,
            line,
            marker,
        });
    }

    Ok(entries)
}

fn malformed(line: usize, reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("line {line}: {reason}"))
}

/// Select the host key policy for a connection
///
/// `insecure` accepts any host key. Otherwise the trust store is loaded from
/// `path` or from the default location.
///
/// # Errors
/// Returns `Cause::HomeDirNotFound` or `Cause::KnownHosts` when the trust
/// store cannot be located or read.
pub fn host_key_policy(insecure: bool, path: Option<&Path>) -> Result<HostKeyPolicy, Cause> {
    if insecure {
        warn!("host key verification disabled, accepting any host key");
        return Ok(HostKeyPolicy::AcceptAny);
    }

    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_known_hosts_path().ok_or(Cause::HomeDirNotFound)?,
    };

    KnownHosts::load(&path)
        .map(HostKeyPolicy::KnownHosts)
        .map_err(|source| Cause::KnownHosts { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("remexec_{}_{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_known_hosts_path() {
        if let Some(path) = default_known_hosts_path() {
            assert!(path.ends_with(".ssh/known_hosts"));
        }
    }

    const ED25519: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

    #[test]
    fn test_load_parses_entries() {
        let path = temp_file(
            "known_hosts",
            &format!(
                "# comment\n\nexample.com ssh-ed25519 {ED25519}\n\
                 @cert-authority *.example.com ssh-ed25519 {ED25519} ca\n\
                 [10.0.0.1]:2222,|1|c2FsdA==|aGFzaA== ssh-ed25519 {ED25519} ops@laptop\n"
            ),
        );

        let known = KnownHosts::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let entries = known.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(known.path(), path.as_path());
        assert_eq!(entries[0].hosts, "example.com");
        assert_eq!(entries[0].line, 3);
        assert_eq!(entries[1].marker.as_deref(), Some("@cert-authority"));
        assert_eq!(entries[1].hosts, "*.example.com");
        assert_eq!(entries[2].key, entries[0].key);
    }

    #[test]
    fn test_malformed_key_rejected() {
        let path = temp_file(
            "malformed_known_hosts",
            &format!("good.example ssh-ed25519 {ED25519}\nbad.example ssh-ed25519 not-a-key\n"),
        );

        let err = KnownHosts::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().starts_with("line 2: invalid host key"));
    }

    #[test]
    fn test_truncated_line_rejected() {
        let err = parse("lonely.example ssh-ed25519\n").unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().starts_with("line 1:"));
    }

    #[test]
    fn test_malformed_trust_store_fails_policy() {
        let path = temp_file("policy_malformed_known_hosts", "host ssh-rsa AAAA!!!!\n");

        let err = host_key_policy(false, Some(&path)).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            err,
            Cause::KnownHosts { ref source, .. } if source.kind() == io::ErrorKind::InvalidData
        ));
    }

    #[test]
    fn test_insecure_skips_trust_store() {
        let policy = host_key_policy(true, Some(Path::new("/nonexistent/known_hosts"))).unwrap();

        assert!(matches!(policy, HostKeyPolicy::AcceptAny));
    }

    #[test]
    fn test_missing_trust_store() {
        let err = host_key_policy(false, Some(Path::new("/nonexistent/known_hosts"))).unwrap_err();

        match err {
            Cause::KnownHosts { path, source } => {
                assert_eq!(path, PathBuf::from("/nonexistent/known_hosts"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected cause: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_trust_store() {
        let path = temp_file("explicit_known_hosts", &format!("host ssh-ed25519 {ED25519}\n"));

        let policy = host_key_policy(false, Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        match policy {
            HostKeyPolicy::KnownHosts(known) => assert_eq!(known.entries().len(), 1),
            HostKeyPolicy::AcceptAny => panic!("expected known_hosts policy"),
        }
    }
}
