//! Argument sets a script is rendered against

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Positional and named arguments for a script
///
/// Positional arguments are addressed by their index (`{{0}}`, `{{1}}`, ...),
/// named arguments by their key (`{{host}}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arguments {
    /// Arguments addressed by index
    #[serde(default)]
    positional: Vec<String>,
    /// Arguments addressed by name
    #[serde(default)]
    named: BTreeMap<String, String>,
}

impl Arguments {
    /// Create an empty argument set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.push(value);
        self
    }

    /// Set a named argument
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn push(&mut self, value: impl Into<String>) {
        self.positional.push(value.into());
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.named.insert(name.into(), value.into());
    }

    /// Look up an argument by placeholder key
    ///
    /// Keys made only of ASCII digits index the positional arguments,
    /// everything else is looked up by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
            return key
                .parse::<usize>()
                .ok()
                .and_then(|index| self.positional.get(index))
                .map(String::as_str);
        }
        self.named.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    #[must_use]
    pub fn named(&self) -> &BTreeMap<String, String> {
        &self.named
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Arguments
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut arguments = Self::new();
        for (name, value) in iter {
            arguments.insert(name, value);
        }
        arguments
    }
}
