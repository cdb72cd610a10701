//! Error types for remexec-script

use thiserror::Error;

/// Errors raised while parsing or rendering a script template
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// `{{` without a matching `}}`
    #[error("unclosed placeholder starting at byte {0}")]
    Unclosed(usize),

    /// `{{ }}` with nothing inside
    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),

    /// Placeholder name contains characters outside `[A-Za-z0-9_-]`
    #[error("invalid placeholder name `{0}`")]
    InvalidName(String),

    /// Filter after `|` is not supported
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    /// Template references an argument the caller did not provide
    #[error("missing argument `{0}`")]
    MissingArgument(String),

    /// Rendered body contains the here-document terminator as a whole line
    #[error("rendered script contains the line `{0}` on line {1}")]
    TerminatorInBody(&'static str, usize),
}
