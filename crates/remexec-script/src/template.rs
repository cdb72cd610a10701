//! Placeholder templates
//!
//! A template is plain text with `{{ key }}` placeholders. A placeholder may
//! carry the `quote` filter (`{{ key | quote }}`), which wraps the value in
//! single quotes so the remote shell sees it as one word. Quoting does not
//! protect the here-document around the body; [`crate::ShellScript`] rejects
//! a rendered body containing its terminator line.

use crate::arguments::Arguments;
use crate::error::ScriptError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Quote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { key: String, filter: Option<Filter> },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template source
    ///
    /// # Errors
    /// Returns `ScriptError` for unclosed or empty placeholders, invalid
    /// names and unknown filters.
    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        let mut segments = Vec::new();
        let mut offset = 0;
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let inner_start = start + OPEN.len();
            let Some(len) = rest[inner_start..].find(CLOSE) else {
                return Err(ScriptError::Unclosed(offset + start));
            };
            segments.push(parse_placeholder(
                &rest[inner_start..inner_start + len],
                offset + start,
            )?);

            let consumed = inner_start + len + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Render the template against an argument set
    ///
    /// # Errors
    /// Returns `ScriptError::MissingArgument` for the first placeholder
    /// without a matching argument.
    pub fn render(&self, arguments: &Arguments) -> Result<String, ScriptError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { key, filter } => {
                    let value = arguments
                        .get(key)
                        .ok_or_else(|| ScriptError::MissingArgument(key.clone()))?;
                    match filter {
                        Some(Filter::Quote) => out.push_str(&shell_quote(value)),
                        None => out.push_str(value),
                    }
                }
            }
        }
        Ok(out)
    }

    /// Names referenced by the template, in order of first use
    pub fn placeholders(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder { key, .. } = segment
                && !keys.contains(&key.as_str())
            {
                keys.push(key);
            }
        }
        keys
    }
}

fn parse_placeholder(inner: &str, at: usize) -> Result<Segment, ScriptError> {
    let (name, filter) = match inner.split_once('|') {
        Some((name, filter)) => (name.trim(), Some(filter.trim())),
        None => (inner.trim(), None),
    };

    if name.is_empty() {
        return Err(ScriptError::EmptyPlaceholder(at));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ScriptError::InvalidName(name.to_string()));
    }

    let filter = match filter {
        None => None,
        Some("quote") => Some(Filter::Quote),
        Some(other) => return Err(ScriptError::UnknownFilter(other.to_string())),
    };

    Ok(Segment::Placeholder {
        key: name.to_string(),
        filter,
    })
}

/// Wrap a value in POSIX single quotes
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
