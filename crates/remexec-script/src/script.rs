//! Script capability and the templated shell script

use std::fmt;
use std::io::{Cursor, Read};

use tracing::debug;

use crate::arguments::Arguments;
use crate::error::ScriptError;
use crate::template::Template;

/// Line terminating the here-document that carries a rendered script
pub const SCRIPT_END_MARKER: &str = "REMEXEC_SCRIPT_END";

/// A script that can be executed on a remote host
///
/// The executed command text is `command_line()` immediately followed by
/// the rendered body.
pub trait Script: fmt::Debug + Send + Sync {
    /// Name used when attributing errors
    fn name(&self) -> &str;

    /// Error recorded when the script was built, if any
    fn error(&self) -> Option<&ScriptError>;

    /// Invocation prefix, independent of arguments
    fn command_line(&self) -> String;

    /// Render the body for an argument set
    ///
    /// # Errors
    /// Returns `ScriptError` if the arguments cannot be bound.
    fn render(&self, arguments: &Arguments) -> Result<Box<dyn Read + Send + '_>, ScriptError>;
}

/// Remote shell interpreting the script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shell {
    Sh,
    Bash,
    /// Any other interpreter that reads a program from stdin
    Custom(String),
}

impl Shell {
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            Shell::Sh => "sh",
            Shell::Bash => "bash",
            Shell::Custom(program) => program,
        }
    }
}

/// Templated shell script delivered through a quoted here-document
///
/// Rendering fails if the body would contain [`SCRIPT_END_MARKER`] as a
/// whole line, since the remote shell would end the here-document there and
/// run the remainder as a separate command.
///
/// The template is parsed once at construction. A parse failure does not
/// abort construction; it is kept and reported through [`Script::error`].
#[derive(Debug, Clone)]
pub struct ShellScript {
    name: String,
    shell: Shell,
    template: Result<Template, ScriptError>,
}

impl ShellScript {
    /// Create a script from template source
    pub fn new(name: impl Into<String>, shell: Shell, source: &str) -> Self {
        let name = name.into();
        let template = Template::parse(source);
        if let Err(e) = &template {
            debug!(script = %name, error = %e, "script template failed to parse");
        }
        Self {
            name,
            shell,
            template,
        }
    }

    /// Bash script shorthand
    pub fn bash(name: impl Into<String>, source: &str) -> Self {
        Self::new(name, Shell::Bash, source)
    }

    #[must_use]
    pub fn shell(&self) -> &Shell {
        &self.shell
    }
}

impl Script for ShellScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn error(&self) -> Option<&ScriptError> {
        self.template.as_ref().err()
    }

    fn command_line(&self) -> String {
        format!("{} <<'{SCRIPT_END_MARKER}'\n", self.shell.program())
    }

    fn render(&self, arguments: &Arguments) -> Result<Box<dyn Read + Send + '_>, ScriptError> {
        let template = self.template.as_ref().map_err(ScriptError::clone)?;
        let mut body = template.render(arguments)?;
        if let Some(index) = body.lines().position(|line| line == SCRIPT_END_MARKER) {
            return Err(ScriptError::TerminatorInBody(SCRIPT_END_MARKER, index + 1));
        }
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(SCRIPT_END_MARKER);
        body.push('\n');
        Ok(Box::new(Cursor::new(body.into_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(script: &ShellScript, args: &Arguments) -> String {
        let mut out = String::new();
        script
            .render(args)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_command_line() {
        let script = ShellScript::bash("uptime", "uptime");

        assert_eq!(script.command_line(), "bash <<'REMEXEC_SCRIPT_END'\n");
        assert_eq!(
            ShellScript::new("x", Shell::Custom("/usr/bin/zsh".into()), "").command_line(),
            "/usr/bin/zsh <<'REMEXEC_SCRIPT_END'\n"
        );
    }

    #[test]
    fn test_render_terminates_here_document() {
        let script = ShellScript::bash("greet", "echo {{ name | quote }}");
        let args = Arguments::new().with("name", "ops");

        assert_eq!(rendered(&script, &args), "echo 'ops'\nREMEXEC_SCRIPT_END\n");
    }

    #[test]
    fn test_argument_cannot_end_here_document() {
        let script = ShellScript::new("p", Shell::Sh, "echo {{ v | quote }}");
        let args = Arguments::new().with("v", "a\nREMEXEC_SCRIPT_END\necho INJECTED\n");

        let err = script.render(&args).err().unwrap();

        assert_eq!(err, ScriptError::TerminatorInBody(SCRIPT_END_MARKER, 2));
    }

    #[test]
    fn test_terminator_inside_a_line_is_kept() {
        let script = ShellScript::new("p", Shell::Sh, "echo {{ v | quote }}");
        let args = Arguments::new().with("v", "REMEXEC_SCRIPT_END ");

        assert_eq!(
            rendered(&script, &args),
            "echo 'REMEXEC_SCRIPT_END '\nREMEXEC_SCRIPT_END\n"
        );
    }

    #[test]
    fn test_parse_error_recorded() {
        let script = ShellScript::new("broken", Shell::Sh, "echo {{name");

        assert_eq!(script.error(), Some(&ScriptError::Unclosed(5)));
        assert!(script.render(&Arguments::new()).is_err());
    }

    #[test]
    fn test_valid_script_has_no_error() {
        let script = ShellScript::new("ok", Shell::Sh, "true\n");

        assert!(script.error().is_none());
        assert_eq!(rendered(&script, &Arguments::new()), "true\nREMEXEC_SCRIPT_END\n");
    }
}
