//! Command composition
//!
//! The remote side receives a single command string: the script's command
//! line immediately followed by the fully rendered body.

use std::io::Read;

use remexec_script::{Arguments, Script};
use tracing::debug;

use crate::error::Cause;

/// Render `script` against `arguments` into one command string
///
/// # Errors
/// Returns a composition `Cause` if the script failed to parse, the
/// arguments cannot be rendered, or the rendered body cannot be read.
pub fn compose(script: &dyn Script, arguments: &Arguments) -> Result<String, Cause> {
    if let Some(e) = script.error() {
        return Err(Cause::ScriptInvalid(e.clone()));
    }

    let mut reader = script.render(arguments).map_err(Cause::Render)?;
    let mut body = Vec::new();
    reader.read_to_end(&mut body).map_err(Cause::ReadBody)?;
    let body = String::from_utf8(body).map_err(Cause::BodyEncoding)?;

    let mut command = script.command_line();
    command.push_str(&body);

    debug!(script = script.name(), bytes = command.len(), "composed command");

    Ok(command)
}
