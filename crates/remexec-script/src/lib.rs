//! remexec-script: Script templates for remote execution
//!
//! Defines the [`Script`] capability consumed by the SSH session, the
//! [`Arguments`] a script is rendered against, and [`ShellScript`], a
//! templated shell script fed to the remote shell through a here-document.

pub mod arguments;
pub mod error;
pub mod script;
pub mod template;

pub use arguments::Arguments;
pub use error::ScriptError;
pub use script::{SCRIPT_END_MARKER, Script, Shell, ShellScript};
pub use template::Template;
