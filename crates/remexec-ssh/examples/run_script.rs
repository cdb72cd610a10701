//! Run a templated shell script on a remote host
//!
//! ```text
//! REMEXEC_PASSWORD=... cargo run --example run_script -- \
//!     --host 10.0.0.5 --user deploy --inline 'df -h {{ 0 | quote }}' /var
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail};
use tracing_subscriber::EnvFilter;

use remexec_ssh::{Arguments, Connection, Script, SessionBuilder, SessionOptions, ShellScript};

#[derive(Parser)]
#[command(name = "run_script")]
#[command(about = "Run a templated shell script over SSH", long_about = None)]
struct Args {
    /// Remote host
    #[arg(long)]
    host: String,

    /// SSH port
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Login user
    #[arg(long)]
    user: String,

    /// Accept any host key
    #[arg(long)]
    insecure: bool,

    /// known_hosts file to verify the host key against
    #[arg(long)]
    known_hosts: Option<PathBuf>,

    /// Script template file
    #[arg(long, conflicts_with = "inline")]
    script: Option<PathBuf>,

    /// Script template given on the command line
    #[arg(long)]
    inline: Option<String>,

    /// Named arguments as key=value
    #[arg(long = "set", value_name = "KEY=VALUE")]
    named: Vec<String>,

    /// Positional arguments, referenced as {{ 0 }}, {{ 1 }}, ...
    positional: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (name, source) = match (&args.script, &args.inline) {
        (Some(path), _) => (
            path.display().to_string(),
            std::fs::read_to_string(path)
                .wrap_err_with(|| format!("cannot read {}", path.display()))?,
        ),
        (None, Some(inline)) => ("inline".to_string(), inline.clone()),
        (None, None) => bail!("either --script or --inline is required"),
    };
    let script: Arc<dyn Script> = Arc::new(ShellScript::bash(name, &source));

    let mut arguments = Arguments::new();
    for value in args.positional {
        arguments.push(value);
    }
    for pair in args.named {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got {pair:?}");
        };
        arguments.insert(key, value);
    }

    let password = std::env::var("REMEXEC_PASSWORD").unwrap_or_default();
    let connection = Connection::new(args.host, args.user, password)
        .with_port(args.port)
        .insecure(args.insecure);

    let mut options = SessionOptions::default();
    if let Some(path) = args.known_hosts {
        options = options.with_known_hosts(path);
    }

    let mut session = SessionBuilder::new(script)
        .arguments(arguments)
        .options(options)
        .connect(&connection)
        .await?;
    session.set_stdout_writer(tokio::io::stdout());
    session.set_stderr_writer(tokio::io::stderr());

    let result = session.run().await;
    session.close().await;

    if let Err(e) = result {
        eprintln!("{e}");
    }
    std::process::exit(session.exit_code());
}
