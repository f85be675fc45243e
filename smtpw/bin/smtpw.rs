#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use smtpw::{Config, Options, Smtpw, config};

/// Deliver queued email jobs over SMTP
#[derive(Parser, Debug)]
#[command(name = "smtpw")]
#[command(version)]
struct Cli {
    /// Verbose logging, including raw job payloads
    #[arg(short, long)]
    verbose: bool,

    /// Delete the next job whose payload cannot be decoded
    #[arg(short, long)]
    skip: bool,

    /// Log messages instead of sending them, deleting each job
    #[arg(short = 'r', long)]
    dry_run: bool,

    /// Path to the configuration file (RON, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = config::locate(cli.config)?;
    let config = Config::load(&path)?;

    Smtpw::new(
        config,
        Options {
            verbose: cli.verbose,
            skip_next_malformed: cli.skip,
            dry_run: cli.dry_run,
        },
    )
    .run()
    .await
}
