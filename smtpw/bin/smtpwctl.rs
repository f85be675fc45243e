//! Command-line utility for operating on the smtpw job queue
//!
//! - Enqueue an email job, from flags or a JSON payload file
//! - Inspect a job's queue statistics
//! - Kick buried jobs back into the ready queue

#![allow(clippy::single_match_else)]

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use anyhow::Context;
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::{Parser, Subcommand};
use smtpw::{Config, config};
use smtpw_delivery::EmailJob;
use smtpw_queue::{BeanstalkConnector, Connector, DEFAULT_PRIORITY, JobId, Queue};

/// Command-line utility for the smtpw job queue
#[derive(Parser, Debug)]
#[command(name = "smtpwctl")]
#[command(about = "Enqueue and inspect smtpw email jobs", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the worker configuration, used for the queue address and tube
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// beanstalkd address, overriding the configuration
    #[arg(short, long)]
    beanstalk: Option<String>,

    /// Tube to operate on, overriding the configuration
    #[arg(short, long)]
    tube: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Put an email job on the tube
    Enqueue {
        /// JSON payload file; the other job flags are ignored when given
        #[arg(long)]
        file: Option<PathBuf>,

        /// Sender identity
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Vec<String>,

        #[arg(long)]
        bcc: Vec<String>,

        #[arg(long, default_value = "")]
        subject: String,

        /// Plain-text body, or @path to read it from a file
        #[arg(long, default_value = "")]
        text: String,

        /// HTML body, or @path to read it from a file
        #[arg(long, default_value = "")]
        html: String,

        /// Inline part as name=path, referenced from the HTML as cid:name
        #[arg(long)]
        embed: Vec<String>,

        /// Attachment as name=path
        #[arg(long)]
        attach: Vec<String>,

        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: u32,

        /// Seconds before the job becomes ready
        #[arg(long, default_value = "0")]
        delay: u64,

        /// Seconds a worker may hold the job before it is released
        #[arg(long, default_value = "60")]
        ttr: u64,
    },
    /// Show the queue statistics of a job
    StatsJob {
        id: u64,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Move buried jobs on the tube back to ready
    Kick {
        /// Upper bound on the number of jobs kicked
        #[arg(default_value = "1")]
        bound: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (address, tube) = target(cli.config, cli.beanstalk, cli.tube)?;
    let connector = BeanstalkConnector::new(address);
    let mut queue = connector
        .connect()
        .await
        .with_context(|| format!("Unable to connect to {}", connector.endpoint()))?;
    queue.use_tube(&tube).await?;

    match cli.command {
        Commands::Enqueue {
            file,
            from,
            to,
            bcc,
            subject,
            text,
            html,
            embed,
            attach,
            priority,
            delay,
            ttr,
        } => {
            let job = match file {
                Some(path) => {
                    let payload = std::fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    EmailJob::decode(&payload)
                        .with_context(|| format!("Invalid job in {}", path.display()))?
                }
                None => EmailJob {
                    from: from.context("--from is required without --file")?,
                    to,
                    bcc,
                    subject,
                    html: body(&html)?,
                    text: body(&text)?,
                    html_embed: parts(&embed)?,
                    attachments: parts(&attach)?,
                },
            };

            let id = queue
                .put(
                    &job.encode()?,
                    priority,
                    Duration::from_secs(delay),
                    Duration::from_secs(ttr),
                )
                .await?;
            println!("Enqueued job {id} on {tube}");
        }
        Commands::StatsJob { id, format } => {
            let stats = queue.stats_job(JobId(id)).await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
                _ => {
                    println!("Job {}", stats.id);
                    println!("  tube:     {}", stats.tube);
                    println!("  state:    {}", stats.state);
                    println!("  priority: {}", stats.priority);
                    println!("  age:      {}s", stats.age_secs);
                    println!("  ttr:      {}s", stats.ttr_secs);
                    println!("  reserves: {}", stats.reserves);
                    println!("  timeouts: {}", stats.timeouts);
                    println!("  releases: {}", stats.releases);
                    println!("  buries:   {}", stats.buries);
                    println!("  kicks:    {}", stats.kicks);
                }
            }
        }
        Commands::Kick { bound } => {
            let kicked = queue.kick(bound).await?;
            println!("Kicked {kicked} job(s) on {tube}");
        }
    }

    queue.quit().await?;

    Ok(())
}

/// Queue address and tube from the flags, falling back to the configuration.
fn target(
    path: Option<PathBuf>,
    beanstalk: Option<String>,
    tube: Option<String>,
) -> anyhow::Result<(String, String)> {
    if let (Some(address), Some(tube)) = (&beanstalk, &tube) {
        return Ok((address.clone(), tube.clone()));
    }

    match config::locate(path).and_then(|path| Config::load(&path)) {
        Ok(config) => Ok((
            beanstalk.unwrap_or(config.beanstalk),
            tube.unwrap_or(config.tube),
        )),
        Err(e) => match beanstalk {
            Some(address) => Ok((address, tube.unwrap_or_else(|| "email".to_string()))),
            None => Err(e).context("No --beanstalk given and no usable configuration"),
        },
    }
}

/// A body given inline, or read from the file after a leading '@'.
fn body(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))
        }
        None => Ok(value.to_string()),
    }
}

/// Read `name=path` pairs into base64-encoded parts.
fn parts(entries: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    entries
        .iter()
        .map(|entry| {
            let (name, path) = entry
                .split_once('=')
                .with_context(|| format!("Expected name=path, got {entry}"))?;
            let data =
                std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
            Ok((name.to_string(), STANDARD.encode(data)))
        })
        .collect()
}
