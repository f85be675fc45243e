use std::sync::{Arc, LazyLock};

use anyhow::Context;
use sd_notify::NotifyState;
use smtpw_common::{Signal, internal, logging, tracing};
use smtpw_delivery::{Composer, SmtpMailer, Worker};
use smtpw_queue::BeanstalkConnector;
use tokio::sync::broadcast;

use crate::config::Config;

/// Command line switches that shape a single run
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Raise the default log level and dump raw payloads.
    pub verbose: bool,
    /// Delete the first malformed job instead of leaving it reserved.
    pub skip_next_malformed: bool,
    /// Log messages instead of sending them.
    pub dry_run: bool,
}

/// The dispatch worker process
#[derive(Debug)]
pub struct Smtpw {
    config: Config,
    options: Options,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forcing shutdown");
    std::process::exit(130);
}

/// The machine's hostname, used in Message-IDs and EHLO.
fn hostname() -> anyhow::Result<String> {
    let name = gethostname::gethostname()
        .into_string()
        .map_err(|name| anyhow::anyhow!("Hostname is not valid UTF-8: {name:?}"))?;

    if name.is_empty() {
        anyhow::bail!("Unable to determine the hostname");
    }

    Ok(name)
}

/// Tell systemd the worker is subscribed and serving.
fn notify_ready() {
    if std::env::var_os("NOTIFY_SOCKET").is_none() {
        internal!(level = DEBUG, "Readiness notification not sent: not running under systemd");
        return;
    }

    match sd_notify::notify(false, &[NotifyState::Ready]) {
        Ok(()) => internal!(level = DEBUG, "Readiness notification sent"),
        Err(e) => internal!(level = WARN, "Readiness notification failed: {e}"),
    }
}

impl Smtpw {
    pub const fn new(config: Config, options: Options) -> Self {
        Self { config, options }
    }

    /// Run the worker until SIGINT or SIGTERM
    ///
    /// # Errors
    ///
    /// This function will return an error if the hostname cannot be
    /// determined or the initial queue connection fails.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init(self.options.verbose);

        internal!(level = INFO, "Controller running");
        internal!(level = DEBUG, "{:#?}", self.config);

        let hostname = hostname()?;
        let Config {
            beanstalk,
            tube,
            from,
            worker: settings,
        } = self.config;

        tracing::info!(
            hostname = %hostname,
            senders = from.len(),
            "Starting worker"
        );

        let composer = Composer::new(Arc::new(from), hostname.clone());
        let mailer = SmtpMailer::new(hostname, settings.smtp_timeout());
        let connector = BeanstalkConnector::new(beanstalk);

        let mut worker = Worker::builder(connector, mailer, composer)
            .with_config(settings)
            .with_tube(tube)
            .dry_run(self.options.dry_run)
            .skip_next_malformed(self.options.skip_next_malformed)
            .verbose(self.options.verbose)
            .connect()
            .await
            .context("Unable to start the worker")?;

        notify_ready();

        let receiver = SHUTDOWN_BROADCAST.subscribe();
        let signals = tokio::spawn(async {
            if let Err(e) = shutdown().await {
                internal!(level = ERROR, "Signal handling failed: {e}");
            }
        });

        worker.serve(receiver).await;
        signals.abort();

        internal!(level = INFO, "Shutting down...");

        Ok(())
    }
}
