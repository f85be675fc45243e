//! Queue consumer loop

pub mod process;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smtpw_common::{Signal, internal};
use smtpw_queue::{Connector, JobId, Queue};

use crate::{compose::Composer, error::WorkerError, transport::Mailer};

const fn default_reserve_timeout() -> u64 {
    900 // 15 minutes
}

const fn default_error_wait() -> u64 {
    5
}

const fn default_deadline_wait() -> u64 {
    1
}

const fn default_retry_wait() -> u64 {
    20
}

const fn default_retry_delay() -> u64 {
    20
}

const fn default_max_attempts() -> u32 {
    25
}

const fn default_bury_priority() -> u32 {
    1
}

const fn default_smtp_timeout() -> u64 {
    60
}

/// What to do with a job whose inline content or attachments are invalid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidContentPolicy {
    /// Bury the job.
    #[default]
    Reject,
    /// Log a warning and leave the job reserved, undelivered.
    Warn,
}

/// Timing and retry settings of the consumer loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How long a single reserve waits for a job (in seconds)
    #[serde(default = "default_reserve_timeout")]
    pub reserve_timeout_secs: u64,

    /// Pause after a queue error before the next reserve (in seconds)
    #[serde(default = "default_error_wait")]
    pub error_wait_secs: u64,

    /// Pause after the server reports a held job close to its TTR
    /// (in seconds)
    #[serde(default = "default_deadline_wait")]
    pub deadline_wait_secs: u64,

    /// Pause after a transient delivery failure (in seconds)
    #[serde(default = "default_retry_wait")]
    pub retry_wait_secs: u64,

    /// Delay before a released job becomes ready again (in seconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Reservations after which a failing job is buried instead of released
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Priority given to buried jobs
    #[serde(default = "default_bury_priority")]
    pub bury_priority: u32,

    /// SMTP command timeout (in seconds)
    #[serde(default = "default_smtp_timeout")]
    pub smtp_timeout_secs: u64,

    #[serde(default)]
    pub invalid_content: InvalidContentPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reserve_timeout_secs: default_reserve_timeout(),
            error_wait_secs: default_error_wait(),
            deadline_wait_secs: default_deadline_wait(),
            retry_wait_secs: default_retry_wait(),
            retry_delay_secs: default_retry_delay(),
            max_attempts: default_max_attempts(),
            bury_priority: default_bury_priority(),
            smtp_timeout_secs: default_smtp_timeout(),
            invalid_content: InvalidContentPolicy::default(),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub const fn reserve_timeout(&self) -> Duration {
        Duration::from_secs(self.reserve_timeout_secs)
    }

    #[must_use]
    pub const fn error_wait(&self) -> Duration {
        Duration::from_secs(self.error_wait_secs)
    }

    #[must_use]
    pub const fn deadline_wait(&self) -> Duration {
        Duration::from_secs(self.deadline_wait_secs)
    }

    #[must_use]
    pub const fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    #[must_use]
    pub const fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }
}

/// Result of one pass through the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The reserve timed out without a job.
    Idle,
    /// A job left reserved is about to exceed its TTR; the server answers
    /// reserves immediately until it lapses.
    DeadlineSoon,
    /// The queue failed; `disconnected` triggers a reconnect.
    QueueFailed { disconnected: bool },
    /// The relay accepted the message and the job was deleted.
    Delivered(JobId),
    /// The message was logged instead of sent and the job deleted.
    DryRun(JobId),
    Buried(JobId),
    /// Delivery failed transiently and the job was released.
    Retrying(JobId),
    /// A malformed job was deleted under the skip flag.
    Skipped(JobId),
    /// The job was left reserved without acknowledgement.
    Left(JobId),
}

impl Outcome {
    /// How long the loop pauses before the next reserve.
    #[must_use]
    pub const fn pause(&self, config: &WorkerConfig) -> Option<Duration> {
        match self {
            Self::QueueFailed { .. } => Some(config.error_wait()),
            Self::DeadlineSoon => Some(config.deadline_wait()),
            Self::Retrying(_) => Some(config.retry_wait()),
            _ => None,
        }
    }
}

/// Builder for [`Worker`]
pub struct WorkerBuilder<C, M> {
    connector: C,
    mailer: M,
    composer: Composer,
    config: WorkerConfig,
    tube: String,
    dry_run: bool,
    skip_next_malformed: bool,
    verbose: bool,
}

impl<C: Connector, M: Mailer> WorkerBuilder<C, M> {
    #[must_use]
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_tube(mut self, tube: impl Into<String>) -> Self {
        self.tube = tube.into();
        self
    }

    /// Log messages instead of sending them.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Delete the next malformed job instead of leaving it.
    #[must_use]
    pub const fn skip_next_malformed(mut self, skip: bool) -> Self {
        self.skip_next_malformed = skip;
        self
    }

    /// Log raw payloads as they are reserved.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Connect to the queue and subscribe to the tube.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is unreachable or the subscription fails.
    pub async fn connect(self) -> Result<Worker<C, M>, WorkerError> {
        let queue = open(&self.connector, &self.tube).await?;

        internal!(
            level = INFO,
            "Connected to {} and watching tube {} (ignoring default)",
            self.connector.endpoint(),
            self.tube
        );

        Ok(Worker {
            connector: self.connector,
            queue,
            mailer: self.mailer,
            composer: self.composer,
            config: self.config,
            tube: self.tube,
            dry_run: self.dry_run,
            skip_next_malformed: self.skip_next_malformed,
            verbose: self.verbose,
        })
    }
}

async fn open<C: Connector>(connector: &C, tube: &str) -> Result<C::Queue, WorkerError> {
    let mut queue = connector
        .connect()
        .await
        .map_err(|source| WorkerError::Connect {
            endpoint: connector.endpoint(),
            source,
        })?;

    queue
        .subscribe(tube)
        .await
        .map_err(|source| WorkerError::Subscribe {
            tube: tube.to_string(),
            source,
        })?;

    Ok(queue)
}

/// Reserves jobs one at a time and delivers them
///
/// The worker owns its queue connection exclusively and replaces it when the
/// transport breaks. Jobs are processed strictly sequentially.
pub struct Worker<C: Connector, M> {
    connector: C,
    queue: C::Queue,
    mailer: M,
    composer: Composer,
    config: WorkerConfig,
    tube: String,
    dry_run: bool,
    skip_next_malformed: bool,
    verbose: bool,
}

impl<C: Connector, M: Mailer> Worker<C, M> {
    pub fn builder(connector: C, mailer: M, composer: Composer) -> WorkerBuilder<C, M> {
        WorkerBuilder {
            connector,
            mailer,
            composer,
            config: WorkerConfig::default(),
            tube: "email".to_string(),
            dry_run: false,
            skip_next_malformed: false,
            verbose: false,
        }
    }

    /// Whether the one-shot skip flag is still armed.
    pub const fn skips_next_malformed(&self) -> bool {
        self.skip_next_malformed
    }

    /// Run one reserve and process the result, including any pause and
    /// reconnect that follows.
    pub async fn tick(&mut self) -> Outcome {
        let reserved = self.queue.reserve(self.config.reserve_timeout()).await;
        let outcome = self.handle(reserved).await;
        self.settle(&outcome).await;
        outcome
    }

    /// Run until a shutdown signal arrives.
    ///
    /// The signal interrupts a pending reserve or a pause. A delivery in
    /// progress is always finished and acknowledged first.
    pub async fn serve(&mut self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) {
        internal!(
            level = INFO,
            "Worker serving tube {}{}",
            self.tube,
            if self.dry_run { " (dry run, nothing is sent)" } else { "" }
        );

        loop {
            let reserved = tokio::select! {
                signal = shutdown.recv() => {
                    Self::stopping(signal);
                    break;
                }
                reserved = self.queue.reserve(self.config.reserve_timeout()) => reserved,
            };

            let outcome = self.handle(reserved).await;

            tokio::select! {
                signal = shutdown.recv() => {
                    Self::stopping(signal);
                    break;
                }
                () = self.settle(&outcome) => {}
            }
        }

        if let Err(e) = self.queue.quit().await {
            internal!(level = WARN, "Error closing queue connection: {e}");
        }

        internal!(level = INFO, "Worker shutdown complete");
    }

    fn stopping(signal: Result<Signal, tokio::sync::broadcast::error::RecvError>) {
        match signal {
            Ok(Signal::Shutdown) => {
                internal!(level = INFO, "Worker received shutdown signal");
            }
            Err(e) => {
                internal!(level = ERROR, "Worker shutdown channel error: {e}");
            }
        }
    }

    async fn settle(&mut self, outcome: &Outcome) {
        if let Some(pause) = outcome.pause(&self.config) {
            tokio::time::sleep(pause).await;
        }

        if matches!(outcome, Outcome::QueueFailed { disconnected: true }) {
            self.reconnect().await;
        }
    }

    /// Replace the queue connection; on failure the old handle is kept and
    /// the next failing reserve tries again.
    async fn reconnect(&mut self) {
        internal!(
            level = WARN,
            "Queue connection lost, reconnecting to {}",
            self.connector.endpoint()
        );

        match open(&self.connector, &self.tube).await {
            Ok(queue) => {
                self.queue = queue;
                internal!(level = INFO, "Reconnected to {}", self.connector.endpoint());
            }
            Err(e) => {
                internal!(level = ERROR, "Reconnect failed: {e}");
            }
        }
    }
}
