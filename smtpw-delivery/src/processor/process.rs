//! Processing of a single reserved job

use std::time::Duration;

use lettre::message::Mailbox;
use smtpw_common::{
    incoming, outgoing,
    tracing::{error, info, warn},
};
use smtpw_queue::{Connector, DEFAULT_PRIORITY, Job, JobId, Queue, QueueError};

use crate::{
    classify::Disposition,
    compose::ComposedMessage,
    error::{ComposeError, DecodeError, SendError},
    job::EmailJob,
    processor::{Outcome, Worker},
    transport::Mailer,
};

/// How a reserved job is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    Delete,
    Bury,
    Release { priority: u32, delay: Duration },
}

/// What happened between decoding and acknowledgement
enum Attempt {
    DryRun,
    Sent(Result<(), SendError>),
    Uncomposable(ComposeError),
}

impl<C: Connector, M: Mailer> Worker<C, M> {
    /// Turn the result of a reserve into an outcome, acknowledging the job.
    pub(crate) async fn handle(&mut self, reserved: Result<Job, QueueError>) -> Outcome {
        match reserved {
            Ok(job) => self.process(job).await,
            Err(e) if e.is_timeout() => {
                incoming!(level = DEBUG, "Reserve returned without a job ({e})");
                Outcome::Idle
            }
            Err(e) if e.is_deadline_soon() => {
                incoming!(level = DEBUG, "A reserved job is close to its TTR ({e})");
                Outcome::DeadlineSoon
            }
            Err(e) => {
                error!(error = %e, "Queue error while reserving");
                Outcome::QueueFailed {
                    disconnected: e.is_disconnect(),
                }
            }
        }
    }

    async fn process(&mut self, job: Job) -> Outcome {
        let id = job.id;
        incoming!(level = INFO, job = id, "Reserved job ({} bytes)", job.body.len());
        if self.verbose {
            incoming!(
                level = DEBUG,
                job = id,
                "Payload:\n{}",
                String::from_utf8_lossy(&job.body)
            );
        }

        let email = match EmailJob::decode(&job.body) {
            Ok(email) => email,
            Err(e) => return self.malformed(id, &e).await,
        };

        let attempt = match self.composer.compose(&email) {
            Err(e) => Attempt::Uncomposable(e),
            Ok(composed) if self.dry_run => {
                info!(job_id = %id, "Dry run\n{}", preview(&composed.message));
                Attempt::DryRun
            }
            Ok(composed) => {
                outgoing!(
                    level = INFO,
                    job = id,
                    "Sending {} to {} recipient(s) as {}",
                    composed.message.message_id,
                    composed.message.to.len() + composed.message.bcc.len(),
                    email.from
                );
                Attempt::Sent(self.mailer.send(composed.tenant, &composed.message).await)
            }
        };

        let (disposition, reason) = match attempt {
            Attempt::DryRun => return self.finish(id, Ack::Delete, Outcome::DryRun(id)).await,
            Attempt::Uncomposable(e) => (
                Disposition::of_compose(&e, self.config.invalid_content),
                e.to_string(),
            ),
            Attempt::Sent(result) => (
                Disposition::of_send(&result),
                result.as_ref().err().map(ToString::to_string).unwrap_or_default(),
            ),
        };

        match disposition {
            Disposition::Success => {
                info!(job_id = %id, "Delivered");
                self.finish(id, Ack::Delete, Outcome::Delivered(id)).await
            }
            Disposition::Permanent => {
                warn!(job_id = %id, error = %reason, "Undeliverable, burying job");
                self.finish(id, Ack::Bury, Outcome::Buried(id)).await
            }
            Disposition::Transient => {
                warn!(
                    job_id = %id,
                    error = %reason,
                    "Failed sending, retry in {}s",
                    self.config.retry_wait_secs
                );
                self.retry(id).await
            }
            Disposition::Ignore => {
                warn!(job_id = %id, error = %reason, "Invalid content, job left unacknowledged");
                Outcome::Left(id)
            }
        }
    }

    /// Skip-flag policy for payloads that do not decode.
    async fn malformed(&mut self, id: JobId, e: &DecodeError) -> Outcome {
        if self.skip_next_malformed {
            warn!(job_id = %id, error = %e, "Skipping job as the payload is invalid");
            self.skip_next_malformed = false;
            return self.finish(id, Ack::Delete, Outcome::Skipped(id)).await;
        }

        error!(job_id = %id, error = %e, "Invalid payload received, job left reserved");
        Outcome::Left(id)
    }

    /// Release the job for another attempt, or bury it once it has been
    /// reserved `max_attempts` times.
    async fn retry(&mut self, id: JobId) -> Outcome {
        let priority = match self.queue.stats_job(id).await {
            Ok(stats) if stats.reserves >= self.config.max_attempts => {
                error!(
                    job_id = %id,
                    "Giving up after {} attempts, burying job",
                    stats.reserves
                );
                return self.finish(id, Ack::Bury, Outcome::Buried(id)).await;
            }
            Ok(stats) => stats.priority,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Unable to read job statistics");
                DEFAULT_PRIORITY
            }
        };

        let ack = Ack::Release {
            priority,
            delay: self.config.retry_delay(),
        };
        self.finish(id, ack, Outcome::Retrying(id)).await
    }

    /// Acknowledge the job; a failed acknowledgement becomes a queue failure.
    async fn finish(&mut self, id: JobId, ack: Ack, outcome: Outcome) -> Outcome {
        match self.acknowledge(id, ack).await {
            Ok(()) => outcome,
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to acknowledge job ({ack:?})");
                Outcome::QueueFailed {
                    disconnected: e.is_disconnect(),
                }
            }
        }
    }

    async fn acknowledge(&mut self, id: JobId, ack: Ack) -> Result<(), QueueError> {
        match ack {
            Ack::Delete => {
                outgoing!(job = id, "delete");
                self.queue.delete(id).await
            }
            Ack::Bury => {
                outgoing!(job = id, "bury (priority {})", self.config.bury_priority);
                self.queue.bury(id, self.config.bury_priority).await
            }
            Ack::Release { priority, delay } => {
                outgoing!(
                    job = id,
                    "release (priority {priority}, delay {}s)",
                    delay.as_secs()
                );
                self.queue.release(id, priority, delay).await
            }
        }
    }
}

/// The key fields of a message that is not going to be sent.
fn preview(message: &ComposedMessage) -> String {
    let list = |mailboxes: &[Mailbox]| {
        mailboxes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let reply_to = message
        .reply_to
        .as_ref()
        .map(|mailbox| format!("\nReply-To: {mailbox}"))
        .unwrap_or_default();

    format!(
        "From: {}{}\nTo: {}\nBcc: {}\nSubject: {}\n\ntext/plain\n{}\n\ntext/html\n{}\n",
        message.from,
        reply_to,
        list(&message.to),
        list(&message.bcc),
        message.subject,
        message.text,
        message.html.as_deref().unwrap_or_default()
    )
}
