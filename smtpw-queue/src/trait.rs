use std::time::Duration;

use async_trait::async_trait;

use crate::{DEFAULT_TUBE, Job, JobId, JobStats, QueueError, Result};

/// A live connection to the work queue
///
/// Every method maps onto one beanstalkd command. A job reserved through a
/// connection can only be acknowledged through that same connection.
#[async_trait]
pub trait Queue: Send {
    /// Select the tube `put` publishes to.
    async fn use_tube(&mut self, tube: &str) -> Result<()>;

    /// Add a tube to the watch list, returning the number of watched tubes.
    async fn watch(&mut self, tube: &str) -> Result<usize>;

    /// Remove a tube from the watch list, returning the number still watched.
    async fn ignore(&mut self, tube: &str) -> Result<usize>;

    /// Publish a job to the used tube.
    async fn put(
        &mut self,
        body: &[u8],
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> Result<JobId>;

    /// Wait up to `timeout` for a job on any watched tube.
    ///
    /// Returns [`QueueError::TimedOut`] when nothing became ready in time.
    async fn reserve(&mut self, timeout: Duration) -> Result<Job>;

    /// Remove a job permanently.
    async fn delete(&mut self, id: JobId) -> Result<()>;

    /// Move a reserved job out of circulation for manual inspection.
    async fn bury(&mut self, id: JobId, priority: u32) -> Result<()>;

    /// Return a reserved job to the queue, ready again after `delay`.
    async fn release(&mut self, id: JobId, priority: u32, delay: Duration) -> Result<()>;

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats>;

    /// Move up to `bound` buried jobs back to ready, returning how many moved.
    async fn kick(&mut self, bound: u32) -> Result<u32>;

    /// Close the connection.
    async fn quit(&mut self) -> Result<()>;

    /// Restrict the connection to `tube`: publish to it, watch it, and stop
    /// watching the default tube so unrelated jobs are never reserved.
    async fn subscribe(&mut self, tube: &str) -> Result<()> {
        self.use_tube(tube).await?;
        self.watch(tube).await?;

        if tube != DEFAULT_TUBE {
            match self.ignore(DEFAULT_TUBE).await {
                Ok(_) | Err(QueueError::NotIgnored(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

/// Opens new queue connections; used at startup and on every reconnect
#[async_trait]
pub trait Connector: Send + Sync {
    type Queue: Queue;

    async fn connect(&self) -> Result<Self::Queue>;

    /// Where the connector dials, for log lines.
    fn endpoint(&self) -> String;
}
