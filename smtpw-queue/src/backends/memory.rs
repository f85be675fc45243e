use std::{
    collections::{BTreeMap, VecDeque},
    io,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    Connector, DEFAULT_TUBE, Job, JobId, JobStats, Queue, QueueError, Result,
};

/// One operation issued against the in-memory queue, in the order it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Use(String),
    Watch(String),
    Ignore(String),
    Put {
        body: Vec<u8>,
        priority: u32,
        delay: Duration,
    },
    Reserve,
    Delete(JobId),
    Bury(JobId, u32),
    Release(JobId, u32, Duration),
    StatsJob(JobId),
    Kick(u32),
    Quit,
}

/// Lifecycle state of a job held by the in-memory queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Reserved,
    Buried,
}

impl JobState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Buried => "buried",
        }
    }
}

/// A failure injected into the next reserve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The connection drops (broken pipe)
    Disconnect,
    /// The server answers with an error reply
    Server(String),
    /// A job held by the connection is about to exceed its TTR
    DeadlineSoon,
}

impl From<Fault> for QueueError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Disconnect => Self::Io(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")),
            Fault::Server(reply) => Self::Server(reply),
            Fault::DeadlineSoon => Self::DeadlineSoon,
        }
    }
}

#[derive(Debug)]
struct Entry {
    tube: String,
    body: Vec<u8>,
    state: JobState,
    priority: u32,
    reserved_by: Option<u64>,
    reserves: u32,
    releases: u32,
    buries: u32,
    kicks: u32,
}

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<JobId, Entry>,
    ready: VecDeque<JobId>,
    next_id: u64,
    next_connection: u64,
    calls: Vec<Call>,
    reserve_faults: VecDeque<Fault>,
    connect_failures: usize,
}

impl State {
    fn insert(&mut self, tube: &str, body: Vec<u8>, priority: u32) -> JobId {
        self.next_id += 1;
        let id = JobId(self.next_id);

        self.jobs.insert(
            id,
            Entry {
                tube: tube.to_string(),
                body,
                state: JobState::Ready,
                priority,
                reserved_by: None,
                reserves: 0,
                releases: 0,
                buries: 0,
                kicks: 0,
            },
        );
        self.ready.push_back(id);

        id
    }

    /// The job must be reserved by `connection` for bury and release.
    fn reserved_entry(&mut self, id: JobId, connection: u64) -> Result<&mut Entry> {
        match self.jobs.get_mut(&id) {
            Some(entry)
                if entry.state == JobState::Reserved && entry.reserved_by == Some(connection) =>
            {
                Ok(entry)
            }
            _ => Err(QueueError::NotFound(id)),
        }
    }
}

/// In-process queue server shared by every connection it hands out
///
/// Jobs are ready in insertion order and a released job is ready again
/// immediately, whatever delay was asked for. `reserve` never blocks: with
/// nothing ready on a watched tube it times out straight away. Every call is
/// recorded so tests can assert on the exact protocol sequence.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a ready job on `tube` without recording a call.
    pub fn push(&self, tube: &str, body: impl Into<Vec<u8>>) -> JobId {
        self.state
            .lock()
            .insert(tube, body.into(), crate::DEFAULT_PRIORITY)
    }

    /// Every call issued so far, across all connections.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Current state of a job, `None` once it has been deleted.
    #[must_use]
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.state.lock().jobs.get(&id).map(|entry| entry.state)
    }

    #[must_use]
    pub fn job_priority(&self, id: JobId) -> Option<u32> {
        self.state.lock().jobs.get(&id).map(|entry| entry.priority)
    }

    /// Number of jobs not yet deleted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.state.lock().connect_failures = count;
    }

    /// Make the next reserve (on any connection) fail with `fault`.
    pub fn fail_next_reserve(&self, fault: Fault) {
        self.state.lock().reserve_faults.push_back(fault);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Queue = MemoryQueue;

    async fn connect(&self) -> Result<MemoryQueue> {
        let mut state = self.state.lock();
        state.calls.push(Call::Connect);

        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(QueueError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        state.next_connection += 1;
        Ok(MemoryQueue {
            state: Arc::clone(&self.state),
            connection: state.next_connection,
            using: DEFAULT_TUBE.to_string(),
            watching: vec![DEFAULT_TUBE.to_string()],
        })
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

/// A single connection to a [`MemoryConnector`]
///
/// The used tube and the watch list are per connection, as on a real server.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    connection: u64,
    using: String,
    watching: Vec<String>,
}

impl MemoryQueue {
    #[must_use]
    pub fn watching(&self) -> &[String] {
        &self.watching
    }

    #[must_use]
    pub fn using(&self) -> &str {
        &self.using
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn use_tube(&mut self, tube: &str) -> Result<()> {
        self.state.lock().calls.push(Call::Use(tube.to_string()));
        self.using = tube.to_string();
        Ok(())
    }

    async fn watch(&mut self, tube: &str) -> Result<usize> {
        self.state.lock().calls.push(Call::Watch(tube.to_string()));
        if !self.watching.iter().any(|t| t == tube) {
            self.watching.push(tube.to_string());
        }
        Ok(self.watching.len())
    }

    async fn ignore(&mut self, tube: &str) -> Result<usize> {
        self.state.lock().calls.push(Call::Ignore(tube.to_string()));
        if self.watching.len() == 1 && self.watching[0] == tube {
            return Err(QueueError::NotIgnored(tube.to_string()));
        }
        self.watching.retain(|t| t != tube);
        Ok(self.watching.len())
    }

    async fn put(
        &mut self,
        body: &[u8],
        priority: u32,
        delay: Duration,
        _ttr: Duration,
    ) -> Result<JobId> {
        let mut state = self.state.lock();
        state.calls.push(Call::Put {
            body: body.to_vec(),
            priority,
            delay,
        });
        Ok(state.insert(&self.using, body.to_vec(), priority))
    }

    async fn reserve(&mut self, _timeout: Duration) -> Result<Job> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(Call::Reserve);

        if let Some(fault) = state.reserve_faults.pop_front() {
            return Err(fault.into());
        }

        let position = state.ready.iter().position(|id| {
            state
                .jobs
                .get(id)
                .is_some_and(|entry| self.watching.contains(&entry.tube))
        });
        let Some(id) = position.and_then(|index| state.ready.remove(index)) else {
            return Err(QueueError::TimedOut);
        };

        let entry = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        entry.state = JobState::Reserved;
        entry.reserved_by = Some(self.connection);
        entry.reserves += 1;

        Ok(Job::new(id, entry.body.clone()))
    }

    async fn delete(&mut self, id: JobId) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete(id));

        let owned = state.jobs.get(&id).is_some_and(|entry| {
            entry.state != JobState::Reserved || entry.reserved_by == Some(self.connection)
        });
        if !owned {
            return Err(QueueError::NotFound(id));
        }

        state.jobs.remove(&id);
        state.ready.retain(|ready| *ready != id);
        Ok(())
    }

    async fn bury(&mut self, id: JobId, priority: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Bury(id, priority));

        let entry = state.reserved_entry(id, self.connection)?;
        entry.state = JobState::Buried;
        entry.reserved_by = None;
        entry.priority = priority;
        entry.buries += 1;
        Ok(())
    }

    async fn release(&mut self, id: JobId, priority: u32, delay: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Release(id, priority, delay));

        let entry = state.reserved_entry(id, self.connection)?;
        entry.state = JobState::Ready;
        entry.reserved_by = None;
        entry.priority = priority;
        entry.releases += 1;
        state.ready.push_back(id);
        Ok(())
    }

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats> {
        let mut state = self.state.lock();
        state.calls.push(Call::StatsJob(id));

        let entry = state.jobs.get(&id).ok_or(QueueError::NotFound(id))?;
        Ok(JobStats {
            id: id.0,
            tube: entry.tube.clone(),
            state: entry.state.as_str().to_string(),
            priority: entry.priority,
            reserves: entry.reserves,
            releases: entry.releases,
            buries: entry.buries,
            kicks: entry.kicks,
            ..JobStats::default()
        })
    }

    async fn kick(&mut self, bound: u32) -> Result<u32> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(Call::Kick(bound));

        let mut kicked = 0;
        for (id, entry) in &mut state.jobs {
            if kicked == bound {
                break;
            }
            if entry.state == JobState::Buried && entry.tube == self.using {
                entry.state = JobState::Ready;
                entry.kicks += 1;
                state.ready.push_back(*id);
                kicked += 1;
            }
        }

        Ok(kicked)
    }

    async fn quit(&mut self) -> Result<()> {
        self.state.lock().calls.push(Call::Quit);

        // Jobs reserved by a closed connection go back to ready.
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for (id, entry) in &mut state.jobs {
            if entry.reserved_by == Some(self.connection) {
                entry.state = JobState::Ready;
                entry.reserved_by = None;
                state.ready.push_back(*id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_subscribe_records_protocol_sequence() {
        let connector = MemoryConnector::new();
        let mut queue = connector.connect().await.expect("connect");

        queue.subscribe("email").await.expect("subscribe");

        assert_eq!(
            connector.calls(),
            vec![
                Call::Connect,
                Call::Use("email".to_string()),
                Call::Watch("email".to_string()),
                Call::Ignore("default".to_string()),
            ]
        );
        assert_eq!(queue.watching(), ["email".to_string()]);
        assert_eq!(queue.using(), "email");
    }

    #[tokio::test]
    async fn test_reserve_only_watched_tubes() {
        let connector = MemoryConnector::new();
        let other = connector.push("other", b"x".to_vec());
        let wanted = connector.push("email", b"y".to_vec());

        let mut queue = connector.connect().await.expect("connect");
        queue.subscribe("email").await.expect("subscribe");

        let job = queue.reserve(WAIT).await.expect("reserve");
        assert_eq!(job.id, wanted);
        assert_eq!(job.body, b"y");

        assert!(matches!(
            queue.reserve(WAIT).await,
            Err(QueueError::TimedOut)
        ));
        assert_eq!(connector.job_state(other), Some(JobState::Ready));
    }

    #[tokio::test]
    async fn test_acknowledgements() {
        let connector = MemoryConnector::new();
        let first = connector.push(DEFAULT_TUBE, b"1".to_vec());
        let second = connector.push(DEFAULT_TUBE, b"2".to_vec());
        let third = connector.push(DEFAULT_TUBE, b"3".to_vec());
        let mut queue = connector.connect().await.expect("connect");

        let job = queue.reserve(WAIT).await.expect("reserve");
        queue.delete(job.id).await.expect("delete");
        assert_eq!(connector.job_state(first), None);

        let job = queue.reserve(WAIT).await.expect("reserve");
        queue.bury(job.id, 1).await.expect("bury");
        assert_eq!(connector.job_state(second), Some(JobState::Buried));
        assert_eq!(connector.job_priority(second), Some(1));

        let job = queue.reserve(WAIT).await.expect("reserve");
        queue
            .release(job.id, 1024, Duration::from_secs(20))
            .await
            .expect("release");
        assert_eq!(connector.job_state(third), Some(JobState::Ready));

        let job = queue.reserve(WAIT).await.expect("reserve again");
        assert_eq!(job.id, third);
        let stats = queue.stats_job(third).await.expect("stats");
        assert_eq!(stats.reserves, 2);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.state, "reserved");

        assert_eq!(queue.kick(10).await.expect("kick"), 1);
        assert_eq!(connector.job_state(second), Some(JobState::Ready));
    }

    #[tokio::test]
    async fn test_bury_requires_reservation_by_connection() {
        let connector = MemoryConnector::new();
        let id = connector.push(DEFAULT_TUBE, b"1".to_vec());
        let mut owner = connector.connect().await.expect("connect");
        let mut stranger = connector.connect().await.expect("connect");

        owner.reserve(WAIT).await.expect("reserve");

        assert!(matches!(
            stranger.bury(id, 1).await,
            Err(QueueError::NotFound(_))
        ));
        assert!(matches!(
            stranger.delete(id).await,
            Err(QueueError::NotFound(_))
        ));

        owner.quit().await.expect("quit");
        assert_eq!(connector.job_state(id), Some(JobState::Ready));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let connector = MemoryConnector::new();
        connector.fail_connects(1);
        assert!(connector.connect().await.is_err());

        let mut queue = connector.connect().await.expect("second attempt connects");
        connector.fail_next_reserve(Fault::Disconnect);

        let err = queue.reserve(WAIT).await.expect_err("fault injected");
        assert!(err.is_disconnect());
        assert!(queue.reserve(WAIT).await.expect_err("empty").is_timeout());
    }

    #[tokio::test]
    async fn test_cannot_ignore_last_tube() {
        let connector = MemoryConnector::new();
        let mut queue = connector.connect().await.expect("connect");

        assert!(matches!(
            queue.ignore(DEFAULT_TUBE).await,
            Err(QueueError::NotIgnored(_))
        ));
    }
}
