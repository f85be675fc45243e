use std::fmt;

use serde::{Deserialize, Serialize};

use crate::QueueError;

/// Priority beanstalkd clients conventionally use for ordinary jobs.
pub const DEFAULT_PRIORITY: u32 = 1024;

/// Tube every new connection uses and watches.
pub const DEFAULT_TUBE: &str = "default";

/// Identifier the queue server assigned to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A reserved job: its id and the raw payload as published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub body: Vec<u8>,
}

impl Job {
    pub fn new(id: impl Into<JobId>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// Statistics the server keeps about a single job (`stats-job`)
///
/// Deserializes from the server's key names (`pri`, `age`, `ttr`); keys the
/// worker has no use for (`delay`, `time-left`, `file`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub id: u64,
    #[serde(default)]
    pub tube: String,
    /// `ready`, `delayed`, `reserved` or `buried`
    #[serde(default)]
    pub state: String,
    #[serde(default, rename(deserialize = "pri"))]
    pub priority: u32,
    #[serde(default, rename(deserialize = "age"))]
    pub age_secs: u64,
    #[serde(default, rename(deserialize = "ttr"))]
    pub ttr_secs: u64,
    /// How many times the job has been reserved, including the current one
    #[serde(default)]
    pub reserves: u32,
    #[serde(default)]
    pub timeouts: u32,
    #[serde(default)]
    pub releases: u32,
    #[serde(default)]
    pub buries: u32,
    #[serde(default)]
    pub kicks: u32,
}

impl JobStats {
    /// Parse the YAML dictionary returned by `stats-job`
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Parse`] if the reply is not a YAML mapping, the
    /// `id` key is missing or a numeric field does not parse.
    pub fn parse(text: &str) -> Result<Self, QueueError> {
        serde_yaml::from_str(text).map_err(|e| QueueError::Parse(format!("stats-job: {e}")))
    }
}
