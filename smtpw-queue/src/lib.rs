//! Work queue access for the dispatch worker
//!
//! The worker only needs a handful of beanstalkd operations: subscribe to a
//! tube, reserve a job, and acknowledge it with delete, bury or release. This
//! crate exposes them behind the [`Queue`] and [`Connector`] traits with two
//! implementations:
//! - [`BeanstalkClient`]: the beanstalkd text protocol over TCP
//! - [`MemoryQueue`]: an in-process queue recording every call, for tests

pub mod backends;
pub mod beanstalk;
pub mod error;
pub mod r#trait;
pub mod types;

pub use backends::{Call, Fault, JobState, MemoryConnector, MemoryQueue};
pub use beanstalk::{BeanstalkClient, BeanstalkConnector};
pub use error::{QueueError, Result};
pub use r#trait::{Connector, Queue};
pub use types::{DEFAULT_PRIORITY, DEFAULT_TUBE, Job, JobId, JobStats};
