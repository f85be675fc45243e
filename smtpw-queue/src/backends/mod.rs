pub mod memory;

pub use memory::{Call, Fault, JobState, MemoryConnector, MemoryQueue};
