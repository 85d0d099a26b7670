//! Remote job queue boundary.
//!
//! Agents talk to the queue only through [`QueueClient`]. The daemon builds one
//! [`SharedQueue`] at startup and passes it to every agent; tests pass one
//! backed by [`InMemoryQueue`].

pub mod condor_cli;
pub mod in_memory;
pub mod shared;
pub mod r#trait;

pub use condor_cli::{CondorCliClient, CondorCliConnector};
pub use in_memory::{InMemoryConnector, InMemoryQueue, Operation, RemoteCall};
pub use shared::SharedQueue;
pub use r#trait::{ActionSummary, JobAction, JobIter, QueueClient, QueueConnector};
