//! Infrastructure layer: queue clients, retry, agents, config.

pub mod agents;
pub mod config;
pub mod dedup;
pub mod fs_ops;
pub mod queue;
pub mod retry;
