//! Bounded retry of remote queue calls.
//!
//! ## Profiles
//!
//! - `RetryPolicy::connection()`: acquiring the queue handle. 999 attempts,
//!   3 s apart; running out kills the owning agent.
//! - `RetryPolicy::write_back()`: attribute edits and bulk actions. 3 attempts,
//!   1 s apart; running out abandons the write-back for this cycle.
//!
//! Only transient errors are retried (see `QueueError::is_transient`).

pub mod executor;
pub mod types;

pub use executor::{RetryError, RetryExecutor};
pub use types::{OnExhaust, RetryPolicy};
