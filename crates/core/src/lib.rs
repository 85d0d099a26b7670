//! `hgcs-core`: domain building blocks for the queue reconciliation agents.
//!
//! This crate contains **pure domain** types (no I/O): job identity and
//! snapshots, the queue's expression language, and the error model shared by
//! every queue client.

pub mod classad;
pub mod clock;
pub mod error;
pub mod expr;
pub mod id;
pub mod job;

pub use classad::ClassAd;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, QueueResult};
pub use expr::{BinOp, Expr, Value};
pub use id::{InvalidJobId, JobId};
pub use job::{Job, JobParseError, JobStatus, OutputRemaps, Retention, SdfState, attr, normalize_path};
