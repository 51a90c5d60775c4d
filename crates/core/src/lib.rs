//! Core domain types, errors, and policies for `leakwatch`.
//!
//! This crate establishes the foundational data structures and error handling
//! used by the detector crates. It carries no detection logic of its own.
//!
//! ## Key Components
//!
//! - **`errors`**: Defines the primary `Error` enum and `Result` type alias,
//!   centralizing all possible failure modes for predictable error handling.
//! - **`types`**: Identities, findings and the per-scope `GuardResult`
//!   produced by a guarded execution.
//! - **`policy`**: The `ReactionPolicy` governing what happens when a
//!   detector reports a finding, and the `Severity` scale used by log sinks.
//! - **`sink`**: The `LogSink` collaborator interface an embedding
//!   application supplies to receive findings under `LogOnly`.
//! - **`constants`**: Shared defaults such as sampling intervals and the
//!   watchdog thread name.

pub mod constants;
pub mod errors;
pub mod policy;
pub mod sink;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, Result},
    policy::{ReactionPolicy, Severity},
    sink::{LogSink, NullSink, TracingSink},
    types::{
        BlockingEvent, GuardResult, LeakedTask, LeakedThread, TaskId, TaskLeakFinding,
        ThreadLeakFinding, ThreadToken,
    },
};
