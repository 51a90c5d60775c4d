//! Liveness detectors for guarded scopes.
//!
//! This crate wraps a unit of async work and verifies, when the scope closes,
//! that it left nothing behind: no background tasks still alive ("task
//! leak"), no worker threads still running ("thread leak"), and no
//! synchronous call that occupied the dispatch thread past a threshold
//! ("event-loop blocking").
//!
//! Work enters the bookkeeping through the registries: futures are spawned
//! via [`registry::TaskRegistry::spawn`] and worker threads via
//! [`registry::ThreadRegistry::spawn`]. The [`guard::LeakGuard`] composes the
//! three detectors around the guarded work and applies a
//! [`leakwatch_core::ReactionPolicy`] to whatever they find.
//!
//! ```no_run
//! use leakwatch_core::ReactionPolicy;
//! use leakwatch_guard::LeakGuard;
//!
//! # async fn demo() -> leakwatch_core::Result<()> {
//! let guard = LeakGuard::all_checks(ReactionPolicy::Raise);
//! guard
//!     .run(async {
//!         let worker = guard.tasks().spawn("fetch", async { /* ... */ });
//!         let _ = worker.await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod detector;
pub mod guard;
pub mod registry;

pub use self::{
    detector::{
        BlockingConfig, BlockingGranularity, BlockingWatchdog, NameFilter, TaskLeakConfig,
        TaskLeakDetector, ThreadLeakConfig, ThreadLeakDetector,
    },
    guard::{LeakGuard, LeakGuardBuilder},
    registry::{Snapshot, TaskRegistry, ThreadOptions, ThreadRegistry},
};
