//! Task leak detection.
//!
//! Before/after snapshot protocol: `open` records the live set, `close`
//! reports what is newly alive, minus tasks that completed in between, minus
//! the guard's own host task. A task whose cancellation was requested but
//! which has not terminated yet still counts as leaked.

use super::NameFilter;
use crate::registry::{Snapshot, TaskRegistry};
use leakwatch_core::{
    LeakedTask, ReactionPolicy, Result, TaskId, TaskLeakFinding, DEFAULT_COMPLETION_TIMEOUT,
};
use std::time::{Duration, Instant};
use tracing::trace;

/// Configuration for the task leak detector.
#[derive(Debug, Clone)]
pub struct TaskLeakConfig {
    pub enabled: bool,
    pub action: ReactionPolicy,
    /// When set, only tasks with matching labels are reported.
    pub name_filter: Option<NameFilter>,
    /// Give survivors a grace period to finish before declaring them leaked.
    pub wait_for_completion: bool,
    pub completion_timeout: Duration,
}

impl Default for TaskLeakConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action: ReactionPolicy::default(),
            name_filter: None,
            wait_for_completion: false,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }
}

/// Diffs task snapshots taken around one guarded scope.
#[derive(Debug)]
pub struct TaskLeakDetector {
    registry: TaskRegistry,
    config: TaskLeakConfig,
    before: Option<Snapshot<TaskId>>,
}

impl TaskLeakDetector {
    pub fn new(registry: TaskRegistry, config: TaskLeakConfig) -> Self {
        Self {
            registry,
            config,
            before: None,
        }
    }

    /// Take the "before" snapshot. A no-op when the detector is disabled.
    pub fn open(&mut self) {
        if !self.config.enabled {
            return;
        }
        self.before = Some(self.registry.snapshot());
        trace!(target: "leakwatch", "task leak detector opened");
    }

    /// Take the "after" snapshot and compute the finding, applying the
    /// configured grace wait first when one is enabled.
    pub async fn close(&mut self) -> Result<TaskLeakFinding> {
        let Some(before) = self.before.take() else {
            return Ok(TaskLeakFinding::default());
        };
        let candidates = self.registry.snapshot().diff(&before)?;
        if self.config.wait_for_completion && !candidates.is_empty() {
            self.grace_wait(&candidates).await;
        }
        Ok(self.finalize(candidates))
    }

    /// Synchronous close for cancellation paths; skips the grace wait.
    pub fn close_now(&mut self) -> Result<TaskLeakFinding> {
        let Some(before) = self.before.take() else {
            return Ok(TaskLeakFinding::default());
        };
        let candidates = self.registry.snapshot().diff(&before)?;
        Ok(self.finalize(candidates))
    }

    async fn grace_wait(&self, candidates: &[TaskId]) {
        let deadline = Instant::now() + self.config.completion_timeout;
        loop {
            let still_alive = candidates.iter().any(|id| {
                self.registry
                    .entry(*id)
                    .is_some_and(|entry| !entry.is_completed())
            });
            if !still_alive || Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn finalize(&self, candidates: Vec<TaskId>) -> TaskLeakFinding {
        let now = Instant::now();
        let leaked = candidates
            .into_iter()
            .filter_map(|id| self.registry.entry(id))
            // a task that finished between the snapshots is not a leak
            .filter(|entry| !entry.is_completed())
            .filter(|entry| {
                self.config
                    .name_filter
                    .as_ref()
                    .is_none_or(|filter| filter.is_match(entry.label()))
            })
            .map(|entry| LeakedTask {
                id: entry.id(),
                label: entry.label().to_string(),
                age: now.saturating_duration_since(entry.created_at()),
            })
            .collect();
        TaskLeakFinding { leaked }
    }
}
