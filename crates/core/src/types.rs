//! Identities and findings produced by guarded scope executions.
//!
//! Everything here is scope-local data: created when a guarded scope closes,
//! handed to the reaction policy, and discarded. The types derive `Serialize`
//! so embedders can report findings structurally.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Opaque identity of one registered task.
///
/// Allocated by the task registry; never reused within a registry instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Opaque identity of one registered worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadToken(pub u64);

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// One task that was still alive when its enclosing guarded scope closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakedTask {
    pub id: TaskId,
    /// Human-readable label given at registration.
    pub label: String,
    /// How long the task had been alive when the scope closed.
    pub age: Duration,
}

impl fmt::Display for LeakedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' (alive {:?})", self.id, self.label, self.age)
    }
}

/// One worker thread still running when its enclosing guarded scope closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakedThread {
    pub token: ThreadToken,
    pub name: String,
    /// Whether the thread was registered as a daemon/background thread.
    pub daemon: bool,
}

impl fmt::Display for LeakedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.daemon {
            write!(f, "{} '{}' (daemon)", self.token, self.name)
        } else {
            write!(f, "{} '{}'", self.token, self.name)
        }
    }
}

/// Result of diffing two task snapshots. Empty means no leak.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLeakFinding {
    pub leaked: Vec<LeakedTask>,
}

impl TaskLeakFinding {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaked.is_empty()
    }

    /// Labels of the survivors, in identity order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.leaked.iter().map(|t| t.label.as_str()).collect()
    }
}

impl fmt::Display for TaskLeakFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} leaked task(s):", self.leaked.len())?;
        for task in &self.leaked {
            write!(f, " [{task}]")?;
        }
        Ok(())
    }
}

/// Result of diffing two thread snapshots. Empty means no leak.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLeakFinding {
    pub leaked: Vec<LeakedThread>,
}

impl ThreadLeakFinding {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaked.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.leaked.iter().map(|t| t.name.as_str()).collect()
    }
}

impl fmt::Display for ThreadLeakFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} leaked thread(s):", self.leaked.len())?;
        for thread in &self.leaked {
            write!(f, " [{thread}]")?;
        }
        Ok(())
    }
}

/// One detected stall of the dispatch thread.
///
/// Only recorded when `duration` reached the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingEvent {
    /// Wall-clock time at which the dispatcher counter last advanced.
    pub started_at: SystemTime,
    /// Elapsed time between that advance and the next one (or shutdown).
    pub duration: Duration,
    /// Best-effort description of what was executing when the stall began.
    pub description: Option<String>,
}

impl fmt::Display for BlockingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "dispatch thread blocked {:?} in {desc}", self.duration),
            None => write!(f, "dispatch thread blocked {:?}", self.duration),
        }
    }
}

/// Aggregated findings of one guarded scope execution.
///
/// Created when the scope closes, consumed by the reaction policy, never
/// persisted. Two runs of the same scope produce independent results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardResult {
    pub task_leaks: TaskLeakFinding,
    pub thread_leaks: ThreadLeakFinding,
    pub blocking_events: Vec<BlockingEvent>,
}

impl GuardResult {
    /// True when no detector reported anything.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.task_leaks.is_empty() && self.thread_leaks.is_empty() && self.blocking_events.is_empty()
    }
}
