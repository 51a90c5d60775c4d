//! Instrumented task registry.
//!
//! Futures enter through [`TaskRegistry::spawn`] (or
//! [`TaskRegistry::instrument`] for manual scheduling) and get wrapped with
//! the bookkeeping the detectors need: a completion flag raised when the
//! future resolves *or* is dropped, a task-local identity for
//! self-exclusion, and a shared currently-running slot the blocking watchdog
//! reads for stall descriptions.

use super::{next_registry_id, Snapshot};
use leakwatch_core::{TaskId, UNNAMED_TASK_LABEL};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::task::futures::TaskLocalFuture;
use tracing::trace;

tokio::task_local! {
    static CURRENT_TASK: TaskId;
}

/// Registry entry for one registered task. Observation only; the runtime
/// owns the task's lifecycle.
#[derive(Debug)]
pub struct TaskEntry {
    id: TaskId,
    label: String,
    created_at: Instant,
    completed: AtomicBool,
}

impl TaskEntry {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// True once the future resolved or was dropped. An aborted task whose
    /// future has not been dropped yet is still incomplete.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Inner {
    registry_id: u64,
    next_task: AtomicU64,
    entries: Mutex<HashMap<TaskId, Arc<TaskEntry>>>,
    /// Entry currently being polled on the dispatcher, if any.
    running: Mutex<Option<Arc<TaskEntry>>>,
}

/// Enumerates currently-live registered tasks.
///
/// Cheap to clone; clones share the same registry instance.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry_id: next_registry_id(),
                next_task: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
                running: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn registry_id(&self) -> u64 {
        self.inner.registry_id
    }

    /// Identity of the registered task this call executes in, if any.
    #[must_use]
    pub fn current_task() -> Option<TaskId> {
        CURRENT_TASK.try_with(|id| *id).ok()
    }

    /// Wrap a future with registry bookkeeping without spawning it.
    pub fn instrument<F>(&self, label: impl Into<String>, future: F) -> Instrumented<F>
    where
        F: Future,
    {
        let mut label = label.into();
        if label.is_empty() {
            label = UNNAMED_TASK_LABEL.to_string();
        }
        let id = TaskId(self.inner.next_task.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(TaskEntry {
            id,
            label,
            created_at: Instant::now(),
            completed: AtomicBool::new(false),
        });
        {
            // reclaim finished entries here too, so a registry that never
            // gets snapshotted does not grow without bound
            let mut entries = self.inner.entries.lock();
            entries.retain(|_, existing| !existing.is_completed());
            entries.insert(id, entry.clone());
        }
        trace!(target: "leakwatch", %id, label = entry.label(), "task registered");
        Instrumented {
            inner: CURRENT_TASK.scope(id, future),
            entry,
            registry: self.inner.clone(),
        }
    }

    /// Register and spawn a future on the current runtime.
    pub fn spawn<F>(&self, label: impl Into<String>, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(self.instrument(label, future))
    }

    /// Capture the current live set. O(live-count); prunes completed entries
    /// as a side effect on the registry's own bookkeeping only.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<TaskId> {
        let mut entries = self.inner.entries.lock();
        entries.retain(|_, entry| !entry.is_completed());
        Snapshot::new(
            self.inner.registry_id,
            entries.keys().copied().collect(),
            Self::current_task(),
        )
    }

    /// Look up a live or recently-completed entry.
    #[must_use]
    pub fn entry(&self, id: TaskId) -> Option<Arc<TaskEntry>> {
        self.inner.entries.lock().get(&id).cloned()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Label of the entry being polled right now, for stall descriptions.
    pub(crate) fn running_label(&self) -> Option<String> {
        self.inner
            .running
            .lock()
            .as_ref()
            .map(|entry| entry.label().to_string())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pin_project! {
    /// A future wrapped with [`TaskRegistry`] bookkeeping.
    #[must_use = "futures do nothing unless polled"]
    pub struct Instrumented<F> {
        #[pin]
        inner: TaskLocalFuture<TaskId, F>,
        entry: Arc<TaskEntry>,
        registry: Arc<Inner>,
    }

    impl<F> PinnedDrop for Instrumented<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            // dropped-without-resolving means cancelled and destroyed, which
            // terminates the task as far as leak detection is concerned
            this.entry.completed.store(true, Ordering::Release);
        }
    }
}

impl<F: Future> Future for Instrumented<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        *this.registry.running.lock() = Some(this.entry.clone());
        let result = this.inner.poll(cx);
        *this.registry.running.lock() = None;
        if result.is_ready() {
            this.entry.completed.store(true, Ordering::Release);
        }
        result
    }
}
