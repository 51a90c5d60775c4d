//! The scope guard composing the three detectors.
//!
//! A [`LeakGuard`] holds the registries, one config per detector and an
//! optional log sink. Each `run`/`observe` call walks the state machine
//! `Idle → Opening → Running → Closing → Reported` and back to `Idle`:
//! opening takes the before-snapshots and then starts the watchdog, closing
//! stops the watchdog and then takes the after-snapshots, so neither the
//! watchdog's startup nor its teardown can show up in its own scope's
//! findings.

use crate::detector::{
    BlockingConfig, BlockingWatchdog, TaskLeakConfig, TaskLeakDetector, ThreadLeakConfig,
    ThreadLeakDetector,
};
use crate::registry::{TaskRegistry, ThreadRegistry};
use futures::FutureExt;
use leakwatch_core::{
    Error, GuardResult, LogSink, NullSink, ReactionPolicy, Result, Severity,
};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Idle,
    Opening,
    Running,
    Closing,
    Reported,
}

impl GuardState {
    /// The states form a single cycle; anything else is a bug in the scope.
    fn can_enter(self, next: GuardState) -> bool {
        matches!(
            (self, next),
            (GuardState::Idle, GuardState::Opening)
                | (GuardState::Opening, GuardState::Running)
                | (GuardState::Running, GuardState::Closing)
                | (GuardState::Closing, GuardState::Reported)
                | (GuardState::Reported, GuardState::Idle)
        )
    }
}

/// Guards a unit of async work and checks it for task leaks, thread leaks
/// and event-loop blocking when it completes.
///
/// Cheap to clone; clones share the registries but detectors are created
/// fresh per run, so consecutive runs never share state.
#[derive(Clone)]
pub struct LeakGuard {
    tasks: TaskRegistry,
    threads: ThreadRegistry,
    task_config: TaskLeakConfig,
    thread_config: ThreadLeakConfig,
    blocking_config: BlockingConfig,
    sink: Option<Arc<dyn LogSink>>,
}

impl fmt::Debug for LeakGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakGuard")
            .field("task_config", &self.task_config)
            .field("thread_config", &self.thread_config)
            .field("blocking_config", &self.blocking_config)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl LeakGuard {
    #[must_use]
    pub fn builder() -> LeakGuardBuilder {
        LeakGuardBuilder::default()
    }

    /// All three detectors enabled with the given action.
    #[must_use]
    pub fn all_checks(action: ReactionPolicy) -> Self {
        Self::builder()
            .task_leaks(TaskLeakConfig {
                action,
                ..TaskLeakConfig::default()
            })
            .thread_leaks(ThreadLeakConfig {
                action,
                ..ThreadLeakConfig::default()
            })
            .blocking(BlockingConfig {
                action,
                ..BlockingConfig::default()
            })
            .build()
    }

    /// Only the task leak detector enabled.
    #[must_use]
    pub fn no_task_leaks(action: ReactionPolicy) -> Self {
        Self::builder()
            .task_leaks(TaskLeakConfig {
                action,
                ..TaskLeakConfig::default()
            })
            .thread_leaks(ThreadLeakConfig {
                enabled: false,
                ..ThreadLeakConfig::default()
            })
            .blocking(BlockingConfig {
                enabled: false,
                ..BlockingConfig::default()
            })
            .build()
    }

    /// Only the thread leak detector enabled.
    #[must_use]
    pub fn no_thread_leaks(action: ReactionPolicy) -> Self {
        Self::builder()
            .task_leaks(TaskLeakConfig {
                enabled: false,
                ..TaskLeakConfig::default()
            })
            .thread_leaks(ThreadLeakConfig {
                action,
                ..ThreadLeakConfig::default()
            })
            .blocking(BlockingConfig {
                enabled: false,
                ..BlockingConfig::default()
            })
            .build()
    }

    /// Only the blocking watchdog enabled.
    #[must_use]
    pub fn no_blocking(action: ReactionPolicy) -> Self {
        Self::builder()
            .task_leaks(TaskLeakConfig {
                enabled: false,
                ..TaskLeakConfig::default()
            })
            .thread_leaks(ThreadLeakConfig {
                enabled: false,
                ..ThreadLeakConfig::default()
            })
            .blocking(BlockingConfig {
                action,
                ..BlockingConfig::default()
            })
            .build()
    }

    /// Registry guarded work should spawn tasks through.
    #[must_use]
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Registry guarded work should spawn worker threads through.
    #[must_use]
    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// Run the guarded work and hand back its output together with the raw
    /// findings, regardless of the configured actions.
    ///
    /// A panic in the work still closes the detectors and reports findings
    /// to the sink before resuming; external cancellation closes them
    /// best-effort from the drop path.
    pub async fn observe<F: Future>(&self, work: F) -> (F::Output, GuardResult) {
        let mut scope = OpenScope::open(self);
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        let result = scope.close().await;
        self.report(&result);
        match outcome {
            Ok(value) => (value, result),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Run the guarded work, applying each detector's action independently.
    ///
    /// Under `Raise`, the first finding in fixed order (task leaks, thread
    /// leaks, blocking events) is returned as the error.
    pub async fn run<F: Future>(&self, work: F) -> Result<F::Output> {
        let (value, result) = self.observe(work).await;
        match self.raise_error(&result) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    /// Like [`run`](Self::run) for work that returns a `Result`. The work's
    /// own failure stays primary; a `Raise` finding from the same run is
    /// chained as the secondary cause rather than dropped.
    pub async fn try_run<F, T, E>(&self, work: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (outcome, result) = self.observe(work).await;
        let finding = self.raise_error(&result);
        match outcome {
            Ok(value) => match finding {
                Some(err) => Err(err),
                None => Ok(value),
            },
            Err(work_err) => Err(Error::guarded_work(work_err, finding)),
        }
    }

    /// Decorator form: wrap a callable so invoking the returned future runs
    /// it guarded. Identical semantics to [`run`](Self::run).
    pub fn wrap<F, Fut>(&self, f: F) -> impl Future<Output = Result<Fut::Output>>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let guard = self.clone();
        async move { guard.run(f()).await }
    }

    /// First `Raise`-actioned finding, in fixed order.
    fn raise_error(&self, result: &GuardResult) -> Option<Error> {
        if self.task_config.action == ReactionPolicy::Raise && !result.task_leaks.is_empty() {
            return Some(Error::TaskLeak {
                finding: result.task_leaks.clone(),
            });
        }
        if self.thread_config.action == ReactionPolicy::Raise && !result.thread_leaks.is_empty() {
            return Some(Error::ThreadLeak {
                finding: result.thread_leaks.clone(),
            });
        }
        if self.blocking_config.action == ReactionPolicy::Raise
            && !result.blocking_events.is_empty()
        {
            return Some(Error::Blocking {
                events: result.blocking_events.clone(),
            });
        }
        None
    }

    /// Emit findings to the sink. Each detector's findings are handled
    /// independently; one detector never suppresses another.
    fn report(&self, result: &GuardResult) {
        if !result.task_leaks.is_empty() {
            self.emit(self.task_config.action, format!("{}", result.task_leaks));
        }
        if !result.thread_leaks.is_empty() {
            self.emit(self.thread_config.action, format!("{}", result.thread_leaks));
        }
        for event in &result.blocking_events {
            self.emit(self.blocking_config.action, format!("{event}"));
        }
    }

    fn emit(&self, action: ReactionPolicy, message: String) {
        let severity = match action {
            ReactionPolicy::Ignore => return,
            ReactionPolicy::LogOnly => Severity::Warn,
            ReactionPolicy::Raise => Severity::Error,
        };
        match &self.sink {
            Some(sink) => sink.emit(severity, &message),
            None => NullSink.emit(severity, &message),
        }
    }
}

/// One in-flight guarded scope. Dropping it without `close` (cancellation)
/// closes the detectors synchronously, best-effort.
struct OpenScope<'g> {
    guard: &'g LeakGuard,
    state: GuardState,
    task_detector: TaskLeakDetector,
    thread_detector: ThreadLeakDetector,
    watchdog: BlockingWatchdog,
    done: bool,
}

impl<'g> OpenScope<'g> {
    fn open(guard: &'g LeakGuard) -> Self {
        let mut scope = Self {
            guard,
            state: GuardState::Idle,
            task_detector: TaskLeakDetector::new(guard.tasks.clone(), guard.task_config.clone()),
            thread_detector: ThreadLeakDetector::new(
                guard.threads.clone(),
                guard.thread_config.clone(),
            ),
            watchdog: BlockingWatchdog::new(guard.tasks.clone(), guard.blocking_config.clone()),
            done: false,
        };
        scope.transition(GuardState::Opening);
        // snapshots first, watchdog last: its startup must not count as a leak
        scope.task_detector.open();
        scope.thread_detector.open();
        if let Err(err) = scope.watchdog.start() {
            warn!(target: "leakwatch", %err, "blocking detection skipped for this run");
        }
        scope.transition(GuardState::Running);
        scope
    }

    async fn close(&mut self) -> GuardResult {
        self.done = true;
        self.transition(GuardState::Closing);
        // reverse order of opening: watchdog teardown must not self-report
        let blocking_events = match self.watchdog.stop().await {
            Ok(events) => events,
            Err(err) => {
                warn!(target: "leakwatch", %err, "blocking watchdog did not stop cleanly");
                Vec::new()
            }
        };
        let thread_leaks = self.thread_detector.close().unwrap_or_else(|err| {
            warn!(target: "leakwatch", %err, "thread leak detection skipped for this run");
            Default::default()
        });
        let task_leaks = self.task_detector.close().await.unwrap_or_else(|err| {
            warn!(target: "leakwatch", %err, "task leak detection skipped for this run");
            Default::default()
        });
        self.transition(GuardState::Reported);
        let result = GuardResult {
            task_leaks,
            thread_leaks,
            blocking_events,
        };
        self.transition(GuardState::Idle);
        result
    }

    fn transition(&mut self, next: GuardState) {
        debug_assert!(
            self.state.can_enter(next),
            "illegal guard transition {:?} -> {next:?}",
            self.state
        );
        trace!(target: "leakwatch", from = ?self.state, to = ?next, "guard state");
        self.state = next;
    }
}

impl Drop for OpenScope<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // cancellation path: close synchronously and still report
        self.transition(GuardState::Closing);
        let blocking_events = self.watchdog.stop_now();
        let thread_leaks = self.thread_detector.close().unwrap_or_default();
        let task_leaks = self.task_detector.close_now().unwrap_or_default();
        self.transition(GuardState::Reported);
        let result = GuardResult {
            task_leaks,
            thread_leaks,
            blocking_events,
        };
        if !result.is_clean() {
            self.guard.report(&result);
        }
        self.transition(GuardState::Idle);
        trace!(target: "leakwatch", "guarded scope cancelled before completion");
    }
}

/// Builder for [`LeakGuard`].
#[derive(Default)]
pub struct LeakGuardBuilder {
    tasks: Option<TaskRegistry>,
    threads: Option<ThreadRegistry>,
    task_config: TaskLeakConfig,
    thread_config: ThreadLeakConfig,
    blocking_config: BlockingConfig,
    sink: Option<Arc<dyn LogSink>>,
}

impl LeakGuardBuilder {
    /// Use an existing task registry instead of a fresh one.
    #[must_use]
    pub fn task_registry(mut self, registry: TaskRegistry) -> Self {
        self.tasks = Some(registry);
        self
    }

    /// Use an existing thread registry instead of a fresh one.
    #[must_use]
    pub fn thread_registry(mut self, registry: ThreadRegistry) -> Self {
        self.threads = Some(registry);
        self
    }

    #[must_use]
    pub fn task_leaks(mut self, config: TaskLeakConfig) -> Self {
        self.task_config = config;
        self
    }

    #[must_use]
    pub fn thread_leaks(mut self, config: ThreadLeakConfig) -> Self {
        self.thread_config = config;
        self
    }

    #[must_use]
    pub fn blocking(mut self, config: BlockingConfig) -> Self {
        self.blocking_config = config;
        self
    }

    /// Sink receiving findings under `LogOnly` (and `Raise`, for the record).
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn build(self) -> LeakGuard {
        LeakGuard {
            tasks: self.tasks.unwrap_or_default(),
            threads: self.threads.unwrap_or_default(),
            task_config: self.task_config,
            thread_config: self.thread_config,
            blocking_config: self.blocking_config,
            sink: self.sink,
        }
    }
}
