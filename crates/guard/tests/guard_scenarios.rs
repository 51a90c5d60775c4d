//! Scenario coverage for the three detectors composed through `LeakGuard`.

use leakwatch_core::{LogSink, ReactionPolicy, Severity};
use leakwatch_guard::{
    BlockingConfig, LeakGuard, TaskLeakConfig, ThreadLeakConfig, ThreadOptions,
};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Default)]
struct CapturingSink {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl LogSink for CapturingSink {
    fn emit(&self, severity: Severity, message: &str) {
        self.messages.lock().push((severity, message.to_string()));
    }
}

fn ignore_all() -> LeakGuard {
    LeakGuard::all_checks(ReactionPolicy::Ignore)
}

#[tokio::test]
async fn awaited_task_leaves_no_finding() {
    init_tracing();
    let guard = ignore_all();
    let registry = guard.tasks().clone();
    let (_, result) = guard
        .observe(async move {
            let worker = registry.spawn("fetcher", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
            });
            worker.await.unwrap();
        })
        .await;
    assert!(result.task_leaks.is_empty(), "findings: {result:?}");
}

#[tokio::test]
async fn unawaited_task_is_reported_with_its_label() {
    init_tracing();
    let guard = ignore_all();
    let registry = guard.tasks().clone();
    let (_, result) = guard
        .observe(async move {
            let _detached = registry.spawn("fire-and-forget", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        })
        .await;
    assert_eq!(result.task_leaks.labels(), vec!["fire-and-forget"]);
}

#[tokio::test]
async fn unawaited_task_raises_under_raise_policy() {
    init_tracing();
    let guard = LeakGuard::no_task_leaks(ReactionPolicy::Raise);
    let registry = guard.tasks().clone();
    let err = guard
        .run(async move {
            let _detached = registry.spawn("runaway", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("runaway"), "error: {err}");
}

#[tokio::test]
async fn unjoined_worker_thread_is_reported_exactly_once() {
    init_tracing();
    let guard = ignore_all();
    let threads = guard.threads().clone();
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let (handle, result) = guard
        .observe(async move {
            threads
                .spawn(ThreadOptions::new("left-behind"), move || {
                    rx.recv().ok();
                })
                .unwrap()
        })
        .await;
    assert_eq!(result.thread_leaks.names(), vec!["left-behind"]);
    assert_eq!(result.thread_leaks.leaked.len(), 1);
    tx.send(()).unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn daemon_thread_is_not_reported_by_default() {
    init_tracing();
    let guard = ignore_all();
    let threads = guard.threads().clone();
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let (handle, result) = guard
        .observe(async move {
            threads
                .spawn(ThreadOptions::new("janitor").daemon(true), move || {
                    rx.recv().ok();
                })
                .unwrap()
        })
        .await;
    assert!(result.thread_leaks.is_empty(), "findings: {result:?}");
    tx.send(()).unwrap();
    handle.join().unwrap();
}

#[tokio::test]
#[serial]
async fn blocking_above_threshold_is_one_event_close_to_actual() {
    init_tracing();
    let guard = LeakGuard::builder()
        .task_leaks(TaskLeakConfig {
            enabled: false,
            ..TaskLeakConfig::default()
        })
        .thread_leaks(ThreadLeakConfig {
            enabled: false,
            ..ThreadLeakConfig::default()
        })
        .blocking(BlockingConfig {
            action: ReactionPolicy::Ignore,
            threshold: Duration::from_millis(200),
            check_interval: Duration::from_millis(100),
            ..BlockingConfig::default()
        })
        .build();
    let (_, result) = guard
        .observe(async {
            // settle the heartbeat, then block the dispatch thread
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::thread::sleep(Duration::from_millis(500));
            tokio::time::sleep(Duration::from_millis(150)).await;
        })
        .await;
    assert_eq!(result.blocking_events.len(), 1, "events: {result:?}");
    let duration = result.blocking_events[0].duration;
    assert!(
        duration >= Duration::from_millis(400) && duration <= Duration::from_millis(700),
        "recorded duration {duration:?} too far from the 500ms stall"
    );
}

#[tokio::test]
#[serial]
async fn blocking_below_threshold_is_not_reported() {
    init_tracing();
    let guard = LeakGuard::all_checks(ReactionPolicy::Ignore);
    let (_, result) = guard
        .observe(async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::thread::sleep(Duration::from_millis(100));
            tokio::time::sleep(Duration::from_millis(150)).await;
        })
        .await;
    assert!(result.blocking_events.is_empty(), "events: {result:?}");
}

#[tokio::test]
async fn cancelled_scope_still_reports_task_leak() {
    init_tracing();
    let sink = Arc::new(CapturingSink::default());
    let guard = LeakGuard::builder()
        .task_leaks(TaskLeakConfig::default())
        .thread_leaks(ThreadLeakConfig {
            enabled: false,
            ..ThreadLeakConfig::default()
        })
        .blocking(BlockingConfig {
            enabled: false,
            ..BlockingConfig::default()
        })
        .sink(sink.clone())
        .build();
    let registry = guard.tasks().clone();
    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        guard.observe(async move {
            let _detached = registry.spawn("abandoned", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
            futures::future::pending::<()>().await;
        }),
    )
    .await;
    assert!(outcome.is_err(), "the scope should have been cut short");
    let messages = sink.messages.lock();
    assert_eq!(messages.len(), 1, "messages: {messages:?}");
    assert_eq!(messages[0].0, Severity::Warn);
    assert!(messages[0].1.contains("abandoned"), "message: {}", messages[0].1);
}

#[tokio::test]
#[serial]
async fn cancelled_scope_still_reports_blocking() {
    init_tracing();
    let sink = Arc::new(CapturingSink::default());
    let guard = LeakGuard::builder()
        .task_leaks(TaskLeakConfig {
            enabled: false,
            ..TaskLeakConfig::default()
        })
        .thread_leaks(ThreadLeakConfig {
            enabled: false,
            ..ThreadLeakConfig::default()
        })
        .blocking(BlockingConfig {
            threshold: Duration::from_millis(100),
            check_interval: Duration::from_millis(25),
            ..BlockingConfig::default()
        })
        .sink(sink.clone())
        .build();
    let outcome = tokio::time::timeout(
        Duration::from_millis(150),
        guard.observe(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            // the deadline passes while the dispatch thread is stuck here
            std::thread::sleep(Duration::from_millis(300));
            futures::future::pending::<()>().await;
        }),
    )
    .await;
    assert!(outcome.is_err(), "the scope should have been cut short");
    let messages = sink.messages.lock();
    assert_eq!(messages.len(), 1, "messages: {messages:?}");
    assert_eq!(messages[0].0, Severity::Warn);
    assert!(messages[0].1.contains("blocked"), "message: {}", messages[0].1);
}

#[tokio::test]
async fn repeated_runs_do_not_accumulate_state() {
    init_tracing();
    let guard = ignore_all();
    for _ in 0..2 {
        let registry = guard.tasks().clone();
        let (_, result) = guard
            .observe(async move {
                let _detached = registry.spawn("repeat-offender", async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                });
            })
            .await;
        // each run sees exactly its own leak, never the previous run's
        assert_eq!(result.task_leaks.labels(), vec!["repeat-offender"]);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn clean_scope_is_clean() {
    init_tracing();
    let guard = LeakGuard::all_checks(ReactionPolicy::Raise);
    let value = guard.run(async { 40 + 2 }).await.unwrap();
    assert_eq!(value, 42);
}
