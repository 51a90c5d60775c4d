/// Constants shared across the leakwatch crates
use std::time::Duration;

/// How often the blocking watchdog samples the dispatcher counter.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum stall length before a blocking event is reported.
pub const DEFAULT_BLOCK_THRESHOLD: Duration = Duration::from_millis(200);

/// Tick period of the heartbeat task scheduled on the dispatcher.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on the task-leak grace wait when `wait_for_completion` is set.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(1);

/// Name given to the watchdog sampler thread. The thread bypasses the
/// registries, so the name only shows up in OS-level tooling.
pub const WATCHDOG_THREAD_NAME: &str = "leakwatch-watchdog";

/// Label used for tasks registered without an explicit label.
pub const UNNAMED_TASK_LABEL: &str = "<unnamed>";
