//! Error types for leakwatch operations

use crate::types::{BlockingEvent, TaskLeakFinding, ThreadLeakFinding};

/// Result type alias for leakwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for leakwatch operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying enumeration facility was not available; detection for
    /// that category is skipped for the run, never fatal to the guarded work.
    #[error("registry '{registry}' unavailable: {message}")]
    RegistryUnavailable { registry: String, message: String },

    /// Task leak finding surfaced under the `Raise` policy
    #[error("task leak detected: {finding}")]
    TaskLeak { finding: TaskLeakFinding },

    /// Thread leak finding surfaced under the `Raise` policy
    #[error("thread leak detected: {finding}")]
    ThreadLeak { finding: ThreadLeakFinding },

    /// Blocking events surfaced under the `Raise` policy
    #[error("{}", format_blocking(.events))]
    Blocking { events: Vec<BlockingEvent> },

    /// The guarded work itself failed. Always primary for the caller; a
    /// `Raise` finding from the same run is chained as `secondary`.
    #[error("{}", format_guarded_work(.source, .secondary))]
    GuardedWork {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        secondary: Option<Box<Error>>,
    },

    /// The watchdog sampler thread failed to start or stop cleanly
    #[error("blocking watchdog error: {message}")]
    Watchdog { message: String },

    /// Two snapshots from different registry instances were diffed
    #[error("snapshot registry mismatch: expected registry {expected}, got {actual}")]
    SnapshotMismatch { expected: u64, actual: u64 },
}

fn format_blocking(events: &[BlockingEvent]) -> String {
    let mut out = format!("event-loop blocking detected ({} event(s)):", events.len());
    for event in events {
        out.push_str(&format!(" [{event}]"));
    }
    out
}

fn format_guarded_work(
    source: &Box<dyn std::error::Error + Send + Sync>,
    secondary: &Option<Box<Error>>,
) -> String {
    match secondary {
        Some(finding) => format!("guarded work failed: {source} (also: {finding})"),
        None => format!("guarded work failed: {source}"),
    }
}

impl Error {
    /// Create a registry-unavailable error
    pub fn registry_unavailable(
        registry: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::RegistryUnavailable {
            registry: registry.into(),
            message: message.into(),
        }
    }

    /// Create a watchdog error
    pub fn watchdog(message: impl Into<String>) -> Self {
        Error::Watchdog {
            message: message.into(),
        }
    }

    /// Wrap a failed guarded work result, optionally chaining a finding
    pub fn guarded_work(
        source: impl std::error::Error + Send + Sync + 'static,
        secondary: Option<Error>,
    ) -> Self {
        Error::GuardedWork {
            source: Box::new(source),
            secondary: secondary.map(Box::new),
        }
    }

    /// True for the detector-finding variants (task/thread leak, blocking)
    #[must_use]
    pub fn is_finding(&self) -> bool {
        matches!(
            self,
            Error::TaskLeak { .. } | Error::ThreadLeak { .. } | Error::Blocking { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LeakedTask, TaskId};
    use std::time::Duration;

    #[test]
    fn registry_unavailable_display() {
        let err = Error::registry_unavailable("tasks", "no tokio runtime");
        assert_eq!(
            err.to_string(),
            "registry 'tasks' unavailable: no tokio runtime"
        );
        assert!(!err.is_finding());
    }

    #[test]
    fn task_leak_display_names_survivors() {
        let err = Error::TaskLeak {
            finding: TaskLeakFinding {
                leaked: vec![LeakedTask {
                    id: TaskId(1),
                    label: "poller".into(),
                    age: Duration::from_secs(2),
                }],
            },
        };
        assert!(err.is_finding());
        assert!(err.to_string().contains("poller"));
    }

    #[test]
    fn guarded_work_chains_secondary() {
        let work_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let finding = Error::ThreadLeak {
            finding: Default::default(),
        };
        let err = Error::guarded_work(work_err, Some(finding));
        let rendered = err.to_string();
        assert!(rendered.contains("boom"));
        assert!(rendered.contains("thread leak"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
