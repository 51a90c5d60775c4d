//! Thread leak detection.
//!
//! Same before/after protocol as the task detector, over worker threads.
//! Liveness is re-checked right before a finding is finalized (alive flag,
//! plus the OS probe when a tid is known) so a thread observed mid-teardown
//! is not a false positive.

use super::NameFilter;
use crate::registry::{threads::os_thread_alive, Snapshot, ThreadRegistry};
use leakwatch_core::{LeakedThread, ReactionPolicy, Result, ThreadLeakFinding, ThreadToken};
use tracing::trace;

/// Configuration for the thread leak detector.
#[derive(Debug, Clone)]
pub struct ThreadLeakConfig {
    pub enabled: bool,
    pub action: ReactionPolicy,
    /// Daemon threads outlive scopes by design; skip them unless told not to.
    pub ignore_daemon_threads: bool,
    pub name_filter: Option<NameFilter>,
}

impl Default for ThreadLeakConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action: ReactionPolicy::default(),
            ignore_daemon_threads: true,
            name_filter: None,
        }
    }
}

/// Diffs thread snapshots taken around one guarded scope.
#[derive(Debug)]
pub struct ThreadLeakDetector {
    registry: ThreadRegistry,
    config: ThreadLeakConfig,
    before: Option<Snapshot<ThreadToken>>,
}

impl ThreadLeakDetector {
    pub fn new(registry: ThreadRegistry, config: ThreadLeakConfig) -> Self {
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
        trace!(target: "leakwatch", "thread leak detector opened");
    }

    /// Take the "after" snapshot and compute the finding.
    pub fn close(&mut self) -> Result<ThreadLeakFinding> {
        let Some(before) = self.before.take() else {
            return Ok(ThreadLeakFinding::default());
        };
        let candidates = self.registry.snapshot().diff(&before)?;
        let leaked = candidates
            .into_iter()
            .filter_map(|token| self.registry.entry(token))
            .filter(|entry| !(self.config.ignore_daemon_threads && entry.is_daemon()))
            .filter(|entry| {
                self.config
                    .name_filter
                    .as_ref()
                    .is_none_or(|filter| filter.is_match(entry.name()))
            })
            // liveness, not mere presence: re-check immediately before
            // finalizing to dodge teardown races
            .filter(|entry| entry.is_alive())
            .filter(|entry| {
                entry
                    .os_tid()
                    .and_then(os_thread_alive)
                    .unwrap_or(true)
            })
            .map(|entry| LeakedThread {
                token: entry.token(),
                name: entry.name().to_string(),
                daemon: entry.is_daemon(),
            })
            .collect();
        Ok(ThreadLeakFinding { leaked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ThreadOptions;
    use std::sync::mpsc;

    #[test]
    fn unjoined_thread_is_reported() {
        let registry = ThreadRegistry::new();
        let mut det = ThreadLeakDetector::new(registry.clone(), ThreadLeakConfig::default());
        det.open();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = registry
            .spawn(ThreadOptions::new("loiterer"), move || {
                rx.recv().ok();
            })
            .unwrap();
        let finding = det.close().unwrap();
        assert_eq!(finding.names(), vec!["loiterer"]);
        tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn joined_thread_is_not_reported() {
        let registry = ThreadRegistry::new();
        let mut det = ThreadLeakDetector::new(registry.clone(), ThreadLeakConfig::default());
        det.open();
        registry
            .spawn(ThreadOptions::new("prompt"), || ())
            .unwrap()
            .join()
            .unwrap();
        assert!(det.close().unwrap().is_empty());
    }

    #[test]
    fn daemon_thread_is_skipped_by_default() {
        let registry = ThreadRegistry::new();
        let mut det = ThreadLeakDetector::new(registry.clone(), ThreadLeakConfig::default());
        det.open();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = registry
            .spawn(ThreadOptions::new("background").daemon(true), move || {
                rx.recv().ok();
            })
            .unwrap();
        assert!(det.close().unwrap().is_empty());
        tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn daemon_thread_reported_when_not_ignored() {
        let registry = ThreadRegistry::new();
        let config = ThreadLeakConfig {
            ignore_daemon_threads: false,
            ..ThreadLeakConfig::default()
        };
        let mut det = ThreadLeakDetector::new(registry.clone(), config);
        det.open();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = registry
            .spawn(ThreadOptions::new("background").daemon(true), move || {
                rx.recv().ok();
            })
            .unwrap();
        let finding = det.close().unwrap();
        assert_eq!(finding.names(), vec!["background"]);
        assert!(finding.leaked[0].daemon);
        tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn pre_existing_thread_is_not_reported() {
        let registry = ThreadRegistry::new();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = registry
            .spawn(ThreadOptions::new("elder"), move || {
                rx.recv().ok();
            })
            .unwrap();
        let mut det = ThreadLeakDetector::new(registry.clone(), ThreadLeakConfig::default());
        det.open();
        assert!(det.close().unwrap().is_empty());
        tx.send(()).unwrap();
        handle.join().unwrap();
    }
}
