//! Instrumented worker-thread registry.
//!
//! Threads enter through [`ThreadRegistry::spawn`], which wraps the closure
//! with an RAII guard clearing the alive flag on any exit, panics included.
//! On Linux the spawned thread also records its OS tid so liveness can be
//! re-checked against `/proc/self/task` before a leak is finalized.

use super::{next_registry_id, Snapshot};
use leakwatch_core::ThreadToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Spawn options for a registered worker thread.
#[derive(Debug, Clone)]
pub struct ThreadOptions {
    name: String,
    daemon: bool,
}

impl ThreadOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            daemon: false,
        }
    }

    /// Mark the thread as a daemon/background thread. Daemon threads are
    /// expected to outlive arbitrary scopes and are skipped by the thread
    /// leak detector unless configured otherwise.
    #[must_use]
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }
}

/// Registry entry for one worker thread. Observation only.
#[derive(Debug)]
pub struct ThreadEntry {
    token: ThreadToken,
    name: String,
    daemon: bool,
    alive: AtomicBool,
    /// OS thread id, 0 until the thread has started (Linux only).
    tid: AtomicU64,
}

impl ThreadEntry {
    #[must_use]
    pub fn token(&self) -> ThreadToken {
        self.token
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn os_tid(&self) -> Option<u64> {
        match self.tid.load(Ordering::Acquire) {
            0 => None,
            tid => Some(tid),
        }
    }
}

/// Clears the alive flag when the thread body exits, however it exits.
struct AliveGuard {
    entry: Arc<ThreadEntry>,
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.entry.alive.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct Inner {
    registry_id: u64,
    next_token: AtomicU64,
    entries: Mutex<HashMap<ThreadToken, Arc<ThreadEntry>>>,
}

/// Enumerates currently-live registered worker threads.
#[derive(Debug, Clone)]
pub struct ThreadRegistry {
    inner: Arc<Inner>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry_id: next_registry_id(),
                next_token: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn registry_id(&self) -> u64 {
        self.inner.registry_id
    }

    /// Register and spawn a worker thread.
    pub fn spawn<F, T>(&self, options: ThreadOptions, f: F) -> io::Result<std::thread::JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let token = ThreadToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(ThreadEntry {
            token,
            name: options.name.clone(),
            daemon: options.daemon,
            alive: AtomicBool::new(true),
            tid: AtomicU64::new(0),
        });
        self.inner.entries.lock().insert(token, entry.clone());
        trace!(target: "leakwatch", %token, name = %options.name, daemon = options.daemon, "thread registered");

        let result = std::thread::Builder::new().name(options.name).spawn({
            let entry = entry.clone();
            move || {
                entry
                    .tid
                    .store(current_os_tid().unwrap_or(0), Ordering::Release);
                let _alive = AliveGuard { entry };
                f()
            }
        });
        match result {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.inner.entries.lock().remove(&token);
                Err(err)
            }
        }
    }

    /// Capture the current live set. O(live-count); prunes finished entries.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<ThreadToken> {
        let mut entries = self.inner.entries.lock();
        entries.retain(|_, entry| entry.is_alive());
        Snapshot::new(
            self.inner.registry_id,
            entries.keys().copied().collect(),
            None,
        )
    }

    #[must_use]
    pub fn entry(&self, token: ThreadToken) -> Option<Arc<ThreadEntry>> {
        self.inner.entries.lock().get(&token).cloned()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn current_os_tid() -> Option<u64> {
    Some(unsafe { libc::gettid() } as u64)
}

#[cfg(not(target_os = "linux"))]
fn current_os_tid() -> Option<u64> {
    None
}

/// OS-level liveness probe. `None` when the platform offers no cheap answer;
/// callers then trust the alive flag alone.
#[cfg(target_os = "linux")]
pub(crate) fn os_thread_alive(tid: u64) -> Option<bool> {
    Some(std::path::Path::new(&format!("/proc/self/task/{tid}")).exists())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn os_thread_alive(_tid: u64) -> Option<bool> {
    None
}
