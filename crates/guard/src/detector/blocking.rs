//! Event-loop blocking detection.
//!
//! A dedicated sampler thread watches a heartbeat counter that a lightweight
//! task increments on the dispatcher. When the counter stops advancing past
//! the threshold while the sampler keeps waking, the dispatcher is stuck in a
//! synchronous call; the stall closes into a [`BlockingEvent`] when the
//! counter moves again or at shutdown. The counters are plain atomics and
//! closed stalls go into a shared buffer only the sampler writes, keeping the
//! instrumentation overhead well under the stalls it is meant to catch.
//!
//! Neither the sampler thread nor the heartbeat task registers in the
//! registries, so the leak detectors can never self-report the watchdog.

use crate::registry::TaskRegistry;
use leakwatch_core::{
    BlockingEvent, Error, ReactionPolicy, Result, DEFAULT_BLOCK_THRESHOLD, DEFAULT_CHECK_INTERVAL,
    DEFAULT_HEARTBEAT_INTERVAL, WATCHDOG_THREAD_NAME,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace, warn};

/// How stalls are reported when one scope produces several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockingGranularity {
    /// One event per maximal stall.
    #[default]
    PerStall,
    /// All stalls of the scope merged into a single event with the summed
    /// duration and the first stall's start and description.
    Aggregate,
}

/// Configuration for the blocking watchdog.
#[derive(Debug, Clone)]
pub struct BlockingConfig {
    pub enabled: bool,
    pub action: ReactionPolicy,
    /// Minimum stall length before an event is reported.
    pub threshold: Duration,
    /// How often the sampler thread wakes to compare counters.
    pub check_interval: Duration,
    pub granularity: BlockingGranularity,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action: ReactionPolicy::default(),
            threshold: DEFAULT_BLOCK_THRESHOLD,
            check_interval: DEFAULT_CHECK_INTERVAL,
            granularity: BlockingGranularity::default(),
        }
    }
}

struct RunningWatchdog {
    shutdown: Arc<AtomicBool>,
    heartbeat: tokio::task::JoinHandle<()>,
    /// Closed stalls land here as the sampler records them, so a stop on the
    /// cancellation path can still hand them back.
    events: Arc<Mutex<Vec<BlockingEvent>>>,
    sampler: Option<std::thread::JoinHandle<()>>,
}

/// Samples dispatcher progress for the duration of one guarded scope.
pub struct BlockingWatchdog {
    config: BlockingConfig,
    registry: TaskRegistry,
    running: Option<RunningWatchdog>,
}

impl BlockingWatchdog {
    pub fn new(registry: TaskRegistry, config: BlockingConfig) -> Self {
        Self {
            config,
            registry,
            running: None,
        }
    }

    /// Start the heartbeat task and the sampler thread.
    ///
    /// Fails with `RegistryUnavailable` when no tokio runtime is current and
    /// with `Watchdog` when the sampler thread cannot be spawned; callers
    /// treat both as "blocking detection skipped for this run".
    pub fn start(&mut self) -> Result<()> {
        if !self.config.enabled || self.running.is_some() {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::registry_unavailable("dispatcher", err.to_string()))?;

        let ticks = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let events = Arc::new(Mutex::new(Vec::new()));

        let heartbeat = {
            let ticks = Arc::clone(&ticks);
            let interval = DEFAULT_HEARTBEAT_INTERVAL.min(self.config.check_interval);
            // deliberately spawned outside the task registry
            handle.spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::Release);
                    tokio::time::sleep(interval).await;
                }
            })
        };

        let sampler = std::thread::Builder::new()
            .name(WATCHDOG_THREAD_NAME.to_string())
            .spawn({
                let ticks = Arc::clone(&ticks);
                let shutdown = Arc::clone(&shutdown);
                let events = Arc::clone(&events);
                let registry = self.registry.clone();
                let threshold = self.config.threshold;
                let check_interval = self.config.check_interval;
                move || sampler_loop(&ticks, &shutdown, &events, threshold, check_interval, &registry)
            })
            .map_err(|err| {
                heartbeat.abort();
                Error::watchdog(format!("failed to spawn sampler thread: {err}"))
            })?;

        trace!(target: "leakwatch", "blocking watchdog started");
        self.running = Some(RunningWatchdog {
            shutdown,
            heartbeat,
            events,
            sampler: Some(sampler),
        });
        Ok(())
    }

    /// Stop deterministically and collect the recorded events.
    pub async fn stop(&mut self) -> Result<Vec<BlockingEvent>> {
        let Some(mut running) = self.running.take() else {
            return Ok(Vec::new());
        };
        running.shutdown.store(true, Ordering::Release);
        running.heartbeat.abort();
        let sampler = running
            .sampler
            .take()
            .ok_or_else(|| Error::watchdog("sampler handle already taken"))?;
        tokio::task::spawn_blocking(move || sampler.join())
            .await
            .map_err(|err| Error::watchdog(format!("failed to join sampler thread: {err}")))?
            .map_err(|_| Error::watchdog("sampler thread panicked"))?;
        let events = std::mem::take(&mut *running.events.lock());
        debug!(target: "leakwatch", events = events.len(), "blocking watchdog stopped");
        Ok(self.apply_granularity(events))
    }

    /// Synchronous stop for cancellation paths. The sampler is signalled and
    /// joined inline, which blocks for at most one check interval; a stall
    /// still open at that point is closed and returned with the rest.
    pub fn stop_now(&mut self) -> Vec<BlockingEvent> {
        let Some(mut running) = self.running.take() else {
            return Vec::new();
        };
        running.shutdown.store(true, Ordering::Release);
        running.heartbeat.abort();
        if let Some(sampler) = running.sampler.take() {
            if sampler.join().is_err() {
                warn!(target: "leakwatch", "sampler thread panicked during cancellation");
            }
        }
        let events = std::mem::take(&mut *running.events.lock());
        self.apply_granularity(events)
    }

    fn apply_granularity(&self, events: Vec<BlockingEvent>) -> Vec<BlockingEvent> {
        match self.config.granularity {
            BlockingGranularity::PerStall => events,
            BlockingGranularity::Aggregate => aggregate(events),
        }
    }
}

impl Drop for BlockingWatchdog {
    fn drop(&mut self) {
        let _ = self.stop_now();
    }
}

impl std::fmt::Debug for BlockingWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingWatchdog")
            .field("config", &self.config)
            .field("running", &self.running.is_some())
            .finish()
    }
}

fn sampler_loop(
    ticks: &AtomicU64,
    shutdown: &AtomicBool,
    events: &Mutex<Vec<BlockingEvent>>,
    threshold: Duration,
    check_interval: Duration,
    registry: &TaskRegistry,
) {
    // the sampler's own monotonically increasing heartbeat; a stall is only
    // opened once this has advanced past the last dispatcher advance, which
    // rules out reports from a sampler that never got to run
    let mut samples: u64 = 0;
    let mut samples_at_advance: u64 = 0;
    let mut last_tick = ticks.load(Ordering::Acquire);
    let mut last_advance = Instant::now();
    let mut last_advance_wall = SystemTime::now();
    let mut stall_open = false;
    let mut stall_description: Option<String> = None;

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        std::thread::sleep(check_interval);
        samples += 1;
        let now = Instant::now();
        let tick = ticks.load(Ordering::Acquire);
        if tick != last_tick {
            if stall_open {
                events.lock().push(BlockingEvent {
                    started_at: last_advance_wall,
                    duration: now.saturating_duration_since(last_advance),
                    description: stall_description.take(),
                });
                stall_open = false;
            }
            last_tick = tick;
            last_advance = now;
            last_advance_wall = SystemTime::now();
            samples_at_advance = samples;
        } else if !stall_open
            && samples > samples_at_advance
            && now.saturating_duration_since(last_advance) >= threshold
        {
            stall_open = true;
            stall_description = registry.running_label();
        }
    }

    // the dispatcher may have been stalled right up to shutdown, or the tick
    // may have just advanced without a closing sample in between
    let now = Instant::now();
    if stall_open || ticks.load(Ordering::Acquire) == last_tick {
        let stalled = now.saturating_duration_since(last_advance);
        if stalled >= threshold {
            events.lock().push(BlockingEvent {
                started_at: last_advance_wall,
                duration: stalled,
                description: stall_description.take(),
            });
        }
    }
}

fn aggregate(events: Vec<BlockingEvent>) -> Vec<BlockingEvent> {
    let mut iter = events.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let merged = iter.fold(first, |mut acc, event| {
        acc.duration += event.duration;
        acc
    });
    vec![merged]
}
