//! Log-sink collaborator interface.
//!
//! The embedding application supplies a [`LogSink`] to receive findings under
//! the `LogOnly` policy. [`TracingSink`] forwards to `tracing` and is the
//! sensible default for applications already using it; [`NullSink`] drops
//! everything after a one-time warning, which is what the guard falls back to
//! when `LogOnly` is configured without a sink.

use crate::policy::Severity;
use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Receives detector findings. Implementations must be cheap: `emit` is
/// called from the dispatch thread while the scope is closing.
pub trait LogSink: Send + Sync {
    fn emit(&self, severity: Severity, message: &str);
}

/// Forwards emissions to the `tracing` macros at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => debug!(target: "leakwatch", "{message}"),
            Severity::Info => info!(target: "leakwatch", "{message}"),
            Severity::Warn => warn!(target: "leakwatch", "{message}"),
            Severity::Error => error!(target: "leakwatch", "{message}"),
        }
    }
}

static MISSING_SINK_WARNED: OnceCell<()> = OnceCell::new();

/// Drops every emission. Warns once, the first time it is used, so a
/// `LogOnly` guard without a sink degrades loudly rather than silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _severity: Severity, _message: &str) {
        MISSING_SINK_WARNED.get_or_init(|| {
            warn!(
                target: "leakwatch",
                "log-only policy configured without a log sink; findings will be dropped"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_never_panics() {
        let sink = NullSink;
        sink.emit(Severity::Warn, "first");
        sink.emit(Severity::Error, "second");
    }

    #[test]
    fn sinks_are_object_safe() {
        let sinks: Vec<Box<dyn LogSink>> = vec![Box::new(TracingSink), Box::new(NullSink)];
        for sink in &sinks {
            sink.emit(Severity::Debug, "probe");
        }
    }
}
