//! Reaction policy and log severity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the scope guard does with a detector finding.
///
/// The policy governs surfacing only; it never changes what the detectors
/// measure. Each detector carries its own policy, applied independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionPolicy {
    /// Findings are computed and discarded.
    Ignore,
    /// Findings are emitted to the configured log sink; the guarded work's
    /// own result is unaffected.
    #[default]
    LogOnly,
    /// The first finding becomes an error for the guarded scope's caller.
    Raise,
}

impl fmt::Display for ReactionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::LogOnly => write!(f, "log-only"),
            Self::Raise => write!(f, "raise"),
        }
    }
}

/// Severity scale for sink emissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}
