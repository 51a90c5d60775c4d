//! The three detectors composed by the scope guard.

pub mod blocking;
pub mod task_leak;
pub mod thread_leak;

pub use blocking::{BlockingConfig, BlockingGranularity, BlockingWatchdog};
pub use task_leak::{TaskLeakConfig, TaskLeakDetector};
pub use thread_leak::{ThreadLeakConfig, ThreadLeakDetector};

/// Restricts a leak detector to labels/names of interest.
#[derive(Debug, Clone)]
pub enum NameFilter {
    /// Match the label exactly.
    Exact(String),
    /// Match the label against a regular expression.
    Matches(regex::Regex),
}

impl NameFilter {
    pub fn exact(name: impl Into<String>) -> Self {
        Self::Exact(name.into())
    }

    /// Build a regex filter. Invalid patterns are surfaced to the caller
    /// instead of being compiled lazily inside a guarded scope.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches(regex::Regex::new(pattern)?))
    }

    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == name,
            Self::Matches(re) => re.is_match(name),
        }
    }
}
