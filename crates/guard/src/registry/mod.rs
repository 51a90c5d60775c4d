//! Snapshot registries for live tasks and threads.
//!
//! The host runtime exposes no enumeration API, so enumeration is
//! instrumented: work registers itself on the way in and the registries
//! observe identity and liveness, never owning the lifecycle. Snapshots are
//! cheap immutable id sets and only diff against snapshots from the same
//! registry instance.

pub mod tasks;
pub mod threads;

pub use tasks::{Instrumented, TaskEntry, TaskRegistry};
pub use threads::{ThreadEntry, ThreadOptions, ThreadRegistry};

use leakwatch_core::{Error, Result};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_registry_id() -> u64 {
    NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Immutable set of identities captured from one registry at one instant.
#[derive(Debug, Clone)]
pub struct Snapshot<I> {
    registry_id: u64,
    ids: HashSet<I>,
    /// Identity of the registered task the snapshot was taken from, when
    /// known. Excluded from diffs so a scope never reports its own host.
    taken_by: Option<I>,
}

impl<I: Copy + Eq + Hash + Ord> Snapshot<I> {
    pub(crate) fn new(registry_id: u64, ids: HashSet<I>, taken_by: Option<I>) -> Self {
        Self {
            registry_id,
            ids,
            taken_by,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &I) -> bool {
        self.ids.contains(id)
    }

    /// Identities present here but absent from `earlier`, in stable order.
    ///
    /// The host identities recorded on either snapshot are excluded. Fails
    /// with [`Error::SnapshotMismatch`] when the snapshots come from
    /// different registry instances.
    pub fn diff(&self, earlier: &Snapshot<I>) -> Result<Vec<I>> {
        if self.registry_id != earlier.registry_id {
            return Err(Error::SnapshotMismatch {
                expected: earlier.registry_id,
                actual: self.registry_id,
            });
        }
        let mut survivors: Vec<I> = self
            .ids
            .iter()
            .filter(|id| !earlier.ids.contains(id))
            .filter(|id| Some(**id) != self.taken_by && Some(**id) != earlier.taken_by)
            .copied()
            .collect();
        survivors.sort_unstable();
        Ok(survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(registry: u64, ids: &[u64], taken_by: Option<u64>) -> Snapshot<u64> {
        Snapshot::new(registry, ids.iter().copied().collect(), taken_by)
    }

    #[test]
    fn diff_reports_new_ids_only() {
        let before = snapshot(1, &[1, 2], None);
        let after = snapshot(1, &[1, 2, 3, 4], None);
        assert_eq!(after.diff(&before).unwrap(), vec![3, 4]);
    }

    #[test]
    fn diff_excludes_host_identity() {
        let before = snapshot(1, &[1], Some(9));
        let after = snapshot(1, &[1, 9, 10], Some(9));
        assert_eq!(after.diff(&before).unwrap(), vec![10]);
    }

    #[test]
    fn diff_rejects_foreign_registry() {
        let before = snapshot(1, &[], None);
        let after = snapshot(2, &[1], None);
        match after.diff(&before) {
            Err(Error::SnapshotMismatch { expected, actual }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected snapshot mismatch, got {other:?}"),
        }
    }
}
