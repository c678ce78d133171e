//! Ledger of temporary subvolumes that still have to be deleted.

use dashmap::DashMap;

/// How a recorded deletion relates to the caller's snapshot context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Obligation {
    /// The deletion was recorded by a restore of the caller's snapshot.
    InContext,
    /// The deletion was recorded by a restore of a different snapshot.
    OtherContext(String),
}

/// Shared map from resource identifier to the snapshot whose restore
/// obliged its deletion.
///
/// An entry lives exactly while the deletion is outstanding; it is removed
/// only after that deletion succeeds.
#[derive(Debug, Default)]
pub struct PendingDeletions {
    entries: DashMap<String, String>,
}

impl PendingDeletions {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `resource_id` must be deleted to finish restoring
    /// `snapshot_id`.
    pub fn record(&self, resource_id: impl Into<String>, snapshot_id: impl Into<String>) {
        self.entries.insert(resource_id.into(), snapshot_id.into());
    }

    /// Returns the snapshot context recorded for `resource_id`.
    #[must_use]
    pub fn get(&self, resource_id: &str) -> Option<String> {
        self.entries
            .get(resource_id)
            .map(|entry| entry.value().clone())
    }

    /// Compares the recorded context for `resource_id` against
    /// `snapshot_id`.
    #[must_use]
    pub fn obligation(&self, resource_id: &str, snapshot_id: &str) -> Option<Obligation> {
        self.get(resource_id).map(|recorded| {
            if recorded == snapshot_id {
                Obligation::InContext
            } else {
                Obligation::OtherContext(recorded)
            }
        })
    }

    /// Clears the entry for `resource_id` once its deletion succeeded.
    pub fn remove(&self, resource_id: &str) -> Option<String> {
        self.entries.remove(resource_id).map(|(_, snapshot)| snapshot)
    }

    /// Returns the number of outstanding deletions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no deletion is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
