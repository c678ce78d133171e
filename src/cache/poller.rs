//! Cache of in-flight backend operations keyed by resource and kind.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::api::Poller;

/// Kind of asynchronous operation tracked by the cache.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// Subvolume creation, including clones and snapshots.
    Create,
    /// Subvolume deletion.
    Delete,
    /// Subvolume update (resize).
    Update,
    /// Re-creation of a volume from a snapshot.
    Restore,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Update => "update",
            Self::Restore => "restore",
        })
    }
}

/// Identity of a cached operation: resource identifier plus operation kind.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PollerKey {
    /// Resource identifier of the subvolume the operation acts on.
    pub id: String,
    /// Kind of operation.
    pub operation: Operation,
}

impl PollerKey {
    /// Builds a key.
    #[must_use]
    pub fn new(id: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            operation,
        }
    }
}

/// Shared map from [`PollerKey`] to the handle of the operation in flight.
///
/// At most one handle lives under a key. Entries are removed once the
/// watched operation reaches any terminal outcome; a wait that merely
/// timed out leaves its entry behind so the next call resumes it.
#[derive(Debug, Default)]
pub struct PollerCache {
    entries: DashMap<PollerKey, Poller>,
}

impl PollerCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `poller` under `key`, replacing any previous handle.
    pub fn put(&self, key: PollerKey, poller: Poller) {
        self.entries.insert(key, poller);
    }

    /// Stores `poller` unless a handle already lives under `key`, and
    /// returns whichever handle is now cached.
    ///
    /// The check and the insert happen under the same shard lock, so two
    /// racing callers always end up watching the same handle.
    pub fn get_or_insert(&self, key: PollerKey, poller: Poller) -> Poller {
        match self.entries.entry(key) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => slot.insert(poller).clone(),
        }
    }

    /// Returns the cached handle for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &PollerKey) -> Option<Poller> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Removes and returns the cached handle for `key`.
    pub fn remove(&self, key: &PollerKey) -> Option<Poller> {
        self.entries.remove(key).map(|(_, poller)| poller)
    }

    /// Returns `true` when a handle is cached under `key`.
    #[must_use]
    pub fn contains(&self, key: &PollerKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::{ApiError, BackendFuture, PollerResponse};

    struct Done(&'static str);

    impl PollerResponse for Done {
        fn result(&self) -> BackendFuture<'_, (), ApiError> {
            let label = self.0;
            Box::pin(async move {
                Err(ApiError::Provider {
                    message: label.to_owned(),
                })
            })
        }
    }

    fn poller(label: &'static str) -> Poller {
        Arc::new(Done(label))
    }

    #[test]
    fn keys_distinguish_operations() {
        let cache = PollerCache::new();
        cache.put(PollerKey::new("vol-1", Operation::Create), poller("create"));

        assert!(cache.contains(&PollerKey::new("vol-1", Operation::Create)));
        assert!(!cache.contains(&PollerKey::new("vol-1", Operation::Restore)));
        assert!(cache.get(&PollerKey::new("vol-2", Operation::Create)).is_none());
    }

    #[tokio::test]
    async fn get_or_insert_keeps_the_first_handle() {
        let cache = PollerCache::new();
        let key = PollerKey::new("vol-1", Operation::Create);

        let first = cache.get_or_insert(key.clone(), poller("first"));
        let second = cache.get_or_insert(key.clone(), poller("second"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            second.result().await,
            Err(ApiError::Provider {
                message: String::from("first")
            })
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_empties_the_slot() {
        let cache = PollerCache::new();
        let key = PollerKey::new("vol-1", Operation::Delete);
        cache.put(key.clone(), poller("delete"));

        assert!(cache.remove(&key).is_some());
        assert!(cache.remove(&key).is_none());
        assert!(cache.is_empty());
    }
}
