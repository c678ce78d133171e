//! Storage pool registry consulted when provisioning subvolumes.

use std::collections::BTreeSet;

/// A storage pool as far as the driver core is concerned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoragePool {
    /// Pool name as seen by the orchestrator.
    pub name: String,
    /// Full name of the parent volume new subvolumes are placed in.
    pub parent_volume: String,
    /// Size used when a request does not specify one.
    pub default_size_bytes: u64,
}

impl StoragePool {
    /// Creates a pool description, trimming string fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        parent_volume: impl Into<String>,
        default_size_bytes: u64,
    ) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            parent_volume: parent_volume.into().trim().to_owned(),
            default_size_bytes,
        }
    }
}

/// Read-only view of the pools the driver may provision into.
pub trait PoolRegistry: Send + Sync {
    /// Returns the distinct parent volume full names across all pools.
    fn parent_volumes(&self) -> Vec<String>;

    /// Looks up a pool by name.
    fn pool(&self, name: &str) -> Option<StoragePool>;
}

/// Pool registry backed by a fixed list of pools.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticPoolRegistry {
    pools: Vec<StoragePool>,
}

impl StaticPoolRegistry {
    /// Creates a registry from the given pools.
    #[must_use]
    pub const fn new(pools: Vec<StoragePool>) -> Self {
        Self { pools }
    }

    /// Returns all registered pools.
    #[must_use]
    pub fn pools(&self) -> &[StoragePool] {
        &self.pools
    }
}

impl PoolRegistry for StaticPoolRegistry {
    fn parent_volumes(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.pools
            .iter()
            .filter(|pool| seen.insert(pool.parent_volume.as_str()))
            .map(|pool| pool.parent_volume.clone())
            .collect()
    }

    fn pool(&self, name: &str) -> Option<StoragePool> {
        self.pools.iter().find(|pool| pool.name == name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_volumes_are_deduplicated_in_order() {
        let registry = StaticPoolRegistry::new(vec![
            StoragePool::new("gold", "rg/acct/pool/vol-a", 1),
            StoragePool::new("silver", "rg/acct/pool/vol-b", 1),
            StoragePool::new("bronze", "rg/acct/pool/vol-a", 1),
        ]);

        assert_eq!(
            registry.parent_volumes(),
            vec![
                String::from("rg/acct/pool/vol-a"),
                String::from("rg/acct/pool/vol-b")
            ]
        );
    }

    #[test]
    fn looks_up_pools_by_name() {
        let registry = StaticPoolRegistry::new(vec![StoragePool::new(
            " gold ",
            "rg/acct/pool/vol-a",
            42,
        )]);

        assert_eq!(
            registry.pool("gold").map(|pool| pool.default_size_bytes),
            Some(42)
        );
        assert!(registry.pool("platinum").is_none());
    }
}
