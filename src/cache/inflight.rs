//! Guards serialising multi-step work on one resource within a process.

use std::sync::Arc;

use dashmap::DashSet;

/// Set of resource identifiers with a claimed operation running in this
/// process.
///
/// Creates claim the subvolume's identifier before the existence check so
/// two retries of one Create never both issue the primitive. Restores of
/// one volume share a fixed temporary clone name, so they claim the volume
/// identifier for the whole procedure.
#[derive(Clone, Debug, Default)]
pub struct InFlight {
    resources: Arc<DashSet<String>>,
}

impl InFlight {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `resource_id`.
    ///
    /// Returns `None` when another operation already holds the claim. The
    /// test and the insert are a single set operation.
    #[must_use]
    pub fn try_begin(&self, resource_id: &str) -> Option<InFlightGuard> {
        if !self.resources.insert(resource_id.to_owned()) {
            return None;
        }
        Some(InFlightGuard {
            resources: Arc::clone(&self.resources),
            resource_id: resource_id.to_owned(),
        })
    }

    /// Returns `true` when `resource_id` is claimed.
    #[must_use]
    pub fn is_active(&self, resource_id: &str) -> bool {
        self.resources.contains(resource_id)
    }
}

/// Releases a claim on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    resources: Arc<DashSet<String>>,
    resource_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.resources.remove(&self.resource_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_refused_until_release() {
        let claims = InFlight::new();
        let guard = claims.try_begin("vol-1");
        assert!(guard.is_some());
        assert!(claims.try_begin("vol-1").is_none());
        assert!(claims.try_begin("vol-2").is_some());

        drop(guard);
        assert!(!claims.is_active("vol-1"));
        assert!(claims.try_begin("vol-1").is_some());
    }
}
