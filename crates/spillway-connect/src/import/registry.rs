//! Resource ownership registry
//!
//! Guarantees at most one active importer per [`ResourceId`] among all
//! workers sharing the registry. Claiming is a per-key compare-and-set on a
//! concurrent map, so racing claimants resolve to exactly one winner without a
//! global lock.
//!
//! The registry is injected (`Arc<ResourceRegistry>`) into every supervisor
//! that should deduplicate against the others.

use super::resource::ResourceId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of a worker that can own resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random id for workers that are not configured with one
    pub fn generate() -> Self {
        Self(format!("worker-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who owns a resource and since when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInfo {
    pub owner: WorkerId,
    /// Claim time in milliseconds since the epoch
    pub claimed_at: i64,
}

/// Shared table of resource claims
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    claims: DashMap<ResourceId, ClaimInfo>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `resource` for `worker` if nobody holds it.
    ///
    /// Returns `false` when the resource is already claimed, including by the
    /// same worker: a second instance for the same resource never starts.
    pub fn try_acquire(&self, resource: &ResourceId, worker: &WorkerId) -> bool {
        match self.claims.entry(resource.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    resource = %resource,
                    owner = %existing.get().owner,
                    contender = %worker,
                    "Resource already claimed"
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(ClaimInfo {
                    owner: worker.clone(),
                    claimed_at: chrono::Utc::now().timestamp_millis(),
                });
                tracing::debug!(resource = %resource, owner = %worker, "Resource claimed");
                true
            }
        }
    }

    /// Release a claim. Only the owning worker can release; returns whether a
    /// claim was removed.
    pub fn release(&self, resource: &ResourceId, worker: &WorkerId) -> bool {
        let removed = self
            .claims
            .remove_if(resource, |_, claim| &claim.owner == worker)
            .is_some();
        if removed {
            tracing::debug!(resource = %resource, owner = %worker, "Resource released");
        } else {
            tracing::warn!(
                resource = %resource,
                worker = %worker,
                "Release ignored: resource not owned by this worker"
            );
        }
        removed
    }

    /// Claim with a guard that releases on drop
    pub fn try_claim(
        self: &Arc<Self>,
        resource: &ResourceId,
        worker: &WorkerId,
    ) -> Option<ResourceClaim> {
        self.try_acquire(resource, worker).then(|| ResourceClaim {
            registry: Arc::clone(self),
            resource: resource.clone(),
            worker: worker.clone(),
        })
    }

    pub fn owner(&self, resource: &ResourceId) -> Option<WorkerId> {
        self.claims.get(resource).map(|c| c.owner.clone())
    }

    pub fn is_claimed(&self, resource: &ResourceId) -> bool {
        self.claims.contains_key(resource)
    }

    /// Snapshot of every claim
    pub fn claims(&self) -> Vec<(ResourceId, ClaimInfo)> {
        self.claims
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Resources currently held by `worker`
    pub fn owned_by(&self, worker: &WorkerId) -> Vec<ResourceId> {
        self.claims
            .iter()
            .filter(|e| &e.value().owner == worker)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Scoped ownership of one resource. Dropping it releases the claim.
#[derive(Debug)]
pub struct ResourceClaim {
    registry: Arc<ResourceRegistry>,
    resource: ResourceId,
    worker: WorkerId,
}

impl ResourceClaim {
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }
}

impl Drop for ResourceClaim {
    fn drop(&mut self) {
        self.registry.release(&self.resource, &self.worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_acquire_and_release() {
        let registry = ResourceRegistry::new();
        let r = rid("kafka://b/t/0");
        let a = WorkerId::from("a");
        let b = WorkerId::from("b");

        assert!(registry.try_acquire(&r, &a));
        assert!(!registry.try_acquire(&r, &b));
        assert!(!registry.try_acquire(&r, &a));
        assert_eq!(registry.owner(&r), Some(a.clone()));

        // only the owner may release
        assert!(!registry.release(&r, &b));
        assert!(registry.release(&r, &a));
        assert!(registry.try_acquire(&r, &b));
    }

    #[test]
    fn test_claim_guard_releases_on_drop() {
        let registry = Arc::new(ResourceRegistry::new());
        let r = rid("file:///tmp/in.csv");
        let w = WorkerId::from("w1");

        {
            let claim = registry.try_claim(&r, &w).unwrap();
            assert_eq!(claim.resource(), &r);
            assert!(registry.try_claim(&r, &WorkerId::from("w2")).is_none());
            assert_eq!(registry.len(), 1);
        }

        assert!(registry.is_empty());
        assert!(registry.try_claim(&r, &WorkerId::from("w2")).is_some());
    }

    #[test]
    fn test_owned_by() {
        let registry = ResourceRegistry::new();
        let w = WorkerId::from("w");
        registry.try_acquire(&rid("file:///a"), &w);
        registry.try_acquire(&rid("file:///b"), &w);
        registry.try_acquire(&rid("file:///c"), &WorkerId::from("other"));

        let mut owned = registry.owned_by(&w);
        owned.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(owned, vec![rid("file:///a"), rid("file:///b")]);
        assert_eq!(registry.claims().len(), 3);
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        let registry = Arc::new(ResourceRegistry::new());
        let r = rid("kafka://b/t/7");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                let r = r.clone();
                let worker = WorkerId::new(format!("w{}", i));
                std::thread::spawn(move || registry.try_acquire(&r, &worker))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_generated_worker_ids_differ() {
        assert_ne!(WorkerId::generate(), WorkerId::generate());
    }
}
