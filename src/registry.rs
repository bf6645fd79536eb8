// Standing subscriptions to per-entity records, keyed by entity.
// One registry per owner; dropping it releases everything it still holds.

use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::models::EntityKind;
use crate::realtime::{paths, LiveStore, StoreError, SubscriptionHandle};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn user(id: &str) -> Self {
        EntityRef { kind: EntityKind::User, id: id.to_string() }
    }

    pub fn group(id: &str) -> Self {
        EntityRef { kind: EntityKind::Group, id: id.to_string() }
    }

    /// Backend path of the entity's own record.
    pub fn path(&self) -> String {
        match self.kind {
            EntityKind::User => paths::user(&self.id),
            EntityKind::Group => paths::group(&self.id),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntityKind::User => write!(f, "user {}", self.id),
            EntityKind::Group => write!(f, "group {}", self.id),
        }
    }
}

pub struct SubscriptionRegistry {
    store: Arc<dyn LiveStore>,
    by_entity: HashMap<EntityRef, SubscriptionHandle>,
    by_handle: HashMap<SubscriptionHandle, EntityRef>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn LiveStore>) -> Self {
        SubscriptionRegistry {
            store,
            by_entity: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }

    /// Subscribe to the entity's record unless a subscription already stands.
    /// Returns `true` when a new subscription was created.
    pub fn ensure(&mut self, entity: &EntityRef) -> Result<bool, StoreError> {
        if self.by_entity.contains_key(entity) {
            return Ok(false);
        }
        let handle = self.store.subscribe(&entity.path())?;
        debug!("Tracking {} with {}", entity, handle);
        self.by_entity.insert(entity.clone(), handle);
        self.by_handle.insert(handle, entity.clone());
        Ok(true)
    }

    /// Release the entity's subscription. Returns `false` if none was held.
    pub fn release(&mut self, entity: &EntityRef) -> bool {
        match self.by_entity.remove(entity) {
            Some(handle) => {
                self.by_handle.remove(&handle);
                self.store.release(handle);
                debug!("Stopped tracking {} ({})", entity, handle);
                true
            }
            None => false,
        }
    }

    /// Drop bookkeeping for a subscription the backend already cancelled.
    pub fn forget(&mut self, handle: SubscriptionHandle) -> Option<EntityRef> {
        let entity = self.by_handle.remove(&handle)?;
        self.by_entity.remove(&entity);
        warn!("Subscription {} for {} was cancelled by the backend", handle, entity);
        Some(entity)
    }

    pub fn resolve(&self, handle: SubscriptionHandle) -> Option<&EntityRef> {
        self.by_handle.get(&handle)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.by_entity.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// Release everything. Returns how many subscriptions were released.
    pub fn release_all(&mut self) -> usize {
        let count = self.by_handle.len();
        for (handle, _) in self.by_handle.drain() {
            self.store.release(handle);
        }
        self.by_entity.clear();
        if count > 0 {
            debug!("Released {} tracked subscriptions", count);
        }
        count
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::MemoryStore;

    #[test]
    fn test_ensure_is_idempotent() {
        let (store, _rx) = MemoryStore::new();
        let store = Arc::new(store);
        let mut registry = SubscriptionRegistry::new(store.clone());
        let alice = EntityRef::user("alice");
        assert!(registry.ensure(&alice).unwrap());
        assert!(!registry.ensure(&alice).unwrap());
        assert_eq!(store.active_subscriptions(), vec!["Users/alice".to_string()]);
    }

    #[test]
    fn test_release_and_drop() {
        let (store, _rx) = MemoryStore::new();
        let store = Arc::new(store);
        {
            let mut registry = SubscriptionRegistry::new(store.clone());
            registry.ensure(&EntityRef::user("alice")).unwrap();
            registry.ensure(&EntityRef::group("g1")).unwrap();
            assert!(registry.release(&EntityRef::user("alice")));
            assert!(!registry.release(&EntityRef::user("alice")));
        }
        assert!(store.active_subscriptions().is_empty());
        assert_eq!(store.release_log(), vec!["Users/alice".to_string(), "Groups/g1".to_string()]);
    }
}
