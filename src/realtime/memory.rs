// In-memory realtime database
// Keeps the whole tree as one JSON value and fans every change out to the
// subscriptions whose path overlaps the written path.

use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::paths;
use super::{Delivery, LiveStore, SnapshotEvent, StoreError, SubscriptionHandle, WriteBatch};

pub struct MemoryStore {
    inner: Mutex<Inner>,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Inner {
    root: Map<String, Value>,
    subscriptions: BTreeMap<SubscriptionHandle, Vec<String>>,
    next_handle: u64,
    last_key_ms: i64,
    key_seq: u64,
    offline: bool,
    release_log: Vec<String>,
    // Bumped by every applied write
    revision: u64,
}

impl MemoryStore {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        Self::with_tree(Value::Object(Map::new()))
    }

    /// Start from an existing tree, e.g. one saved by [`MemoryStore::tree`].
    /// Anything that is not a JSON object starts an empty tree.
    pub fn with_tree(tree: Value) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let root = match normalize(tree) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let store = MemoryStore {
            inner: Mutex::new(Inner {
                root,
                subscriptions: BTreeMap::new(),
                next_handle: 1,
                last_key_ms: 0,
                key_seq: 0,
                offline: false,
                release_log: Vec::new(),
                revision: 0,
            }),
            tx,
        };
        (store, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the whole tree.
    pub fn tree(&self) -> Value {
        Value::Object(self.lock().root.clone())
    }

    /// Number of writes applied so far. Owners persisting the tree compare it
    /// against the revision they last saved.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// While offline every write fails with [`StoreError::Unavailable`].
    /// Reads and subscriptions keep working from the local tree.
    pub fn set_offline(&self, offline: bool) {
        info!("Memory store offline mode: {}", offline);
        self.lock().offline = offline;
    }

    /// Paths of the subscriptions that are currently standing.
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.lock()
            .subscriptions
            .values()
            .map(|segs| segs.join("/"))
            .collect()
    }

    /// Paths of every subscription released so far, in release order.
    pub fn release_log(&self) -> Vec<String> {
        self.lock().release_log.clone()
    }

    /// Cancel every subscription under `path`, the way the backend does when
    /// read access is revoked.
    pub fn cancel(&self, path: &str, reason: &str) -> Result<(), StoreError> {
        let target = paths::segments(path)?;
        let mut inner = self.lock();
        let cancelled: Vec<(SubscriptionHandle, Vec<String>)> = inner
            .subscriptions
            .iter()
            .filter(|(_, segs)| segs.starts_with(&target))
            .map(|(handle, segs)| (*handle, segs.clone()))
            .collect();
        for (handle, segs) in cancelled {
            inner.subscriptions.remove(&handle);
            warn!("Cancelling {} at {}: {}", handle, segs.join("/"), reason);
            self.send(Delivery {
                handle,
                path: segs.join("/"),
                event: SnapshotEvent::Cancelled(reason.to_string()),
            });
        }
        Ok(())
    }

    fn send(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            debug!("Delivery receiver dropped, snapshot discarded");
        }
    }
}

impl LiveStore for MemoryStore {
    fn subscribe(&self, path: &str) -> Result<SubscriptionHandle, StoreError> {
        let segs = paths::segments(path)?;
        let mut inner = self.lock();
        let handle = SubscriptionHandle(inner.next_handle);
        inner.next_handle += 1;
        let current = lookup(&inner.root, &segs).cloned();
        inner.subscriptions.insert(handle, segs.clone());
        debug!("Subscribed {} to {}", handle, path);
        self.send(Delivery {
            handle,
            path: segs.join("/"),
            event: SnapshotEvent::Value(current),
        });
        Ok(handle)
    }

    fn subscribe_once(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segs = paths::segments(path)?;
        Ok(lookup(&self.lock().root, &segs).cloned())
    }

    fn release(&self, handle: SubscriptionHandle) {
        let mut inner = self.lock();
        match inner.subscriptions.remove(&handle) {
            Some(segs) => {
                let path = segs.join("/");
                debug!("Released {} at {}", handle, path);
                inner.release_log.push(path);
            }
            None => warn!("Release of unknown or cancelled subscription {}", handle),
        }
    }

    fn write_many(&self, updates: WriteBatch) -> Result<(), StoreError> {
        let mut parsed = Vec::with_capacity(updates.len());
        for (path, value) in updates {
            parsed.push((paths::segments(&path)?, value.and_then(normalize)));
        }

        let mut inner = self.lock();
        if inner.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        for (segs, value) in &parsed {
            assign(&mut inner.root, segs, value.clone());
        }
        inner.revision += 1;

        // Every affected subscription gets exactly one fresh snapshot
        let deliveries: Vec<Delivery> = inner
            .subscriptions
            .iter()
            .filter(|(_, sub)| parsed.iter().any(|(segs, _)| paths::overlaps(sub, segs)))
            .map(|(handle, sub)| Delivery {
                handle: *handle,
                path: sub.join("/"),
                event: SnapshotEvent::Value(lookup(&inner.root, sub).cloned()),
            })
            .collect();
        debug!("Applied {} updates, notifying {} subscriptions", parsed.len(), deliveries.len());
        for delivery in deliveries {
            self.send(delivery);
        }
        Ok(())
    }

    fn push_key(&self) -> String {
        let mut inner = self.lock();
        let now = chrono::Utc::now().timestamp_millis();
        if now > inner.last_key_ms {
            inner.last_key_ms = now;
            inner.key_seq = 0;
        } else {
            inner.key_seq += 1;
        }
        format!("-{:013}{:06}", inner.last_key_ms, inner.key_seq)
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, segs: &[String]) -> Option<&'a Value> {
    let (first, rest) = segs.split_first()?;
    let mut node = root.get(first)?;
    for seg in rest {
        node = node.as_object()?.get(seg)?;
    }
    Some(node)
}

// Write `value` at `segs`, or delete there when `value` is `None`.
// Parents emptied by a delete are pruned, like the hosted database does.
fn assign(node: &mut Map<String, Value>, segs: &[String], value: Option<Value>) {
    let Some((head, rest)) = segs.split_first() else {
        return;
    };
    if rest.is_empty() {
        match value {
            Some(v) => {
                node.insert(head.clone(), v);
            }
            None => {
                node.remove(head);
            }
        }
        return;
    }
    match value {
        Some(v) => {
            let child = node
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                assign(map, rest, Some(v));
            }
        }
        None => {
            let mut emptied = false;
            if let Some(Value::Object(map)) = node.get_mut(head) {
                assign(map, rest, None);
                emptied = map.is_empty();
            }
            if emptied {
                node.remove(head);
            }
        }
    }
}

// Nulls and empty objects are never stored
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(d) = rx.try_recv() {
            out.push(d);
        }
        out
    }

    #[test]
    fn test_subscribe_delivers_current_value() {
        let (store, mut rx) = MemoryStore::with_tree(json!({"Users": {"u1": {"uid": "u1"}}}));
        let handle = store.subscribe("Users/u1").unwrap();
        let deliveries = drain(&mut rx);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].handle, handle);
        assert_eq!(deliveries[0].event, SnapshotEvent::Value(Some(json!({"uid": "u1"}))));
    }

    #[test]
    fn test_absent_path_delivers_none() {
        let (store, mut rx) = MemoryStore::new();
        store.subscribe("Groups/g1").unwrap();
        assert_eq!(drain(&mut rx)[0].event, SnapshotEvent::Value(None));
    }

    #[test]
    fn test_write_notifies_ancestors_and_descendants_only() {
        let (store, mut rx) = MemoryStore::new();
        let parent = store.subscribe("Users/u1").unwrap();
        let child = store.subscribe("Users/u1/friends/u2").unwrap();
        let other = store.subscribe("Users/u2").unwrap();
        drain(&mut rx);

        store.write("Users/u1/friends", Some(json!({"u2": true}))).unwrap();
        let handles: Vec<_> = drain(&mut rx).into_iter().map(|d| d.handle).collect();
        assert!(handles.contains(&parent));
        assert!(handles.contains(&child));
        assert!(!handles.contains(&other));
    }

    #[test]
    fn test_delete_prunes_empty_parents() {
        let (store, _rx) = MemoryStore::with_tree(json!({"Users": {"u1": {"friends": {"u2": true}}}}));
        store.write("Users/u1/friends/u2", None).unwrap();
        assert_eq!(store.tree(), json!({}));
    }

    #[test]
    fn test_null_values_are_not_stored() {
        let (store, _rx) = MemoryStore::new();
        store
            .write("Users/u1", Some(json!({"uid": "u1", "email": null, "groups": {}})))
            .unwrap();
        assert_eq!(store.subscribe_once("Users/u1").unwrap(), Some(json!({"uid": "u1"})));
    }

    #[test]
    fn test_write_many_is_one_notification_per_subscription() {
        let (store, mut rx) = MemoryStore::new();
        store.subscribe("Users/u1").unwrap();
        drain(&mut rx);
        let mut batch = WriteBatch::new();
        batch.insert("Users/u1/friends/u2".to_string(), Some(json!(true)));
        batch.insert("Users/u1/friends/u3".to_string(), Some(json!(true)));
        store.write_many(batch).unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_offline_writes_fail_and_change_nothing() {
        let (store, _rx) = MemoryStore::new();
        store.set_offline(true);
        let result = store.write("Users/u1/fullName", Some(json!("Ann")));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.tree(), json!({}));
    }

    #[test]
    fn test_revision_counts_applied_writes() {
        let (store, _rx) = MemoryStore::new();
        assert_eq!(store.revision(), 0);
        store.write("Users/u1/fullName", Some(json!("Ann"))).unwrap();
        store.write("Users/u1/fullName", None).unwrap();
        assert_eq!(store.revision(), 2);

        store.set_offline(true);
        assert!(store.write("Users/u1/fullName", Some(json!("Bo"))).is_err());
        assert_eq!(store.revision(), 2);
        store.subscribe_once("Users/u1").unwrap();
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_released_subscription_stops_receiving() {
        let (store, mut rx) = MemoryStore::new();
        let handle = store.subscribe("Users/u1").unwrap();
        drain(&mut rx);
        store.release(handle);
        store.write("Users/u1/fullName", Some(json!("Ann"))).unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(store.release_log(), vec!["Users/u1".to_string()]);
        assert!(store.active_subscriptions().is_empty());
    }

    #[test]
    fn test_cancel_delivers_cancelled_event() {
        let (store, mut rx) = MemoryStore::new();
        let handle = store.subscribe("Groups/g1").unwrap();
        drain(&mut rx);
        store.cancel("Groups", "permission denied").unwrap();
        let deliveries = drain(&mut rx);
        assert_eq!(deliveries[0].handle, handle);
        assert!(matches!(deliveries[0].event, SnapshotEvent::Cancelled(_)));
        assert!(store.active_subscriptions().is_empty());
    }

    #[test]
    fn test_push_keys_sort_in_creation_order() {
        let (store, _rx) = MemoryStore::new();
        let keys: Vec<String> = (0..50).map(|_| store.push_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
