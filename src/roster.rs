// Dashboard roster reconciliation
// Folds the own friend-id set, the own group-id set and one live record per
// tracked entity into a single ordered, de-duplicated list.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::ChatError;
use crate::models::{EntityKind, Group, RosterEntry, User};
use crate::realtime::{paths, Delivery, LiveStore, SnapshotEvent, SubscriptionHandle};
use crate::registry::{EntityRef, SubscriptionRegistry};

/// Keys of an id-set node such as `Users/{uid}/friends`. A missing node is
/// the empty set; anything but an object is malformed.
pub fn parse_id_set(value: Option<&Value>) -> Option<BTreeSet<String>> {
    match value {
        None => Some(BTreeSet::new()),
        Some(Value::Object(map)) => Some(map.keys().cloned().collect()),
        Some(_) => None,
    }
}

/// Ordered dashboard model.
///
/// Groups come first, most recently changed on top. Users follow in the
/// order their first snapshot arrived and keep their slot on update. There
/// is never more than one row per entity.
pub struct RosterReconciler {
    store: Arc<dyn LiveStore>,
    local_uid: String,
    registry: SubscriptionRegistry,
    friend_ids: BTreeSet<String>,
    group_ids: BTreeSet<String>,
    groups: Vec<Group>,
    users: Vec<User>,
    friends_sub: Option<SubscriptionHandle>,
    groups_sub: Option<SubscriptionHandle>,
}

impl RosterReconciler {
    pub fn new(store: Arc<dyn LiveStore>, local_uid: &str) -> Result<Self, ChatError> {
        if local_uid.is_empty() {
            return Err(ChatError::MissingIdentity);
        }
        Ok(RosterReconciler {
            registry: SubscriptionRegistry::new(store.clone()),
            store,
            local_uid: local_uid.to_string(),
            friend_ids: BTreeSet::new(),
            group_ids: BTreeSet::new(),
            groups: Vec::new(),
            users: Vec::new(),
            friends_sub: None,
            groups_sub: None,
        })
    }

    /// Subscribe to the own friend and group lists. Calling it twice is a no-op.
    pub fn start(&mut self) -> Result<(), ChatError> {
        if self.friends_sub.is_none() {
            self.friends_sub = Some(self.store.subscribe(&paths::friends(&self.local_uid))?);
        }
        if self.groups_sub.is_none() {
            self.groups_sub = Some(self.store.subscribe(&paths::user_groups(&self.local_uid))?);
        }
        info!("Roster started for {}", self.local_uid);
        Ok(())
    }

    /// Release every subscription this roster holds and clear the view.
    pub fn close(&mut self) {
        for handle in [self.friends_sub.take(), self.groups_sub.take()].into_iter().flatten() {
            self.store.release(handle);
        }
        let released = self.registry.release_all();
        self.friend_ids.clear();
        self.group_ids.clear();
        self.groups.clear();
        self.users.clear();
        debug!("Roster closed, released {} entity subscriptions", released);
    }

    pub fn apply_friend_ids(&mut self, ids: BTreeSet<String>) {
        self.apply_id_set(EntityKind::User, ids);
    }

    pub fn apply_group_ids(&mut self, ids: BTreeSet<String>) {
        self.apply_id_set(EntityKind::Group, ids);
    }

    fn apply_id_set(&mut self, kind: EntityKind, ids: BTreeSet<String>) {
        let current = match kind {
            EntityKind::User => &mut self.friend_ids,
            EntityKind::Group => &mut self.group_ids,
        };
        let removed: Vec<String> = current.difference(&ids).cloned().collect();
        *current = ids.clone();

        for id in removed {
            let entity = EntityRef { kind, id };
            self.registry.release(&entity);
            self.evict(&entity);
        }
        // Also retries ids whose subscription failed or was cancelled earlier
        for id in ids {
            let entity = EntityRef { kind, id };
            if let Err(e) = self.registry.ensure(&entity) {
                warn!("Could not subscribe to {}: {}", entity, e);
            }
        }
    }

    /// Insert or replace the row of a tracked entity. Returns whether the
    /// view changed. Snapshots for entities that are no longer tracked are
    /// late deliveries and are ignored.
    pub fn apply_entity_snapshot(&mut self, entry: RosterEntry) -> bool {
        let entity = EntityRef { kind: entry.kind(), id: entry.id().to_string() };
        if !self.is_tracked(&entity) {
            debug!("Ignoring snapshot for untracked {}", entity);
            return false;
        }
        match entry {
            RosterEntry::Group(group) => {
                if let Some(pos) = self.groups.iter().position(|g| g.id == group.id) {
                    if self.groups[pos] == group {
                        return false;
                    }
                    self.groups.remove(pos);
                }
                self.groups.insert(0, group);
            }
            RosterEntry::User(user) => match self.users.iter().position(|u| u.id == user.id) {
                Some(pos) if self.users[pos] == user => return false,
                Some(pos) => self.users[pos] = user,
                None => self.users.push(user),
            },
        }
        true
    }

    /// Apply a raw record delivered for `entity`. An absent record evicts the
    /// row; a record that does not parse is dropped.
    pub fn apply_snapshot_value(&mut self, entity: &EntityRef, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return self.evict(entity);
        };
        let entry = match entity.kind {
            EntityKind::User => User::from_snapshot(value).map(RosterEntry::User),
            EntityKind::Group => Group::from_snapshot(value).map(RosterEntry::Group),
        };
        match entry {
            Some(entry) if entry.id() == entity.id => self.apply_entity_snapshot(entry),
            _ => {
                warn!("Dropping malformed snapshot for {}", entity);
                false
            }
        }
    }

    /// Route a delivery. Returns `false` if it belongs to someone else.
    pub fn handle_delivery(&mut self, delivery: &Delivery) -> bool {
        let handle = delivery.handle;
        if self.friends_sub == Some(handle) || self.groups_sub == Some(handle) {
            let kind = if self.friends_sub == Some(handle) {
                EntityKind::User
            } else {
                EntityKind::Group
            };
            match &delivery.event {
                SnapshotEvent::Value(value) => match parse_id_set(value.as_ref()) {
                    Some(ids) => self.apply_id_set(kind, ids),
                    None => warn!("Dropping malformed id list at {}", delivery.path),
                },
                SnapshotEvent::Cancelled(reason) => {
                    warn!("Id list subscription at {} cancelled: {}", delivery.path, reason);
                    match kind {
                        EntityKind::User => self.friends_sub = None,
                        EntityKind::Group => self.groups_sub = None,
                    }
                }
            }
            return true;
        }

        let Some(entity) = self.registry.resolve(handle).cloned() else {
            return false;
        };
        match &delivery.event {
            SnapshotEvent::Value(value) => {
                self.apply_snapshot_value(&entity, value.as_ref());
            }
            SnapshotEvent::Cancelled(_) => {
                self.registry.forget(handle);
            }
        }
        true
    }

    fn is_tracked(&self, entity: &EntityRef) -> bool {
        match entity.kind {
            EntityKind::User => self.friend_ids.contains(&entity.id),
            EntityKind::Group => self.group_ids.contains(&entity.id),
        }
    }

    fn evict(&mut self, entity: &EntityRef) -> bool {
        let before = self.groups.len() + self.users.len();
        match entity.kind {
            EntityKind::User => self.users.retain(|u| u.id != entity.id),
            EntityKind::Group => self.groups.retain(|g| g.id != entity.id),
        }
        before != self.groups.len() + self.users.len()
    }

    pub fn current_view(&self) -> Vec<RosterEntry> {
        self.groups
            .iter()
            .cloned()
            .map(RosterEntry::Group)
            .chain(self.users.iter().cloned().map(RosterEntry::User))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len() + self.users.len()
    }

    /// Empty-state flag of the dashboard.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of per-entity subscriptions currently standing.
    pub fn tracked_subscriptions(&self) -> usize {
        self.registry.len()
    }

    pub fn local_uid(&self) -> &str {
        &self.local_uid
    }
}

impl Drop for RosterReconciler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatColor;
    use crate::realtime::MemoryStore;
    use serde_json::json;
    use std::collections::HashSet;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            display_name: name.to_string(),
            email: format!("{}@example.com", id),
            short_id: id.to_uppercase().chars().take(5).collect(),
            avatar_image: String::new(),
            chat_color: ChatColor::White,
        }
    }

    fn group(id: &str, name: &str) -> Group {
        Group {
            id: id.to_string(),
            name: name.to_string(),
            members: ids(&["me", "alice"]),
            admin_id: "me".to_string(),
            avatar_image: String::new(),
            chat_color: ChatColor::Blue,
        }
    }

    fn roster() -> (Arc<MemoryStore>, RosterReconciler) {
        let (store, _rx) = MemoryStore::new();
        let store = Arc::new(store);
        let roster = RosterReconciler::new(store.clone(), "me").unwrap();
        (store, roster)
    }

    fn view_ids(roster: &RosterReconciler) -> Vec<String> {
        roster.current_view().iter().map(|e| e.id().to_string()).collect()
    }

    #[test]
    fn test_requires_local_identity() {
        let (store, _rx) = MemoryStore::new();
        assert!(matches!(
            RosterReconciler::new(Arc::new(store), ""),
            Err(ChatError::MissingIdentity)
        ));
    }

    #[test]
    fn test_no_placeholder_before_first_snapshot() {
        let (_store, mut roster) = roster();
        roster.apply_friend_ids(ids(&["alice"]));
        assert!(roster.is_empty());
        assert_eq!(roster.tracked_subscriptions(), 1);
    }

    #[test]
    fn test_groups_before_users_and_newest_group_first() {
        let (_store, mut roster) = roster();
        roster.apply_friend_ids(ids(&["alice", "bob"]));
        roster.apply_group_ids(ids(&["g1", "g2"]));

        roster.apply_entity_snapshot(RosterEntry::User(user("bob", "Bob")));
        roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "One")));
        roster.apply_entity_snapshot(RosterEntry::User(user("alice", "Alice")));
        roster.apply_entity_snapshot(RosterEntry::Group(group("g2", "Two")));

        assert_eq!(view_ids(&roster), vec!["g2", "g1", "bob", "alice"]);

        // A changed group moves back to the top
        roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "One renamed")));
        assert_eq!(view_ids(&roster), vec!["g1", "g2", "bob", "alice"]);
    }

    #[test]
    fn test_user_update_keeps_position() {
        let (_store, mut roster) = roster();
        roster.apply_friend_ids(ids(&["alice", "bob"]));
        roster.apply_entity_snapshot(RosterEntry::User(user("alice", "Alice")));
        roster.apply_entity_snapshot(RosterEntry::User(user("bob", "Bob")));
        assert!(roster.apply_entity_snapshot(RosterEntry::User(user("alice", "Alice B."))));
        assert_eq!(view_ids(&roster), vec!["alice", "bob"]);
        assert_eq!(roster.current_view()[0].title(), "Alice B.");
    }

    #[test]
    fn test_identical_snapshot_is_noop() {
        let (_store, mut roster) = roster();
        roster.apply_group_ids(ids(&["g1", "g2"]));
        roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "One")));
        roster.apply_entity_snapshot(RosterEntry::Group(group("g2", "Two")));
        assert!(!roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "One"))));
        assert_eq!(view_ids(&roster), vec!["g2", "g1"]);
    }

    #[test]
    fn test_removed_id_is_evicted_without_reordering() {
        let (store, mut roster) = roster();
        roster.apply_friend_ids(ids(&["alice", "bob", "carol"]));
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
            roster.apply_entity_snapshot(RosterEntry::User(user(id, name)));
        }
        roster.apply_friend_ids(ids(&["alice", "carol"]));
        assert_eq!(view_ids(&roster), vec!["alice", "carol"]);
        assert_eq!(store.release_log(), vec!["Users/bob".to_string()]);

        // A late snapshot for bob does not resurrect him
        assert!(!roster.apply_entity_snapshot(RosterEntry::User(user("bob", "Bob"))));
        assert_eq!(view_ids(&roster), vec!["alice", "carol"]);
    }

    #[test]
    fn test_malformed_snapshot_keeps_existing_entry() {
        let (_store, mut roster) = roster();
        let alice = EntityRef::user("alice");
        roster.apply_friend_ids(ids(&["alice"]));
        roster.apply_snapshot_value(&alice, Some(&json!({"uid": "alice", "fullName": "Alice"})));
        assert!(!roster.apply_snapshot_value(&alice, Some(&json!({"fullName": "No id"}))));
        assert!(!roster.apply_snapshot_value(&alice, Some(&json!("garbage"))));
        assert!(!roster.apply_snapshot_value(&alice, Some(&json!({"uid": "mallory"}))));
        assert_eq!(roster.current_view()[0].title(), "Alice");

        let g1 = EntityRef::group("g1");
        roster.apply_group_ids(ids(&["g1"]));
        // Admin outside the member set
        roster.apply_snapshot_value(
            &g1,
            Some(&json!({"groupId": "g1", "members": {"alice": true}, "adminId": "me"})),
        );
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_absent_record_evicts_row() {
        let (_store, mut roster) = roster();
        let g1 = EntityRef::group("g1");
        roster.apply_group_ids(ids(&["g1"]));
        roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "One")));
        assert!(roster.apply_snapshot_value(&g1, None));
        assert!(roster.is_empty());
        assert_eq!(roster.tracked_subscriptions(), 1);
    }

    fn assert_consistent(roster: &RosterReconciler) {
        let view = roster.current_view();
        let unique: HashSet<(EntityKind, String)> =
            view.iter().map(|e| (e.kind(), e.id().to_string())).collect();
        assert_eq!(unique.len(), view.len(), "duplicate rows in {:?}", view);
        let first_user = view.iter().position(|e| e.kind() == EntityKind::User);
        let last_group = view.iter().rposition(|e| e.kind() == EntityKind::Group);
        if let (Some(u), Some(g)) = (first_user, last_group) {
            assert!(g < u, "groups must precede users");
        }
        assert_eq!(roster.is_empty(), view.is_empty());
    }

    #[test]
    fn test_no_duplicates_under_interleaving() {
        let (_store, mut roster) = roster();
        roster.apply_friend_ids(ids(&["alice", "bob"]));
        assert_consistent(&roster);
        roster.apply_entity_snapshot(RosterEntry::User(user("alice", "A")));
        assert_consistent(&roster);
        roster.apply_group_ids(ids(&["g1"]));
        assert_consistent(&roster);
        roster.apply_entity_snapshot(RosterEntry::User(user("alice", "A2")));
        assert_consistent(&roster);
        roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "G")));
        assert_consistent(&roster);
        roster.apply_friend_ids(ids(&["bob"]));
        assert_consistent(&roster);
        roster.apply_friend_ids(ids(&["alice", "bob"]));
        assert_consistent(&roster);
        roster.apply_entity_snapshot(RosterEntry::User(user("bob", "B")));
        assert_consistent(&roster);
        roster.apply_entity_snapshot(RosterEntry::User(user("alice", "A3")));
        assert_consistent(&roster);
        roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "G2")));
        assert_consistent(&roster);
        roster.apply_entity_snapshot(RosterEntry::Group(group("g1", "G2")));
        assert_consistent(&roster);

        assert_eq!(view_ids(&roster), vec!["g1", "bob", "alice"]);
    }

    #[test]
    fn test_close_releases_everything() {
        let (store, mut roster) = roster();
        roster.start().unwrap();
        roster.apply_friend_ids(ids(&["alice"]));
        roster.apply_group_ids(ids(&["g1"]));
        assert_eq!(store.active_subscriptions().len(), 4);
        roster.close();
        assert!(store.active_subscriptions().is_empty());
        assert!(roster.is_empty());
    }

    #[test]
    fn test_parse_id_set() {
        assert_eq!(parse_id_set(None), Some(BTreeSet::new()));
        assert_eq!(parse_id_set(Some(&json!({"a": true, "b": true}))), Some(ids(&["a", "b"])));
        assert_eq!(parse_id_set(Some(&json!(["a"]))), None);
    }
}
