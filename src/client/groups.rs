// Group lifecycle: create, leave, delete, remove member

use log::info;
use rand::Rng;
use serde_json::json;
use std::collections::BTreeSet;

use super::ChatClient;
use crate::error::ChatError;
use crate::models::{ChatColor, Departure, Group, User};
use crate::realtime::{paths, StoreError, WriteBatch};

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    /// Selected members besides the creator.
    pub member_ids: BTreeSet<String>,
    pub avatar_image: String,
    pub chat_color: ChatColor,
}

impl ChatClient {
    fn require_group(&self, group_id: &str) -> Result<Group, ChatError> {
        if group_id.is_empty() {
            return Err(ChatError::MissingConversation);
        }
        self.lookup_group(group_id)?
            .ok_or_else(|| ChatError::NotFound(format!("group {}", group_id)))
    }

    /// Create a group administered by the caller.
    pub fn create_group(&self, new_group: &NewGroup) -> Result<Group, ChatError> {
        let name = new_group.name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("group name is required".to_string()));
        }
        if new_group.member_ids.iter().all(|m| m == &self.uid) {
            return Err(ChatError::InvalidInput("select at least one member".to_string()));
        }

        let mut members = new_group.member_ids.clone();
        members.insert(self.uid.clone());
        let group = Group {
            id: self.store.push_key(),
            name: name.to_string(),
            members,
            admin_id: self.uid.clone(),
            avatar_image: new_group.avatar_image.clone(),
            chat_color: new_group.chat_color,
        };

        let record = serde_json::to_value(&group).map_err(StoreError::from)?;
        let mut batch = WriteBatch::new();
        batch.insert(paths::group(&group.id), Some(record));
        for member in &group.members {
            batch.insert(paths::group_edge(member, &group.id), Some(json!(true)));
        }
        self.store.write_many(batch)?;

        info!("Created group {} ({}) with {} members", group.name, group.id, group.members.len());
        Ok(group)
    }

    /// Leave a group. The last member out deletes it; an admin leaving hands
    /// the role to a member picked by `rng`.
    pub fn leave_group<R: Rng + ?Sized>(&self, group_id: &str, rng: &mut R) -> Result<Departure, ChatError> {
        let group = self.require_group(group_id)?;
        let departure = group
            .depart(&self.uid, rng)
            .ok_or_else(|| ChatError::InvalidInput(format!("not a member of {}", group.name)))?;

        let mut batch = WriteBatch::new();
        batch.insert(paths::group_edge(&self.uid, group_id), None);
        match &departure {
            Departure::Dissolved => {
                batch.insert(paths::group(group_id), None);
                batch.insert(paths::group_chat(group_id), None);
            }
            Departure::Left { successor } => {
                if let Some(successor) = successor {
                    batch.insert(paths::group_field(group_id, "adminId"), Some(json!(successor)));
                }
                batch.insert(paths::group_member(group_id, &self.uid), None);
            }
        }
        self.store.write_many(batch)?;

        info!("{} left group {}: {:?}", self.uid, group_id, departure);
        Ok(departure)
    }

    /// Delete a group with its messages. Admin only.
    pub fn delete_group(&self, group_id: &str) -> Result<(), ChatError> {
        let group = self.require_group(group_id)?;
        if !group.is_admin(&self.uid) {
            return Err(ChatError::NotAdmin("delete the group"));
        }
        let mut batch = WriteBatch::new();
        for member in &group.members {
            batch.insert(paths::group_edge(member, group_id), None);
        }
        batch.insert(paths::group(group_id), None);
        batch.insert(paths::group_chat(group_id), None);
        self.store.write_many(batch)?;
        info!("Deleted group {}", group_id);
        Ok(())
    }

    /// Remove someone else from a group. Admin only.
    pub fn remove_member(&self, group_id: &str, member_uid: &str) -> Result<(), ChatError> {
        let group = self.require_group(group_id)?;
        if !group.is_admin(&self.uid) {
            return Err(ChatError::NotAdmin("remove members"));
        }
        if group.is_admin(member_uid) {
            return Err(ChatError::InvalidInput("the admin has to leave the group instead".to_string()));
        }
        if !group.is_member(member_uid) {
            return Err(ChatError::NotFound(format!("member {}", member_uid)));
        }
        let mut batch = WriteBatch::new();
        batch.insert(paths::group_member(group_id, member_uid), None);
        batch.insert(paths::group_edge(member_uid, group_id), None);
        self.store.write_many(batch)?;
        info!("Removed {} from group {}", member_uid, group_id);
        Ok(())
    }

    /// Member records of a group, read once. Unreadable members are skipped.
    pub fn group_members(&self, group_id: &str) -> Result<Vec<User>, ChatError> {
        let group = self.require_group(group_id)?;
        let mut members = Vec::with_capacity(group.members.len());
        for uid in &group.members {
            if let Some(user) = self.lookup_user(uid)? {
                members.push(user);
            }
        }
        Ok(members)
    }
}
