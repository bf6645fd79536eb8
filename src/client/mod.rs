// Chat client for friendchat
// Entry point for every user-facing flow. Each flow lives in its own file
// and is an `impl ChatClient` block; the realtime store and the signed-in
// uid are handed in explicitly.

use log::debug;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ChatError;
use crate::models::{Group, User};
use crate::realtime::{paths, LiveStore};
use crate::roster::RosterReconciler;

pub mod conversation;
pub mod friends;
pub mod groups;
pub mod messaging;
pub mod profile;

pub use conversation::ConversationFeed;
pub use groups::NewGroup;
pub use profile::{load_avatar_file, ProfileUpdate};

/// Shown when a sender's record cannot be read.
pub const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Clone)]
pub struct ChatClient {
    store: Arc<dyn LiveStore>,
    uid: String,
}

impl ChatClient {
    pub fn new(store: Arc<dyn LiveStore>, uid: &str) -> Result<Self, ChatError> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(ChatError::MissingIdentity);
        }
        Ok(ChatClient {
            store,
            uid: uid.to_string(),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn store(&self) -> &Arc<dyn LiveStore> {
        &self.store
    }

    /// A started dashboard roster for the signed-in user.
    pub fn roster(&self) -> Result<RosterReconciler, ChatError> {
        let mut roster = RosterReconciler::new(self.store.clone(), &self.uid)?;
        roster.start()?;
        Ok(roster)
    }

    pub fn lookup_user(&self, uid: &str) -> Result<Option<User>, ChatError> {
        let value = self.store.subscribe_once(&paths::user(uid))?;
        Ok(value.as_ref().and_then(User::from_snapshot))
    }

    pub fn lookup_group(&self, group_id: &str) -> Result<Option<Group>, ChatError> {
        let value = self.store.subscribe_once(&paths::group(group_id))?;
        Ok(value.as_ref().and_then(Group::from_snapshot))
    }

    /// One-shot display name lookup. Never fails; unreadable or missing
    /// names come back as [`UNKNOWN_SENDER`].
    pub fn display_name_of(&self, uid: &str) -> String {
        match self.store.subscribe_once(&paths::user_field(uid, "fullName")) {
            Ok(Some(Value::String(name))) if !name.trim().is_empty() => name,
            Ok(_) => UNKNOWN_SENDER.to_string(),
            Err(e) => {
                debug!("Name lookup for {} failed: {}", uid, e);
                UNKNOWN_SENDER.to_string()
            }
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
