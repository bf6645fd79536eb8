// Friend management: adding by short id and unmatching

use log::{info, warn};
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::ChatClient;
use crate::error::ChatError;
use crate::models::{chat_room_id, ShortId, User};
use crate::realtime::{paths, WriteBatch};
use crate::roster::parse_id_set;

impl ChatClient {
    /// uid registered under `short`, if any.
    pub fn resolve_short_id(&self, short: &ShortId) -> Result<Option<String>, ChatError> {
        match self.store.subscribe_once(&paths::short_id(short.as_str()))? {
            Some(Value::String(uid)) if !uid.is_empty() => Ok(Some(uid)),
            Some(other) => {
                warn!("Ignoring malformed short id mapping {}: {}", short, other);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    // Typed short id to the uid of someone else
    fn resolve_other(&self, input: &str) -> Result<String, ChatError> {
        let short = ShortId::parse(input)?;
        let uid = self
            .resolve_short_id(&short)?
            .ok_or_else(|| ChatError::NotFound(format!("user {}", short)))?;
        if uid == self.uid {
            return Err(ChatError::SelfReference);
        }
        Ok(uid)
    }

    /// Record of the user behind a typed short id, friend or not.
    pub fn find_user_by_short_id(&self, input: &str) -> Result<User, ChatError> {
        let uid = self.resolve_other(input)?;
        self.lookup_user(&uid)?
            .ok_or_else(|| ChatError::NotFound(format!("user {}", uid)))
    }

    /// Add a friend by the short id they shared. Both sides get the edge.
    /// Returns the friend's uid.
    pub fn add_friend_by_short_id(&self, input: &str) -> Result<String, ChatError> {
        let friend_uid = self.resolve_other(input)?;

        let mut batch = WriteBatch::new();
        batch.insert(paths::friend_edge(&self.uid, &friend_uid), Some(json!(true)));
        batch.insert(paths::friend_edge(&friend_uid, &self.uid), Some(json!(true)));
        self.store.write_many(batch)?;

        info!("{} and {} are now friends", self.uid, friend_uid);
        Ok(friend_uid)
    }

    /// Remove the friendship on both sides and delete the shared chat.
    pub fn unmatch(&self, peer_uid: &str) -> Result<(), ChatError> {
        if peer_uid.is_empty() {
            return Err(ChatError::MissingConversation);
        }
        let mut batch = WriteBatch::new();
        batch.insert(paths::friend_edge(&self.uid, peer_uid), None);
        batch.insert(paths::friend_edge(peer_uid, &self.uid), None);
        batch.insert(paths::chat(&chat_room_id(&self.uid, peer_uid)), None);
        self.store.write_many(batch)?;
        info!("{} unmatched {}", self.uid, peer_uid);
        Ok(())
    }

    /// Current friend ids, read once.
    pub fn friend_ids(&self) -> Result<BTreeSet<String>, ChatError> {
        let value = self.store.subscribe_once(&paths::friends(&self.uid))?;
        Ok(parse_id_set(value.as_ref()).unwrap_or_default())
    }
}
