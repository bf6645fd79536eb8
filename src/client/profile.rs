// Registration and profile editing

use log::{info, warn};
use serde_json::{json, Value};
use std::path::Path;

use super::ChatClient;
use crate::error::ChatError;
use crate::models::{encode_avatar, ChatColor, ShortId, User};
use crate::realtime::{paths, WriteBatch};

/// Fields the settings screen can change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub display_name: String,
    pub chat_color: ChatColor,
    /// New base64 avatar; `None` keeps the current one.
    pub avatar_image: Option<String>,
}

/// Read an image file from disk as a base64 avatar payload.
pub fn load_avatar_file(path: &Path) -> Result<String, ChatError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ChatError::InvalidInput(format!("cannot read avatar {}: {}", path.display(), e)))?;
    if bytes.is_empty() {
        return Err(ChatError::InvalidInput(format!("avatar {} is empty", path.display())));
    }
    info!("Loaded avatar {} ({} bytes)", path.display(), bytes.len());
    Ok(encode_avatar(&bytes))
}

impl ChatClient {
    /// Short id handed out for this account.
    pub fn short_id(&self) -> Option<ShortId> {
        ShortId::from_uid(&self.uid)
    }

    /// Create the user record for a freshly authenticated account and claim
    /// its short id.
    pub fn register(&self, display_name: &str, email: &str) -> Result<User, ChatError> {
        let display_name = display_name.trim();
        let email = email.trim();
        if display_name.is_empty() || email.is_empty() {
            return Err(ChatError::InvalidInput("name and email are required".to_string()));
        }
        let short_id = self
            .short_id()
            .ok_or_else(|| ChatError::InvalidInput(format!("account id {:?} is too short", self.uid)))?;

        if let Some(Value::String(owner)) = self.store.subscribe_once(&paths::short_id(short_id.as_str()))? {
            if owner != self.uid {
                warn!("Short id {} already belongs to {}", short_id, owner);
                return Err(ChatError::ShortIdTaken(short_id.to_string()));
            }
        }

        let user = User {
            id: self.uid.clone(),
            display_name: display_name.to_string(),
            email: email.to_string(),
            short_id: short_id.to_string(),
            avatar_image: String::new(),
            chat_color: ChatColor::default(),
        };

        // Field by field so an existing friend or group list survives
        let mut batch = WriteBatch::new();
        batch.insert(paths::user_field(&self.uid, "uid"), Some(json!(user.id)));
        batch.insert(paths::user_field(&self.uid, "fullName"), Some(json!(user.display_name)));
        batch.insert(paths::user_field(&self.uid, "email"), Some(json!(user.email)));
        batch.insert(paths::user_field(&self.uid, "shortId"), Some(json!(user.short_id)));
        batch.insert(paths::user_field(&self.uid, "profileImageUrl"), Some(json!(user.avatar_image)));
        batch.insert(paths::user_field(&self.uid, "chatColor"), Some(json!(user.chat_color.hex())));
        batch.insert(paths::short_id(short_id.as_str()), Some(json!(self.uid)));
        self.store.write_many(batch)?;

        info!("Registered {} with short id {}", self.uid, short_id);
        Ok(user)
    }

    pub fn load_profile(&self) -> Result<User, ChatError> {
        self.lookup_user(&self.uid)?
            .ok_or_else(|| ChatError::NotFound(format!("profile of {}", self.uid)))
    }

    pub fn save_profile(&self, update: &ProfileUpdate) -> Result<(), ChatError> {
        let name = update.display_name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("name cannot be empty".to_string()));
        }
        let mut batch = WriteBatch::new();
        batch.insert(paths::user_field(&self.uid, "fullName"), Some(json!(name)));
        batch.insert(paths::user_field(&self.uid, "chatColor"), Some(json!(update.chat_color.hex())));
        if let Some(avatar) = &update.avatar_image {
            batch.insert(paths::user_field(&self.uid, "profileImageUrl"), Some(json!(avatar)));
        }
        self.store.write_many(batch)?;
        info!("Profile of {} saved", self.uid);
        Ok(())
    }
}
