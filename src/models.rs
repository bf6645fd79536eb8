use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use rand::seq::IteratorRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ChatError;
use crate::realtime::paths;

/// Length of the human-shareable lookup key handed out at registration.
pub const SHORT_ID_LEN: usize = 5;

static SHORT_ID_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[A-Z0-9]{5}$").expect("short id pattern"));

// Chat bubble palette offered in the profile and group editors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChatColor {
    #[default]
    White,
    Blue,
    Green,
    Pink,
    Yellow,
}

impl ChatColor {
    pub const ALL: [ChatColor; 5] = [
        ChatColor::White,
        ChatColor::Blue,
        ChatColor::Green,
        ChatColor::Pink,
        ChatColor::Yellow,
    ];

    pub fn hex(self) -> &'static str {
        match self {
            ChatColor::White => "#FFFFFF",
            ChatColor::Blue => "#BBDEFB",
            ChatColor::Green => "#C8E6C9",
            ChatColor::Pink => "#F8BBD0",
            ChatColor::Yellow => "#FFF9C4",
        }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.hex().eq_ignore_ascii_case(hex.trim()))
    }

    /// The next palette entry, wrapping around. Used by the color picker.
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|c| *c == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl From<String> for ChatColor {
    fn from(hex: String) -> Self {
        ChatColor::from_hex(&hex).unwrap_or_default()
    }
}

impl From<ChatColor> for String {
    fn from(color: ChatColor) -> Self {
        color.hex().to_string()
    }
}

/// Five character uppercase lookup key, e.g. `K7QX2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortId(String);

impl ShortId {
    /// Normalize user input (trim + uppercase) and validate it.
    pub fn parse(input: &str) -> Result<Self, ChatError> {
        let normalized = input.trim().to_uppercase();
        if SHORT_ID_RE.is_match(&normalized) {
            Ok(ShortId(normalized))
        } else {
            Err(ChatError::InvalidInput(format!(
                "short id must be {} letters or digits",
                SHORT_ID_LEN
            )))
        }
    }

    /// Derive the short id of a freshly registered account: the first five
    /// characters of the uid, uppercased.
    pub fn from_uid(uid: &str) -> Option<Self> {
        let prefix: String = uid.chars().take(SHORT_ID_LEN).collect();
        if prefix.chars().count() < SHORT_ID_LEN {
            return None;
        }
        Self::parse(&prefix).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "uid")]
    pub id: String,
    #[serde(rename = "fullName", default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "shortId", default)]
    pub short_id: String,
    #[serde(rename = "profileImageUrl", default)]
    pub avatar_image: String,
    #[serde(rename = "chatColor", default)]
    pub chat_color: ChatColor,
}

impl User {
    /// Parse a `Users/{uid}` record. Returns `None` for anything that is not
    /// a user with a non-empty id.
    pub fn from_snapshot(value: &Value) -> Option<Self> {
        let user: User = serde_json::from_value(value.clone()).ok()?;
        if user.id.is_empty() {
            return None;
        }
        Some(user)
    }

    /// Decoded avatar bytes, if the record carries a valid payload.
    pub fn avatar_bytes(&self) -> Option<Vec<u8>> {
        decode_avatar(&self.avatar_image)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "groupId")]
    pub id: String,
    #[serde(rename = "groupName", default)]
    pub name: String,
    #[serde(default, with = "member_set")]
    pub members: BTreeSet<String>,
    #[serde(rename = "adminId", default)]
    pub admin_id: String,
    #[serde(rename = "groupImageUrl", default)]
    pub avatar_image: String,
    #[serde(rename = "chatColor", default)]
    pub chat_color: ChatColor,
}

/// Outcome of a member leaving a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// The member was the last one; the group must be deleted.
    Dissolved,
    /// The group lives on. `successor` is set when the admin left.
    Left { successor: Option<String> },
}

impl Group {
    /// Parse a `Groups/{gid}` record. A group without members or whose admin
    /// is not a member is treated as malformed.
    pub fn from_snapshot(value: &Value) -> Option<Self> {
        let group: Group = serde_json::from_value(value.clone()).ok()?;
        if group.id.is_empty() || group.members.is_empty() || !group.is_member(&group.admin_id) {
            return None;
        }
        Some(group)
    }

    pub fn is_member(&self, uid: &str) -> bool {
        self.members.contains(uid)
    }

    pub fn is_admin(&self, uid: &str) -> bool {
        self.admin_id == uid
    }

    /// Work out what happens when `uid` leaves. Any remaining member is an
    /// acceptable successor admin; the choice is left to `rng`.
    /// Returns `None` when `uid` is not a member.
    pub fn depart<R: Rng + ?Sized>(&self, uid: &str, rng: &mut R) -> Option<Departure> {
        if !self.is_member(uid) {
            return None;
        }
        let mut remaining = self.members.iter().filter(|m| m.as_str() != uid).peekable();
        if remaining.peek().is_none() {
            return Some(Departure::Dissolved);
        }
        let successor = if self.is_admin(uid) {
            remaining.choose(rng).cloned()
        } else {
            None
        };
        Some(Departure::Left { successor })
    }
}

// Membership is a set on our side and a `{uid: true}` map on the wire
mod member_set {
    use serde::de::IgnoredAny;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::{BTreeMap, BTreeSet};

    pub fn serialize<S: Serializer>(members: &BTreeSet<String>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(members.len()))?;
        for member in members {
            map.serialize_entry(member, &true)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<String>, D::Error> {
        let raw = BTreeMap::<String, IgnoredAny>::deserialize(deserializer)?;
        Ok(raw.into_keys().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "message")]
    pub text: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Message {
    pub fn new(text: &str, sender_id: &str, timestamp: i64) -> Result<Self, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("message text is empty".to_string()));
        }
        if sender_id.is_empty() {
            return Err(ChatError::MissingIdentity);
        }
        Ok(Message {
            text: text.to_string(),
            sender_id: sender_id.to_string(),
            timestamp,
        })
    }

    pub fn from_snapshot(value: &Value) -> Option<Self> {
        let message: Message = serde_json::from_value(value.clone()).ok()?;
        if message.text.trim().is_empty() || message.sender_id.is_empty() {
            return None;
        }
        Some(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Group,
    User,
}

/// A row of the dashboard list.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterEntry {
    User(User),
    Group(Group),
}

impl RosterEntry {
    pub fn id(&self) -> &str {
        match self {
            RosterEntry::User(user) => &user.id,
            RosterEntry::Group(group) => &group.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            RosterEntry::User(_) => EntityKind::User,
            RosterEntry::Group(_) => EntityKind::Group,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            RosterEntry::User(user) => &user.display_name,
            RosterEntry::Group(group) => &group.name,
        }
    }

    pub fn chat_color(&self) -> ChatColor {
        match self {
            RosterEntry::User(user) => user.chat_color,
            RosterEntry::Group(group) => group.chat_color,
        }
    }
}

/// Header label of a run of messages sent on the same calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Yesterday,
    On(NaiveDate),
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayLabel::Today => f.write_str("Today"),
            DayLabel::Yesterday => f.write_str("Yesterday"),
            DayLabel::On(date) => write!(f, "{}", date.format("%-d %B %Y")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineItem {
    DateSeparator(DayLabel),
    Message(Message),
}

/// Identifier of a one-to-one chat room. Both participants derive the same
/// value: the smaller id followed by the larger one.
pub fn chat_room_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}{}", a, b)
    } else {
        format!("{}{}", b, a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversation {
    Direct { peer_id: String, room_id: String },
    Group { group_id: String },
}

impl Conversation {
    pub fn direct(local_uid: &str, peer_id: &str) -> Result<Self, ChatError> {
        if local_uid.is_empty() {
            return Err(ChatError::MissingIdentity);
        }
        if peer_id.is_empty() {
            return Err(ChatError::MissingConversation);
        }
        Ok(Conversation::Direct {
            peer_id: peer_id.to_string(),
            room_id: chat_room_id(local_uid, peer_id),
        })
    }

    pub fn group(group_id: &str) -> Result<Self, ChatError> {
        if group_id.is_empty() {
            return Err(ChatError::MissingConversation);
        }
        Ok(Conversation::Group {
            group_id: group_id.to_string(),
        })
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Conversation::Group { .. })
    }

    pub fn messages_path(&self) -> String {
        match self {
            Conversation::Direct { room_id, .. } => paths::chat_messages(room_id),
            Conversation::Group { group_id } => paths::group_messages(group_id),
        }
    }
}

pub fn encode_avatar(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_avatar(payload: &str) -> Option<Vec<u8>> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    BASE64.decode(compact).ok()
}
