// Backend tree layout

use super::StoreError;

pub const USERS: &str = "Users";
pub const SHORT_IDS: &str = "ShortIds";
pub const GROUPS: &str = "Groups";
pub const CHATS: &str = "Chats";
pub const GROUP_CHATS: &str = "GroupChats";

// Characters the hosted database refuses in keys
const FORBIDDEN: [char; 5] = ['.', '#', '$', '[', ']'];

pub fn user(uid: &str) -> String {
    format!("{}/{}", USERS, uid)
}

pub fn user_field(uid: &str, field: &str) -> String {
    format!("{}/{}/{}", USERS, uid, field)
}

pub fn friends(uid: &str) -> String {
    user_field(uid, "friends")
}

pub fn friend_edge(uid: &str, friend_uid: &str) -> String {
    format!("{}/{}", friends(uid), friend_uid)
}

pub fn user_groups(uid: &str) -> String {
    user_field(uid, "groups")
}

pub fn group_edge(uid: &str, group_id: &str) -> String {
    format!("{}/{}", user_groups(uid), group_id)
}

pub fn short_id(short: &str) -> String {
    format!("{}/{}", SHORT_IDS, short)
}

pub fn group(group_id: &str) -> String {
    format!("{}/{}", GROUPS, group_id)
}

pub fn group_field(group_id: &str, field: &str) -> String {
    format!("{}/{}/{}", GROUPS, group_id, field)
}

pub fn group_member(group_id: &str, uid: &str) -> String {
    format!("{}/{}", group_field(group_id, "members"), uid)
}

pub fn chat(room_id: &str) -> String {
    format!("{}/{}", CHATS, room_id)
}

pub fn chat_messages(room_id: &str) -> String {
    format!("{}/messages", chat(room_id))
}

pub fn group_chat(group_id: &str) -> String {
    format!("{}/{}", GROUP_CHATS, group_id)
}

pub fn group_messages(group_id: &str) -> String {
    format!("{}/messages", group_chat(group_id))
}

/// Split a path into its segments. A leading or trailing `/` is ignored;
/// empty segments and forbidden characters are rejected.
pub fn segments(path: &str) -> Result<Vec<String>, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    trimmed
        .split('/')
        .map(|seg| {
            if seg.is_empty() || seg.contains(&FORBIDDEN[..]) {
                Err(StoreError::InvalidPath(path.to_string()))
            } else {
                Ok(seg.to_string())
            }
        })
        .collect()
}

/// True when a change at one path can alter the value seen at the other,
/// i.e. one is an ancestor of (or equal to) the other.
pub fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_normalizes_slashes() {
        assert_eq!(segments("/Users/abc/").unwrap(), vec!["Users", "abc"]);
        assert!(segments("").is_err());
        assert!(segments("Users//abc").is_err());
        assert!(segments("Users/a.b").is_err());
    }

    #[test]
    fn test_overlaps() {
        let parent = segments("Users/u1").unwrap();
        let child = segments("Users/u1/friends/u2").unwrap();
        let sibling = segments("Users/u2").unwrap();
        assert!(overlaps(&parent, &child));
        assert!(overlaps(&child, &parent));
        assert!(!overlaps(&parent, &sibling));
    }

    #[test]
    fn test_layout() {
        assert_eq!(friend_edge("a", "b"), "Users/a/friends/b");
        assert_eq!(group_edge("a", "g"), "Users/a/groups/g");
        assert_eq!(group_member("g", "a"), "Groups/g/members/a");
        assert_eq!(chat_messages("ab"), "Chats/ab/messages");
        assert_eq!(group_messages("g"), "GroupChats/g/messages");
    }
}
