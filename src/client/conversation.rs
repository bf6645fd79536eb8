// Live view of one open conversation
// Keeps the message timeline current and watches whether the conversation
// still exists for the local user.

use log::{debug, info, warn};
use std::collections::HashMap;

use super::ChatClient;
use crate::error::ChatError;
use crate::models::{Conversation, Group, Message};
use crate::realtime::{paths, Delivery, SnapshotEvent, SubscriptionHandle};
use crate::timeline::{messages_from_snapshot, TimelineAssembler};

pub struct ConversationFeed {
    client: ChatClient,
    conversation: Conversation,
    timeline: TimelineAssembler,
    messages_sub: Option<SubscriptionHandle>,
    liveness_sub: Option<SubscriptionHandle>,
    group: Option<Group>,
    closed: Option<String>,
    names: HashMap<String, String>,
}

impl ConversationFeed {
    pub fn open(client: &ChatClient, conversation: Conversation) -> Result<Self, ChatError> {
        let timeline = TimelineAssembler::new(client.uid());
        Self::with_timeline(client, conversation, timeline)
    }

    /// Open with a caller-provided timeline, e.g. one on a fixed calendar.
    pub fn with_timeline(
        client: &ChatClient,
        conversation: Conversation,
        timeline: TimelineAssembler,
    ) -> Result<Self, ChatError> {
        let liveness_path = match &conversation {
            Conversation::Direct { peer_id, .. } => paths::friend_edge(client.uid(), peer_id),
            Conversation::Group { group_id } => paths::group(group_id),
        };
        let store = client.store();
        let messages_sub = store.subscribe(&conversation.messages_path())?;
        let liveness_sub = match store.subscribe(&liveness_path) {
            Ok(handle) => handle,
            Err(e) => {
                store.release(messages_sub);
                return Err(e.into());
            }
        };
        info!("Opened conversation {:?}", conversation);

        Ok(ConversationFeed {
            client: client.clone(),
            conversation,
            timeline,
            messages_sub: Some(messages_sub),
            liveness_sub: Some(liveness_sub),
            group: None,
            closed: None,
            names: HashMap::new(),
        })
    }

    /// Apply one delivery. Returns whether anything visible changed.
    /// Deliveries for other subscriptions are ignored.
    pub fn handle_delivery(&mut self, delivery: &Delivery) -> bool {
        if self.closed.is_some() {
            return false;
        }
        if Some(delivery.handle) == self.messages_sub {
            match &delivery.event {
                SnapshotEvent::Value(value) => {
                    self.timeline.set_messages(messages_from_snapshot(value.as_ref()));
                    if self.conversation.is_group() {
                        self.resolve_sender_names();
                    }
                    true
                }
                SnapshotEvent::Cancelled(reason) => {
                    self.messages_sub = None;
                    self.mark_closed(format!("message feed cancelled: {}", reason));
                    true
                }
            }
        } else if Some(delivery.handle) == self.liveness_sub {
            match &delivery.event {
                SnapshotEvent::Value(value) => self.apply_liveness(value.as_ref()),
                SnapshotEvent::Cancelled(reason) => {
                    self.liveness_sub = None;
                    self.mark_closed(format!("conversation feed cancelled: {}", reason));
                    true
                }
            }
        } else {
            false
        }
    }

    fn apply_liveness(&mut self, value: Option<&serde_json::Value>) -> bool {
        match (&self.conversation, value) {
            (Conversation::Direct { .. }, None) => {
                self.mark_closed("the chat was ended".to_string());
                true
            }
            (Conversation::Direct { .. }, Some(_)) => false,
            (Conversation::Group { .. }, None) => {
                self.mark_closed("the group was deleted".to_string());
                true
            }
            (Conversation::Group { group_id }, Some(value)) => match Group::from_snapshot(value) {
                Some(group) if !group.is_member(self.client.uid()) => {
                    self.mark_closed(format!("you are no longer a member of {}", group.name));
                    true
                }
                Some(group) => {
                    let changed = self.group.as_ref() != Some(&group);
                    self.group = Some(group);
                    changed
                }
                None => {
                    warn!("Dropping malformed group snapshot for {}", group_id);
                    false
                }
            },
        }
    }

    fn resolve_sender_names(&mut self) {
        for sender in self.timeline.foreign_senders() {
            if !self.names.contains_key(&sender) {
                let name = self.client.display_name_of(&sender);
                debug!("Resolved sender {} as {}", sender, name);
                self.names.insert(sender, name);
            }
        }
    }

    fn mark_closed(&mut self, reason: String) {
        info!("Closing conversation {:?}: {}", self.conversation, reason);
        self.release_subscriptions();
        self.closed = Some(reason);
    }

    fn release_subscriptions(&mut self) {
        for handle in [self.messages_sub.take(), self.liveness_sub.take()].into_iter().flatten() {
            self.client.store().release(handle);
        }
    }

    /// Cached display name of a message sender. Only group chats populate
    /// the cache.
    pub fn sender_name(&self, uid: &str) -> Option<&str> {
        self.names.get(uid).map(String::as_str)
    }

    pub fn send(&self, text: &str) -> Result<Message, ChatError> {
        if self.closed.is_some() {
            return Err(ChatError::MissingConversation);
        }
        self.client.send_message(&self.conversation, text)
    }

    /// Relabel date separators after the local date changed.
    pub fn refresh_day_labels(&mut self) {
        self.timeline.refresh();
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn timeline(&self) -> &TimelineAssembler {
        &self.timeline
    }

    /// Latest group record; `None` for direct chats or before the first snapshot.
    pub fn group(&self) -> Option<&Group> {
        self.group.as_ref()
    }

    pub fn closed_reason(&self) -> Option<&str> {
        self.closed.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Stop listening. The feed keeps its last timeline.
    pub fn close(&mut self) {
        self.release_subscriptions();
        if self.closed.is_none() {
            self.closed = Some("closed".to_string());
        }
    }
}

impl Drop for ConversationFeed {
    fn drop(&mut self) {
        self.release_subscriptions();
    }
}
