// Common test utilities for integration tests
// Shared store fixtures and helpers that drain the delivery queue into the
// models under test.
#![allow(dead_code)]

use std::sync::{Arc, Once};

use log::LevelFilter;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use friendchat::client::{ChatClient, ConversationFeed};
use friendchat::realtime::{Delivery, MemoryStore};
use friendchat::roster::RosterReconciler;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn user_record(uid: &str, name: &str) -> Value {
    json!({
        "uid": uid,
        "fullName": name,
        "email": format!("{}@example.com", uid),
        "shortId": uid[..5].to_uppercase(),
        "profileImageUrl": "",
        "chatColor": "#FFFFFF"
    })
}

/// Three registered users. Alice and Bob are friends and share the group
/// `g1` administered by Alice; Carol knows nobody yet.
pub fn seeded_tree() -> Value {
    let mut alice = user_record("alice0001", "Alice");
    alice["friends"] = json!({"bobby0002": true});
    alice["groups"] = json!({"g1": true});
    let mut bob = user_record("bobby0002", "Bob");
    bob["friends"] = json!({"alice0001": true});
    bob["groups"] = json!({"g1": true});
    let carol = user_record("carol0003", "Carol");

    json!({
        "Users": {
            "alice0001": alice,
            "bobby0002": bob,
            "carol0003": carol
        },
        "ShortIds": {
            "ALICE": "alice0001",
            "BOBBY": "bobby0002",
            "CAROL": "carol0003"
        },
        "Groups": {
            "g1": {
                "groupId": "g1",
                "groupName": "Climbing",
                "members": {"alice0001": true, "bobby0002": true},
                "adminId": "alice0001",
                "groupImageUrl": "",
                "chatColor": "#BBDEFB"
            }
        }
    })
}

pub const ALICE: &str = "alice0001";
pub const BOB: &str = "bobby0002";
pub const CAROL: &str = "carol0003";

pub fn seeded_store() -> (Arc<MemoryStore>, UnboundedReceiver<Delivery>) {
    setup_logging();
    let (store, rx) = MemoryStore::with_tree(seeded_tree());
    (Arc::new(store), rx)
}

pub fn client(store: &Arc<MemoryStore>, uid: &str) -> ChatClient {
    ChatClient::new(store.clone(), uid).expect("client for a non-empty uid")
}

/// Apply every queued delivery to `roster`, including the ones its own
/// subscriptions produce while draining.
pub fn pump_roster(rx: &mut UnboundedReceiver<Delivery>, roster: &mut RosterReconciler) -> usize {
    let mut applied = 0;
    while let Ok(delivery) = rx.try_recv() {
        roster.handle_delivery(&delivery);
        applied += 1;
    }
    applied
}

pub fn pump_rosters(rx: &mut UnboundedReceiver<Delivery>, rosters: &mut [&mut RosterReconciler]) {
    while let Ok(delivery) = rx.try_recv() {
        for roster in rosters.iter_mut() {
            roster.handle_delivery(&delivery);
        }
    }
}

pub fn pump_feeds(rx: &mut UnboundedReceiver<Delivery>, feeds: &mut [&mut ConversationFeed]) {
    while let Ok(delivery) = rx.try_recv() {
        for feed in feeds.iter_mut() {
            feed.handle_delivery(&delivery);
        }
    }
}

/// Titles of the dashboard rows, in display order.
pub fn titles(roster: &RosterReconciler) -> Vec<String> {
    roster
        .current_view()
        .iter()
        .map(|entry| entry.title().to_string())
        .collect()
}

/// Message texts of a feed, in timeline order.
pub fn texts(feed: &ConversationFeed) -> Vec<String> {
    feed.timeline().messages().iter().map(|m| m.text.clone()).collect()
}
