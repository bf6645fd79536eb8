#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::event::{Event, EventStream};
use futures::StreamExt;
use log::{debug, error, info, warn, LevelFilter};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

mod settings;
mod ui;
mod utils;

use crate::{
    settings::{load_settings, save_settings},
    ui::{ChatUI, UiAction},
};
use friendchat::client::{load_avatar_file, ChatClient, ConversationFeed, NewGroup, ProfileUpdate};
use friendchat::error::ChatError;
use friendchat::models::{Conversation, RosterEntry};
use friendchat::realtime::{Delivery, MemoryStore};
use friendchat::roster::RosterReconciler;

/// Command line arguments for friendchat
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "friendchat: one-to-one and group chats in the terminal.",
    long_about = "friendchat keeps a dashboard of your friends and groups and lets you chat with them.\n\n\
    The account comes from --user, then FRIENDCHAT_USER, then the settings file.\n\
    Pass --register-name and --register-email to create a new account."
)]
struct Args {
    /// Directory holding settings.json, the store file and the log
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// Account id to sign in as
    #[arg(long, value_name = "UID")]
    user: Option<String>,

    /// JSON file backing the local realtime database
    #[arg(long, value_name = "PATH")]
    store_file: Option<PathBuf>,

    /// Register a new account with this display name
    #[arg(long, value_name = "NAME", requires = "register_email")]
    register_name: Option<String>,

    /// Email of the account to register
    #[arg(long, value_name = "EMAIL", requires = "register_name")]
    register_email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.config_dir {
        settings::set_config_dir_override(dir.clone());
    }

    let mut settings = load_settings()?;
    if let Some(store_file) = &args.store_file {
        settings.store_file = Some(store_file.clone());
    }

    let log_file_path = settings.log_path()?;
    utils::setup_logging(Some(&log_file_path), LevelFilter::Debug)?;
    info!("friendchat starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Logging to file: {}", log_file_path.display());

    let store_path = settings.store_path()?;
    let (store, mut deliveries) = MemoryStore::with_tree(load_tree(&store_path)?);
    let store = Arc::new(store);
    info!("Using store file {}", store_path.display());

    let registering = args.register_name.is_some();
    let uid = args
        .user
        .clone()
        .or_else(|| std::env::var("FRIENDCHAT_USER").ok())
        .or_else(|| if registering { None } else { settings.user_id.clone() })
        .or_else(|| registering.then(|| uuid::Uuid::new_v4().simple().to_string()))
        .ok_or_else(|| anyhow!("No account: pass --user, or register with --register-name and --register-email"))?;

    let client = ChatClient::new(store.clone(), &uid)?;

    if let (Some(name), Some(email)) = (&args.register_name, &args.register_email) {
        let user = client.register(name, email)?;
        println!("Registered {} with short id {}", user.display_name, user.short_id);
        save_tree(&store_path, &store.tree())?;
    }

    let profile = client
        .load_profile()
        .with_context(|| format!("Account {} is not registered", uid))?;

    settings.user_id = Some(uid.clone());
    if let Err(e) = save_settings(&settings) {
        warn!("Failed to save settings: {}", e);
    }

    let mut roster = client.roster()?;

    let mut terminal = ui::setup_terminal()?;
    let mut chat_ui = ChatUI::new(&uid);
    chat_ui.set_profile(&profile);

    let mut saved = SavedTree {
        path: store_path.clone(),
        revision: store.revision(),
    };
    let result = run_main_loop(
        &mut chat_ui,
        &mut terminal,
        &client,
        &mut roster,
        &mut deliveries,
        &store,
        &mut saved,
    )
    .await;

    ui::restore_terminal(terminal)?;
    roster.close();

    if let Err(e) = save_tree(&store_path, &store.tree()) {
        error!("Failed to save store: {}", e);
        eprintln!("Failed to save {}: {}", store_path.display(), e);
    }

    result?;
    println!("Chat session ended.");
    Ok(())
}

/// Load the store snapshot. A missing file is an empty database.
fn load_tree(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Parsing {}", path.display()))
}

// Written next to the target and renamed, so a crash mid-write keeps the old file
fn save_tree(path: &Path, tree: &Value) -> Result<()> {
    let staging = path.with_extension("json.tmp");
    let file = File::create(&staging).with_context(|| format!("Creating {}", staging.display()))?;
    serde_json::to_writer_pretty(file, tree)?;
    std::fs::rename(&staging, path).with_context(|| format!("Replacing {}", path.display()))?;
    debug!("Store saved to {}", path.display());
    Ok(())
}

/// Where the store file lives and which store revision it holds.
struct SavedTree {
    path: PathBuf,
    revision: u64,
}

impl SavedTree {
    /// Write the tree out if the store changed since the last save.
    fn save_if_changed(&mut self, store: &MemoryStore) -> Result<bool> {
        let revision = store.revision();
        if revision == self.revision {
            return Ok(false);
        }
        save_tree(&self.path, &store.tree())?;
        self.revision = revision;
        Ok(true)
    }
}

async fn run_main_loop(
    chat_ui: &mut ChatUI,
    terminal: &mut ui::Terminal<ui::CrosstermBackend<io::Stdout>>,
    client: &ChatClient,
    roster: &mut RosterReconciler,
    deliveries: &mut UnboundedReceiver<Delivery>,
    store: &MemoryStore,
    saved: &mut SavedTree,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut feed: Option<ConversationFeed> = None;
    let mut today = chrono::Local::now().date_naive();

    loop {
        terminal.draw(|f| chat_ui.draw(f))?;

        tokio::select! {
            Some(delivery) = deliveries.recv() => {
                apply_delivery(chat_ui, roster, &mut feed, &delivery);
            }
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) => {
                    if let Some(action) = chat_ui.handle_key(key) {
                        if !perform(action, chat_ui, client, &mut feed) {
                            break;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Terminal event stream failed: {}", e);
                    return Err(e.into());
                }
                None => break,
            },
            _ = tick.tick() => {
                chat_ui.clean_notice(5);
                if let Err(e) = saved.save_if_changed(store) {
                    warn!("Failed to save store: {}", e);
                }
                let now = chrono::Local::now().date_naive();
                if now != today {
                    today = now;
                    if let Some(open) = feed.as_mut() {
                        open.refresh_day_labels();
                        if chat_ui.has_open_chat() {
                            sync_chat(chat_ui, open);
                        }
                    }
                }
            }
        }
    }

    info!("Main loop finished");
    Ok(())
}

fn apply_delivery(
    chat_ui: &mut ChatUI,
    roster: &mut RosterReconciler,
    feed: &mut Option<ConversationFeed>,
    delivery: &Delivery,
) {
    if roster.handle_delivery(delivery) {
        chat_ui.set_roster(roster.current_view());
        return;
    }
    let Some(open) = feed.as_mut() else {
        debug!("Dropping delivery for released {}", delivery.handle);
        return;
    };
    if !open.handle_delivery(delivery) {
        return;
    }
    if let Some(reason) = open.closed_reason().map(str::to_string) {
        *feed = None;
        chat_ui.close_chat();
        chat_ui.notify(&format!("Chat closed: {}", reason));
    } else {
        sync_chat(chat_ui, open);
    }
}

fn sync_chat(chat_ui: &mut ChatUI, feed: &ConversationFeed) {
    if let Some(group) = feed.group() {
        chat_ui.set_chat_group(group);
    }
    let names: HashMap<String, String> = feed
        .timeline()
        .messages()
        .iter()
        .filter_map(|m| {
            feed.sender_name(&m.sender_id)
                .map(|name| (m.sender_id.clone(), name.to_string()))
        })
        .collect();
    chat_ui.update_chat(feed.timeline().current_view().to_vec(), names);
}

fn open_conversation(
    chat_ui: &mut ChatUI,
    client: &ChatClient,
    feed: &mut Option<ConversationFeed>,
    entry: RosterEntry,
) -> Result<(), ChatError> {
    let conversation = match &entry {
        RosterEntry::User(user) => Conversation::direct(client.uid(), &user.id)?,
        RosterEntry::Group(group) => Conversation::group(&group.id)?,
    };
    // Release the previous conversation before subscribing to the next one
    *feed = None;
    *feed = Some(ConversationFeed::open(client, conversation)?);
    chat_ui.open_chat(&entry);
    info!("Opened chat with {}", entry.title());
    Ok(())
}

/// Carry out a UI action. Returns `false` when the client should exit.
fn perform(action: UiAction, chat_ui: &mut ChatUI, client: &ChatClient, feed: &mut Option<ConversationFeed>) -> bool {
    let outcome: Result<(), ChatError> = match action {
        UiAction::Quit => return false,
        UiAction::Open(entry) => open_conversation(chat_ui, client, feed, entry),
        UiAction::CloseChat => {
            *feed = None;
            Ok(())
        }
        UiAction::Send(text) => match feed.as_ref() {
            Some(open) => open.send(&text).map(|_| ()),
            None => Err(ChatError::MissingConversation),
        },
        UiAction::AddFriend(short_id) => client
            .add_friend_by_short_id(&short_id)
            .map(|uid| chat_ui.notify(&format!("Added {}", client.display_name_of(&uid)))),
        UiAction::Unmatch(uid) => client.unmatch(&uid).map(|()| chat_ui.notify("Unmatched")),
        UiAction::AddGroupMember(short_id) => client
            .find_user_by_short_id(&short_id)
            .map(|user| {
                chat_ui.notify(&format!("{} will join the group", user.display_name));
                chat_ui.add_group_member(&user);
            }),
        UiAction::CreateGroup {
            name,
            member_ids,
            chat_color,
            avatar_path,
        } => avatar_path
            .as_deref()
            .map(load_avatar_file)
            .transpose()
            .and_then(|avatar_image| {
                client.create_group(&NewGroup {
                    name,
                    member_ids,
                    avatar_image: avatar_image.unwrap_or_default(),
                    chat_color,
                })
            })
            .map(|group| {
                chat_ui.clear_group_selection();
                chat_ui.notify(&format!("Created group {}", group.name));
            }),
        UiAction::LeaveGroup(group_id) => client
            .leave_group(&group_id, &mut rand::thread_rng())
            .map(|departure| debug!("Left {}: {:?}", group_id, departure)),
        UiAction::DeleteGroup(group_id) => client.delete_group(&group_id),
        UiAction::ShowMembers(group_id) => client
            .group_members(&group_id)
            .map(|members| chat_ui.show_members_dialog(&group_id, members)),
        UiAction::RemoveMember { group_id, member_id } => client
            .remove_member(&group_id, &member_id)
            .map(|()| chat_ui.notify(&format!("Removed {}", client.display_name_of(&member_id)))),
        UiAction::EditProfile => client.load_profile().map(|user| chat_ui.show_profile_dialog(&user)),
        UiAction::SaveProfile {
            display_name,
            chat_color,
            avatar_path,
        } => {
            avatar_path
                .as_deref()
                .map(load_avatar_file)
                .transpose()
                .map(|avatar_image| ProfileUpdate {
                    display_name,
                    chat_color,
                    avatar_image,
                })
                .and_then(|update| client.save_profile(&update))
                .and_then(|()| client.load_profile())
                .map(|user| {
                    chat_ui.set_profile(&user);
                    chat_ui.notify("Profile saved");
                })
        }
    };

    if let Err(e) = outcome {
        warn!("Action failed: {}", e);
        if e.is_fatal() {
            *feed = None;
            chat_ui.close_chat();
        }
        chat_ui.notify(&e.to_string());
    }
    true
}
