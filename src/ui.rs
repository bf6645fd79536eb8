use anyhow::Result;
use chrono::{Local, TimeZone};
use crossterm::{
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use friendchat::client::UNKNOWN_SENDER;
use friendchat::models::{ChatColor, EntityKind, Group, RosterEntry, TimelineItem, User};

// Export types needed by main module
pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

/// What the main loop has to do after a key press.
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    Quit,
    Open(RosterEntry),
    CloseChat,
    Send(String),
    AddFriend(String),
    Unmatch(String),
    /// Short id typed into the new group form
    AddGroupMember(String),
    CreateGroup {
        name: String,
        member_ids: BTreeSet<String>,
        chat_color: ChatColor,
        avatar_path: Option<PathBuf>,
    },
    LeaveGroup(String),
    DeleteGroup(String),
    ShowMembers(String),
    RemoveMember { group_id: String, member_id: String },
    EditProfile,
    SaveProfile {
        display_name: String,
        chat_color: ChatColor,
        avatar_path: Option<PathBuf>,
    },
}

pub struct ChatUI {
    local_uid: String,
    own_name: String,
    own_short_id: String,
    show_short_id: bool,
    roster: Vec<RosterEntry>,
    selected: usize,
    // Friends marked with Space for the next group
    marked: BTreeSet<String>,
    // Anyone else added by short id for the next group, uid to name
    group_extras: BTreeMap<String, String>,
    chat: Option<ChatPane>,
    input: Input,
    dialog: Option<Dialog>,
    notice: Option<Notice>,
}

struct ChatPane {
    kind: EntityKind,
    id: String,
    title: String,
    color: ChatColor,
    is_admin: bool,
    items: Vec<TimelineItem>,
    names: HashMap<String, String>,
}

enum Dialog {
    AddFriend(Input),
    NewGroup(Form),
    Profile(Form),
    Members { group_id: String, members: Vec<User>, selected: usize },
    Help,
}

const GROUP_NAME: usize = 0;
const GROUP_MEMBER: usize = 1;
const GROUP_AVATAR: usize = 2;
const GROUP_LABELS: [&str; 3] = ["Group name", "Add member by short id", "Avatar file (optional)"];

const PROFILE_NAME: usize = 0;
const PROFILE_AVATAR: usize = 1;
const PROFILE_LABELS: [&str; 2] = ["Display name", "New avatar file (optional)"];

/// A dialog with several text fields and a chat color picked with Tab.
struct Form {
    fields: Vec<Input>,
    focus: usize,
    chat_color: ChatColor,
}

enum FormKey {
    Close,
    Submit,
    Handled,
}

impl Form {
    fn new(values: Vec<String>, chat_color: ChatColor) -> Self {
        Form {
            fields: values.into_iter().map(Input::new).collect(),
            focus: 0,
            chat_color,
        }
    }

    fn value(&self, field: usize) -> &str {
        self.fields.get(field).map(|input| input.value().trim()).unwrap_or("")
    }

    fn path(&self, field: usize) -> Option<PathBuf> {
        Some(self.value(field)).filter(|v| !v.is_empty()).map(PathBuf::from)
    }

    fn clear(&mut self, field: usize) {
        if let Some(input) = self.fields.get_mut(field) {
            *input = Input::default();
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> FormKey {
        match key.code {
            KeyCode::Esc => return FormKey::Close,
            KeyCode::Enter => return FormKey::Submit,
            KeyCode::Tab => self.chat_color = self.chat_color.next(),
            KeyCode::Up | KeyCode::BackTab => self.focus = self.focus.saturating_sub(1),
            KeyCode::Down => {
                if self.focus + 1 < self.fields.len() {
                    self.focus += 1;
                }
            }
            _ => {
                if let Some(input) = self.fields.get_mut(self.focus) {
                    input.handle_event(&Event::Key(key));
                }
            }
        }
        FormKey::Handled
    }
}

struct Notice {
    text: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatUI {
    pub fn new(local_uid: &str) -> Self {
        ChatUI {
            local_uid: local_uid.to_string(),
            own_name: String::new(),
            own_short_id: String::new(),
            show_short_id: false,
            roster: Vec::new(),
            selected: 0,
            marked: BTreeSet::new(),
            group_extras: BTreeMap::new(),
            chat: None,
            input: Input::default(),
            dialog: None,
            notice: None,
        }
    }

    pub fn set_profile(&mut self, user: &User) {
        self.own_name = user.display_name.clone();
        self.own_short_id = user.short_id.clone();
    }

    pub fn set_roster(&mut self, roster: Vec<RosterEntry>) {
        self.marked.retain(|id| {
            roster
                .iter()
                .any(|e| e.kind() == EntityKind::User && e.id() == id.as_str())
        });
        self.roster = roster;
        if self.selected >= self.roster.len() {
            self.selected = self.roster.len().saturating_sub(1);
        }
    }

    pub fn open_chat(&mut self, entry: &RosterEntry) {
        let is_admin = match entry {
            RosterEntry::Group(group) => group.is_admin(&self.local_uid),
            RosterEntry::User(_) => false,
        };
        self.chat = Some(ChatPane {
            kind: entry.kind(),
            id: entry.id().to_string(),
            title: entry.title().to_string(),
            color: entry.chat_color(),
            is_admin,
            items: Vec::new(),
            names: HashMap::new(),
        });
        self.input = Input::default();
    }

    pub fn update_chat(&mut self, items: Vec<TimelineItem>, names: HashMap<String, String>) {
        if let Some(pane) = self.chat.as_mut() {
            pane.items = items;
            pane.names = names;
        }
    }

    /// Pick up renames, recolors and admin changes of the open group.
    pub fn set_chat_group(&mut self, group: &Group) {
        if let Some(pane) = self.chat.as_mut() {
            if pane.id == group.id {
                pane.title = group.name.clone();
                pane.color = group.chat_color;
                pane.is_admin = group.is_admin(&self.local_uid);
            }
        }
    }

    pub fn close_chat(&mut self) {
        self.chat = None;
        self.input = Input::default();
        if matches!(self.dialog, Some(Dialog::Members { .. })) {
            self.dialog = None;
        }
    }

    pub fn has_open_chat(&self) -> bool {
        self.chat.is_some()
    }

    pub fn show_profile_dialog(&mut self, user: &User) {
        self.dialog = Some(Dialog::Profile(Form::new(
            vec![user.display_name.clone(), String::new()],
            user.chat_color,
        )));
    }

    /// Someone resolved from a short id joins the next group.
    pub fn add_group_member(&mut self, user: &User) {
        if user.id != self.local_uid {
            self.group_extras.insert(user.id.clone(), user.display_name.clone());
        }
    }

    /// Forget the pending group selection once the group exists.
    pub fn clear_group_selection(&mut self) {
        self.marked.clear();
        self.group_extras.clear();
    }

    fn pending_member_names(&self) -> Vec<String> {
        let marked = self.roster.iter().filter_map(|entry| match entry {
            RosterEntry::User(user) if self.marked.contains(&user.id) => Some(user.display_name.clone()),
            _ => None,
        });
        marked
            .chain(
                self.group_extras
                    .iter()
                    .filter(|(id, _)| !self.marked.contains(*id))
                    .map(|(_, name)| name.clone()),
            )
            .collect()
    }

    pub fn show_members_dialog(&mut self, group_id: &str, members: Vec<User>) {
        self.dialog = Some(Dialog::Members {
            group_id: group_id.to_string(),
            members,
            selected: 0,
        });
    }

    pub fn notify(&mut self, text: &str) {
        debug!("UI notice: {}", text);
        self.notice = Some(Notice {
            text: text.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn clean_notice(&mut self, timeout_secs: i64) {
        if let Some(notice) = &self.notice {
            if (chrono::Utc::now() - notice.timestamp).num_seconds() > timeout_secs {
                self.notice = None;
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && key.code == KeyCode::Char('c') {
            return Some(UiAction::Quit);
        }
        if self.dialog.is_some() {
            return self.handle_dialog_key(key);
        }
        if ctrl && key.code == KeyCode::Char('h') {
            self.dialog = Some(Dialog::Help);
            return None;
        }
        if self.chat.is_some() {
            self.handle_chat_key(key, ctrl)
        } else {
            self.handle_dashboard_key(key, ctrl)
        }
    }

    fn handle_dashboard_key(&mut self, key: KeyEvent, ctrl: bool) -> Option<UiAction> {
        match key.code {
            KeyCode::Esc => Some(UiAction::Quit),
            KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            KeyCode::Down => {
                if self.selected + 1 < self.roster.len() {
                    self.selected += 1;
                }
                None
            }
            KeyCode::Enter => self.roster.get(self.selected).cloned().map(UiAction::Open),
            KeyCode::Char(' ') => {
                if let Some(RosterEntry::User(user)) = self.roster.get(self.selected) {
                    if !self.marked.remove(&user.id) {
                        self.marked.insert(user.id.clone());
                    }
                }
                None
            }
            KeyCode::Char('?') => {
                self.dialog = Some(Dialog::Help);
                None
            }
            KeyCode::Char('a') if ctrl => {
                self.dialog = Some(Dialog::AddFriend(Input::default()));
                None
            }
            KeyCode::Char('g') if ctrl => {
                let fields = GROUP_LABELS.iter().map(|_| String::new()).collect();
                self.dialog = Some(Dialog::NewGroup(Form::new(fields, ChatColor::default())));
                None
            }
            KeyCode::Char('p') if ctrl => Some(UiAction::EditProfile),
            KeyCode::Char('s') if ctrl => {
                self.show_short_id = !self.show_short_id;
                None
            }
            KeyCode::Char('u') if ctrl => match self.roster.get(self.selected) {
                Some(RosterEntry::User(user)) => Some(UiAction::Unmatch(user.id.clone())),
                _ => None,
            },
            _ => None,
        }
    }

    fn handle_chat_key(&mut self, key: KeyEvent, ctrl: bool) -> Option<UiAction> {
        let (kind, id, is_admin) = match &self.chat {
            Some(pane) => (pane.kind, pane.id.clone(), pane.is_admin),
            None => return None,
        };
        match key.code {
            KeyCode::Esc => {
                self.close_chat();
                Some(UiAction::CloseChat)
            }
            KeyCode::Enter => {
                let text = self.input.value().trim().to_string();
                if text.is_empty() {
                    return None;
                }
                self.input = Input::default();
                Some(UiAction::Send(text))
            }
            KeyCode::Char('u') if ctrl && kind == EntityKind::User => Some(UiAction::Unmatch(id)),
            KeyCode::Char('l') if ctrl && kind == EntityKind::Group => Some(UiAction::LeaveGroup(id)),
            KeyCode::Char('g') if ctrl && kind == EntityKind::Group => Some(UiAction::ShowMembers(id)),
            KeyCode::Char('d') if ctrl && kind == EntityKind::Group => {
                if is_admin {
                    Some(UiAction::DeleteGroup(id))
                } else {
                    self.notify("Only the group admin can delete the group");
                    None
                }
            }
            _ if ctrl => None,
            _ => {
                self.input.handle_event(&Event::Key(key));
                None
            }
        }
    }

    fn handle_dialog_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        let dialog = self.dialog.take()?;
        match dialog {
            Dialog::Help => None,
            Dialog::AddFriend(mut input) => match key.code {
                KeyCode::Esc => None,
                KeyCode::Enter if !input.value().trim().is_empty() => {
                    Some(UiAction::AddFriend(input.value().trim().to_string()))
                }
                _ => {
                    input.handle_event(&Event::Key(key));
                    self.dialog = Some(Dialog::AddFriend(input));
                    None
                }
            },
            Dialog::NewGroup(mut form) => match form.handle_key(key) {
                FormKey::Close => None,
                FormKey::Submit if form.focus == GROUP_MEMBER => {
                    let short_id = form.value(GROUP_MEMBER).to_string();
                    form.clear(GROUP_MEMBER);
                    self.dialog = Some(Dialog::NewGroup(form));
                    Some(short_id).filter(|s| !s.is_empty()).map(UiAction::AddGroupMember)
                }
                FormKey::Submit if !form.value(GROUP_NAME).is_empty() => {
                    // The selection stays until the group is actually created
                    let mut member_ids = self.marked.clone();
                    member_ids.extend(self.group_extras.keys().cloned());
                    Some(UiAction::CreateGroup {
                        name: form.value(GROUP_NAME).to_string(),
                        member_ids,
                        chat_color: form.chat_color,
                        avatar_path: form.path(GROUP_AVATAR),
                    })
                }
                _ => {
                    self.dialog = Some(Dialog::NewGroup(form));
                    None
                }
            },
            Dialog::Profile(mut form) => match form.handle_key(key) {
                FormKey::Close => None,
                FormKey::Submit => Some(UiAction::SaveProfile {
                    display_name: form.value(PROFILE_NAME).to_string(),
                    chat_color: form.chat_color,
                    avatar_path: form.path(PROFILE_AVATAR),
                }),
                FormKey::Handled => {
                    self.dialog = Some(Dialog::Profile(form));
                    None
                }
            },
            Dialog::Members {
                group_id,
                members,
                mut selected,
            } => match key.code {
                KeyCode::Esc => None,
                KeyCode::Delete | KeyCode::Char('r') => {
                    let member_id = members.get(selected).map(|m| m.id.clone());
                    match member_id {
                        Some(member_id) if member_id != self.local_uid => {
                            Some(UiAction::RemoveMember { group_id, member_id })
                        }
                        _ => {
                            self.dialog = Some(Dialog::Members { group_id, members, selected });
                            None
                        }
                    }
                }
                code => {
                    match code {
                        KeyCode::Up => selected = selected.saturating_sub(1),
                        KeyCode::Down if selected + 1 < members.len() => selected += 1,
                        _ => {}
                    }
                    self.dialog = Some(Dialog::Members { group_id, members, selected });
                    None
                }
            },
        }
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(30), // Dashboard
                Constraint::Percentage(70), // Chat panel
            ])
            .split(size);

        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // Messages area
                Constraint::Length(3), // Input box
                Constraint::Length(1), // Help line
            ])
            .split(chunks[1]);

        self.draw_roster(frame, chunks[0]);

        match &self.chat {
            Some(pane) => draw_messages(frame, pane, &self.local_uid, chat_chunks[0]),
            None => {
                let hint = Paragraph::new("Select a chat and press Enter")
                    .block(Block::default().title("Chat").borders(Borders::ALL))
                    .style(Style::default().fg(Color::Gray));
                frame.render_widget(hint, chat_chunks[0]);
            }
        }

        let input_block = Block::default()
            .title("Message")
            .borders(Borders::ALL)
            .border_style(if self.chat.is_some() {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            });
        let input_widget = Paragraph::new(self.input.value()).block(input_block);
        frame.render_widget(input_widget, chat_chunks[1]);

        let help_text = match &self.chat {
            Some(pane) if pane.kind == EntityKind::Group => {
                "ESC back | Enter send | Ctrl+G members | Ctrl+L leave | Ctrl+D delete | Ctrl+H help"
            }
            Some(_) => "ESC back | Enter send | Ctrl+U unmatch | Ctrl+H help",
            None => "ESC quit | Enter open | Space mark | Ctrl+A add | Ctrl+G new group | Ctrl+P profile | Ctrl+H help",
        };
        let help = Paragraph::new(Span::styled(help_text, Style::default().fg(Color::Gray)));
        frame.render_widget(help, chat_chunks[2]);

        if self.chat.is_some() && self.dialog.is_none() {
            frame.set_cursor(
                chat_chunks[1].x + self.input.cursor() as u16 + 1,
                chat_chunks[1].y + 1,
            );
        }

        match &self.dialog {
            Some(Dialog::AddFriend(input)) => draw_input_dialog(
                frame,
                "Add Friend",
                &["Enter the 5 character short id of your friend:".to_string()],
                input,
                size,
            ),
            Some(Dialog::NewGroup(form)) => {
                let names = self.pending_member_names();
                let members = if names.is_empty() {
                    "none yet".to_string()
                } else {
                    names.join(", ")
                };
                draw_form_dialog(
                    frame,
                    "New Group",
                    &[
                        format!("Members: {}", members),
                        format!("Color {} (Tab) | Up/Down move | Enter on short id adds", form.chat_color.hex()),
                    ],
                    &GROUP_LABELS,
                    form,
                    size,
                )
            }
            Some(Dialog::Profile(form)) => draw_form_dialog(
                frame,
                "Profile",
                &[format!("Color {} (Tab changes) | Up/Down move between fields", form.chat_color.hex())],
                &PROFILE_LABELS,
                form,
                size,
            ),
            Some(Dialog::Members { members, selected, .. }) => draw_members_dialog(frame, members, *selected, size),
            Some(Dialog::Help) => draw_help_dialog(frame, size),
            None => {}
        }

        if let Some(notice) = &self.notice {
            draw_notice(frame, &notice.text, size);
        }
    }

    fn draw_roster<B: Backend>(&self, frame: &mut Frame<B>, area: Rect) {
        let title = if self.show_short_id && !self.own_short_id.is_empty() {
            format!("{} ({})", self.own_name, self.own_short_id)
        } else {
            self.own_name.clone()
        };
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(if self.chat.is_none() {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            });

        if self.roster.is_empty() {
            let empty = Paragraph::new("No chats yet. Press Ctrl+A to add a friend by short id.")
                .block(block)
                .wrap(Wrap { trim: true });
            frame.render_widget(empty, area);
            return;
        }

        let items: Vec<ListItem> = self
            .roster
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let cursor = if i == self.selected { ">" } else { " " };
                let badge = match entry {
                    RosterEntry::Group(_) => "#",
                    RosterEntry::User(user) if self.marked.contains(&user.id) => "*",
                    RosterEntry::User(_) => " ",
                };
                ListItem::new(format!("{}{} {}", cursor, badge, entry.title()))
                    .style(Style::default().fg(palette_color(entry.chat_color())))
            })
            .collect();

        frame.render_widget(List::new(items).block(block), area);
    }
}

fn palette_color(color: ChatColor) -> Color {
    let hex = color.hex().trim_start_matches('#');
    let channel = |i: usize| hex.get(i..i + 2).and_then(|c| u8::from_str_radix(c, 16).ok());
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => Color::Rgb(r, g, b),
        _ => Color::Reset,
    }
}

fn draw_messages<B: Backend>(f: &mut Frame<B>, pane: &ChatPane, local_uid: &str, area: Rect) {
    let wrap_width = area.width.saturating_sub(2).max(1) as usize;

    let lines: Vec<ListItem> = pane
        .items
        .iter()
        .flat_map(|item| match item {
            TimelineItem::DateSeparator(label) => {
                vec![ListItem::new(format!("-- {} --", label)).style(Style::default().fg(Color::Gray))]
            }
            TimelineItem::Message(m) => {
                let time = Local
                    .timestamp_millis_opt(m.timestamp)
                    .single()
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_default();
                let outgoing = m.sender_id == local_uid;
                let sender = if outgoing {
                    "You"
                } else if pane.kind == EntityKind::Group {
                    pane.names.get(&m.sender_id).map(String::as_str).unwrap_or(UNKNOWN_SENDER)
                } else {
                    pane.title.as_str()
                };
                let style = if outgoing {
                    Style::default().fg(palette_color(pane.color))
                } else {
                    Style::default()
                };
                let full_content = format!("[{}] {}: {}", time, sender, m.text);
                wrap(&full_content, wrap_width)
                    .into_iter()
                    .map(|line| ListItem::new(line.into_owned()).style(style))
                    .collect()
            }
        })
        .collect();

    // Keep the newest line in view
    let mut list_state = ListState::default();
    if !lines.is_empty() {
        list_state.select(Some(lines.len() - 1));
    }

    let title = match pane.kind {
        EntityKind::Group => format!("# {}", pane.title),
        EntityKind::User => pane.title.clone(),
    };
    let list = List::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default());
    f.render_stateful_widget(list, area, &mut list_state);
}

fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height.saturating_sub(4));
    Rect::new(
        area.x + (area.width - popup_width) / 2,
        area.y + (area.height - popup_height) / 2,
        popup_width,
        popup_height,
    )
}

fn draw_input_dialog<B: Backend>(f: &mut Frame<B>, title: &str, prompt: &[String], input: &Input, area: Rect) {
    let popup_area = popup_area(area, 56, 8);

    let popup_block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    f.render_widget(Clear, popup_area);
    f.render_widget(popup_block, popup_area);

    let inner_area = popup_area.inner(&Margin {
        vertical: 1,
        horizontal: 2,
    });
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Length(3)])
        .split(inner_area);

    let prompt_list = List::new(prompt.iter().map(|s| ListItem::new(s.as_str())).collect::<Vec<_>>());
    f.render_widget(prompt_list, chunks[0]);

    let input_widget = Paragraph::new(input.value()).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );
    f.render_widget(input_widget, chunks[1]);

    f.set_cursor(chunks[1].x + input.cursor() as u16 + 1, chunks[1].y + 1);
}

fn draw_form_dialog<B: Backend>(
    f: &mut Frame<B>,
    title: &str,
    prompt: &[String],
    labels: &[&str],
    form: &Form,
    area: Rect,
) {
    let height = prompt.len() as u16 + 3 * form.fields.len() as u16 + 2;
    let popup_area = popup_area(area, 64, height);

    let popup_block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    f.render_widget(Clear, popup_area);
    f.render_widget(popup_block, popup_area);

    let inner_area = popup_area.inner(&Margin {
        vertical: 1,
        horizontal: 2,
    });
    let mut constraints = vec![Constraint::Length(prompt.len() as u16)];
    constraints.extend(form.fields.iter().map(|_| Constraint::Length(3)));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner_area);

    let prompt_list = List::new(prompt.iter().map(|s| ListItem::new(s.as_str())).collect::<Vec<_>>());
    f.render_widget(prompt_list, chunks[0]);

    for (i, input) in form.fields.iter().enumerate() {
        let Some(chunk) = chunks.get(i + 1) else {
            break;
        };
        let focused = i == form.focus;
        let input_widget = Paragraph::new(input.value()).block(
            Block::default()
                .title(labels.get(i).copied().unwrap_or_default())
                .borders(Borders::ALL)
                .border_style(if focused {
                    Style::default().fg(palette_color(form.chat_color))
                } else {
                    Style::default().fg(Color::Gray)
                }),
        );
        f.render_widget(input_widget, *chunk);
        if focused {
            f.set_cursor(chunk.x + input.cursor() as u16 + 1, chunk.y + 1);
        }
    }
}

fn draw_members_dialog<B: Backend>(f: &mut Frame<B>, members: &[User], selected: usize, area: Rect) {
    let popup_area = popup_area(area, 50, members.len() as u16 + 5);

    let popup_block = Block::default()
        .title("Members (r removes, Esc closes)")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    f.render_widget(Clear, popup_area);
    f.render_widget(popup_block, popup_area);

    let inner_area = popup_area.inner(&Margin {
        vertical: 1,
        horizontal: 2,
    });
    let items: Vec<ListItem> = members
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let cursor = if i == selected { ">" } else { " " };
            ListItem::new(format!("{} {} ({})", cursor, m.display_name, m.short_id))
        })
        .collect();
    f.render_widget(List::new(items), inner_area);
}

fn draw_help_dialog<B: Backend>(f: &mut Frame<B>, area: Rect) {
    let popup_area = popup_area(area, 64, 22);

    let popup_block = Block::default()
        .title("Keyboard Shortcuts")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    f.render_widget(Clear, popup_area);
    f.render_widget(popup_block, popup_area);

    let inner_area = popup_area.inner(&Margin {
        vertical: 1,
        horizontal: 2,
    });

    let shortcuts = [
        ("Dashboard", ""),
        ("Up/Down", "Select a chat"),
        ("Enter", "Open the selected chat"),
        ("Space", "Mark a friend for a new group"),
        ("Ctrl+A", "Add a friend by short id"),
        ("Ctrl+G", "New group with marked friends or short ids"),
        ("Ctrl+U", "Unmatch the selected friend"),
        ("Ctrl+P", "Edit your profile"),
        ("Ctrl+S", "Show or hide your short id"),
        ("", ""),
        ("Chat", ""),
        ("Enter", "Send message"),
        ("Ctrl+G", "Group members"),
        ("Ctrl+L", "Leave the group"),
        ("Ctrl+D", "Delete the group (admin)"),
        ("Esc", "Back to the dashboard"),
        ("", ""),
        ("Press any key to close this dialog", ""),
    ];

    let items: Vec<ListItem> = shortcuts
        .iter()
        .map(|(key, desc)| {
            if desc.is_empty() {
                ListItem::new(Text::styled(
                    key.to_string(),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                ))
            } else {
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:<10}", key), Style::default().fg(Color::Green)),
                    Span::raw(desc.to_string()),
                ]))
            }
        })
        .collect();

    f.render_widget(List::new(items), inner_area);
}

fn draw_notice<B: Backend>(f: &mut Frame<B>, text: &str, area: Rect) {
    let popup_width = 44.min(area.width.saturating_sub(4));
    let popup_height = 4.min(area.height.saturating_sub(4));
    let popup_area = Rect::new(area.width.saturating_sub(popup_width + 2), 1, popup_width, popup_height);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    f.render_widget(Clear, popup_area);
    f.render_widget(
        Paragraph::new(text.to_string()).block(block).wrap(Wrap { trim: true }),
        popup_area,
    );
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
