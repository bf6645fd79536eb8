// Chat timeline assembly
// Turns the full message list of one conversation into the rendered
// sequence: a date header before every run of same-day messages.

use chrono::{FixedOffset, Local, NaiveDate, TimeZone};
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::models::{DayLabel, Message, TimelineItem};

/// Source of calendar days for message timestamps.
pub trait Calendar: Send {
    fn today(&self) -> NaiveDate;
    /// Calendar day of a millisecond timestamp, `None` if out of range.
    fn day_of(&self, timestamp_ms: i64) -> Option<NaiveDate>;
}

/// The device's own time zone and clock.
pub struct LocalCalendar;

impl Calendar for LocalCalendar {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn day_of(&self, timestamp_ms: i64) -> Option<NaiveDate> {
        Local
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .map(|dt| dt.date_naive())
    }
}

/// A fixed UTC offset and a frozen "today".
pub struct FixedCalendar {
    offset: FixedOffset,
    today: NaiveDate,
}

impl FixedCalendar {
    pub fn new(offset: FixedOffset, today: NaiveDate) -> Self {
        FixedCalendar { offset, today }
    }
}

impl Calendar for FixedCalendar {
    fn today(&self) -> NaiveDate {
        self.today
    }

    fn day_of(&self, timestamp_ms: i64) -> Option<NaiveDate> {
        self.offset
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .map(|dt| dt.date_naive())
    }
}

pub fn label_for(day: NaiveDate, today: NaiveDate) -> DayLabel {
    if day == today {
        DayLabel::Today
    } else if today.pred_opt() == Some(day) {
        DayLabel::Yesterday
    } else {
        DayLabel::On(day)
    }
}

/// Build the rendered sequence from scratch. Messages keep the given order;
/// a new header starts whenever the calendar day differs from the previous
/// message's day.
pub fn assemble(messages: &[Message], calendar: &dyn Calendar) -> Vec<TimelineItem> {
    let today = calendar.today();
    let mut items = Vec::with_capacity(messages.len() * 2);
    let mut current_day: Option<NaiveDate> = None;

    for message in messages {
        // An unrepresentable timestamp stays in the run it arrived in
        let day = calendar
            .day_of(message.timestamp)
            .or(current_day)
            .unwrap_or(today);
        if current_day != Some(day) {
            items.push(TimelineItem::DateSeparator(label_for(day, today)));
            current_day = Some(day);
        }
        items.push(TimelineItem::Message(message.clone()));
    }
    items
}

/// Messages of a collection snapshot in key order. Children that do not
/// parse are skipped.
pub fn messages_from_snapshot(value: Option<&Value>) -> Vec<Message> {
    let children: Vec<&Value> = match value {
        None => Vec::new(),
        Some(Value::Object(map)) => map.values().collect(),
        Some(Value::Array(list)) => list.iter().collect(),
        Some(other) => {
            warn!("Message collection is not a collection: {}", other);
            Vec::new()
        }
    };
    let total = children.len();
    let messages: Vec<Message> = children.into_iter().filter_map(Message::from_snapshot).collect();
    if messages.len() != total {
        debug!("Skipped {} malformed messages", total - messages.len());
    }
    messages
}

pub struct TimelineAssembler {
    local_uid: String,
    calendar: Box<dyn Calendar>,
    messages: Vec<Message>,
    items: Vec<TimelineItem>,
}

impl TimelineAssembler {
    pub fn new(local_uid: &str) -> Self {
        Self::with_calendar(local_uid, Box::new(LocalCalendar))
    }

    pub fn with_calendar(local_uid: &str, calendar: Box<dyn Calendar>) -> Self {
        TimelineAssembler {
            local_uid: local_uid.to_string(),
            calendar,
            messages: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Replace the whole message list.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.refresh();
    }

    /// Recompute headers, e.g. after the local date rolled over.
    pub fn refresh(&mut self) {
        self.items = assemble(&self.messages, self.calendar.as_ref());
    }

    pub fn current_view(&self) -> &[TimelineItem] {
        &self.items
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_outgoing(&self, message: &Message) -> bool {
        message.sender_id == self.local_uid
    }

    /// Senders other than the local user whose names need a lookup.
    pub fn foreign_senders(&self) -> BTreeSet<String> {
        self.messages
            .iter()
            .filter(|m| !self.is_outgoing(m))
            .map(|m| m.sender_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn utc_calendar() -> Box<dyn Calendar> {
        Box::new(FixedCalendar::new(FixedOffset::east_opt(0).unwrap(), today()))
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> i64 {
        let naive = NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap();
        Utc.from_utc_datetime(&naive).timestamp_millis()
    }

    fn msg(text: &str, sender: &str, ts: i64) -> Message {
        Message::new(text, sender, ts).unwrap()
    }

    fn separators(items: &[TimelineItem]) -> Vec<DayLabel> {
        items
            .iter()
            .filter_map(|i| match i {
                TimelineItem::DateSeparator(label) => Some(*label),
                TimelineItem::Message(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_list_gives_empty_view() {
        let mut timeline = TimelineAssembler::with_calendar("me", utc_calendar());
        timeline.set_messages(Vec::new());
        assert!(timeline.current_view().is_empty());
    }

    #[test]
    fn test_single_message_today() {
        let mut timeline = TimelineAssembler::with_calendar("me", utc_calendar());
        let m = msg("hi", "me", at(2026, 10, 19, 9));
        timeline.set_messages(vec![m.clone()]);
        assert_eq!(
            timeline.current_view(),
            &[TimelineItem::DateSeparator(DayLabel::Today), TimelineItem::Message(m)]
        );
    }

    #[test]
    fn test_three_days_three_headers_in_order() {
        let mut timeline = TimelineAssembler::with_calendar("me", utc_calendar());
        timeline.set_messages(vec![
            msg("a", "me", at(2026, 10, 2, 8)),
            msg("b", "alice", at(2026, 10, 2, 20)),
            msg("c", "me", at(2026, 10, 18, 12)),
            msg("d", "alice", at(2026, 10, 19, 7)),
            msg("e", "alice", at(2026, 10, 19, 8)),
        ]);
        let view = timeline.current_view();
        assert_eq!(view.len(), 8);
        assert_eq!(
            separators(view),
            vec![
                DayLabel::On(NaiveDate::from_ymd_opt(2026, 10, 2).unwrap()),
                DayLabel::Yesterday,
                DayLabel::Today,
            ]
        );
        assert!(matches!(view[0], TimelineItem::DateSeparator(_)));
        assert!(matches!(view[3], TimelineItem::DateSeparator(DayLabel::Yesterday)));
        assert!(matches!(view[5], TimelineItem::DateSeparator(DayLabel::Today)));
    }

    #[test]
    fn test_runs_follow_arrival_order() {
        // Out-of-order timestamps open a new run instead of being merged
        let mut timeline = TimelineAssembler::with_calendar("me", utc_calendar());
        timeline.set_messages(vec![
            msg("a", "me", at(2026, 10, 19, 8)),
            msg("b", "me", at(2026, 10, 18, 8)),
            msg("c", "me", at(2026, 10, 19, 9)),
        ]);
        assert_eq!(
            separators(timeline.current_view()),
            vec![DayLabel::Today, DayLabel::Yesterday, DayLabel::Today]
        );
    }

    #[test]
    fn test_local_offset_moves_day_boundary() {
        let plus_three = FixedCalendar::new(FixedOffset::east_opt(3 * 3600).unwrap(), today());
        let mut timeline = TimelineAssembler::with_calendar("me", Box::new(plus_three));
        // 22:00 UTC on the 18th is already the 19th at UTC+3
        timeline.set_messages(vec![msg("late", "me", at(2026, 10, 18, 22))]);
        assert_eq!(separators(timeline.current_view()), vec![DayLabel::Today]);
    }

    #[test]
    fn test_long_date_label() {
        let label = label_for(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(), today());
        assert_eq!(label.to_string(), "5 March 2026");
    }

    #[test]
    fn test_messages_from_snapshot_skips_malformed() {
        let value = json!({
            "-0001": {"message": "first", "senderId": "alice", "timestamp": 1},
            "-0002": {"message": "   ", "senderId": "alice", "timestamp": 2},
            "-0003": {"senderId": "alice", "timestamp": 3},
            "-0004": {"message": "last", "senderId": "me", "timestamp": 4}
        });
        let messages = messages_from_snapshot(Some(&value));
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "last"]);
        assert!(messages_from_snapshot(None).is_empty());
    }

    #[test]
    fn test_foreign_senders() {
        let mut timeline = TimelineAssembler::with_calendar("me", utc_calendar());
        timeline.set_messages(vec![
            msg("a", "me", 1),
            msg("b", "alice", 2),
            msg("c", "bob", 3),
            msg("d", "alice", 4),
        ]);
        let senders: Vec<String> = timeline.foreign_senders().into_iter().collect();
        assert_eq!(senders, vec!["alice".to_string(), "bob".to_string()]);
    }
}
