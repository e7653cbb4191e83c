//! Day separators for an ascending message sequence.
//!
//! One left-to-right pass, recomputed from scratch on every render: a message
//! gets a separator exactly when its day label differs from the previous
//! labeled message's. Messages the server has not timestamped yet carry no
//! label and never emit or disturb separators.

use crate::model::Message;
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::fmt;

/// Label shown on a day separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Yesterday,
    Other(NaiveDate),
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayLabel::Today => f.write_str("Today"),
            DayLabel::Yesterday => f.write_str("Yesterday"),
            DayLabel::Other(date) => write!(f, "{}", date.format("%B %-d, %Y")),
        }
    }
}

/// Label for a calendar day relative to the viewer's current day.
pub fn day_label(day: NaiveDate, today: NaiveDate) -> DayLabel {
    if day == today {
        DayLabel::Today
    } else if today.signed_duration_since(day).num_days() == 1 {
        DayLabel::Yesterday
    } else {
        DayLabel::Other(day)
    }
}

/// The viewer-local calendar day of a server timestamp.
pub fn local_day(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

/// Separator to prepend before each message, in order. `day_of` maps a server
/// timestamp to the viewer's calendar day (callers pass [`local_day`]; tests
/// pass a fixed zone).
pub fn date_separators<F>(messages: &[Message], today: NaiveDate, day_of: F) -> Vec<Option<DayLabel>>
where
    F: Fn(DateTime<Utc>) -> NaiveDate,
{
    let mut last: Option<DayLabel> = None;
    messages
        .iter()
        .map(|message| {
            let ts = message.created_at?;
            let label = day_label(day_of(ts), today);
            if last.as_ref() == Some(&label) {
                None
            } else {
                last = Some(label.clone());
                Some(label)
            }
        })
        .collect()
}
