//! Maps raw remote records onto typed calendar items.
//!
//! The backend forwards Google Calendar event resources and Google Tasks
//! resources mostly untouched, so [`RawRecord`] accepts the union of both
//! shapes and tolerates any missing field. [`classify`] never fails: records
//! it cannot make sense of still produce an item, accompanied by warnings.

use crate::model::{CalendarItem, Event, Task, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote event or task record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub id: Option<String>,
    /// Event title.
    #[serde(default)]
    pub summary: Option<String>,
    /// Task title.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub start: Option<RawEventTime>,
    #[serde(default)]
    pub end: Option<RawEventTime>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub attendees: Vec<RawAttendee>,
    #[serde(default)]
    pub conference_data: Option<RawConferenceData>,
    #[serde(default)]
    pub hangout_link: Option<String>,
    /// Not part of the Google resource; filled in by the gateway from the
    /// calendar the listing was scoped to.
    #[serde(default)]
    pub calendar_id: Option<String>,
}

impl RawRecord {
    fn has_time_range(&self) -> bool {
        self.start.as_ref().is_some_and(|t| !t.is_empty())
            || self.end.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// `start`/`end` of an event: `dateTime` for timed events, `date` for all-day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventTime {
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

impl RawEventTime {
    fn is_empty(&self) -> bool {
        self.date_time.is_none() && self.date.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAttendee {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConferenceData {
    #[serde(default)]
    pub entry_points: Vec<RawEntryPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntryPoint {
    #[serde(default)]
    pub entry_point_type: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// Why a classified record is incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningReason {
    MissingId,
    MissingStart,
    MissingEnd,
    UnparsableTime { field: &'static str, value: String },
    EndBeforeStart,
}

impl fmt::Display for WarningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningReason::MissingId => f.write_str("record has no id"),
            WarningReason::MissingStart => f.write_str("event has no start"),
            WarningReason::MissingEnd => f.write_str("event has no end"),
            WarningReason::UnparsableTime { field, value } => {
                write!(f, "cannot parse {} '{}'", field, value)
            }
            WarningReason::EndBeforeStart => f.write_str("event ends before it starts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyWarning {
    pub id: String,
    pub reason: WarningReason,
}

impl fmt::Display for ClassifyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.reason)
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub item: CalendarItem,
    pub warnings: Vec<ClassifyWarning>,
}

/// Classify one remote record.
///
/// A record without any time range is a task. Anything with a start or an
/// end is an event; it is all-day when its times carry only a `date`.
pub fn classify(raw: &RawRecord) -> Classified {
    let id = raw.id.clone().unwrap_or_default();
    let mut warnings = Vec::new();
    if id.is_empty() {
        warnings.push(ClassifyWarning {
            id: id.clone(),
            reason: WarningReason::MissingId,
        });
    }

    let item = if raw.has_time_range() {
        CalendarItem::Event(classify_event(raw, id, &mut warnings))
    } else {
        CalendarItem::Task(classify_task(raw, id, &mut warnings))
    };

    Classified { item, warnings }
}

fn classify_event(raw: &RawRecord, id: String, warnings: &mut Vec<ClassifyWarning>) -> Event {
    let start = raw.start.clone().unwrap_or_default();
    let end = raw.end.clone().unwrap_or_default();
    let is_all_day = start.date_time.is_none()
        && end.date_time.is_none()
        && (start.date.is_some() || end.date.is_some());

    let start_at = parse_event_time(&start, "start", &id, warnings);
    let end_at = parse_event_time(&end, "end", &id, warnings);

    if start.is_empty() {
        warnings.push(ClassifyWarning {
            id: id.clone(),
            reason: WarningReason::MissingStart,
        });
    }
    if end.is_empty() {
        warnings.push(ClassifyWarning {
            id: id.clone(),
            reason: WarningReason::MissingEnd,
        });
    }
    if let (Some(s), Some(e)) = (start_at, end_at) {
        if e < s {
            warnings.push(ClassifyWarning {
                id: id.clone(),
                reason: WarningReason::EndBeforeStart,
            });
        }
    }

    Event {
        id,
        title: first_non_empty(&[&raw.summary, &raw.title]),
        description: first_non_empty(&[&raw.description, &raw.notes]),
        start_at,
        end_at,
        calendar_id: raw.calendar_id.clone().unwrap_or_default(),
        attendees: raw
            .attendees
            .iter()
            .filter_map(|a| a.email.as_deref())
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .collect(),
        conference_link: conference_link(raw),
        is_all_day,
    }
}

fn classify_task(raw: &RawRecord, id: String, warnings: &mut Vec<ClassifyWarning>) -> Task {
    let due_at = raw.due.as_deref().and_then(|value| {
        let parsed = parse_timestamp(value);
        if parsed.is_none() {
            warnings.push(ClassifyWarning {
                id: id.clone(),
                reason: WarningReason::UnparsableTime {
                    field: "due",
                    value: value.to_string(),
                },
            });
        }
        parsed
    });

    Task {
        id,
        title: first_non_empty(&[&raw.title, &raw.summary]),
        notes: first_non_empty(&[&raw.notes, &raw.description]),
        due_at,
    }
}

fn parse_event_time(
    time: &RawEventTime,
    field: &'static str,
    id: &str,
    warnings: &mut Vec<ClassifyWarning>,
) -> Option<Timestamp> {
    let value = time.date_time.as_deref().or(time.date.as_deref())?;
    let parsed = parse_timestamp(value);
    if parsed.is_none() {
        warnings.push(ClassifyWarning {
            id: id.to_string(),
            reason: WarningReason::UnparsableTime {
                field,
                value: value.to_string(),
            },
        });
    }
    parsed
}

/// Parse an RFC 3339 instant, an offset-less `YYYY-MM-DDTHH:MM[:SS]`, or a
/// bare `YYYY-MM-DD`. Values without an offset are taken as UTC; bare dates
/// become midnight.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// The `video` entry point, else the first entry point, else `hangoutLink`.
fn conference_link(raw: &RawRecord) -> Option<String> {
    let entry_points = raw
        .conference_data
        .as_ref()
        .map(|data| data.entry_points.as_slice())
        .unwrap_or_default();

    entry_points
        .iter()
        .find(|ep| ep.entry_point_type.as_deref() == Some("video"))
        .or_else(|| entry_points.first())
        .and_then(|ep| ep.uri.clone())
        .or_else(|| raw.hangout_link.clone())
        .filter(|link| !link.trim().is_empty())
}

fn first_non_empty(candidates: &[&Option<String>]) -> String {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}
