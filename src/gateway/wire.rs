//! Request and response bodies of the calendar backend.
//!
//! Request structs skip `None` fields instead of sending `null`, which the
//! backend would forward to Google as an explicit clear.

use crate::classifier::RawRecord;
use crate::model::{CalendarRef, ItemKind, ItemPatch, ItemSpec, Profile, Timestamp};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

/// Body of `POST items/create/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateItemBody {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub email: String,
    pub title: String,
    pub description: String,
    pub google_calendar_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    pub add_meet: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Build the create body. `calendar_id` is used when the item names no calendar.
pub fn create_item_body(
    user_id: &str,
    spec: &ItemSpec,
    calendar_id: &str,
    time_zone: Option<&str>,
) -> CreateItemBody {
    let is_task = spec.kind == ItemKind::Task;
    CreateItemBody {
        kind: spec.kind,
        email: user_id.to_string(),
        title: spec.title.trim().to_string(),
        description: spec.description.clone(),
        google_calendar_id: spec
            .calendar_id
            .clone()
            .unwrap_or_else(|| calendar_id.to_string()),
        start_at: spec.start_at.filter(|_| !is_task).map(format_timestamp),
        end_at: spec.end_at.filter(|_| !is_task).map(format_timestamp),
        due_at: spec
            .due_at
            .filter(|_| is_task)
            .map(|d| d.format("%Y-%m-%d").to_string()),
        add_meet: spec.add_meet && !is_task,
        attendees: if is_task {
            Vec::new()
        } else {
            spec.attendees.clone()
        },
        time_zone: time_zone.filter(|_| !is_task).map(str::to_string),
    }
}

/// Body of `PUT events/update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateEventBody {
    pub email: String,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<String>>,
}

pub fn update_event_body(user_id: &str, id: &str, patch: &ItemPatch) -> UpdateEventBody {
    UpdateEventBody {
        email: user_id.to_string(),
        event_id: id.to_string(),
        summary: patch.title.as_ref().map(|t| t.trim().to_string()),
        description: patch.description.clone(),
        start: patch.start_at.map(format_timestamp),
        end: patch.end_at.map(format_timestamp),
        attendees: patch.attendees.clone(),
    }
}

/// Body of `DELETE events/delete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteEventBody {
    pub email: String,
    pub event_id: String,
}

/// Body of `DELETE tasks/delete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteTaskBody {
    pub email: String,
    pub task_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsEnvelope {
    #[serde(default)]
    pub events: Vec<RawRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TasksEnvelope {
    #[serde(default)]
    pub tasks: Vec<RawRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CalendarsEnvelope {
    #[serde(default)]
    pub calendars: Vec<RawCalendar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCalendar {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

impl From<RawCalendar> for CalendarRef {
    fn from(raw: RawCalendar) -> Self {
        let display_name = raw
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| raw.id.clone());
        CalendarRef {
            id: raw.id,
            display_name,
            is_primary: raw.primary,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<ProfileBody> for Profile {
    fn from(body: ProfileBody) -> Self {
        Profile {
            display_name: body.name.unwrap_or_default(),
            email: body.email.unwrap_or_default(),
            avatar_url: body.picture.filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Response of `POST items/create/`: one of the two records is present.
#[derive(Debug, Default, Deserialize)]
pub struct CreatedEnvelope {
    #[serde(default)]
    pub google_event: Option<RawRecord>,
    #[serde(default)]
    pub google_task: Option<RawRecord>,
}

impl CreatedEnvelope {
    pub fn into_record(self) -> Option<RawRecord> {
        self.google_event.or(self.google_task)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatedEnvelope {
    #[serde(default)]
    pub event: Option<RawRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
}

fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}
