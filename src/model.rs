//! Domain types shared by the classifier, projector and sync session.

use crate::error::ValidationError;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Instant with the offset reported by the calendar backend.
pub type Timestamp = DateTime<FixedOffset>;

/// A calendar the user can scope the event listing to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarRef {
    pub id: String,
    pub display_name: String,
    pub is_primary: bool,
}

/// Signed-in user's profile as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub start_at: Option<Timestamp>,
    pub end_at: Option<Timestamp>,
    pub calendar_id: String,
    pub attendees: Vec<String>,
    pub conference_link: Option<String>,
    pub is_all_day: bool,
}

impl Event {
    /// A timed event with attendees or a video link.
    ///
    /// This is a heuristic: the event listing carries no explicit type, so a
    /// solo event that happens to have a conference link counts as an
    /// appointment too.
    pub fn is_appointment(&self) -> bool {
        !self.is_all_day && self.has_participants()
    }

    pub fn has_participants(&self) -> bool {
        !self.attendees.is_empty()
            || self
                .conference_link
                .as_deref()
                .is_some_and(|link| !link.trim().is_empty())
    }

    /// Both ends of the time range are known and ordered.
    pub fn has_valid_range(&self) -> bool {
        match (self.start_at, self.end_at) {
            (Some(start), Some(end)) => start <= end,
            _ => false,
        }
    }
}

/// A Google Task. It has no time range, only an optional due instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub notes: String,
    pub due_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalendarItem {
    Event(Event),
    Task(Task),
}

impl CalendarItem {
    pub fn id(&self) -> &str {
        match self {
            CalendarItem::Event(event) => &event.id,
            CalendarItem::Task(task) => &task.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            CalendarItem::Event(event) => &event.title,
            CalendarItem::Task(task) => &task.title,
        }
    }

    /// `startAt` for events, `dueAt` for tasks.
    pub fn sort_key(&self) -> Option<Timestamp> {
        match self {
            CalendarItem::Event(event) => event.start_at,
            CalendarItem::Task(task) => task.due_at,
        }
    }

    pub fn is_appointment(&self) -> bool {
        matches!(self, CalendarItem::Event(event) if event.is_appointment())
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            CalendarItem::Event(event) => Some(event),
            CalendarItem::Task(_) => None,
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            CalendarItem::Task(task) => Some(task),
            CalendarItem::Event(_) => None,
        }
    }
}

/// Client-side filter applied by the schedule projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    All,
    Appointments,
    Events,
}

impl FilterKind {
    pub fn admits(&self, item: &CalendarItem) -> bool {
        match self {
            FilterKind::All => true,
            FilterKind::Appointments => item.is_appointment(),
            FilterKind::Events => !item.is_appointment(),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::All => "all",
            FilterKind::Appointments => "appointments",
            FilterKind::Events => "events",
        };
        f.write_str(name)
    }
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(FilterKind::All),
            "appointments" | "appointment" => Ok(FilterKind::Appointments),
            "events" | "event" => Ok(FilterKind::Events),
            other => Err(format!("unknown filter '{}'", other)),
        }
    }
}

/// Kind of item requested through `create_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Event,
    Appointment,
    Task,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Event => "event",
            ItemKind::Appointment => "appointment",
            ItemKind::Task => "task",
        };
        f.write_str(name)
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" => Ok(ItemKind::Event),
            "appointment" => Ok(ItemKind::Appointment),
            "task" => Ok(ItemKind::Task),
            other => Err(format!("unknown item kind '{}'", other)),
        }
    }
}

/// Everything needed to create an event, appointment or task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSpec {
    pub kind: ItemKind,
    pub title: String,
    pub description: String,
    /// Target calendar; the session's active calendar when `None`.
    pub calendar_id: Option<String>,
    pub start_at: Option<Timestamp>,
    pub end_at: Option<Timestamp>,
    pub due_at: Option<chrono::NaiveDate>,
    /// Ask the backend to attach a video conference link.
    pub add_meet: bool,
    pub attendees: Vec<String>,
}

impl ItemSpec {
    pub fn new(kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            calendar_id: None,
            start_at: None,
            end_at: None,
            due_at: None,
            add_meet: false,
            attendees: Vec::new(),
        }
    }

    pub fn with_range(mut self, start_at: Timestamp, end_at: Timestamp) -> Self {
        self.start_at = Some(start_at);
        self.end_at = Some(end_at);
        self
    }

    pub fn with_due(mut self, due_at: chrono::NaiveDate) -> Self {
        self.due_at = Some(due_at);
        self
    }

    /// Required fields per kind: a title always, a strictly ordered range
    /// for events and appointments, a due date for tasks.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        match self.kind {
            ItemKind::Event | ItemKind::Appointment => {
                let start = self
                    .start_at
                    .ok_or(ValidationError::MissingField { field: "start_at" })?;
                let end = self
                    .end_at
                    .ok_or(ValidationError::MissingField { field: "end_at" })?;
                if start >= end {
                    return Err(ValidationError::InvalidTimeRange { start, end });
                }
            }
            ItemKind::Task => {
                if self.due_at.is_none() {
                    return Err(ValidationError::MissingField { field: "due_at" });
                }
            }
        }
        Ok(())
    }
}

/// Partial update for an existing event. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_at: Option<Timestamp>,
    pub end_at: Option<Timestamp>,
    pub attendees: Option<Vec<String>>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start_at.is_none()
            && self.end_at.is_none()
            && self.attendees.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ValidationError::MissingTitle);
        }
        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if start >= end {
                return Err(ValidationError::InvalidTimeRange { start, end });
            }
        }
        Ok(())
    }
}
