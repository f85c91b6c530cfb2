use calview::classifier::{RawAttendee, RawEventTime, RawRecord};

/// A timed event as the events listing returns it.
pub fn timed_event(id: &str, start: &str, end: &str) -> RawRecord {
    RawRecord {
        id: Some(id.to_string()),
        summary: Some(format!("Event {}", id)),
        start: Some(RawEventTime {
            date_time: Some(start.to_string()),
            ..Default::default()
        }),
        end: Some(RawEventTime {
            date_time: Some(end.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A timed event with one attendee.
pub fn appointment(id: &str, start: &str, end: &str) -> RawRecord {
    let mut record = timed_event(id, start, end);
    record.attendees.push(RawAttendee {
        email: Some("guest@example.com".to_string()),
    });
    record
}

pub fn all_day_event(id: &str, date: &str, next_date: &str) -> RawRecord {
    RawRecord {
        id: Some(id.to_string()),
        summary: Some(format!("Event {}", id)),
        start: Some(RawEventTime {
            date: Some(date.to_string()),
            ..Default::default()
        }),
        end: Some(RawEventTime {
            date: Some(next_date.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn task(id: &str, due: Option<&str>) -> RawRecord {
    RawRecord {
        id: Some(id.to_string()),
        title: Some(format!("Task {}", id)),
        due: due.map(str::to_string),
        ..Default::default()
    }
}

/// The three-event fixture used by the filter tests: one all-day, one solo
/// timed, one appointment.
pub fn mixed_events() -> Vec<RawRecord> {
    vec![
        all_day_event("allday", "2024-06-02", "2024-06-03"),
        timed_event("solo", "2024-06-01T15:00:00Z", "2024-06-01T16:00:00Z"),
        appointment("meeting", "2024-06-01T09:00:00Z", "2024-06-01T10:00:00Z"),
    ]
}
