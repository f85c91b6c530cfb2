//! Derives the grouped, chronologically ordered schedule shown to the user.

use crate::model::{CalendarItem, FilterKind, Timestamp};
use chrono::{FixedOffset, Local, NaiveDate, Offset, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Group key of a schedule section. Undated items sort before every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DateKey {
    NoDate,
    Day(NaiveDate),
}

impl DateKey {
    /// All-day events and task due dates are calendar dates already; only
    /// timed events move into `zone`.
    fn of(item: &CalendarItem, zone: DayZone) -> Self {
        let Some(ts) = item.sort_key() else {
            return DateKey::NoDate;
        };
        let is_timed = matches!(item, CalendarItem::Event(event) if !event.is_all_day);
        if is_timed {
            DateKey::Day(zone.date_of(&ts))
        } else {
            DateKey::Day(ts.date_naive())
        }
    }
}

/// Time zone whose calendar days the schedule is grouped by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DayZone {
    /// The viewer's system zone.
    #[default]
    Local,
    Fixed(FixedOffset),
    Named(Tz),
}

impl DayZone {
    pub fn utc() -> Self {
        DayZone::Fixed(Utc.fix())
    }

    pub fn date_of(&self, ts: &Timestamp) -> NaiveDate {
        match self {
            DayZone::Local => ts.with_timezone(&Local).date_naive(),
            DayZone::Fixed(offset) => ts.with_timezone(offset).date_naive(),
            DayZone::Named(tz) => ts.with_timezone(tz).date_naive(),
        }
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateKey::NoDate => f.write_str("No Date"),
            DateKey::Day(date) => write!(f, "{}", date.format("%A, %B %-d, %Y")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleGroup {
    pub date_key: DateKey,
    pub items: Vec<CalendarItem>,
}

/// Project items into date groups under `filter`, one group per calendar
/// day in `zone`.
///
/// Events without a valid time range are left out. Groups are ascending by
/// date, items ascending by start (or due) instant, ties keep input order.
pub fn project(items: &[CalendarItem], filter: FilterKind, zone: DayZone) -> Vec<ScheduleGroup> {
    let mut groups: BTreeMap<DateKey, Vec<(Option<Timestamp>, &CalendarItem)>> = BTreeMap::new();

    for item in items.iter().filter(|item| is_projectable(item) && filter.admits(item)) {
        let sort_key = item.sort_key();
        groups
            .entry(DateKey::of(item, zone))
            .or_default()
            .push((sort_key, item));
    }

    groups
        .into_iter()
        .map(|(date_key, mut entries)| {
            // stable: equal keys stay in input order
            entries.sort_by_key(|(sort_key, _)| *sort_key);
            ScheduleGroup {
                date_key,
                items: entries.into_iter().map(|(_, item)| item.clone()).collect(),
            }
        })
        .collect()
}

/// Ids of every item in a projection.
pub fn visible_ids(groups: &[ScheduleGroup]) -> HashSet<String> {
    groups
        .iter()
        .flat_map(|group| group.items.iter())
        .map(|item| item.id().to_string())
        .collect()
}

/// Events with an unusable time range stay in state but are never shown.
pub fn is_projectable(item: &CalendarItem) -> bool {
    match item {
        CalendarItem::Event(event) => event.has_valid_range(),
        CalendarItem::Task(_) => true,
    }
}
