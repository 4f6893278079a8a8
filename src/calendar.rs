use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use thiserror::Error;

use crate::models::{new_id, CalendarEvent, EventPatch, EventType, NewEvent, RecurrenceRule, Task};
use crate::recurrence::{self, RecurrenceError};
use crate::storage::{BlobStore, StorageError, EVENTS_KEY};
use crate::utils::local_to_utc;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Failed to parse event data: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Event title must not be empty")]
    EmptyTitle,
    #[error("Event must end after it starts ({start} >= {end})")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Invalid recurrence: {0}")]
    RecurrenceError(#[from] RecurrenceError),
}

/// Owner of the calendar event collection, persisted under `calendar-events`
pub struct EventStore<S: BlobStore> {
    backend: S,
    events: Vec<CalendarEvent>,
    last_error: Option<String>,
}

impl<S: BlobStore> EventStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            events: Vec::new(),
            last_error: None,
        }
    }

    pub fn open(backend: S) -> Self {
        let mut store = Self::new(backend);
        if let Err(e) = store.load() {
            tracing::warn!(error = %e, "starting with an empty calendar");
        }
        store
    }

    /// Replace the in-memory collection with the persisted one. A failed read
    /// leaves the calendar empty but usable.
    pub fn load(&mut self) -> Result<usize, CalendarError> {
        self.events.clear();

        let loaded = self
            .backend
            .get(EVENTS_KEY)
            .map_err(CalendarError::from)
            .and_then(|raw| match raw {
                Some(raw) => serde_json::from_str::<Vec<CalendarEvent>>(&raw).map_err(CalendarError::from),
                None => Ok(Vec::new()),
            });

        match loaded {
            Ok(events) => {
                self.events = events;
                self.last_error = None;
                tracing::debug!(count = self.events.len(), "loaded events");
                Ok(self.events.len())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load events");
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn get(&self, id: &str) -> Option<&CalendarEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn into_backend(self) -> S {
        self.backend
    }

    pub fn add(&mut self, fields: NewEvent) -> Result<&CalendarEvent, CalendarError> {
        validate(&fields.title, fields.start, fields.end)?;
        let event = fields.into_event(Utc::now(), None, None);
        tracing::debug!(id = %event.id, "adding event");
        self.events.push(event);
        self.persist();
        Ok(&self.events[self.events.len() - 1])
    }

    /// Merge `patch` into the event with `id`. The merged event must still end
    /// after it starts. Unknown ids are ignored.
    pub fn update(&mut self, id: &str, patch: EventPatch) -> Result<Option<&CalendarEvent>, CalendarError> {
        let Some(idx) = self.events.iter().position(|e| e.id == id) else {
            return Ok(None);
        };

        let mut merged = self.events[idx].clone();
        patch.apply(&mut merged);
        validate(&merged.title, merged.start, merged.end)?;
        merged.updated_at = Utc::now().max(merged.created_at);

        self.events[idx] = merged;
        tracing::debug!(%id, "updated event");
        self.persist();
        Ok(self.events.get(idx))
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let len_before = self.events.len();
        self.events.retain(|e| e.id != id);
        if self.events.len() == len_before {
            return false;
        }
        tracing::debug!(%id, "deleted event");
        self.persist();
        true
    }

    /// Remove every instance produced by one recurrence expansion
    pub fn delete_series(&mut self, series_id: &str) -> usize {
        let len_before = self.events.len();
        self.events.retain(|e| e.series_id.as_deref() != Some(series_id));
        let removed = len_before - self.events.len();
        if removed > 0 {
            tracing::debug!(%series_id, removed, "deleted event series");
            self.persist();
        }
        removed
    }

    /// Expand `template` under `rule` and append every instance in one batch.
    /// Instances share a series id and carry the rule.
    pub fn create_recurring_event(
        &mut self,
        template: NewEvent,
        rule: RecurrenceRule,
    ) -> Result<&[CalendarEvent], CalendarError> {
        validate(&template.title, template.start, template.end)?;
        let occurrences = recurrence::expand(template.start, template.end, &rule)?;

        let now = Utc::now();
        let series_id = new_id();
        let first = self.events.len();
        for occurrence in occurrences {
            let mut instance = template.clone();
            instance.start = occurrence.start;
            instance.end = occurrence.end;
            self.events
                .push(instance.into_event(now, Some(rule.clone()), Some(series_id.clone())));
        }

        tracing::debug!(%series_id, count = self.events.len() - first, "created recurring event");
        self.persist();
        Ok(&self.events[first..])
    }

    /// Events starting on `date` as seen in `tz`
    pub fn events_for_date<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> Vec<&CalendarEvent> {
        self.events
            .iter()
            .filter(|e| on_date(e.start, date, tz))
            .collect()
    }

    /// Events starting in `[start, start + 7 days)`
    pub fn events_for_week(&self, start: DateTime<Utc>) -> Vec<&CalendarEvent> {
        self.events
            .iter()
            .filter(|e| in_week(e.start, start))
            .collect()
    }

    /// Events starting in the given year and month (1-12) as seen in `tz`
    pub fn events_for_month<Tz: TimeZone>(&self, year: i32, month: u32, tz: &Tz) -> Vec<&CalendarEvent> {
        self.events
            .iter()
            .filter(|e| in_month(e.start, year, month, tz))
            .collect()
    }

    /// Events starting in `(now, now + lead]`, soonest first
    pub fn upcoming(&self, now: DateTime<Utc>, lead: Duration) -> Vec<&CalendarEvent> {
        let until = now + lead;
        let mut upcoming: Vec<&CalendarEvent> = self
            .events
            .iter()
            .filter(|e| e.start > now && e.start <= until)
            .collect();
        upcoming.sort_by_key(|e| e.start);
        upcoming
    }

    /// Add a one-hour event for `task`; the task is not linked to the event afterwards
    pub fn add_from_task(&mut self, task: &Task) -> Result<&CalendarEvent, CalendarError> {
        self.add(event_from_task(task, Utc::now()))
    }

    fn persist(&mut self) {
        let result = serde_json::to_string(&self.events)
            .map_err(StorageError::from)
            .and_then(|raw| self.backend.set(EVENTS_KEY, &raw));
        match result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist events; keeping in-memory state");
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Timestamps are stored in UTC; the calendar date depends on the viewer's zone.
pub fn on_date<Tz: TimeZone>(ts: DateTime<Utc>, date: NaiveDate, tz: &Tz) -> bool {
    ts.with_timezone(tz).date_naive() == date
}

/// Midnight at the start of `date` in `tz`
pub fn start_of_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    local_to_utc(date.and_time(NaiveTime::MIN), tz)
}

/// `ts` falls in `[week_start, week_start + 7 days)`
pub fn in_week(ts: DateTime<Utc>, week_start: DateTime<Utc>) -> bool {
    ts >= week_start && ts < week_start + Duration::days(7)
}

pub fn in_month<Tz: TimeZone>(ts: DateTime<Utc>, year: i32, month: u32, tz: &Tz) -> bool {
    let local = ts.with_timezone(tz);
    local.year() == year && local.month() == month
}

/// Build a one-hour `task` event at the task's due date, or one day from
/// `now` when it has none
pub fn event_from_task(task: &Task, now: DateTime<Utc>) -> NewEvent {
    let start = task.due_date.unwrap_or(now + Duration::days(1));
    NewEvent {
        title: task.title.clone(),
        start,
        end: start + Duration::hours(1),
        description: task.description.clone(),
        location: None,
        attendees: Vec::new(),
        event_type: EventType::Task,
        priority: task.priority,
    }
}

fn validate(title: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), CalendarError> {
    if title.trim().is_empty() {
        return Err(CalendarError::EmptyTitle);
    }
    if end <= start {
        return Err(CalendarError::InvalidTimeRange { start, end });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, NewTask, Priority};
    use crate::storage::MemoryBlobStore;
    use chrono::FixedOffset;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn store() -> EventStore<MemoryBlobStore> {
        EventStore::new(MemoryBlobStore::new())
    }

    #[test]
    fn end_must_follow_start() {
        let mut s = store();
        let err = s.add(NewEvent::new("Bad", at(2024, 1, 1, 10), at(2024, 1, 1, 10)));
        assert!(matches!(err, Err(CalendarError::InvalidTimeRange { .. })));
        assert!(s.is_empty());
    }

    #[test]
    fn update_revalidates_time_range() {
        let mut s = store();
        let id = s
            .add(NewEvent::new("Meeting", at(2024, 1, 1, 10), at(2024, 1, 1, 11)))
            .unwrap()
            .id
            .clone();
        let patch = EventPatch {
            end: Some(at(2024, 1, 1, 9)),
            ..Default::default()
        };
        assert!(s.update(&id, patch).is_err());
        assert_eq!(s.get(&id).unwrap().end, at(2024, 1, 1, 11));

        let patch = EventPatch {
            location: Some(Some("Room 4".into())),
            ..Default::default()
        };
        let updated = s.update(&id, patch).unwrap().unwrap();
        assert_eq!(updated.location.as_deref(), Some("Room 4"));
        assert!(s.update("missing", EventPatch::default()).unwrap().is_none());
    }

    #[test]
    fn weekly_series_is_added_in_one_batch() {
        let mut s = store();
        let rule = RecurrenceRule::new(Frequency::Weekly, 1).until(at(2024, 1, 22, 0));
        let created = s
            .create_recurring_event(NewEvent::new("Review", at(2024, 1, 1, 9), at(2024, 1, 1, 10)), rule.clone())
            .unwrap();

        assert_eq!(created.len(), 4);
        let series = created[0].series_id.clone().unwrap();
        assert!(created.iter().all(|e| e.series_id.as_deref() == Some(series.as_str())));
        assert!(created.iter().all(|e| e.recurrence.as_ref() == Some(&rule)));
        assert!(created.iter().all(|e| e.duration() == Duration::hours(1)));

        let ids: std::collections::HashSet<_> = created.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), 4);

        assert_eq!(s.delete_series(&series), 4);
        assert!(s.is_empty());
    }

    #[test]
    fn zero_interval_is_a_configuration_error() {
        let mut s = store();
        let rule = RecurrenceRule::new(Frequency::Daily, 0);
        let result = s.create_recurring_event(NewEvent::new("Loop", at(2024, 1, 1, 9), at(2024, 1, 1, 10)), rule);
        assert!(matches!(
            result,
            Err(CalendarError::RecurrenceError(RecurrenceError::InvalidInterval(0)))
        ));
        assert!(s.is_empty());
    }

    #[test]
    fn range_queries() {
        let mut s = store();
        s.add(NewEvent::new("Mon", at(2024, 1, 1, 9), at(2024, 1, 1, 10))).unwrap();
        s.add(NewEvent::new("Sun", at(2024, 1, 7, 23), at(2024, 1, 8, 0))).unwrap();
        s.add(NewEvent::new("Next Mon", at(2024, 1, 8, 0), at(2024, 1, 8, 1))).unwrap();
        s.add(NewEvent::new("Feb", at(2024, 2, 1, 9), at(2024, 2, 1, 10))).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(s.events_for_date(day, &Utc).len(), 1);
        assert_eq!(s.events_for_week(at(2024, 1, 1, 0)).len(), 2);
        assert_eq!(s.events_for_month(2024, 1, &Utc).len(), 3);
        assert_eq!(s.events_for_month(2024, 2, &Utc).len(), 1);
    }

    #[test]
    fn task_conversion_defaults_to_tomorrow() {
        let now = at(2024, 5, 1, 12);
        let mut fields = NewTask::new("Ship it");
        fields.priority = Priority::High;
        let task = fields.into_task(now);

        let event = event_from_task(&task, now);
        assert_eq!(event.start, at(2024, 5, 2, 12));
        assert_eq!(event.end - event.start, Duration::hours(1));
        assert_eq!(event.event_type, EventType::Task);
        assert_eq!(event.priority, Priority::High);

        let mut due = NewTask::new("Due");
        due.due_date = Some(at(2024, 6, 1, 15));
        let event = event_from_task(&due.into_task(now), now);
        assert_eq!(event.start, at(2024, 6, 1, 15));
    }

    #[test]
    fn upcoming_window_is_half_open_at_now() {
        let mut s = store();
        let now = at(2024, 1, 1, 9);
        s.add(NewEvent::new("now", now, now + Duration::hours(1))).unwrap();
        s.add(NewEvent::new("soon", now + Duration::minutes(15), now + Duration::hours(1))).unwrap();
        s.add(NewEvent::new("later", now + Duration::minutes(16), now + Duration::hours(1))).unwrap();

        let upcoming = s.upcoming(now, Duration::minutes(15));
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].title, "soon");
    }

    #[test]
    fn delete_unknown_is_noop_and_reload_round_trips() {
        let mut s = store();
        s.add(NewEvent::new("Keep", at(2024, 1, 1, 9), at(2024, 1, 1, 10))).unwrap();
        assert!(!s.delete("missing"));

        let mut reloaded = EventStore::new(s.into_backend());
        assert_eq!(reloaded.load().unwrap(), 1);
        assert_eq!(reloaded.events()[0].start, at(2024, 1, 1, 9));
    }

    #[test]
    fn dates_follow_the_viewer_zone() {
        let mut s = store();
        // 05:00 on Feb 1 in UTC+9
        s.add(NewEvent::new("Early call", at(2024, 1, 31, 20), at(2024, 1, 31, 21))).unwrap();
        let seoul = FixedOffset::east_opt(9 * 3600).unwrap();
        let feb_first = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        assert_eq!(s.events_for_date(feb_first, &seoul).len(), 1);
        assert!(s.events_for_date(feb_first, &Utc).is_empty());
        assert_eq!(s.events_for_month(2024, 2, &seoul).len(), 1);
        assert_eq!(s.events_for_month(2024, 1, &Utc).len(), 1);
        assert_eq!(start_of_day(feb_first, &seoul), at(2024, 1, 31, 15));
        assert_eq!(start_of_day(feb_first, &Utc), at(2024, 2, 1, 0));
    }

    #[test]
    fn corrupt_blob_fails_open() {
        let mut backend = MemoryBlobStore::new();
        backend.set(EVENTS_KEY, "{not json").unwrap();
        let mut s = EventStore::new(backend);
        assert!(matches!(s.load(), Err(CalendarError::ParseError(_))));
        assert!(s.is_empty());
        assert!(s.last_error().is_some());

        s.add(NewEvent::new("Fresh", at(2024, 1, 1, 9), at(2024, 1, 1, 10))).unwrap();
        assert_eq!(s.len(), 1);
        assert!(s.last_error().is_none());
    }

    #[test]
    fn write_failure_keeps_memory_authoritative() {
        let mut s = store();
        s.backend_mut().set_reject_writes(true);
        let id = s
            .add(NewEvent::new("Offline", at(2024, 1, 1, 9), at(2024, 1, 1, 10)))
            .unwrap()
            .id
            .clone();
        assert!(s.last_error().is_some());
        assert_eq!(s.get(&id).unwrap().title, "Offline");

        s.backend_mut().set_reject_writes(false);
        assert!(s.delete(&id));
        assert!(s.last_error().is_none());
        let mut reloaded = EventStore::new(s.into_backend());
        assert_eq!(reloaded.load().unwrap(), 0);
    }
}
