use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::calendar::EventStore;
use crate::models::CalendarEvent;
use crate::storage::BlobStore;

/// Delivery channel for reminders
pub trait Notifier {
    fn notify(&mut self, event: &CalendarEvent, now: DateTime<Utc>);
}

/// Announces reminders through `tracing` and on stdout
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, event: &CalendarEvent, now: DateTime<Utc>) {
        let minutes = (event.start - now).num_minutes().max(0);
        tracing::info!(id = %event.id, title = %event.title, minutes, "event starting soon");
        println!("Reminder: '{}' starts in {} min ({})", event.title, minutes, event.start.format("%H:%M"));
    }
}

/// Tracks which events have been announced so each one is announced once
#[derive(Debug)]
pub struct ReminderWatcher {
    lead: Duration,
    announced: HashSet<String>,
}

impl ReminderWatcher {
    pub fn new(lead: Duration) -> Self {
        Self {
            lead,
            announced: HashSet::new(),
        }
    }

    /// Events entering the reminder window that have not been announced yet
    pub fn poll<'a, S: BlobStore>(
        &mut self,
        store: &'a EventStore<S>,
        now: DateTime<Utc>,
    ) -> Vec<&'a CalendarEvent> {
        let due: Vec<&CalendarEvent> = store
            .upcoming(now, self.lead)
            .into_iter()
            .filter(|e| self.announced.insert(e.id.clone()))
            .collect();
        // Forget events that have already started so the set stays bounded.
        let live: HashSet<&str> = store
            .events()
            .iter()
            .filter(|e| e.start > now)
            .map(|e| e.id.as_str())
            .collect();
        self.announced.retain(|id| live.contains(id.as_str()));
        due
    }

    /// Poll and hand every newly due event to `notifier`; returns how many were sent
    pub fn dispatch<S: BlobStore>(
        &mut self,
        store: &EventStore<S>,
        notifier: &mut dyn Notifier,
        now: DateTime<Utc>,
    ) -> usize {
        let due = self.poll(store, now);
        for event in &due {
            notifier.notify(event, now);
        }
        due.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewEvent;
    use crate::storage::MemoryBlobStore;
    use chrono::TimeZone;

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl Notifier for Recorder {
        fn notify(&mut self, event: &CalendarEvent, _now: DateTime<Utc>) {
            self.0.push(event.title.clone());
        }
    }

    #[test]
    fn each_event_is_announced_once() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mut store = EventStore::new(MemoryBlobStore::new());
        store
            .add(NewEvent::new("sync", now + Duration::minutes(10), now + Duration::minutes(40)))
            .unwrap();
        store
            .add(NewEvent::new("lunch", now + Duration::hours(3), now + Duration::hours(4)))
            .unwrap();

        let mut watcher = ReminderWatcher::new(Duration::minutes(15));
        let mut recorder = Recorder::default();
        assert_eq!(watcher.dispatch(&store, &mut recorder, now), 1);
        assert_eq!(watcher.dispatch(&store, &mut recorder, now + Duration::minutes(1)), 0);
        assert_eq!(recorder.0, vec!["sync".to_string()]);

        let later = now + Duration::hours(2) + Duration::minutes(50);
        assert_eq!(watcher.dispatch(&store, &mut recorder, later), 1);
        assert_eq!(recorder.0.last().map(String::as_str), Some("lunch"));
    }
}
