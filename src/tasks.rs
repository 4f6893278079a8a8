use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::models::{new_id, NewTask, Priority, Subtask, Task, TaskPatch};
use crate::storage::{BlobStore, StorageError, TASKS_KEY, TIMER_KEY};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Failed to parse task data: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Task title must not be empty")]
    EmptyTitle,
    #[error("Subtask title must not be empty")]
    EmptySubtaskTitle,
    #[error("Task {0} not found")]
    NotFound(String),
    #[error("A timer is already running for task {task_id}; stop it first")]
    TimerActive { task_id: String },
}

/// The single time-tracking slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTime {
    pub task_id: String,
    pub minutes: u32,
}

/// Field filters over the task collection. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub project: Option<String>,
    pub tag: Option<String>,
    pub overdue: Option<bool>,
}

impl TaskFilter {
    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn overdue(mut self, overdue: bool) -> Self {
        self.overdue = Some(overdue);
        self
    }

    pub fn matches(&self, task: &Task, now: DateTime<Utc>) -> bool {
        self.completed.is_none_or(|c| task.completed == c)
            && self.priority.is_none_or(|p| task.priority == p)
            && self.category.as_ref().is_none_or(|c| &task.category == c)
            && self.project.as_ref().is_none_or(|p| task.project.as_ref() == Some(p))
            && self.tag.as_ref().is_none_or(|t| task.has_tag(t))
            && self.overdue.is_none_or(|o| task.is_overdue(now) == o)
    }
}

/// Owner of the task collection. Every mutation is written through to the
/// backend; write failures are recorded but never undo the in-memory change.
pub struct TaskStore<S: BlobStore> {
    backend: S,
    tasks: Vec<Task>,
    timer: Option<ActiveTimer>,
    last_error: Option<String>,
}

impl<S: BlobStore> TaskStore<S> {
    /// Create an empty store over `backend`. Call [`TaskStore::load`] to read
    /// the persisted collection.
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            tasks: Vec::new(),
            timer: None,
            last_error: None,
        }
    }

    /// Create a store and load the persisted collection, tolerating a corrupt blob
    pub fn open(backend: S) -> Self {
        let mut store = Self::new(backend);
        if let Err(e) = store.load() {
            tracing::warn!(error = %e, "starting with an empty task collection");
        }
        store
    }

    /// Replace the in-memory collection with the persisted one.
    ///
    /// On failure the collection is left empty and the error is both returned
    /// and kept as [`TaskStore::last_error`]; the store remains usable.
    pub fn load(&mut self) -> Result<usize, TaskError> {
        self.tasks.clear();
        self.timer = None;

        let loaded = self
            .backend
            .get(TASKS_KEY)
            .map_err(TaskError::from)
            .and_then(|raw| match raw {
                Some(raw) => serde_json::from_str::<Vec<Task>>(&raw).map_err(TaskError::from),
                None => Ok(Vec::new()),
            });

        match loaded {
            Ok(tasks) => {
                self.tasks = tasks;
                self.last_error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load tasks");
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        }

        match self.backend.get(TIMER_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<ActiveTimer>(&raw) {
                Ok(timer) if self.get(&timer.task_id).is_some() => self.timer = Some(timer),
                Ok(timer) => {
                    tracing::warn!(task_id = %timer.task_id, "discarding timer for missing task");
                    self.persist_timer();
                }
                Err(e) => tracing::warn!(error = %e, "discarding unreadable timer slot"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to read timer slot"),
        }

        tracing::debug!(count = self.tasks.len(), "loaded tasks");
        Ok(self.tasks.len())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Message of the most recent storage failure, cleared by the next successful write
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn into_backend(self) -> S {
        self.backend
    }

    pub fn add(&mut self, fields: NewTask) -> Result<&Task, TaskError> {
        if fields.title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        let task = fields.into_task(Utc::now());
        tracing::debug!(id = %task.id, "adding task");
        self.tasks.push(task);
        self.persist();
        Ok(&self.tasks[self.tasks.len() - 1])
    }

    /// Merge `patch` into the task with `id`. Unknown ids are ignored and
    /// yield `Ok(None)`.
    pub fn update(&mut self, id: &str, patch: TaskPatch) -> Result<Option<&Task>, TaskError> {
        if patch.title.as_ref().is_some_and(|t| t.trim().is_empty()) {
            return Err(TaskError::EmptyTitle);
        }
        Ok(self.modify(id, |task| patch.apply(task)))
    }

    /// Flip the completion flag; returns the new value, or `None` for an unknown id
    pub fn toggle_completion(&mut self, id: &str) -> Option<bool> {
        let completed = !self.get(id)?.completed;
        let patch = TaskPatch {
            completed: Some(completed),
            ..Default::default()
        };
        self.modify(id, |task| patch.apply(task)).map(|t| t.completed)
    }

    /// Remove the task with `id`; returns whether anything was removed
    pub fn delete(&mut self, id: &str) -> bool {
        let len_before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        if self.tasks.len() == len_before {
            return false;
        }
        tracing::debug!(%id, "deleted task");
        if self.timer.as_ref().is_some_and(|t| t.task_id == id) {
            self.timer = None;
            self.persist_timer();
        }
        self.persist();
        true
    }

    pub fn add_subtask(&mut self, task_id: &str, title: &str) -> Result<Option<&Subtask>, TaskError> {
        if title.trim().is_empty() {
            return Err(TaskError::EmptySubtaskTitle);
        }
        let subtask = Subtask::new(title.trim().to_string());
        let subtask_id = subtask.id.clone();
        let Some(task) = self.modify(task_id, move |task| task.subtasks.push(subtask)) else {
            return Ok(None);
        };
        Ok(task.subtasks.iter().find(|s| s.id == subtask_id))
    }

    /// Flip a subtask's completion flag; returns the new value
    pub fn toggle_subtask_completion(&mut self, task_id: &str, subtask_id: &str) -> Option<bool> {
        let exists = self
            .get(task_id)?
            .subtasks
            .iter()
            .any(|s| s.id == subtask_id);
        if !exists {
            return None;
        }
        let task = self.modify(task_id, |task| {
            if let Some(s) = task.subtasks.iter_mut().find(|s| s.id == subtask_id) {
                s.completed = !s.completed;
            }
        })?;
        task.subtasks.iter().find(|s| s.id == subtask_id).map(|s| s.completed)
    }

    /// Lazily filter the current collection. Overdue is evaluated against the
    /// time of this call.
    pub fn filter<'a>(&'a self, filter: &'a TaskFilter) -> impl Iterator<Item = &'a Task> + 'a {
        let now = Utc::now();
        self.tasks.iter().filter(move |t| filter.matches(t, now))
    }

    /// Case-insensitive substring search over title, description and tags
    pub fn search<'a>(&'a self, query: &str) -> impl Iterator<Item = &'a Task> + 'a {
        let needle = query.trim().to_lowercase();
        self.tasks.iter().filter(move |t| {
            !needle.is_empty()
                && (t.title.to_lowercase().contains(&needle)
                    || t.description.as_ref().is_some_and(|d| d.to_lowercase().contains(&needle))
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&needle)))
        })
    }

    pub fn active_timer(&self) -> Option<&ActiveTimer> {
        self.timer.as_ref()
    }

    pub fn start_time_tracking(&mut self, task_id: &str) -> Result<(), TaskError> {
        self.start_time_tracking_at(task_id, Utc::now())
    }

    /// Start the timer for `task_id`. Only one timer may run; starting a second
    /// one is refused so the first one's elapsed time is never lost.
    pub fn start_time_tracking_at(&mut self, task_id: &str, at: DateTime<Utc>) -> Result<(), TaskError> {
        if let Some(active) = &self.timer {
            return Err(TaskError::TimerActive {
                task_id: active.task_id.clone(),
            });
        }
        if self.get(task_id).is_none() {
            return Err(TaskError::NotFound(task_id.to_string()));
        }
        self.timer = Some(ActiveTimer {
            task_id: task_id.to_string(),
            started_at: at,
        });
        tracing::debug!(%task_id, "started time tracking");
        self.persist_timer();
        Ok(())
    }

    pub fn stop_time_tracking(&mut self) -> Option<TrackedTime> {
        self.stop_time_tracking_at(Utc::now())
    }

    /// Stop the running timer and add the elapsed whole minutes to the task's
    /// `actual_time`. Returns `None` when no timer is running or its task is gone.
    pub fn stop_time_tracking_at(&mut self, at: DateTime<Utc>) -> Option<TrackedTime> {
        let timer = self.timer.take()?;
        self.persist_timer();

        let minutes = u32::try_from((at - timer.started_at).num_minutes().max(0)).unwrap_or(u32::MAX);
        self.modify(&timer.task_id, |task| {
            task.actual_time = Some(task.actual_time.unwrap_or(0).saturating_add(minutes));
        })?;
        tracing::debug!(task_id = %timer.task_id, minutes, "stopped time tracking");

        Some(TrackedTime {
            task_id: timer.task_id,
            minutes,
        })
    }

    /// Serialize the whole collection as a pretty JSON array
    pub fn export_json(&self) -> Result<String, TaskError> {
        Ok(serde_json::to_string_pretty(&self.tasks)?)
    }

    /// Merge an exported collection into this one. Every imported task gets a
    /// fresh id so it cannot collide with an existing record.
    pub fn import_json(&mut self, raw: &str) -> Result<usize, TaskError> {
        let imported: Vec<Task> = serde_json::from_str(raw)?;
        let count = imported.len();
        for mut task in imported {
            task.id = new_id();
            if task.updated_at < task.created_at {
                task.updated_at = task.created_at;
            }
            dedupe_subtask_ids(&mut task.subtasks);
            self.tasks.push(task);
        }
        tracing::debug!(count, "imported tasks");
        self.persist();
        Ok(count)
    }

    fn modify(&mut self, id: &str, f: impl FnOnce(&mut Task)) -> Option<&Task> {
        let idx = self.tasks.iter().position(|t| t.id == id)?;
        {
            let task = &mut self.tasks[idx];
            f(task);
            task.updated_at = Utc::now().max(task.created_at);
        }
        tracing::debug!(%id, "updated task");
        self.persist();
        self.tasks.get(idx)
    }

    fn persist(&mut self) {
        let result = serde_json::to_string(&self.tasks)
            .map_err(StorageError::from)
            .and_then(|raw| self.backend.set(TASKS_KEY, &raw));
        self.record(result);
    }

    fn persist_timer(&mut self) {
        let result = match &self.timer {
            Some(timer) => serde_json::to_string(timer)
                .map_err(StorageError::from)
                .and_then(|raw| self.backend.set(TIMER_KEY, &raw)),
            None => self.backend.remove(TIMER_KEY),
        };
        self.record(result);
    }

    fn record(&mut self, result: Result<(), StorageError>) {
        match result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist tasks; keeping in-memory state");
                self.last_error = Some(e.to_string());
            }
        }
    }
}

fn dedupe_subtask_ids(subtasks: &mut [Subtask]) {
    let mut seen = HashSet::new();
    for subtask in subtasks.iter_mut() {
        if !seen.insert(subtask.id.clone()) {
            subtask.id = new_id();
            seen.insert(subtask.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use chrono::Duration;

    fn store() -> TaskStore<MemoryBlobStore> {
        TaskStore::new(MemoryBlobStore::new())
    }

    fn add(store: &mut TaskStore<MemoryBlobStore>, title: &str) -> String {
        store.add(NewTask::new(title)).unwrap().id.clone()
    }

    #[test]
    fn add_then_reload_keeps_fields() {
        let mut s = store();
        let mut fields = NewTask::new("Write report");
        fields.priority = Priority::High;
        fields.tags = ["work".to_string()].into_iter().collect();
        fields.estimated_time = Some(60);
        let id = s.add(fields).unwrap().id.clone();

        let mut reloaded = TaskStore::new(s.into_backend());
        assert_eq!(reloaded.load().unwrap(), 1);
        let task = reloaded.get(&id).unwrap();
        assert_eq!(task.title, "Write report");
        assert_eq!(task.priority, Priority::High);
        assert!(task.has_tag("work"));
        assert_eq!(task.estimated_time, Some(60));
        assert!(task.updated_at >= task.created_at);
    }

    #[test]
    fn empty_title_is_rejected_before_mutation() {
        let mut s = store();
        assert!(matches!(s.add(NewTask::new("   ")), Err(TaskError::EmptyTitle)));
        assert!(s.is_empty());
        assert!(s.backend().is_empty());
    }

    #[test]
    fn update_of_unknown_id_is_ignored() {
        let mut s = store();
        add(&mut s, "One");
        let patch = TaskPatch {
            title: Some("Other".into()),
            ..Default::default()
        };
        assert!(s.update("missing", patch).unwrap().is_none());
        assert_eq!(s.tasks()[0].title, "One");
    }

    #[test]
    fn toggle_twice_restores_flag() {
        let mut s = store();
        let id = add(&mut s, "Toggle me");
        assert_eq!(s.toggle_completion(&id), Some(true));
        assert_eq!(s.toggle_completion(&id), Some(false));
        assert!(!s.get(&id).unwrap().completed);
        assert_eq!(s.toggle_completion("missing"), None);
    }

    #[test]
    fn delete_unknown_id_keeps_size() {
        let mut s = store();
        add(&mut s, "Keep");
        assert!(!s.delete("nope"));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn completed_partition_covers_collection() {
        let mut s = store();
        let a = add(&mut s, "a");
        add(&mut s, "b");
        add(&mut s, "c");
        s.toggle_completion(&a);

        let done = TaskFilter::default().completed(true);
        let open = TaskFilter::default().completed(false);
        let done_ids: HashSet<_> = s.filter(&done).map(|t| t.id.clone()).collect();
        let open_ids: HashSet<_> = s.filter(&open).map(|t| t.id.clone()).collect();
        assert!(done_ids.is_disjoint(&open_ids));
        assert_eq!(done_ids.len() + open_ids.len(), s.len());
    }

    #[test]
    fn overdue_filter_ignores_completed_tasks() {
        let mut s = store();
        let mut late = NewTask::new("late");
        late.due_date = Some(Utc::now() - Duration::days(2));
        let late_id = s.add(late).unwrap().id.clone();
        let mut late_done = NewTask::new("late but done");
        late_done.due_date = Some(Utc::now() - Duration::days(2));
        let done_id = s.add(late_done).unwrap().id.clone();
        s.toggle_completion(&done_id);
        add(&mut s, "no due date");

        let overdue_filter = TaskFilter::default().overdue(true);
        let overdue: Vec<_> = s.filter(&overdue_filter).collect();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, late_id);
    }

    #[test]
    fn tag_filter_and_search() {
        let mut s = store();
        let mut tagged = NewTask::new("Buy milk");
        tagged.tags = ["errand".to_string()].into_iter().collect();
        s.add(tagged).unwrap();
        add(&mut s, "Call plumber");

        assert_eq!(s.filter(&TaskFilter::default().tag("errand")).count(), 1);
        assert_eq!(s.search("PLUMB").count(), 1);
        assert_eq!(s.search("errand").count(), 1);
        assert_eq!(s.search("  ").count(), 0);
    }

    #[test]
    fn subtasks_are_added_and_toggled() {
        let mut s = store();
        let id = add(&mut s, "Parent");
        let sub_id = s.add_subtask(&id, "Child").unwrap().unwrap().id.clone();
        assert_eq!(s.toggle_subtask_completion(&id, &sub_id), Some(true));
        assert_eq!(s.toggle_subtask_completion(&id, "other"), None);
        assert!(s.add_subtask("missing", "Child").unwrap().is_none());
        assert!(matches!(s.add_subtask(&id, ""), Err(TaskError::EmptySubtaskTitle)));
        assert_eq!(s.get(&id).unwrap().subtasks.len(), 1);
    }

    #[test]
    fn timer_accumulates_whole_minutes() {
        let mut s = store();
        let id = add(&mut s, "Focus");
        let t0 = Utc::now();

        s.start_time_tracking_at(&id, t0).unwrap();
        let tracked = s.stop_time_tracking_at(t0 + Duration::seconds(25 * 60 + 59)).unwrap();
        assert_eq!(tracked.minutes, 25);

        s.start_time_tracking_at(&id, t0).unwrap();
        s.stop_time_tracking_at(t0 + Duration::minutes(10));
        assert_eq!(s.get(&id).unwrap().actual_time, Some(35));
        assert!(s.stop_time_tracking().is_none());
    }

    #[test]
    fn second_timer_is_refused() {
        let mut s = store();
        let a = add(&mut s, "a");
        let b = add(&mut s, "b");
        s.start_time_tracking(&a).unwrap();
        match s.start_time_tracking(&b) {
            Err(TaskError::TimerActive { task_id }) => assert_eq!(task_id, a),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(s.active_timer().unwrap().task_id, a);
    }

    #[test]
    fn timer_survives_reload() {
        let mut s = store();
        let id = add(&mut s, "a");
        s.start_time_tracking(&id).unwrap();
        let mut reloaded = TaskStore::new(s.into_backend());
        reloaded.load().unwrap();
        assert_eq!(reloaded.active_timer().unwrap().task_id, id);
    }

    #[test]
    fn timer_on_unknown_task_is_not_found() {
        let mut s = store();
        assert!(matches!(s.start_time_tracking("x"), Err(TaskError::NotFound(_))));
        assert!(s.active_timer().is_none());
    }

    #[test]
    fn deleting_timed_task_clears_timer() {
        let mut s = store();
        let a = add(&mut s, "a");
        let b = add(&mut s, "b");
        s.start_time_tracking(&a).unwrap();

        assert!(s.delete(&a));
        assert!(s.active_timer().is_none());
        assert!(s.backend().get(TIMER_KEY).unwrap().is_none());
        s.start_time_tracking(&b).unwrap();
        assert_eq!(s.active_timer().unwrap().task_id, b);
    }

    #[test]
    fn deleting_other_task_keeps_timer() {
        let mut s = store();
        let a = add(&mut s, "a");
        let b = add(&mut s, "b");
        s.start_time_tracking(&a).unwrap();
        assert!(s.delete(&b));
        assert_eq!(s.active_timer().unwrap().task_id, a);
    }

    #[test]
    fn timer_for_missing_task_is_dropped() {
        let mut backend = MemoryBlobStore::new();
        backend.set(TASKS_KEY, "[]").unwrap();
        backend
            .set(TIMER_KEY, r#"{"taskId":"gone","startedAt":"2024-03-01T10:00:00Z"}"#)
            .unwrap();
        let mut s = TaskStore::new(backend);
        s.load().unwrap();

        assert!(s.active_timer().is_none());
        assert!(s.stop_time_tracking().is_none());
        assert!(s.backend().get(TIMER_KEY).unwrap().is_none());
        let id = add(&mut s, "fresh");
        s.start_time_tracking(&id).unwrap();
    }

    #[test]
    fn update_leaves_tracked_time_alone() {
        let mut s = store();
        let id = add(&mut s, "Focus");
        let t0 = Utc::now();
        s.start_time_tracking_at(&id, t0).unwrap();
        s.stop_time_tracking_at(t0 + Duration::minutes(40));

        let patch = TaskPatch {
            title: Some("Deep focus".into()),
            estimated_time: Some(Some(10)),
            ..Default::default()
        };
        s.update(&id, patch).unwrap();
        let task = s.get(&id).unwrap();
        assert_eq!(task.title, "Deep focus");
        assert_eq!(task.actual_time, Some(40));
    }

    #[test]
    fn corrupt_blob_fails_open() {
        let mut backend = MemoryBlobStore::new();
        backend.set(TASKS_KEY, "{not json").unwrap();
        let mut s = TaskStore::new(backend);
        assert!(matches!(s.load(), Err(TaskError::ParseError(_))));
        assert!(s.is_empty());
        assert!(s.last_error().is_some());

        add(&mut s, "still usable");
        assert_eq!(s.len(), 1);
        assert!(s.last_error().is_none());
    }

    #[test]
    fn write_failure_keeps_memory_authoritative() {
        let mut s = store();
        s.backend_mut().set_reject_writes(true);
        let id = add(&mut s, "kept");
        assert!(s.last_error().is_some());
        assert!(s.get(&id).is_some());

        s.backend_mut().set_reject_writes(false);
        s.toggle_completion(&id);
        assert!(s.last_error().is_none());
    }

    #[test]
    fn export_import_round_trip_assigns_new_ids() {
        let mut s = store();
        let mut fields = NewTask::new("Exported");
        fields.tags = ["a".to_string(), "b".to_string()].into_iter().collect();
        let original_id = s.add(fields).unwrap().id.clone();
        add(&mut s, "Second");
        let exported = s.export_json().unwrap();

        let mut other = store();
        assert_eq!(other.import_json(&exported).unwrap(), 2);
        assert!(other.get(&original_id).is_none());
        let titles: Vec<_> = other.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Exported", "Second"]);
        assert_eq!(other.tasks()[0].tags.len(), 2);
    }

    #[test]
    fn import_rejects_malformed_json() {
        let mut s = store();
        assert!(matches!(s.import_json("[{]"), Err(TaskError::ParseError(_))));
        assert!(s.is_empty());
    }
}
