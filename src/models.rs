use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            // The remote API also knows "urgent"; it folds into high.
            "high" | "urgent" => Ok(Priority::High),
            other => Err(format!("Unknown priority '{}'. Use low, medium or high.", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Subtask {
    pub fn new(title: String) -> Self {
        Self {
            id: new_id(),
            title,
            completed: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Estimated duration in minutes
    #[serde(default)]
    pub estimated_time: Option<u32>,
    /// Tracked duration in minutes
    #[serde(default)]
    pub actual_time: Option<u32>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub project: Option<String>,
}

impl Task {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_date.is_some_and(|due| due < now)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Caller-supplied fields for a new task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub estimated_time: Option<u32>,
    pub category: Option<String>,
    pub project: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        Task {
            id: new_id(),
            title: self.title.trim().to_string(),
            description: self.description,
            completed: false,
            priority: self.priority,
            due_date: self.due_date,
            created_at: now,
            updated_at: now,
            tags: self.tags,
            subtasks: Vec::new(),
            estimated_time: self.estimated_time,
            actual_time: None,
            category: self.category.unwrap_or_else(default_category),
            project: self.project,
        }
    }
}

/// Partial update for a task. `None` leaves a field untouched; for nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub tags: Option<BTreeSet<String>>,
    pub estimated_time: Option<Option<u32>>,
    pub category: Option<String>,
    pub project: Option<Option<String>>,
}

impl TaskPatch {
    pub fn apply(self, task: &mut Task) {
        if let Some(t) = self.title { task.title = t.trim().to_string(); }
        if let Some(d) = self.description { task.description = d; }
        if let Some(c) = self.completed { task.completed = c; }
        if let Some(p) = self.priority { task.priority = p; }
        if let Some(d) = self.due_date { task.due_date = d; }
        if let Some(t) = self.tags { task.tags = t; }
        if let Some(e) = self.estimated_time { task.estimated_time = e; }
        if let Some(c) = self.category { task.category = c; }
        if let Some(p) = self.project { task.project = p; }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Event,
    Task,
    Reminder,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Event => "event",
            EventType::Task => "task",
            EventType::Reminder => "reminder",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "event" => Ok(EventType::Event),
            "task" => Ok(EventType::Task),
            "reminder" => Ok(EventType::Reminder),
            other => Err(format!("Unknown event type '{}'. Use event, task or reminder.", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(format!(
                "Unknown frequency '{}'. Supported: daily, weekly, monthly, yearly.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            end_date: None,
        }
    }

    pub fn until(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    /// Shared by every instance produced from one recurrence expansion
    #[serde(default)]
    pub series_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub event_type: EventType,
    pub priority: Priority,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            start,
            end,
            description: None,
            location: None,
            attendees: Vec::new(),
            event_type: EventType::Event,
            priority: Priority::Medium,
        }
    }

    pub(crate) fn into_event(
        self,
        now: DateTime<Utc>,
        recurrence: Option<RecurrenceRule>,
        series_id: Option<String>,
    ) -> CalendarEvent {
        CalendarEvent {
            id: new_id(),
            title: self.title.trim().to_string(),
            start: self.start,
            end: self.end,
            description: self.description,
            location: self.location,
            attendees: self.attendees,
            event_type: self.event_type,
            priority: self.priority,
            recurrence,
            series_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub description: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub attendees: Option<Vec<String>>,
    pub event_type: Option<EventType>,
    pub priority: Option<Priority>,
}

impl EventPatch {
    pub fn apply(self, event: &mut CalendarEvent) {
        if let Some(t) = self.title { event.title = t.trim().to_string(); }
        if let Some(s) = self.start { event.start = s; }
        if let Some(e) = self.end { event.end = e; }
        if let Some(d) = self.description { event.description = d; }
        if let Some(l) = self.location { event.location = l; }
        if let Some(a) = self.attendees { event.attendees = a; }
        if let Some(t) = self.event_type { event.event_type = t; }
        if let Some(p) = self.priority { event.priority = p; }
    }
}

/// Title given to a note created without one
pub const DEFAULT_NOTE_TITLE: &str = "New Note";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub tags: BTreeSet<String>,
}

impl NewNote {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub(crate) fn into_note(self, now: DateTime<Utc>) -> Note {
        let title = match self.title.trim() {
            "" => DEFAULT_NOTE_TITLE.to_string(),
            t => t.to_string(),
        };
        Note {
            id: new_id(),
            title,
            content: self.content,
            summary: self.summary,
            tags: self.tags,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
}

impl NotePatch {
    pub fn apply(self, note: &mut Note) {
        if let Some(t) = self.title {
            note.title = match t.trim() {
                "" => DEFAULT_NOTE_TITLE.to_string(),
                t => t.to_string(),
            };
        }
        if let Some(c) = self.content { note.content = c; }
        if let Some(s) = self.summary { note.summary = s; }
        if let Some(t) = self.tags { note.tags = t; }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_interval() -> u32 {
    1
}
