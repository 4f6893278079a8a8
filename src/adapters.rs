//! Mapping between the remote API's record shapes and the canonical models.
//!
//! The remote side names timestamps `start_at` / `end_at` / `due_at` (older
//! payloads use `startDate`, `due`, ...). Those names stop here; everything
//! past this module sees only [`NewTask`] and [`NewEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EventType, NewEvent, NewTask, Priority, Task};
use crate::utils::parse_timestamp;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("Event '{0}' must end after it starts")]
    InvalidTimeRange(String),
    #[error("Title must not be empty")]
    EmptyTitle,
}

/// Task as exchanged with the remote API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "due", alias = "due_date", alias = "dueDate")]
    pub due_at: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "estimatedTime", skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub completed: bool,
}

impl ApiTask {
    /// Convert to canonical task fields. An unknown priority becomes medium;
    /// an unparseable due date is an error.
    pub fn into_new_task(self) -> Result<NewTask, AdapterError> {
        if self.title.trim().is_empty() {
            return Err(AdapterError::EmptyTitle);
        }
        let due_date = match self.due_at.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| AdapterError::InvalidTimestamp(raw.to_string()))?),
        };
        let priority = self
            .priority
            .as_deref()
            .and_then(|p| p.parse::<Priority>().ok())
            .unwrap_or_default();

        Ok(NewTask {
            title: self.title.trim().to_string(),
            description: self.description.filter(|d| !d.trim().is_empty()),
            priority,
            due_date,
            estimated_time: self.estimated_minutes,
            ..Default::default()
        })
    }
}

impl From<&Task> for ApiTask {
    fn from(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            title: task.title.clone(),
            description: task.description.clone(),
            due_at: task.due_date.map(|d| d.to_rfc3339()),
            priority: Some(task.priority.to_string()),
            estimated_minutes: task.estimated_time,
            completed: task.completed,
        }
    }
}

/// Event or schedule slot as exchanged with the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEvent {
    #[serde(default, alias = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub title: String,
    #[serde(alias = "startDate", alias = "start")]
    pub start_at: String,
    #[serde(alias = "endDate", alias = "end")]
    pub end_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A proposed time slot for a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSuggestion {
    pub task_id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScheduleSuggestion {
    /// Calendar event of type `task` for this slot
    pub fn to_new_event(&self) -> NewEvent {
        let mut event = NewEvent::new(self.title.clone(), self.start, self.end);
        event.event_type = EventType::Task;
        event
    }
}

impl ApiEvent {
    fn times(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), AdapterError> {
        let start = parse_timestamp(&self.start_at)
            .ok_or_else(|| AdapterError::InvalidTimestamp(self.start_at.clone()))?;
        let end = parse_timestamp(&self.end_at)
            .ok_or_else(|| AdapterError::InvalidTimestamp(self.end_at.clone()))?;
        if end <= start {
            return Err(AdapterError::InvalidTimeRange(self.title.clone()));
        }
        Ok((start, end))
    }

    pub fn into_new_event(self) -> Result<NewEvent, AdapterError> {
        if self.title.trim().is_empty() {
            return Err(AdapterError::EmptyTitle);
        }
        let (start, end) = self.times()?;
        let mut event = NewEvent::new(self.title.trim(), start, end);
        event.description = self.description;
        event.location = self.location;
        Ok(event)
    }

    pub fn into_suggestion(self) -> Result<ScheduleSuggestion, AdapterError> {
        let (start, end) = self.times()?;
        Ok(ScheduleSuggestion {
            task_id: self.task_id,
            title: self.title,
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn task_accepts_every_due_field_name() {
        for raw in [
            r#"{"title": "A", "due": "2024-05-01", "priority": "urgent"}"#,
            r#"{"title": "A", "due_at": "2024-05-01T00:00:00Z"}"#,
            r#"{"title": "A", "dueDate": "2024-05-01T00:00:00.000Z"}"#,
        ] {
            let api: ApiTask = serde_json::from_str(raw).unwrap();
            let task = api.into_new_task().unwrap();
            assert_eq!(task.due_date, Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        }
    }

    #[test]
    fn unknown_priority_defaults_to_medium() {
        let api = ApiTask {
            title: "Plan".into(),
            priority: Some("whenever".into()),
            ..Default::default()
        };
        assert_eq!(api.into_new_task().unwrap().priority, Priority::Medium);
    }

    #[test]
    fn bad_due_date_is_reported() {
        let api = ApiTask {
            title: "Plan".into(),
            due_at: Some("next tuesday".into()),
            ..Default::default()
        };
        assert_eq!(
            api.into_new_task(),
            Err(AdapterError::InvalidTimestamp("next tuesday".into()))
        );
    }

    #[test]
    fn event_accepts_both_naming_styles() {
        let snake: ApiEvent = serde_json::from_str(
            r#"{"title": "Sync", "start_at": "2024-01-01T09:00:00Z", "end_at": "2024-01-01T10:00:00Z"}"#,
        )
        .unwrap();
        let camel: ApiEvent = serde_json::from_str(
            r#"{"title": "Sync", "startDate": "2024-01-01T09:00:00Z", "endDate": "2024-01-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(snake, camel);
        let event = snake.into_new_event().unwrap();
        assert_eq!(event.end - event.start, chrono::Duration::hours(1));
    }

    #[test]
    fn inverted_slot_is_rejected() {
        let api = ApiEvent {
            task_id: None,
            title: "Backwards".into(),
            start_at: "2024-01-01T10:00:00Z".into(),
            end_at: "2024-01-01T09:00:00Z".into(),
            description: None,
            location: None,
        };
        assert!(matches!(api.into_suggestion(), Err(AdapterError::InvalidTimeRange(_))));
    }
}
