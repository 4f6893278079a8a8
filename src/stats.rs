//! Derived views over the task and event collections.
//!
//! Everything here is a pure function of its inputs and is recomputed on
//! every call.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::cmp::Reverse;

use crate::calendar::{in_week, on_date};
use crate::models::{CalendarEvent, EventType, Note, Priority, Task};
use crate::utils::excerpt;

const BRIEF_LIMIT: usize = 5;
const BRIEF_NOTE_DAYS: i64 = 3;
const BRIEF_NOTE_LIMIT: usize = 3;
const BRIEF_NOTE_CHARS: usize = 100;

/// Completed / total, or 0 for an empty collection
pub fn completion_rate(tasks: &[Task]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let completed = tasks.iter().filter(|t| t.completed).count();
    completed as f64 / tasks.len() as f64
}

pub fn overdue_count(tasks: &[Task], now: DateTime<Utc>) -> usize {
    tasks.iter().filter(|t| t.is_overdue(now)).count()
}

/// Total tracked minutes over total estimated minutes, or 0 when nothing is estimated
pub fn productivity_ratio(tasks: &[Task]) -> f64 {
    let estimated = total_estimated(tasks);
    if estimated == 0 {
        return 0.0;
    }
    total_actual(tasks) as f64 / estimated as f64
}

fn total_estimated(tasks: &[Task]) -> u64 {
    tasks.iter().filter_map(|t| t.estimated_time).map(u64::from).sum()
}

fn total_actual(tasks: &[Task]) -> u64 {
    tasks.iter().filter_map(|t| t.actual_time).map(u64::from).sum()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub overdue: usize,
    pub completion_rate: f64,
    pub estimated_minutes: u64,
    pub actual_minutes: u64,
    pub productivity_ratio: f64,
    pub by_priority: PriorityCounts,
}

pub fn task_stats(tasks: &[Task], now: DateTime<Utc>) -> TaskStats {
    let completed = tasks.iter().filter(|t| t.completed).count();
    let mut by_priority = PriorityCounts::default();
    for task in tasks {
        match task.priority {
            Priority::Low => by_priority.low += 1,
            Priority::Medium => by_priority.medium += 1,
            Priority::High => by_priority.high += 1,
        }
    }

    TaskStats {
        total: tasks.len(),
        completed,
        pending: tasks.len() - completed,
        overdue: overdue_count(tasks, now),
        completion_rate: completion_rate(tasks),
        estimated_minutes: total_estimated(tasks),
        actual_minutes: total_actual(tasks),
        productivity_ratio: productivity_ratio(tasks),
        by_priority,
    }
}

/// Counts for one date window: events by type, tasks due in the window by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub events: usize,
    pub meetings: usize,
    pub task_blocks: usize,
    pub reminders: usize,
    pub tasks_due: usize,
    pub tasks_completed: usize,
    pub tasks_pending: usize,
}

fn summarize<'a>(
    tasks: impl Iterator<Item = &'a Task>,
    events: impl Iterator<Item = &'a CalendarEvent>,
) -> WindowSummary {
    let mut summary = WindowSummary::default();
    for event in events {
        summary.events += 1;
        match event.event_type {
            EventType::Event => summary.meetings += 1,
            EventType::Task => summary.task_blocks += 1,
            EventType::Reminder => summary.reminders += 1,
        }
    }
    for task in tasks {
        summary.tasks_due += 1;
        if task.completed {
            summary.tasks_completed += 1;
        } else {
            summary.tasks_pending += 1;
        }
    }
    summary
}

/// Counts by type over a whole event collection
pub fn event_summary(events: &[CalendarEvent]) -> WindowSummary {
    summarize(std::iter::empty(), events.iter())
}

/// Summary of everything that starts or is due on `date` in `tz`
pub fn day_summary<Tz: TimeZone>(
    tasks: &[Task],
    events: &[CalendarEvent],
    date: NaiveDate,
    tz: &Tz,
) -> WindowSummary {
    summarize(
        tasks.iter().filter(|t| t.due_date.is_some_and(|d| on_date(d, date, tz))),
        events.iter().filter(|e| on_date(e.start, date, tz)),
    )
}

pub fn today_summary<Tz: TimeZone>(
    tasks: &[Task],
    events: &[CalendarEvent],
    now: DateTime<Utc>,
    tz: &Tz,
) -> WindowSummary {
    day_summary(tasks, events, now.with_timezone(tz).date_naive(), tz)
}

/// Summary of everything that starts or is due in `[week_start, week_start + 7 days)`
pub fn week_summary(tasks: &[Task], events: &[CalendarEvent], week_start: DateTime<Utc>) -> WindowSummary {
    summarize(
        tasks.iter().filter(|t| t.due_date.is_some_and(|d| in_week(d, week_start))),
        events.iter().filter(|e| in_week(e.start, week_start)),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BriefTask {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
}

impl From<&Task> for BriefTask {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            priority: task.priority,
            due_date: task.due_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BriefEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BriefNote {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBrief {
    pub date: NaiveDate,
    /// Open tasks due today, highest priority first
    pub top_tasks: Vec<BriefTask>,
    /// Events still to start today
    pub time_blocks: Vec<BriefEvent>,
    /// Open tasks that were due before today
    pub carry_over: Vec<BriefTask>,
    /// Notes written in the last three days, newest first
    pub recent_notes: Vec<BriefNote>,
}

/// Plan for the calendar day containing `now` in `tz`
pub fn daily_brief<Tz: TimeZone>(
    tasks: &[Task],
    events: &[CalendarEvent],
    notes: &[Note],
    now: DateTime<Utc>,
    tz: &Tz,
) -> DailyBrief {
    let today = now.with_timezone(tz).date_naive();

    let mut top: Vec<&Task> = tasks
        .iter()
        .filter(|t| !t.completed && t.due_date.is_some_and(|d| on_date(d, today, tz)))
        .collect();
    top.sort_by_key(|t| (Reverse(t.priority), t.due_date));

    let mut blocks: Vec<&CalendarEvent> = events
        .iter()
        .filter(|e| e.start >= now && on_date(e.start, today, tz))
        .collect();
    blocks.sort_by_key(|e| e.start);

    let mut carry: Vec<&Task> = tasks
        .iter()
        .filter(|t| !t.completed && t.due_date.is_some_and(|d| d.with_timezone(tz).date_naive() < today))
        .collect();
    carry.sort_by_key(|t| t.due_date);

    let since = now - Duration::days(BRIEF_NOTE_DAYS);
    let mut recent: Vec<&Note> = notes.iter().filter(|n| n.created_at >= since).collect();
    recent.sort_by_key(|n| Reverse(n.created_at));

    DailyBrief {
        date: today,
        top_tasks: top.into_iter().take(BRIEF_LIMIT).map(BriefTask::from).collect(),
        time_blocks: blocks
            .into_iter()
            .take(BRIEF_LIMIT)
            .map(|e| BriefEvent {
                id: e.id.clone(),
                title: e.title.clone(),
                start: e.start,
                end: e.end,
            })
            .collect(),
        carry_over: carry.into_iter().map(BriefTask::from).collect(),
        recent_notes: recent
            .into_iter()
            .take(BRIEF_NOTE_LIMIT)
            .map(|n| BriefNote {
                id: n.id.clone(),
                title: n.title.clone(),
                excerpt: excerpt(&n.content, BRIEF_NOTE_CHARS),
                created_at: n.created_at,
            })
            .collect(),
    }
}
