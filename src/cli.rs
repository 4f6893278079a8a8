use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use thiserror::Error;

use crate::adapters::{AdapterError, ApiEvent};
use crate::assistant::{AssistantClient, AssistantError, Reply, ReplySource};
use crate::calendar::{start_of_day, CalendarError, EventStore};
use crate::config::Config;
use crate::models::{
    CalendarEvent, EventType, Frequency, NewEvent, NewNote, NewTask, Note, NotePatch, Priority, RecurrenceRule, Task,
    TaskPatch,
};
use crate::notes::{NoteError, NoteFilter, NoteStore};
use crate::reminders::{LogNotifier, ReminderWatcher};
use crate::stats;
use crate::storage::{BlobStore, StorageError};
use crate::tasks::{TaskError, TaskFilter, TaskStore};
use crate::utils::{excerpt, parse_date, parse_tags, parse_timestamp_in};

const SEARCH_NOTE_LIMIT: usize = 20;
const SEARCH_TASK_LIMIT: usize = 10;
const SEARCH_EXCERPT_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "planboard")]
#[command(about = "Tasks, calendar and daily planning from the terminal")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long, global = true)]
    pub dev: bool,

    /// Keep all data in memory for this run only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Manage calendar events
    #[command(subcommand)]
    Event(EventCommand),
    /// Manage notes
    #[command(subcommand)]
    Note(NoteCommand),
    /// Search notes and tasks
    Search { query: String },
    /// Show task statistics and today's / this week's summary
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Show the daily brief
    Brief {
        #[arg(long)]
        json: bool,
    },
    /// Use the assistant service (falls back to local heuristics)
    #[command(subcommand)]
    Assistant(AssistantCommand),
    /// Announce upcoming events until interrupted
    Watch {
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Add a new task
    Add(TaskFields),
    /// List tasks
    List {
        /// Include completed tasks
        #[arg(long)]
        all: bool,
        /// Only completed tasks
        #[arg(long, conflicts_with = "all")]
        done: bool,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Only overdue tasks
        #[arg(long)]
        overdue: bool,
    },
    /// Toggle a task's completion
    Done { id: String },
    /// Change fields of a task
    Edit {
        id: String,
        #[command(flatten)]
        fields: TaskEdit,
    },
    /// Delete a task
    Rm { id: String },
    /// Manage subtasks
    #[command(subcommand)]
    Subtask(SubtaskCommand),
    /// Start the time-tracking timer on a task
    Start { id: String },
    /// Stop the running timer and record the elapsed minutes
    Stop,
    /// Search titles, descriptions and tags
    Search { query: String },
    /// Export all tasks as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import tasks from an exported JSON file
    Import { path: PathBuf },
}

#[derive(Args)]
pub struct TaskFields {
    /// Task title
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    /// Due date or timestamp (YYYY-MM-DD, YYYY-MM-DD HH:MM, RFC 3339)
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long, default_value = "medium")]
    pub priority: Priority,
    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,
    /// Estimated minutes
    #[arg(long)]
    pub estimate: Option<u32>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub project: Option<String>,
}

#[derive(Args)]
pub struct TaskEdit {
    #[arg(long)]
    pub title: Option<String>,
    /// New description ("none" clears it)
    #[arg(long)]
    pub description: Option<String>,
    /// New due date ("none" clears it)
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub priority: Option<Priority>,
    /// Replace tags with this comma-separated list
    #[arg(long)]
    pub tags: Option<String>,
    #[arg(long)]
    pub estimate: Option<u32>,
    #[arg(long)]
    pub category: Option<String>,
    /// New project ("none" clears it)
    #[arg(long)]
    pub project: Option<String>,
}

#[derive(Subcommand)]
pub enum SubtaskCommand {
    Add { task_id: String, title: String },
    Toggle { task_id: String, subtask_id: String },
}

#[derive(Subcommand)]
pub enum EventCommand {
    /// Add an event, optionally repeating
    Add {
        title: String,
        /// Start (YYYY-MM-DD HH:MM or RFC 3339)
        #[arg(long)]
        start: String,
        /// End; defaults to start plus --minutes
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 60)]
        minutes: u32,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long = "type", default_value = "event")]
        event_type: EventType,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        /// Repeat daily, weekly, monthly or yearly
        #[arg(long)]
        repeat: Option<Frequency>,
        #[arg(long, default_value_t = 1)]
        interval: u32,
        /// Last date a repetition may start on
        #[arg(long, requires = "repeat")]
        until: Option<String>,
    },
    /// List events for a day, week or month (default: today)
    List {
        /// Day to show (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        /// Seven days starting at this date
        #[arg(long, conflicts_with = "date")]
        week: Option<String>,
        /// Month to show (YYYY-MM)
        #[arg(long, conflicts_with_all = ["date", "week"])]
        month: Option<String>,
    },
    /// Delete an event
    Rm {
        id: String,
        /// Delete every instance of the event's recurring series
        #[arg(long)]
        series: bool,
    },
    /// Create a one-hour event from a task
    FromTask { task_id: String },
    /// Import events from a JSON array (`start_at`/`end_at` or `startDate`/`endDate`)
    Import { path: PathBuf },
}

#[derive(Subcommand)]
pub enum NoteCommand {
    /// Add a note
    Add {
        title: String,
        #[arg(long)]
        content: Option<String>,
        /// Read the content from a file
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Store an assistant summary with the note
        #[arg(long)]
        summarize: bool,
    },
    /// List notes, newest first
    List {
        /// Match title or content
        #[arg(long)]
        query: Option<String>,
        /// Require a tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print a note
    Show { id: String },
    /// Change fields of a note
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Replace tags with this comma-separated list
        #[arg(long)]
        tags: Option<String>,
    },
    /// Delete a note
    Rm { id: String },
}

#[derive(Subcommand)]
pub enum AssistantCommand {
    /// Summarize text
    Summarize(TextInput),
    /// Extract tasks from free text
    Extract {
        #[command(flatten)]
        input: TextInput,
        /// Add the extracted tasks to the task list
        #[arg(long)]
        add: bool,
    },
    /// Suggest tags for text
    Tags(TextInput),
    /// Propose time slots for open tasks
    Schedule {
        /// Add the proposed slots to the calendar
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Args)]
pub struct TextInput {
    /// Text to process; read from --file or stdin when omitted
    pub text: Option<String>,
    #[arg(long, conflicts_with = "text")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Task error: {0}")]
    TaskError(#[from] TaskError),
    #[error("Calendar error: {0}")]
    CalendarError(#[from] CalendarError),
    #[error("Note error: {0}")]
    NoteError(#[from] NoteError),
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Assistant error: {0}")]
    AssistantError(#[from] AssistantError),
    #[error("Invalid record: {0}")]
    AdapterError(#[from] AdapterError),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Failed to parse date: {0}")]
    DateParseError(String),
    #[error("No {kind} matches '{id}'")]
    NotFound { kind: &'static str, id: String },
    #[error("'{id}' matches more than one {kind}; use more characters")]
    AmbiguousId { kind: &'static str, id: String },
}

/// Everything a command needs: the stores, the assistant client, the loaded
/// configuration and the zone that decides what "today" is
pub struct Context<S: BlobStore, Tz: TimeZone = Local> {
    pub tasks: TaskStore<S>,
    pub events: EventStore<S>,
    pub notes: NoteStore<S>,
    pub assistant: AssistantClient,
    pub config: Config,
    pub tz: Tz,
}

pub fn run<S: BlobStore, Tz: TimeZone>(command: Commands, ctx: &mut Context<S, Tz>) -> Result<(), CliError> {
    let now = Utc::now();
    match command {
        Commands::Task(cmd) => handle_task(cmd, &mut ctx.tasks, &ctx.tz)?,
        Commands::Event(cmd) => handle_event(cmd, &mut ctx.events, &ctx.tasks, &ctx.tz)?,
        Commands::Note(cmd) => handle_note(cmd, ctx)?,
        Commands::Search { query } => handle_search(&query, &ctx.tasks, &ctx.notes, &ctx.tz),
        Commands::Stats { json } => handle_stats(&ctx.tasks, &ctx.events, json, now, &ctx.tz)?,
        Commands::Brief { json } => handle_brief(&ctx.tasks, &ctx.events, &ctx.notes, json, now, &ctx.tz)?,
        Commands::Assistant(cmd) => handle_assistant(cmd, ctx)?,
        Commands::Watch { once } => handle_watch(ctx, once),
    }
    report_persistence(ctx.tasks.last_error(), "tasks");
    report_persistence(ctx.events.last_error(), "events");
    report_persistence(ctx.notes.last_error(), "notes");
    Ok(())
}

fn report_persistence(error: Option<&str>, what: &str) {
    if let Some(e) = error {
        eprintln!("Warning: {} could not be saved: {}", what, e);
    }
}

/// Naive input is wall-clock time in `tz`
fn parse_when<Tz: TimeZone>(raw: &str, tz: &Tz) -> Result<DateTime<Utc>, CliError> {
    parse_timestamp_in(raw, tz).ok_or_else(|| CliError::DateParseError(format!("Invalid date '{}'", raw)))
}

/// `ts` formatted as wall-clock time in `tz`
fn local<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz, fmt: &str) -> String {
    ts.with_timezone(tz).naive_local().format(fmt).to_string()
}

fn clears(raw: &str) -> bool {
    raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("none")
}

/// Resolve a full id or a unique prefix of one
pub fn resolve_id<'a>(
    ids: impl IntoIterator<Item = &'a str>,
    prefix: &str,
    kind: &'static str,
) -> Result<String, CliError> {
    let prefix = prefix.trim();
    let mut found: Option<&str> = None;
    for id in ids {
        if id == prefix {
            return Ok(id.to_string());
        }
        if !prefix.is_empty() && id.starts_with(prefix) {
            if found.is_some() {
                return Err(CliError::AmbiguousId { kind, id: prefix.to_string() });
            }
            found = Some(id);
        }
    }
    found
        .map(str::to_string)
        .ok_or_else(|| CliError::NotFound { kind, id: prefix.to_string() })
}

fn task_id<S: BlobStore>(store: &TaskStore<S>, prefix: &str) -> Result<String, CliError> {
    resolve_id(store.tasks().iter().map(|t| t.id.as_str()), prefix, "task")
}

fn note_id<S: BlobStore>(store: &NoteStore<S>, prefix: &str) -> Result<String, CliError> {
    resolve_id(store.notes().iter().map(|n| n.id.as_str()), prefix, "note")
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_task<Tz: TimeZone>(task: &Task, now: DateTime<Utc>, tz: &Tz) -> String {
    let mut line = format!(
        "[{}] {}  {} ({})",
        if task.completed { "x" } else { " " },
        short_id(&task.id),
        task.title,
        task.priority
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!("  due {}", local(due, tz, "%Y-%m-%d %H:%M")));
        if task.is_overdue(now) {
            line.push_str(" OVERDUE");
        }
    }
    if !task.tags.is_empty() {
        let tags: Vec<&str> = task.tags.iter().map(String::as_str).collect();
        line.push_str(&format!("  #{}", tags.join(" #")));
    }
    if !task.subtasks.is_empty() {
        let done = task.subtasks.iter().filter(|s| s.completed).count();
        line.push_str(&format!("  [{}/{}]", done, task.subtasks.len()));
    }
    line
}

fn format_event<Tz: TimeZone>(event: &CalendarEvent, tz: &Tz) -> String {
    let mut line = format!(
        "{}  {} - {}  {} ({})",
        short_id(&event.id),
        local(event.start, tz, "%Y-%m-%d %H:%M"),
        local(event.end, tz, "%H:%M"),
        event.title,
        event.event_type
    );
    if let Some(location) = &event.location {
        line.push_str(&format!(" @ {}", location));
    }
    if event.series_id.is_some() {
        line.push_str(" (recurring)");
    }
    line
}

fn format_note<Tz: TimeZone>(note: &Note, tz: &Tz) -> String {
    let mut line = format!(
        "{}  {}  {}",
        short_id(&note.id),
        local(note.created_at, tz, "%Y-%m-%d %H:%M"),
        note.title
    );
    if !note.tags.is_empty() {
        let tags: Vec<&str> = note.tags.iter().map(String::as_str).collect();
        line.push_str(&format!("  #{}", tags.join(" #")));
    }
    line
}

pub fn handle_task<S: BlobStore, Tz: TimeZone>(
    cmd: TaskCommand,
    store: &mut TaskStore<S>,
    tz: &Tz,
) -> Result<(), CliError> {
    let now = Utc::now();
    match cmd {
        TaskCommand::Add(fields) => {
            let due_date = fields.due.as_deref().map(|d| parse_when(d, tz)).transpose()?;
            let new_task = NewTask {
                title: fields.title,
                description: fields.description,
                priority: fields.priority,
                due_date,
                tags: fields.tags.as_deref().map(parse_tags).unwrap_or_default().into_iter().collect(),
                estimated_time: fields.estimate,
                category: fields.category,
                project: fields.project,
            };
            let task = store.add(new_task)?;
            println!("Task created successfully (ID: {})", task.id);
        }
        TaskCommand::List { all, done, priority, tag, category, project, overdue } => {
            let mut filter = TaskFilter {
                priority,
                tag,
                category,
                project,
                ..Default::default()
            };
            if done {
                filter = filter.completed(true);
            } else if !all {
                filter = filter.completed(false);
            }
            if overdue {
                filter = filter.overdue(true);
            }
            let mut count = 0;
            for task in store.filter(&filter) {
                println!("{}", format_task(task, now, tz));
                count += 1;
            }
            if count == 0 {
                println!("No tasks.");
            }
        }
        TaskCommand::Done { id } => {
            let id = task_id(store, &id)?;
            if let Some(completed) = store.toggle_completion(&id) {
                println!("Task {} marked {}", short_id(&id), if completed { "done" } else { "open" });
            }
        }
        TaskCommand::Edit { id, fields } => {
            let id = task_id(store, &id)?;
            let patch = TaskPatch {
                title: fields.title,
                description: fields.description.map(|d| (!clears(&d)).then_some(d)),
                due_date: match fields.due {
                    None => None,
                    Some(d) if clears(&d) => Some(None),
                    Some(d) => Some(Some(parse_when(&d, tz)?)),
                },
                priority: fields.priority,
                tags: fields.tags.map(|t| parse_tags(&t).into_iter().collect()),
                estimated_time: fields.estimate.map(Some),
                category: fields.category,
                project: fields.project.map(|p| (!clears(&p)).then_some(p)),
                ..Default::default()
            };
            if let Some(task) = store.update(&id, patch)? {
                println!("{}", format_task(task, now, tz));
            }
        }
        TaskCommand::Rm { id } => {
            let id = task_id(store, &id)?;
            store.delete(&id);
            println!("Task {} deleted", short_id(&id));
        }
        TaskCommand::Subtask(SubtaskCommand::Add { task_id: parent, title }) => {
            let parent = task_id(store, &parent)?;
            if let Some(subtask) = store.add_subtask(&parent, &title)? {
                println!("Subtask created (ID: {})", subtask.id);
            }
        }
        TaskCommand::Subtask(SubtaskCommand::Toggle { task_id: parent, subtask_id }) => {
            let parent = task_id(store, &parent)?;
            let subtask_ids = store
                .get(&parent)
                .map(|t| t.subtasks.iter().map(|s| s.id.clone()).collect::<Vec<_>>())
                .unwrap_or_default();
            let subtask_id = resolve_id(subtask_ids.iter().map(String::as_str), &subtask_id, "subtask")?;
            if let Some(completed) = store.toggle_subtask_completion(&parent, &subtask_id) {
                println!("Subtask {} marked {}", short_id(&subtask_id), if completed { "done" } else { "open" });
            }
        }
        TaskCommand::Start { id } => {
            let id = task_id(store, &id)?;
            store.start_time_tracking(&id)?;
            println!("Timer started for {}", short_id(&id));
        }
        TaskCommand::Stop => match store.stop_time_tracking() {
            Some(tracked) => println!(
                "Recorded {} min on {}",
                tracked.minutes,
                short_id(&tracked.task_id)
            ),
            None => println!("No timer running."),
        },
        TaskCommand::Search { query } => {
            let mut count = 0;
            for task in store.search(&query) {
                println!("{}", format_task(task, now, tz));
                count += 1;
            }
            if count == 0 {
                println!("No tasks match '{}'.", query);
            }
        }
        TaskCommand::Export { output } => {
            let json = store.export_json()?;
            match output {
                Some(path) => {
                    fs::write(&path, json)?;
                    println!("Exported {} tasks to {}", store.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
        TaskCommand::Import { path } => {
            let raw = fs::read_to_string(&path)?;
            let count = store.import_json(&raw)?;
            println!("Imported {} tasks", count);
        }
    }
    Ok(())
}

pub fn handle_event<S: BlobStore, Tz: TimeZone>(
    cmd: EventCommand,
    events: &mut EventStore<S>,
    tasks: &TaskStore<S>,
    tz: &Tz,
) -> Result<(), CliError> {
    match cmd {
        EventCommand::Add {
            title,
            start,
            end,
            minutes,
            description,
            location,
            event_type,
            priority,
            repeat,
            interval,
            until,
        } => {
            let start = parse_when(&start, tz)?;
            let end = match end {
                Some(end) => parse_when(&end, tz)?,
                None => start + Duration::minutes(i64::from(minutes)),
            };
            let mut fields = NewEvent::new(title, start, end);
            fields.description = description;
            fields.location = location;
            fields.event_type = event_type;
            fields.priority = priority;

            match repeat {
                Some(frequency) => {
                    let mut rule = RecurrenceRule::new(frequency, interval);
                    if let Some(until) = until {
                        rule = rule.until(parse_when(&until, tz)?);
                    }
                    let created = events.create_recurring_event(fields, rule)?;
                    println!("Created {} occurrences", created.len());
                    if let Some(series) = created.first().and_then(|e| e.series_id.as_deref()) {
                        println!("Series ID: {}", series);
                    }
                }
                None => {
                    let event = events.add(fields)?;
                    println!("Event created successfully (ID: {})", event.id);
                }
            }
        }
        EventCommand::List { date, week, month } => {
            let mut listed = if let Some(week) = week {
                let day = parse_date(&week).map_err(|e| CliError::DateParseError(format!("{}: {}", week, e)))?;
                events.events_for_week(start_of_day(day, tz))
            } else if let Some(month) = month {
                let first = parse_date(&format!("{}-01", month.trim()))
                    .map_err(|e| CliError::DateParseError(format!("{}: {}", month, e)))?;
                events.events_for_month(first.year(), first.month(), tz)
            } else {
                let day = match date {
                    Some(d) => parse_date(&d).map_err(|e| CliError::DateParseError(format!("{}: {}", d, e)))?,
                    None => Utc::now().with_timezone(tz).date_naive(),
                };
                events.events_for_date(day, tz)
            };
            listed.sort_by_key(|e| e.start);
            if listed.is_empty() {
                println!("No events.");
            }
            for event in listed {
                println!("{}", format_event(event, tz));
            }
        }
        EventCommand::Rm { id, series } => {
            let id = resolve_id(events.events().iter().map(|e| e.id.as_str()), &id, "event")?;
            let series_id = events.get(&id).and_then(|e| e.series_id.clone());
            match series_id {
                Some(series_id) if series => {
                    let removed = events.delete_series(&series_id);
                    println!("Deleted {} occurrences", removed);
                }
                _ => {
                    events.delete(&id);
                    println!("Event {} deleted", short_id(&id));
                }
            }
        }
        EventCommand::FromTask { task_id: prefix } => {
            let id = task_id(tasks, &prefix)?;
            let task = tasks.get(&id).ok_or(CliError::NotFound { kind: "task", id: prefix })?;
            let event = events.add_from_task(task)?;
            println!("{}", format_event(event, tz));
        }
        EventCommand::Import { path } => {
            let raw = fs::read_to_string(&path)?;
            let records: Vec<ApiEvent> = serde_json::from_str(&raw)?;
            let mut imported = 0;
            for record in records {
                let title = record.title.clone();
                let added = record
                    .into_new_event()
                    .map_err(CliError::from)
                    .and_then(|fields| events.add(fields).map_err(CliError::from));
                match added {
                    Ok(_) => imported += 1,
                    Err(e) => eprintln!("Skipped '{}': {}", title, e),
                }
            }
            println!("Imported {} events", imported);
        }
    }
    Ok(())
}

pub fn handle_note<S: BlobStore, Tz: TimeZone>(cmd: NoteCommand, ctx: &mut Context<S, Tz>) -> Result<(), CliError> {
    match cmd {
        NoteCommand::Add { title, content, file, tags, summarize } => {
            let content = match (content, file) {
                (Some(text), _) => text,
                (None, Some(path)) => fs::read_to_string(path)?,
                (None, None) => String::new(),
            };
            let summary = if summarize && !content.trim().is_empty() {
                let reply = ctx.assistant.summarize(&content)?;
                note_source(&reply);
                Some(reply.value)
            } else {
                None
            };
            let mut fields = NewNote::new(title, content);
            fields.summary = summary;
            fields.tags = tags.as_deref().map(parse_tags).unwrap_or_default().into_iter().collect();
            let note = ctx.notes.add(fields)?;
            println!("Note created successfully (ID: {})", note.id);
        }
        NoteCommand::List { query, tags } => {
            let filter = NoteFilter {
                query,
                tags: tags.iter().flat_map(|t| parse_tags(t)).collect(),
            };
            let listed = ctx.notes.filter(&filter);
            if listed.is_empty() {
                println!("No notes.");
            }
            for note in listed {
                println!("{}", format_note(note, &ctx.tz));
            }
        }
        NoteCommand::Show { id } => {
            let id = note_id(&ctx.notes, &id)?;
            if let Some(note) = ctx.notes.get(&id) {
                println!("{}", format_note(note, &ctx.tz));
                if let Some(summary) = &note.summary {
                    println!("\nSummary: {}", summary);
                }
                if !note.content.is_empty() {
                    println!("\n{}", note.content);
                }
            }
        }
        NoteCommand::Edit { id, title, content, tags } => {
            let id = note_id(&ctx.notes, &id)?;
            let patch = NotePatch {
                title,
                content,
                tags: tags.map(|t| parse_tags(&t).into_iter().collect()),
                ..Default::default()
            };
            if let Some(note) = ctx.notes.update(&id, patch) {
                println!("{}", format_note(note, &ctx.tz));
            }
        }
        NoteCommand::Rm { id } => {
            let id = note_id(&ctx.notes, &id)?;
            ctx.notes.delete(&id);
            println!("Note {} deleted", short_id(&id));
        }
    }
    Ok(())
}

/// Notes by title or content, then tasks by title, description or tag
pub fn handle_search<S: BlobStore, Tz: TimeZone>(
    query: &str,
    tasks: &TaskStore<S>,
    notes: &NoteStore<S>,
    tz: &Tz,
) {
    let found_notes = notes.filter(&NoteFilter::default().query(query));
    let found_tasks: Vec<&Task> = tasks.search(query).take(SEARCH_TASK_LIMIT).collect();
    if found_notes.is_empty() && found_tasks.is_empty() {
        println!("Nothing matches '{}'.", query);
        return;
    }
    for note in found_notes.into_iter().take(SEARCH_NOTE_LIMIT) {
        println!("note  {}", format_note(note, tz));
        if !note.content.is_empty() {
            println!("      {}", excerpt(&note.content, SEARCH_EXCERPT_CHARS));
        }
    }
    let now = Utc::now();
    for task in found_tasks {
        println!("task  {}", format_task(task, now, tz));
    }
}

/// Midnight at the start of the Monday of the week containing `now` in `tz`
fn week_start<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let today = now.with_timezone(tz).date_naive();
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    start_of_day(monday, tz)
}

pub fn handle_stats<S: BlobStore, Tz: TimeZone>(
    tasks: &TaskStore<S>,
    events: &EventStore<S>,
    json: bool,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<(), CliError> {
    let task_stats = stats::task_stats(tasks.tasks(), now);
    let today = stats::today_summary(tasks.tasks(), events.events(), now, tz);
    let week = stats::week_summary(tasks.tasks(), events.events(), week_start(now, tz));

    if json {
        let report = serde_json::json!({
            "tasks": task_stats,
            "today": today,
            "week": week,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Tasks: {} total, {} completed, {} pending, {} overdue",
        task_stats.total, task_stats.completed, task_stats.pending, task_stats.overdue
    );
    println!("Completion rate: {:.1}%", task_stats.completion_rate * 100.0);
    println!(
        "Time: {} min tracked of {} min estimated (ratio {:.2})",
        task_stats.actual_minutes, task_stats.estimated_minutes, task_stats.productivity_ratio
    );
    println!(
        "By priority: high {}, medium {}, low {}",
        task_stats.by_priority.high, task_stats.by_priority.medium, task_stats.by_priority.low
    );
    for (label, summary) in [("Today", &today), ("This week", &week)] {
        println!(
            "{}: {} events ({} meetings, {} task blocks, {} reminders), {} tasks due ({} done)",
            label,
            summary.events,
            summary.meetings,
            summary.task_blocks,
            summary.reminders,
            summary.tasks_due,
            summary.tasks_completed
        );
    }
    Ok(())
}

pub fn handle_brief<S: BlobStore, Tz: TimeZone>(
    tasks: &TaskStore<S>,
    events: &EventStore<S>,
    notes: &NoteStore<S>,
    json: bool,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<(), CliError> {
    let brief = stats::daily_brief(tasks.tasks(), events.events(), notes.notes(), now, tz);
    if json {
        println!("{}", serde_json::to_string_pretty(&brief)?);
        return Ok(());
    }

    println!("Brief for {}", brief.date);
    println!("\nTop tasks:");
    if brief.top_tasks.is_empty() {
        println!("  nothing due today");
    }
    for task in &brief.top_tasks {
        println!("  - {} ({})", task.title, task.priority);
    }
    println!("\nTime blocks:");
    if brief.time_blocks.is_empty() {
        println!("  no more events today");
    }
    for block in &brief.time_blocks {
        println!("  {} - {}  {}", local(block.start, tz, "%H:%M"), local(block.end, tz, "%H:%M"), block.title);
    }
    if !brief.carry_over.is_empty() {
        println!("\nCarried over:");
        for task in &brief.carry_over {
            let due = task.due_date.map(|d| local(d, tz, "%Y-%m-%d")).unwrap_or_default();
            println!("  - {} (due {})", task.title, due);
        }
    }
    if !brief.recent_notes.is_empty() {
        println!("\nRecent notes:");
        for note in &brief.recent_notes {
            println!("  - {}: {}", note.title, note.excerpt);
        }
    }
    Ok(())
}

fn read_input(input: TextInput) -> Result<String, CliError> {
    match (input.text, input.file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => Ok(fs::read_to_string(path)?),
        (None, None) => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn note_source<T>(reply: &Reply<T>) {
    if reply.source == ReplySource::Fallback {
        eprintln!("(assistant unavailable; showing local result)");
    }
}

pub fn handle_assistant<S: BlobStore, Tz: TimeZone>(
    cmd: AssistantCommand,
    ctx: &mut Context<S, Tz>,
) -> Result<(), CliError> {
    match cmd {
        AssistantCommand::Summarize(input) => {
            let text = read_input(input)?;
            let reply = ctx.assistant.summarize(&text)?;
            note_source(&reply);
            println!("{}", reply.value);
        }
        AssistantCommand::Extract { input, add } => {
            let text = read_input(input)?;
            let reply = ctx.assistant.extract_tasks(&text)?;
            note_source(&reply);
            if reply.value.is_empty() {
                println!("No tasks found.");
            }
            for api_task in reply.value {
                if add {
                    match api_task.into_new_task() {
                        Ok(fields) => {
                            let task = ctx.tasks.add(fields)?;
                            println!("Added: {} ({})", task.title, short_id(&task.id));
                        }
                        Err(e) => eprintln!("Skipped: {}", e),
                    }
                } else {
                    println!("- {}", api_task.title);
                }
            }
        }
        AssistantCommand::Tags(input) => {
            let text = read_input(input)?;
            let reply = ctx.assistant.generate_tags(&text)?;
            note_source(&reply);
            println!("{}", reply.value.join(", "));
        }
        AssistantCommand::Schedule { apply } => {
            let reply = ctx.assistant.suggest_schedule(ctx.tasks.tasks(), Utc::now());
            note_source(&reply);
            if reply.value.is_empty() {
                println!("Nothing to schedule.");
            }
            for slot in &reply.value {
                println!(
                    "{} - {}  {}",
                    local(slot.start, &ctx.tz, "%Y-%m-%d %H:%M"),
                    local(slot.end, &ctx.tz, "%H:%M"),
                    slot.title
                );
                if apply {
                    ctx.events.add(slot.to_new_event())?;
                }
            }
            if apply && !reply.value.is_empty() {
                println!("Added {} events", reply.value.len());
            }
        }
    }
    Ok(())
}

pub fn handle_watch<S: BlobStore, Tz: TimeZone>(ctx: &mut Context<S, Tz>, once: bool) {
    let reminders = &ctx.config.reminders;
    if !reminders.enabled {
        println!("Reminders are disabled in the configuration.");
        return;
    }
    let interval = std::time::Duration::from_secs(reminders.poll_interval_secs.max(1));
    let mut watcher = ReminderWatcher::new(ctx.config.reminder_lead());
    let mut notifier = LogNotifier;
    tracing::info!(lead_minutes = reminders.lead_minutes, "watching for upcoming events");

    loop {
        // Pick up events added by other invocations.
        if let Err(e) = ctx.events.load() {
            tracing::warn!(error = %e, "failed to reload events");
        }
        watcher.dispatch(&ctx.events, &mut notifier, Utc::now());
        if once {
            break;
        }
        std::thread::sleep(interval);
    }
}
