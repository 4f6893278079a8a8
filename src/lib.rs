pub mod adapters;
pub mod assistant;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod logging;
pub mod models;
pub mod notes;
pub mod recurrence;
pub mod reminders;
pub mod stats;
pub mod storage;
pub mod tasks;
pub mod utils;

pub use calendar::EventStore;
pub use config::Config;
pub use models::{CalendarEvent, NewEvent, NewNote, NewTask, Note, Task};
pub use notes::NoteStore;
pub use storage::{BlobStore, MemoryBlobStore, SqliteBlobStore};
pub use tasks::TaskStore;
pub use utils::Profile;
