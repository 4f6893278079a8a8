use chrono::Utc;
use std::cmp::Reverse;
use thiserror::Error;

use crate::models::{NewNote, Note, NotePatch};
use crate::storage::{BlobStore, StorageError, NOTES_KEY};

/// Most notes a listing returns
pub const NOTE_LIST_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Failed to parse note data: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("A note needs a title or some content")]
    EmptyNote,
}

/// Text and tag constraints for a note listing. The query matches title or
/// content case-insensitively; every listed tag must be present.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    pub query: Option<String>,
    pub tags: Vec<String>,
}

impl NoteFilter {
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn matches(&self, note: &Note) -> bool {
        let text_ok = match self.query.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(q) => {
                let q = q.to_lowercase();
                note.title.to_lowercase().contains(&q) || note.content.to_lowercase().contains(&q)
            }
        };
        text_ok && self.tags.iter().all(|t| note.has_tag(t))
    }
}

/// Owner of the note collection, persisted under `notes`
pub struct NoteStore<S: BlobStore> {
    backend: S,
    notes: Vec<Note>,
    last_error: Option<String>,
}

impl<S: BlobStore> NoteStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            notes: Vec::new(),
            last_error: None,
        }
    }

    pub fn open(backend: S) -> Self {
        let mut store = Self::new(backend);
        if let Err(e) = store.load() {
            tracing::warn!(error = %e, "starting with no notes");
        }
        store
    }

    pub fn load(&mut self) -> Result<usize, NoteError> {
        self.notes.clear();

        let loaded = self
            .backend
            .get(NOTES_KEY)
            .map_err(NoteError::from)
            .and_then(|raw| match raw {
                Some(raw) => serde_json::from_str::<Vec<Note>>(&raw).map_err(NoteError::from),
                None => Ok(Vec::new()),
            });

        match loaded {
            Ok(notes) => {
                self.notes = notes;
                self.last_error = None;
                tracing::debug!(count = self.notes.len(), "loaded notes");
                Ok(self.notes.len())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load notes");
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
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

    /// Add a note. A blank title becomes the default title, but a note with
    /// neither title nor content is refused.
    pub fn add(&mut self, fields: NewNote) -> Result<&Note, NoteError> {
        if fields.title.trim().is_empty() && fields.content.trim().is_empty() {
            return Err(NoteError::EmptyNote);
        }
        let note = fields.into_note(Utc::now());
        tracing::debug!(id = %note.id, "adding note");
        self.notes.push(note);
        self.persist();
        Ok(&self.notes[self.notes.len() - 1])
    }

    /// Merge `patch` into the note with `id`. Unknown ids are ignored.
    pub fn update(&mut self, id: &str, patch: NotePatch) -> Option<&Note> {
        let idx = self.notes.iter().position(|n| n.id == id)?;
        {
            let note = &mut self.notes[idx];
            patch.apply(note);
            note.updated_at = Utc::now().max(note.created_at);
        }
        tracing::debug!(%id, "updated note");
        self.persist();
        self.notes.get(idx)
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let len_before = self.notes.len();
        self.notes.retain(|n| n.id != id);
        if self.notes.len() == len_before {
            return false;
        }
        tracing::debug!(%id, "deleted note");
        self.persist();
        true
    }

    /// Matching notes, newest first, at most [`NOTE_LIST_LIMIT`]
    pub fn filter(&self, filter: &NoteFilter) -> Vec<&Note> {
        let mut found: Vec<&Note> = self.notes.iter().filter(|n| filter.matches(n)).collect();
        found.sort_by_key(|n| Reverse(n.created_at));
        found.truncate(NOTE_LIST_LIMIT);
        found
    }

    fn persist(&mut self) {
        let result = serde_json::to_string(&self.notes)
            .map_err(StorageError::from)
            .and_then(|raw| self.backend.set(NOTES_KEY, &raw));
        match result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist notes; keeping in-memory state");
                self.last_error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_NOTE_TITLE;
    use crate::storage::MemoryBlobStore;

    fn store() -> NoteStore<MemoryBlobStore> {
        NoteStore::new(MemoryBlobStore::new())
    }

    fn tagged(title: &str, content: &str, tags: &[&str]) -> NewNote {
        let mut fields = NewNote::new(title, content);
        fields.tags = tags.iter().map(|t| t.to_string()).collect();
        fields
    }

    #[test]
    fn add_then_reload() {
        let mut s = store();
        let id = s.add(tagged("Kickoff", "agenda and owners", &["work"])).unwrap().id.clone();

        let mut reloaded = NoteStore::new(s.into_backend());
        assert_eq!(reloaded.load().unwrap(), 1);
        let note = reloaded.get(&id).unwrap();
        assert_eq!(note.title, "Kickoff");
        assert_eq!(note.content, "agenda and owners");
        assert!(note.has_tag("work"));
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn blank_title_gets_default_but_empty_note_is_refused() {
        let mut s = store();
        assert_eq!(s.add(NewNote::new("  ", "just a thought")).unwrap().title, DEFAULT_NOTE_TITLE);
        assert!(matches!(s.add(NewNote::new("", " ")), Err(NoteError::EmptyNote)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn update_and_delete() {
        let mut s = store();
        let id = s.add(NewNote::new("Draft", "first pass")).unwrap().id.clone();
        let patch = NotePatch {
            content: Some("second pass".into()),
            summary: Some(Some("revised".into())),
            ..Default::default()
        };
        let note = s.update(&id, patch).unwrap();
        assert_eq!(note.content, "second pass");
        assert_eq!(note.summary.as_deref(), Some("revised"));
        assert!(note.updated_at >= note.created_at);

        assert!(s.update("missing", NotePatch::default()).is_none());
        assert!(!s.delete("missing"));
        assert!(s.delete(&id));
        assert!(s.is_empty());
    }

    #[test]
    fn filter_matches_text_and_all_tags_newest_first() {
        let mut s = store();
        s.add(tagged("Groceries", "milk, eggs", &["home"])).unwrap();
        s.add(tagged("Sprint review", "demo the planner", &["work", "team"])).unwrap();
        s.add(tagged("Retro", "what went well in the sprint", &["work"])).unwrap();

        let sprint: Vec<&str> = s
            .filter(&NoteFilter::default().query("SPRINT"))
            .iter()
            .map(|n| n.title.as_str())
            .collect();
        assert_eq!(sprint.len(), 2);
        assert!(sprint.contains(&"Sprint review") && sprint.contains(&"Retro"));

        let both = s.filter(&NoteFilter::default().tag("work").tag("team"));
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].title, "Sprint review");

        let all = s.filter(&NoteFilter::default());
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn listing_is_capped() {
        let mut s = store();
        for i in 0..NOTE_LIST_LIMIT + 5 {
            s.add(NewNote::new(format!("note {}", i), "")).unwrap();
        }
        assert_eq!(s.filter(&NoteFilter::default()).len(), NOTE_LIST_LIMIT);
    }

    #[test]
    fn corrupt_blob_fails_open() {
        let mut backend = MemoryBlobStore::new();
        backend.set(NOTES_KEY, "{not json").unwrap();
        let mut s = NoteStore::new(backend);
        assert!(matches!(s.load(), Err(NoteError::ParseError(_))));
        assert!(s.is_empty());
        assert!(s.last_error().is_some());

        s.add(NewNote::new("Fresh", "")).unwrap();
        assert!(s.last_error().is_none());
    }

    #[test]
    fn write_failure_keeps_memory_authoritative() {
        let mut s = store();
        s.backend_mut().set_reject_writes(true);
        s.add(NewNote::new("Offline", "kept in memory")).unwrap();
        assert!(s.last_error().is_some());
        assert_eq!(s.len(), 1);

        s.backend_mut().set_reject_writes(false);
        s.add(NewNote::new("Online", "")).unwrap();
        assert!(s.last_error().is_none());
        let mut reloaded = NoteStore::new(s.into_backend());
        assert_eq!(reloaded.load().unwrap(), 2);
    }
}
