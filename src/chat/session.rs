//! Chat session lifecycle and per-session write ordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::error::{PensumError, Result};
use crate::store::{ChatSession, SqliteStore};

const MAX_TITLE_CHARS: usize = 60;

/// Resolves sessions and hands out per-session locks so concurrent requests
/// against one session append their messages in a stable order.
pub struct SessionManager {
    store: Arc<SqliteStore>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch an existing session by id, or find or create the session for a
    /// (student, creator, course) triple when no id is given.
    ///
    /// An id that does not exist and an id owned by someone else are reported
    /// identically, so callers cannot probe for other users' sessions.
    pub fn get_or_create(
        &self,
        session_id: Option<Uuid>,
        student_id: &str,
        creator_id: &str,
        course_id: Option<&str>,
    ) -> Result<ChatSession> {
        if let Some(id) = session_id {
            let session = self
                .store
                .get_session(id)?
                .ok_or_else(|| PensumError::SessionNotFound(id.to_string()))?;
            if session.student_id != student_id || session.creator_id != creator_id {
                return Err(PensumError::SessionNotFound(id.to_string()));
            }
            return Ok(session);
        }

        if let Some(existing) = self.store.find_session(student_id, creator_id, course_id)? {
            return Ok(existing);
        }

        let session = ChatSession::new(student_id, creator_id, course_id);
        self.store.insert_session(&session)?;
        debug!(
            "Created chat session {} for student {}",
            session.id, student_id
        );
        Ok(session)
    }

    /// Lock guarding writes to one session. The same id always maps to the
    /// same lock for the lifetime of this manager.
    pub fn lock_for(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Derive the session title from the first user message. Later calls
    /// leave an already-set title alone.
    pub fn ensure_title(&self, session_id: Uuid, first_message: &str) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| PensumError::SessionNotFound(session_id.to_string()))?;

        if session.title.is_none() {
            let title = truncate_title(first_message, MAX_TITLE_CHARS);
            self.store.set_session_title(session_id, &title)?;
        }
        Ok(())
    }
}

/// Collapse runs of whitespace and cut at the last word boundary that keeps
/// the title within `max_chars` characters.
fn truncate_title(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let mut out = String::new();
    for word in collapsed.split(' ') {
        if out.chars().count() + word.chars().count() + 1 > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }

    if out.is_empty() {
        // A single word longer than the cap has no boundary to cut at
        out = collapsed.chars().take(max_chars).collect();
    }
    format!("{}...", out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        let store = SqliteStore::in_memory().unwrap();
        SessionManager::new(Arc::new(store))
    }

    #[test]
    fn test_get_or_create_reuses_scoped_session() {
        let manager = manager();

        let first = manager
            .get_or_create(None, "student-1", "creator-1", Some("rust-101"))
            .unwrap();
        let again = manager
            .get_or_create(None, "student-1", "creator-1", Some("rust-101"))
            .unwrap();
        assert_eq!(first.id, again.id);

        let other_course = manager
            .get_or_create(None, "student-1", "creator-1", Some("rust-201"))
            .unwrap();
        assert_ne!(first.id, other_course.id);
    }

    #[test]
    fn test_explicit_id_fetches_own_session() {
        let manager = manager();
        let created = manager
            .get_or_create(None, "student-1", "creator-1", None)
            .unwrap();

        let fetched = manager
            .get_or_create(Some(created.id), "student-1", "creator-1", None)
            .unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[test]
    fn test_foreign_session_id_reads_as_missing() {
        let manager = manager();
        let created = manager
            .get_or_create(None, "student-1", "creator-1", None)
            .unwrap();

        let result = manager.get_or_create(Some(created.id), "student-2", "creator-1", None);
        assert!(matches!(result, Err(PensumError::SessionNotFound(_))));

        let result = manager.get_or_create(Some(Uuid::new_v4()), "student-1", "creator-1", None);
        assert!(matches!(result, Err(PensumError::SessionNotFound(_))));
    }

    #[test]
    fn test_title_set_once_from_first_message() {
        let manager = manager();
        let session = manager
            .get_or_create(None, "student-1", "creator-1", None)
            .unwrap();

        manager
            .ensure_title(session.id, "What  is\n ownership?")
            .unwrap();
        manager.ensure_title(session.id, "A different question").unwrap();

        let stored = manager.store.get_session(session.id).unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("What is ownership?"));
    }

    #[test]
    fn test_long_title_cut_at_word_boundary() {
        let long = "ownership ".repeat(20);
        let title = truncate_title(&long, MAX_TITLE_CHARS);

        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= MAX_TITLE_CHARS + 3);
        // No word is split by the cut
        assert!(title
            .trim_end_matches("...")
            .split(' ')
            .all(|word| word == "ownership"));
    }

    #[test]
    fn test_lock_for_hands_out_one_lock_per_session() {
        let manager = manager();
        let id = Uuid::new_v4();

        let a = manager.lock_for(id);
        let b = manager.lock_for(id);
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager.lock_for(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
