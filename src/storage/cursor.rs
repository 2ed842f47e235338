use crate::storage::traits::{Storage, StorageResult};
use crate::storage::{lock_storage, DocFilter, Document, SharedStorage};
use std::collections::VecDeque;

const DEFAULT_BATCH_SIZE: usize = 200;

/// Lazily reads a collection in id order, one batch at a time
///
/// The storage lock is held only while a batch is loaded, so workers writing
/// through the same handle are never blocked for the length of a scan. The
/// cursor is restartable from any id via `resume_after`.
pub struct DocumentCursor {
    storage: SharedStorage,
    collection: String,
    filter: DocFilter,
    batch_size: usize,
    after_id: Option<String>,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl DocumentCursor {
    pub fn new(storage: SharedStorage, collection: &str, filter: DocFilter) -> Self {
        Self {
            storage,
            collection: collection.to_string(),
            filter,
            batch_size: DEFAULT_BATCH_SIZE,
            after_id: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Continues the scan after the given id
    pub fn resume_after(mut self, id: &str) -> Self {
        self.after_id = Some(id.to_string());
        self
    }

    /// Id of the last document handed out
    pub fn position(&self) -> Option<&str> {
        self.after_id.as_deref()
    }

    fn fill(&mut self) -> StorageResult<()> {
        let batch = {
            let storage = lock_storage(&self.storage)?;
            storage.find_documents(
                &self.collection,
                &self.filter,
                self.after_id.as_deref(),
                self.batch_size,
            )?
        };

        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for DocumentCursor {
    type Item = StorageResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let doc = self.buffer.pop_front()?;
        self.after_id = Some(doc.id.clone());
        Some(Ok(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, SqliteStorage};
    use serde_json::json;

    fn storage_with(ids: &[&str]) -> SharedStorage {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        for id in ids {
            storage
                .insert_document_if_absent("shops", id, &json!({"_id": id}))
                .unwrap();
        }
        shared(storage)
    }

    #[test]
    fn test_cursor_reads_across_batches() {
        let storage = storage_with(&["a", "b", "c", "d", "e"]);
        let ids: Vec<String> = DocumentCursor::new(storage, "shops", DocFilter::All)
            .with_batch_size(2)
            .map(|doc| doc.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_cursor_resumes_after_id() {
        let storage = storage_with(&["a", "b", "c"]);
        let ids: Vec<String> = DocumentCursor::new(storage, "shops", DocFilter::All)
            .resume_after("a")
            .map(|doc| doc.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_cursor_tracks_position() {
        let storage = storage_with(&["a", "b"]);
        let mut cursor = DocumentCursor::new(storage, "shops", DocFilter::All);
        assert_eq!(cursor.position(), None);
        cursor.next();
        assert_eq!(cursor.position(), Some("a"));
    }

    #[test]
    fn test_cursor_on_empty_collection() {
        let storage = storage_with(&[]);
        let mut cursor = DocumentCursor::new(storage, "shops", DocFilter::All);
        assert!(cursor.next().is_none());
    }
}
