//! Entity accumulator
//!
//! Entity records are created once by the terminal stage that owns them and
//! then grown by later, independent tasks that append to their list fields.
//! With fragment dedup enabled, every append is keyed by the identity of the
//! task that produced it, so re-processing a page after a crash between the
//! append and the ledger update cannot duplicate entries.

use crate::storage::{
    lock_storage, AppendOutcome, Document, InsertOutcome, SharedStorage, Storage, StorageResult,
};
use crate::task::TaskIdentity;
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of a create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,

    /// A record with that id already existed and was kept as is
    Duplicate,
}

/// Outcome of an extend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// Values appended; holds the new length of the field
    Appended(usize),

    /// This task already contributed to the field
    AlreadyApplied,

    /// The owning record has not been created yet
    MissingEntity,
}

/// Safe partial writes against shared entity records
#[derive(Clone)]
pub struct Accumulator {
    storage: SharedStorage,
    fragment_dedup: bool,
}

impl Accumulator {
    pub fn new(storage: SharedStorage, fragment_dedup: bool) -> Self {
        Self {
            storage,
            fragment_dedup,
        }
    }

    /// First-writer-wins insert of an entity record
    ///
    /// A second create for the same id is logged and swallowed; the original
    /// record is never overwritten.
    pub fn create(&self, collection: &str, id: &str, record: &Value) -> StorageResult<CreateOutcome> {
        let mut storage = lock_storage(&self.storage)?;
        match storage.insert_document_if_absent(collection, id, record)? {
            InsertOutcome::Inserted => {
                debug!("Created {}/{}", collection, id);
                Ok(CreateOutcome::Created)
            }
            InsertOutcome::AlreadyExists => {
                warn!("Duplicate create of {}/{} ignored", collection, id);
                Ok(CreateOutcome::Duplicate)
            }
        }
    }

    /// Atomically appends values to a list field of an existing record
    ///
    /// `origin` is the identity of the task whose page produced the values.
    pub fn extend(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        values: &[Value],
        origin: &TaskIdentity,
    ) -> StorageResult<ExtendOutcome> {
        let fragment = self.fragment_dedup.then(|| origin.as_str());
        let mut storage = lock_storage(&self.storage)?;

        match storage.append_to_field(collection, id, field, values, fragment)? {
            AppendOutcome::Applied(len) => Ok(ExtendOutcome::Appended(len)),
            AppendOutcome::AlreadyApplied => {
                debug!(
                    "{} already contributed to {}/{}.{}",
                    origin, collection, id, field
                );
                Ok(ExtendOutcome::AlreadyApplied)
            }
            AppendOutcome::Missing => Ok(ExtendOutcome::MissingEntity),
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        let storage = lock_storage(&self.storage)?;
        storage.get_document(collection, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, SqliteStorage};
    use serde_json::json;
    use std::collections::BTreeSet;
    use url::Url;

    fn accumulator(fragment_dedup: bool) -> Accumulator {
        Accumulator::new(shared(SqliteStorage::new_in_memory().unwrap()), fragment_dedup)
    }

    fn origin(path: &str) -> TaskIdentity {
        TaskIdentity::new(
            crate::task::Method::Get,
            &Url::parse(&format!("http://example.com{}", path)).unwrap(),
        )
    }

    fn group() -> Value {
        json!({"_id": "E", "reviews": [], "tagged_reviews": []})
    }

    #[test]
    fn test_create_first_writer_wins() {
        let acc = accumulator(true);

        assert_eq!(
            acc.create("feedback", "E", &group()).unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            acc.create("feedback", "E", &json!({"_id": "E", "reviews": ["x"]}))
                .unwrap(),
            CreateOutcome::Duplicate
        );

        let doc = acc.get("feedback", "E").unwrap().unwrap();
        assert_eq!(doc.body, group());
    }

    #[test]
    fn test_extend_is_commutative() {
        let forward = accumulator(true);
        forward.create("feedback", "E", &group()).unwrap();
        forward
            .extend("feedback", "E", "reviews", &[json!("a")], &origin("/p1"))
            .unwrap();
        forward
            .extend("feedback", "E", "reviews", &[json!("b")], &origin("/p2"))
            .unwrap();

        let backward = accumulator(true);
        backward.create("feedback", "E", &group()).unwrap();
        backward
            .extend("feedback", "E", "reviews", &[json!("b")], &origin("/p2"))
            .unwrap();
        backward
            .extend("feedback", "E", "reviews", &[json!("a")], &origin("/p1"))
            .unwrap();

        let as_set = |acc: &Accumulator| -> BTreeSet<String> {
            acc.get("feedback", "E").unwrap().unwrap().body["reviews"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.to_string())
                .collect()
        };
        assert_eq!(as_set(&forward), as_set(&backward));
    }

    #[test]
    fn test_fields_are_independent() {
        let acc = accumulator(true);
        acc.create("feedback", "E", &group()).unwrap();
        let page = origin("/shop/E/review_all");

        acc.extend("feedback", "E", "reviews", &[json!("a")], &page)
            .unwrap();
        acc.extend("feedback", "E", "tagged_reviews", &[json!("t")], &page)
            .unwrap();

        let doc = acc.get("feedback", "E").unwrap().unwrap();
        assert_eq!(doc.body["reviews"], json!(["a"]));
        assert_eq!(doc.body["tagged_reviews"], json!(["t"]));
    }

    #[test]
    fn test_redelivered_page_is_not_duplicated() {
        let acc = accumulator(true);
        acc.create("feedback", "E", &group()).unwrap();
        let page = origin("/shop/E/review_all");

        assert_eq!(
            acc.extend("feedback", "E", "reviews", &[json!("a")], &page)
                .unwrap(),
            ExtendOutcome::Appended(1)
        );
        assert_eq!(
            acc.extend("feedback", "E", "reviews", &[json!("a")], &page)
                .unwrap(),
            ExtendOutcome::AlreadyApplied
        );
    }

    #[test]
    fn test_without_dedup_redelivery_duplicates() {
        let acc = accumulator(false);
        acc.create("feedback", "E", &group()).unwrap();
        let page = origin("/shop/E/review_all");

        acc.extend("feedback", "E", "reviews", &[json!("a")], &page)
            .unwrap();
        assert_eq!(
            acc.extend("feedback", "E", "reviews", &[json!("a")], &page)
                .unwrap(),
            ExtendOutcome::Appended(2)
        );
    }

    #[test]
    fn test_extend_missing_entity() {
        let acc = accumulator(true);
        assert_eq!(
            acc.extend("actors", "1", "followers", &[json!("2")], &origin("/member/1/fans"))
                .unwrap(),
            ExtendOutcome::MissingEntity
        );
    }
}
