//! In-memory executor
//!
//! Evaluates commands over BSON documents held in process. Intended for tests
//! and local fixtures: there are no indexes, no durability and no
//! transactions, and every operation works on a snapshot taken under a
//! single lock acquisition.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use ferrodoc_common::FerrodocError;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use super::{Command, Executor, LastErrorObject, RawResult, Reply};
use crate::filter::Matcher;
use crate::options::{FindOptions, ModifyOptions};
use crate::update::{apply_update, get_path, remove_path, seed_from_filter, set_path};
use crate::Result;

/// Executor backed by a map of in-process collections
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    collections: RwLock<HashMap<String, Vec<BsonDocument>>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection, assigning `_id`s where missing
    pub fn insert_many(&self, collection: &str, documents: impl IntoIterator<Item = BsonDocument>) {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        for mut document in documents {
            ensure_id(&mut document);
            stored.push(document);
        }
    }

    /// Snapshot of a collection's documents in insertion order
    pub fn documents(&self, collection: &str) -> Vec<BsonDocument> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn find(&self, collection: &str, filter: &BsonDocument, options: &FindOptions) -> Result<Vec<BsonDocument>> {
        let collections = self.collections.read();
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let matcher = Matcher::new(options.collation.as_ref());

        let mut hits = Vec::new();
        for document in stored {
            if matcher.matches(document, filter)? {
                hits.push(document.clone());
            }
        }
        drop(collections);

        if let Some(sort) = &options.sort {
            hits.sort_by(|a, b| matcher.compare_by(a, b, sort));
        }
        let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let mut hits: Vec<BsonDocument> = hits.into_iter().skip(skip).collect();
        if let Some(limit) = options.limit.filter(|l| *l != 0) {
            hits.truncate(usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX));
        }
        if let Some(projection) = &options.projection {
            hits = hits.iter().map(|doc| project(doc, projection)).collect();
        }
        Ok(hits)
    }

    fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &BsonDocument,
        options: &FindOptions,
    ) -> Result<Vec<Bson>> {
        let matcher = Matcher::new(options.collation.as_ref());
        let hits = self.find(
            collection,
            filter,
            &FindOptions {
                collation: options.collation.clone(),
                ..Default::default()
            },
        )?;

        let mut values: Vec<Bson> = Vec::new();
        for document in &hits {
            for value in crate::filter::lookup(document, field) {
                let candidates = match value {
                    Bson::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                for candidate in candidates {
                    let seen = values.iter().any(|existing| {
                        existing == &candidate
                            || matcher.compare(existing, &candidate) == Some(std::cmp::Ordering::Equal)
                    });
                    if !seen {
                        values.push(candidate);
                    }
                }
            }
        }
        Ok(values)
    }

    fn modify(
        &self,
        collection: &str,
        filter: &BsonDocument,
        change: Change<'_>,
        options: &ModifyOptions,
    ) -> Result<RawResult> {
        let matcher = Matcher::new(options.collation.as_ref());
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();

        let mut target: Option<usize> = None;
        for (index, document) in stored.iter().enumerate() {
            if !matcher.matches(document, filter)? {
                continue;
            }
            target = match (target, &options.sort) {
                (None, _) => Some(index),
                (Some(best), Some(sort))
                    if matcher.compare_by(document, &stored[best], sort) == std::cmp::Ordering::Less =>
                {
                    Some(index)
                }
                (Some(best), _) => Some(best),
            };
            if options.sort.is_none() {
                break;
            }
        }

        let returns_new = options.returns_new();
        let (value, last_error_object) = match target {
            Some(index) => {
                let original = stored[index].clone();
                let mut modified = original.clone();
                match change {
                    Change::Update(update) => {
                        apply_update(&mut modified, update, false, &matcher)?;
                    }
                    Change::Replace(replacement) => {
                        modified = replace(&original, replacement)?;
                    }
                }
                stored[index] = modified.clone();
                let value = if returns_new { modified } else { original };
                (
                    Some(value),
                    LastErrorObject {
                        n: 1,
                        updated_existing: true,
                        upserted: None,
                    },
                )
            }
            None if options.upsert => {
                let mut inserted = match change {
                    Change::Update(update) => {
                        let mut seed = seed_from_filter(filter)?;
                        apply_update(&mut seed, update, true, &matcher)?;
                        seed
                    }
                    Change::Replace(replacement) => {
                        let mut document = replacement.clone();
                        if !document.contains_key("_id") {
                            if let Some(id) = seed_from_filter(filter)?.remove("_id") {
                                document.insert("_id", id);
                            }
                        }
                        document
                    }
                };
                let id = ensure_id(&mut inserted);
                if stored.iter().any(|doc| doc.get("_id") == Some(&id)) {
                    return Err(duplicate_key(collection, &id));
                }
                stored.push(inserted.clone());
                (
                    returns_new.then_some(inserted),
                    LastErrorObject {
                        n: 1,
                        updated_existing: false,
                        upserted: Some(id),
                    },
                )
            }
            None => (None, LastErrorObject::default()),
        };

        let value = match (&options.projection, value) {
            (Some(projection), Some(doc)) => Some(project(&doc, projection)),
            (_, value) => value,
        };
        Ok(RawResult {
            value,
            last_error_object,
            ok: 1.0,
        })
    }

    fn insert_one(&self, collection: &str, mut document: BsonDocument) -> Result<Bson> {
        let id = ensure_id(&mut document);
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        if stored.iter().any(|doc| doc.get("_id") == Some(&id)) {
            return Err(duplicate_key(collection, &id));
        }
        stored.push(document);
        Ok(id)
    }
}

#[async_trait]
impl Executor for MemoryExecutor {
    #[instrument(skip(self, command), fields(op = command.name()))]
    async fn execute(&self, collection: &str, command: Command) -> Result<Reply> {
        let reply = match command {
            Command::Find { filter, options } => Reply::Documents(self.find(collection, &filter, &options)?),
            Command::FindOne { filter, options } => {
                let options = FindOptions {
                    limit: Some(1),
                    ..options
                };
                Reply::Document(self.find(collection, &filter, &options)?.into_iter().next())
            }
            Command::Count { filter, options } => {
                let options = FindOptions {
                    projection: None,
                    sort: None,
                    ..options
                };
                Reply::Count(self.find(collection, &filter, &options)?.len() as u64)
            }
            Command::Distinct { field, filter, options } => {
                Reply::Values(self.distinct(collection, &field, &filter, &options)?)
            }
            Command::FindOneAndUpdate { filter, update, options } => {
                Reply::Modified(self.modify(collection, &filter, Change::Update(&update), &options)?)
            }
            Command::FindOneAndReplace { filter, replacement, options } => Reply::Modified(
                self.modify(collection, &filter, Change::Replace(&replacement), &options)?,
            ),
            Command::InsertOne { document } => Reply::Inserted(self.insert_one(collection, document)?),
        };
        debug!(reply = reply.kind(), "Memory command complete");
        Ok(reply)
    }
}

enum Change<'a> {
    Update(&'a BsonDocument),
    Replace(&'a BsonDocument),
}

fn ensure_id(document: &mut BsonDocument) -> Bson {
    match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            // keep _id first, as the server does
            let mut with_id = BsonDocument::new();
            with_id.insert("_id", id.clone());
            for (key, value) in std::mem::take(document) {
                with_id.insert(key, value);
            }
            *document = with_id;
            id
        }
    }
}

fn duplicate_key(collection: &str, id: &Bson) -> FerrodocError {
    FerrodocError::Database(format!(
        "E11000 duplicate key error collection: {} dup key: {{ _id: {} }}",
        collection, id
    ))
}

fn replace(original: &BsonDocument, replacement: &BsonDocument) -> Result<BsonDocument> {
    let original_id = original.get("_id");
    match (original_id, replacement.get("_id")) {
        (Some(old), Some(new)) if old != new => Err(FerrodocError::Validation(
            "Performing an update on the path '_id' would modify the immutable field '_id'"
                .to_string(),
        )),
        _ => {
            let mut replaced = BsonDocument::new();
            if let Some(id) = original_id {
                replaced.insert("_id", id.clone());
            }
            for (key, value) in replacement {
                if key != "_id" {
                    replaced.insert(key.clone(), value.clone());
                }
            }
            Ok(replaced)
        }
    }
}

/// Applies an inclusion or exclusion projection
fn project(document: &BsonDocument, projection: &BsonDocument) -> BsonDocument {
    let included = |value: &Bson| match value {
        Bson::Boolean(b) => *b,
        other => crate::filter::as_f64(other).map_or(true, |n| n != 0.0),
    };
    let inclusion = projection
        .iter()
        .any(|(key, value)| key != "_id" && included(value));

    if inclusion {
        let mut projected = BsonDocument::new();
        let keep_id = projection.get("_id").map_or(true, included);
        if keep_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (path, value) in projection {
            if path == "_id" || !included(value) {
                continue;
            }
            if let Some(found) = get_path(document, path) {
                // set_path only fails on array segments, which get_path never yields here
                let _ = set_path(&mut projected, path, found.clone());
            }
        }
        projected
    } else {
        let mut projected = document.clone();
        for (path, value) in projection {
            if !included(value) {
                remove_path(&mut projected, path);
            }
        }
        projected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Collation;
    use bson::doc;

    fn seeded() -> MemoryExecutor {
        let executor = MemoryExecutor::new();
        executor.insert_many(
            "tests",
            vec![
                doc! { "name": "Test", "age": 30, "tags": ["a", "b"] },
                doc! { "name": "test", "age": 12, "tags": ["b"] },
                doc! { "name": "Other", "age": 50 },
            ],
        );
        executor
    }

    async fn run(executor: &MemoryExecutor, command: Command) -> Reply {
        executor.execute("tests", command).await.unwrap()
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit() {
        let executor = seeded();
        let reply = run(
            &executor,
            Command::Find {
                filter: doc! {},
                options: FindOptions {
                    sort: Some(doc! { "age": -1 }),
                    skip: Some(1),
                    limit: Some(1),
                    ..Default::default()
                },
            },
        )
        .await;
        let Reply::Documents(docs) = reply else { panic!("expected documents") };
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("name").unwrap(), "Test");
    }

    #[tokio::test]
    async fn test_find_with_projection() {
        let executor = seeded();
        let reply = run(
            &executor,
            Command::FindOne {
                filter: doc! { "name": "Other" },
                options: FindOptions {
                    projection: Some(doc! { "name": 1, "_id": 0 }),
                    ..Default::default()
                },
            },
        )
        .await;
        assert_eq!(reply, Reply::Document(Some(doc! { "name": "Other" })));
    }

    #[tokio::test]
    async fn test_count_with_collation() {
        let executor = seeded();
        let options = FindOptions {
            collation: Some(Collation::new("en_US").strength(2)),
            ..Default::default()
        };
        let reply = run(
            &executor,
            Command::Count {
                filter: doc! { "name": "TEST" },
                options,
            },
        )
        .await;
        assert_eq!(reply, Reply::Count(2));
    }

    #[tokio::test]
    async fn test_distinct_flattens_arrays() {
        let executor = seeded();
        let reply = run(
            &executor,
            Command::Distinct {
                field: "tags".to_string(),
                filter: doc! {},
                options: FindOptions::default(),
            },
        )
        .await;
        assert_eq!(reply, Reply::Values(vec![Bson::from("a"), Bson::from("b")]));
    }

    #[tokio::test]
    async fn test_update_returns_original_by_default() {
        let executor = seeded();
        let reply = run(
            &executor,
            Command::FindOneAndUpdate {
                filter: doc! { "name": "test" },
                update: doc! { "$inc": { "age": 2 } },
                options: ModifyOptions::default(),
            },
        )
        .await;
        let Reply::Modified(raw) = reply else { panic!("expected modify reply") };
        assert_eq!(raw.value.unwrap().get_i32("age").unwrap(), 12);
        assert!(raw.last_error_object.updated_existing);

        let stored = executor.documents("tests");
        assert_eq!(stored[1].get_i32("age").unwrap(), 14);
    }

    #[tokio::test]
    async fn test_upsert_inserts_from_filter() {
        let executor = seeded();
        let reply = run(
            &executor,
            Command::FindOneAndUpdate {
                filter: doc! { "name": "new" },
                update: doc! { "$set": { "age": 1 } },
                options: ModifyOptions {
                    upsert: true,
                    new: Some(true),
                    ..Default::default()
                },
            },
        )
        .await;
        let Reply::Modified(raw) = reply else { panic!("expected modify reply") };
        let value = raw.value.unwrap();
        assert_eq!(value.get_str("name").unwrap(), "new");
        assert_eq!(value.get_i32("age").unwrap(), 1);
        assert!(value.get_object_id("_id").is_ok());
        assert!(raw.last_error_object.upserted.is_some());
        assert_eq!(executor.documents("tests").len(), 4);
    }

    #[tokio::test]
    async fn test_upsert_without_new_returns_none() {
        let executor = seeded();
        let reply = run(
            &executor,
            Command::FindOneAndUpdate {
                filter: doc! { "name": "new" },
                update: doc! { "$set": { "age": 1 } },
                options: ModifyOptions {
                    upsert: true,
                    ..Default::default()
                },
            },
        )
        .await;
        let Reply::Modified(raw) = reply else { panic!("expected modify reply") };
        assert!(raw.value.is_none());
        assert_eq!(raw.last_error_object.n, 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_id() {
        let executor = seeded();
        let id = executor.documents("tests")[0].get("_id").cloned().unwrap();
        let reply = run(
            &executor,
            Command::FindOneAndReplace {
                filter: doc! { "name": "Test" },
                replacement: doc! { "name": "test2" },
                options: ModifyOptions {
                    new: Some(true),
                    ..Default::default()
                },
            },
        )
        .await;
        let Reply::Modified(raw) = reply else { panic!("expected modify reply") };
        assert_eq!(raw.value, Some(doc! { "_id": id, "name": "test2" }));
    }

    #[tokio::test]
    async fn test_replace_rejects_new_id() {
        let executor = seeded();
        let err = executor
            .execute(
                "tests",
                Command::FindOneAndReplace {
                    filter: doc! { "name": "Test" },
                    replacement: doc! { "_id": ObjectId::new(), "name": "x" },
                    options: ModifyOptions::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FerrodocError::Validation(_)));
    }

    #[tokio::test]
    async fn test_insert_duplicate_id() {
        let executor = MemoryExecutor::new();
        let id = ObjectId::new();
        executor
            .execute("tests", Command::InsertOne { document: doc! { "_id": id } })
            .await
            .unwrap();
        let err = executor
            .execute("tests", Command::InsertOne { document: doc! { "_id": id } })
            .await
            .unwrap_err();
        assert!(matches!(err, FerrodocError::Database(_)));
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let executor = MemoryExecutor::new();
        let reply = executor
            .execute(
                "nothing",
                Command::Find {
                    filter: doc! {},
                    options: FindOptions::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply, Reply::Documents(Vec::new()));
    }

    #[test]
    fn test_exclusion_projection() {
        let doc = doc! { "_id": 1, "name": "x", "nested": { "a": 1, "b": 2 } };
        assert_eq!(
            project(&doc, &doc! { "nested.b": 0, "_id": 0 }),
            doc! { "name": "x", "nested": { "a": 1 } }
        );
    }
}
