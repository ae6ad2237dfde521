//! End-to-end query patterns against the in-memory executor

use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Regex};
use ferrodoc_mongodb::prelude::*;
use ferrodoc_mongodb::{Fallible, MemoryExecutor};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Nested {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Subdoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nested: Option<Nested>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct TestDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    docs: Option<Vec<Subdoc>>,
}

impl Document for TestDoc {
    fn collection_name() -> &'static str {
        "tests"
    }

    fn schema() -> Schema {
        let nested = Schema::new().field("id", FieldType::Number);
        Schema::new()
            .field("name", FieldType::String)
            .field("age", FieldType::Number)
            .field("parent", FieldType::ObjectId)
            .field("tags", FieldType::array_of(FieldType::String))
            .field(
                "docs",
                FieldType::array_of(FieldType::Document(
                    Schema::new()
                        .field("id", FieldType::Number)
                        .field("nested", FieldType::Document(nested)),
                )),
            )
    }

    fn get_id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

struct ByNameHelpers;

impl QueryHelpers for ByNameHelpers {}

trait ByName {
    fn by_name(self, name: &str) -> Self;
}

impl<D: Document, K: ResultKind<D>> ByName for Query<D, K, ByNameHelpers> {
    fn by_name(self, name: &str) -> Self {
        self.where_clause(doc! { "name": name })
    }
}

const PARENT: &str = "5f1d7f3e9d3b2a0017a1b2c3";

struct Fixture {
    executor: Arc<MemoryExecutor>,
    model: Model<TestDoc, ByNameHelpers>,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt::try_init();

    let executor = Arc::new(MemoryExecutor::new());
    let parent = ObjectId::parse_str(PARENT).unwrap();
    executor.insert_many(
        "tests",
        vec![
            doc! { "name": "Test", "age": 30, "tags": ["a"] },
            doc! {
                "name": "test",
                "age": 12,
                "parent": parent,
                "tags": ["b"],
                "docs": [
                    { "id": 42, "nested": { "id": 1 } },
                    { "id": 7, "nested": { "id": 2 } },
                ],
            },
        ],
    );
    let model = Model::new(executor.clone()).unwrap();
    Fixture { executor, model }
}

fn stored(fixture: &Fixture, name: &str) -> bson::Document {
    fixture
        .executor
        .documents("tests")
        .into_iter()
        .find(|doc| doc.get_str("name").ok() == Some(name))
        .unwrap()
}

#[tokio::test]
async fn helpers_survive_chaining() {
    let f = fixture();

    let docs = f.model.find(doc! {}).by_name("test").exec().await.unwrap();
    assert_eq!(docs.len(), 1);

    let docs = f
        .model
        .query()
        .by_name("Test")
        .sort(doc! { "age": 1 })
        .by_name("test")
        .limit(5)
        .await
        .unwrap();
    assert_eq!(docs[0].age, Some(12));

    let err = f
        .model
        .find(doc! {})
        .by_name("test")
        .by_name("test2")
        .or_fail()
        .exec()
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn count_with_regex() {
    let f = fixture();
    let pattern = Regex {
        pattern: "Test".to_string(),
        options: String::new(),
    };
    let count = f.model.count(doc! { "name": pattern }).exec().await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn find_one_by_dotted_path_into_array() {
    let f = fixture();
    let doc = f.model.find_one(doc! { "docs.id": 42 }).exec().await.unwrap().unwrap();
    assert_eq!(doc.name.as_deref(), Some("test"));
    assert_eq!(doc.docs.unwrap()[0].nested, Some(Nested { id: Some(1) }));
}

#[tokio::test]
async fn reference_id_forms_are_equivalent() {
    let f = fixture();
    let by_object_id = f
        .model
        .find(doc! { "parent": ObjectId::parse_str(PARENT).unwrap() })
        .await
        .unwrap();
    let by_hex = f.model.find(doc! { "parent": PARENT }).await.unwrap();
    assert_eq!(by_object_id, by_hex);
    assert_eq!(by_hex.len(), 1);

    let err = f.model.find(doc! { "parent": "0".repeat(23) }).await.unwrap_err();
    assert!(err.is_cast());
}

#[tokio::test]
async fn in_operator() {
    let f = fixture();
    let docs = f
        .model
        .find(doc! { "name": { "$in": ["Test"] } })
        .exec()
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].name.as_deref(), Some("Test"));
}

#[tokio::test]
async fn callback_resolution() {
    let f = fixture();

    let (tx, rx) = oneshot::channel();
    f.model
        .find(doc! { "name": "test" })
        .exec_with(move |result| {
            let _ = tx.send(result.map(|docs| docs[0].age));
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), Some(12));

    let (tx, rx) = oneshot::channel();
    f.model
        .find_one(doc! { "name": "test" })
        .exec_with(move |result| {
            let _ = tx.send(result.map(|doc| doc.and_then(|d| d.age)));
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), Some(12));
}

#[tokio::test]
async fn callback_receives_errors() {
    let f = fixture();

    let (tx, rx) = oneshot::channel();
    f.model
        .find(doc! { "parent": "bad" })
        .exec_with(move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();
    let err = rx.await.unwrap().unwrap_err();
    assert!(err.is_cast());

    let (tx, rx) = oneshot::channel();
    f.model
        .find_one(doc! { "name": "nobody" })
        .or_fail()
        .exec_with(move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();
    let err = rx.await.unwrap().unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(f.executor.documents("tests").len(), 2);
}

#[tokio::test]
async fn collation_affects_comparison() {
    let f = fixture();
    let docs = f
        .model
        .find(doc! { "name": { "$gte": "Test" } })
        .collation(Collation::new("en-us"))
        .exec()
        .await
        .unwrap();
    assert!(!docs.is_empty());

    let docs = f
        .model
        .find(doc! { "name": "TEST" })
        .collation(Collation::new("en-us").strength(2))
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
}

#[derive(Debug)]
struct Bar;

impl std::fmt::Display for Bar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("bar")
    }
}

impl std::error::Error for Bar {}

#[tokio::test]
async fn or_fail_with_custom_error() {
    let f = fixture();

    let doc = f.model.find_one(doc! {}).or_fail_with(Bar).await.unwrap();
    assert!(doc.name.is_some());

    let err = f
        .model
        .find_one(doc! { "name": "nobody" })
        .or_fail_with(Bar)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "bar");
    assert!(err.as_custom().is_some_and(|e| e.is::<Bar>()));
}

#[tokio::test]
async fn distinct_values() {
    let f = fixture();
    let names = f.model.distinct("name").exec().await.unwrap();
    assert_eq!(names, vec![Bson::from("Test"), Bson::from("test")]);

    let tags = f
        .model
        .distinct("tags")
        .where_clause(doc! { "age": { "$lt": 20 } })
        .await
        .unwrap();
    assert_eq!(tags, vec![Bson::from("b")]);
}

#[tokio::test]
async fn find_one_and_update_returns_original_by_default() {
    let f = fixture();

    let res = f
        .model
        .find_one_and_update(doc! { "name": "test" }, doc! { "name": "test2" })
        .exec()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(res.name.as_deref(), Some("test"));
    assert_eq!(stored(&f, "test2").get_i32("age").unwrap(), 12);

    let res = f
        .model
        .find_one_and_update(doc! { "name": "test2" }, doc! { "$set": { "name": "test" } })
        .await
        .unwrap();
    assert_eq!(res.unwrap().name.as_deref(), Some("test2"));

    let res = f
        .model
        .find_one_and_update(doc! { "name": "test" }, doc! { "$inc": { "age": 2 } })
        .await
        .unwrap();
    assert_eq!(res.unwrap().age, Some(12));
    assert_eq!(stored(&f, "test").get_i32("age").unwrap(), 14);
}

#[tokio::test]
async fn find_one_and_update_new_and_return_original() {
    let f = fixture();

    let res = f
        .model
        .find_one_and_update(doc! { "name": "test" }, doc! { "name": "test3" })
        .upsert(true)
        .new(true)
        .await
        .unwrap();
    assert_eq!(res.unwrap().name.as_deref(), Some("test3"));

    let res = f
        .model
        .find_one_and_update(doc! { "name": "missing" }, doc! { "age": 1 })
        .upsert(true)
        .return_original(false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(res.name.as_deref(), Some("missing"));
    assert_eq!(res.age, Some(1));
    assert!(res.id.is_some());
}

#[tokio::test]
async fn find_one_and_update_options_from_wire_keys() {
    let f = fixture();
    let options: ModifyOptions =
        serde_json::from_value(serde_json::json!({ "upsert": true, "returnOriginal": false }))
            .unwrap();

    let res = f
        .model
        .find_one_and_update(doc! { "name": "fresh" }, doc! { "age": 3 })
        .with_options(options)
        .or_fail()
        .await
        .unwrap();
    assert_eq!(res.age, Some(3));
}

#[tokio::test]
async fn raw_result_envelope() {
    let f = fixture();

    let raw = f
        .model
        .find_one_and_update(doc! { "name": "test" }, doc! { "name": "test3" })
        .raw_result()
        .await
        .unwrap();
    assert!(raw.is_ok());
    assert!(raw.last_error_object.updated_existing);
    assert_eq!(raw.value.unwrap().get_str("name").unwrap(), "test");

    let raw = f
        .model
        .find_one_and_update(doc! { "name": "nobody" }, doc! { "name": "test5" })
        .new(true)
        .upsert(true)
        .raw_result()
        .await
        .unwrap();
    assert_eq!(raw.ok, 1.0);
    assert!(raw.last_error_object.upserted.is_some());
    assert_eq!(raw.value.unwrap().get_str("name").unwrap(), "test5");
}

#[tokio::test]
async fn find_one_and_replace() {
    let f = fixture();

    let err = f
        .model
        .find_one_and_replace(
            doc! { "name": "test" },
            doc! { "_id": ObjectId::new(), "name": "test2" },
        )
        .exec()
        .await
        .unwrap_err();
    assert!(matches!(err, FerrodocError::Validation(_)));

    let original = f
        .model
        .find_one_and_replace(doc! { "name": "test" }, doc! { "name": "test2" })
        .exec()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.age, Some(12));

    let replaced = stored(&f, "test2");
    assert_eq!(replaced.get_object_id("_id").ok(), original.id);
    assert!(!replaced.contains_key("age"));
}

#[tokio::test]
async fn array_update_operators() {
    let f = fixture();

    f.model
        .find_one_and_update(doc! { "name": "test" }, doc! { "$addToSet": { "tags": "each" } })
        .await
        .unwrap();
    f.model
        .find_one_and_update(doc! { "name": "test" }, doc! { "$addToSet": { "tags": "each" } })
        .await
        .unwrap();
    f.model
        .find_one_and_update(doc! { "name": "test" }, doc! { "$push": { "tags": "each" } })
        .await
        .unwrap();
    assert_eq!(
        stored(&f, "test").get_array("tags").unwrap(),
        &vec![Bson::from("b"), Bson::from("each"), Bson::from("each")]
    );

    let res = f
        .model
        .find_one_and_update(doc! { "name": "test" }, doc! { "$pull": { "docs": { "nested.id": 1 } } })
        .new(true)
        .await
        .unwrap()
        .unwrap();
    let docs = res.docs.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, Some(7));
}

#[tokio::test]
async fn find_by_id_and_update_with_callback() {
    let f = fixture();
    let id = stored(&f, "test").get_object_id("_id").unwrap();

    let (tx, rx) = oneshot::channel();
    f.model
        .find_by_id_and_update(id.to_hex(), doc! { "name": "test2" })
        .exec_with(move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();
    let doc = rx.await.unwrap().unwrap().unwrap();
    assert_eq!(doc.id, Some(id));
    assert_eq!(stored(&f, "test2").get_object_id("_id").unwrap(), id);
}

#[tokio::test]
async fn where_chaining() {
    let f = fixture();

    let doc = f
        .model
        .query()
        .find_one(doc! {})
        .where_clause(doc! { "name": "test" })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.age, Some(12));

    let docs = f
        .model
        .where_clause(doc! {})
        .find(doc! { "name": "test" })
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "T: Serialize + DeserializeOwned")]
struct Common<T> {
    something: String,
    content: T,
}

impl<T> Document for Common<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn collection_name() -> &'static str {
        "commons"
    }
}

async fn find_something<T>(model: &Model<Common<T>>) -> ferrodoc_mongodb::Result<Common<T>>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    model.find_one(doc! { "something": "test" }).or_fail().exec().await
}

fn assert_fallible<D: Document, K: Fallible<D>>() {}

#[test]
fn generic_documents_run_like_concrete_ones() {
    assert_fallible::<Common<i32>, ferrodoc_mongodb::One>();

    let executor = Arc::new(MemoryExecutor::new());
    executor.insert_many("commons", vec![doc! { "something": "test", "content": 5 }]);
    let model: Model<Common<i32>> = Model::new(executor.clone()).unwrap();

    let found = tokio_test::block_on(find_something(&model)).unwrap();
    assert_eq!(found.content, 5);

    let mismatched: Model<Common<String>> = Model::new(executor).unwrap();
    let err = tokio_test::block_on(find_something(&mismatched)).unwrap_err();
    assert!(matches!(err, FerrodocError::Deserialization(_)));
}
