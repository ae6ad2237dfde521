//! Model-level finders
//!
//! A [`Model`] binds a [`Document`] type to an executor. Every finder returns
//! a [`Query`] that does nothing until it is executed.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bson::{doc, Bson, Document as BsonDocument};
use tracing::{debug, instrument, warn};

use crate::cast::IdRef;
use crate::document::Document;
use crate::executor::{Command, Executor, ExecutorConfig, Reply};
use crate::query::{Count, Distinct, Many, Modified, One, Query, QueryHelpers};
use crate::schema::Schema;
use crate::update::Update;
use crate::validation::ValidatedCollectionName;
use crate::{FerrodocError, Result};

/// Entry point for queries over one collection
///
/// `H` selects the helper set available on every query the model creates.
pub struct Model<D, H = ()> {
    collection: Arc<str>,
    executor: Arc<dyn Executor>,
    schema: Arc<Schema>,
    config: ExecutorConfig,
    _marker: PhantomData<fn() -> (D, H)>,
}

impl<D, H> Clone for Model<D, H> {
    fn clone(&self) -> Self {
        Self {
            collection: Arc::clone(&self.collection),
            executor: Arc::clone(&self.executor),
            schema: Arc::clone(&self.schema),
            config: self.config.clone(),
            _marker: PhantomData,
        }
    }
}

impl<D, H> std::fmt::Debug for Model<D, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("collection", &self.collection)
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: Document, H: QueryHelpers> Model<D, H> {
    pub fn new(executor: Arc<dyn Executor>) -> Result<Self> {
        Self::with_config(executor, ExecutorConfig::default())
    }

    pub fn with_config(executor: Arc<dyn Executor>, config: ExecutorConfig) -> Result<Self> {
        let collection = ValidatedCollectionName::new(D::collection_name())?;
        Ok(Self {
            collection: Arc::from(collection.as_str()),
            executor,
            schema: Arc::new(D::schema()),
            config,
            _marker: PhantomData,
        })
    }

    /// Same collection and executor with another helper set
    pub fn with_helpers<H2: QueryHelpers>(self) -> Model<D, H2> {
        Model {
            collection: self.collection,
            executor: self.executor,
            schema: self.schema,
            config: self.config,
            _marker: PhantomData,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Empty query over the whole collection
    pub fn query(&self) -> Query<D, Many, H> {
        Query::find_from(self.clone(), BsonDocument::new())
    }

    pub fn where_clause(&self, filter: BsonDocument) -> Query<D, Many, H> {
        self.query().where_clause(filter)
    }

    pub fn find(&self, filter: BsonDocument) -> Query<D, Many, H> {
        Query::find_from(self.clone(), filter)
    }

    pub fn find_one(&self, filter: BsonDocument) -> Query<D, One, H> {
        Query::find_one_from(self.clone(), filter)
    }

    pub fn find_by_id(&self, id: impl Into<IdRef>) -> Query<D, One, H> {
        self.find_one(doc! { "_id": Bson::from(id.into()) })
    }

    pub fn count(&self, filter: BsonDocument) -> Query<D, Count, H> {
        Query::count_from(self.clone(), filter)
    }

    /// Distinct values of `field`; narrow with `where_clause`
    pub fn distinct(&self, field: impl Into<String>) -> Query<D, Distinct, H> {
        Query::distinct_from(self.clone(), field.into(), BsonDocument::new())
    }

    pub fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: impl Into<Update>,
    ) -> Query<D, Modified, H> {
        Query::update_from(self.clone(), filter, update.into())
    }

    pub fn find_by_id_and_update(
        &self,
        id: impl Into<IdRef>,
        update: impl Into<Update>,
    ) -> Query<D, Modified, H> {
        self.find_one_and_update(doc! { "_id": Bson::from(id.into()) }, update)
    }

    pub fn find_one_and_replace(
        &self,
        filter: BsonDocument,
        replacement: BsonDocument,
    ) -> Query<D, Modified, H> {
        Query::replace_from(self.clone(), filter, replacement)
    }

    /// Inserts `document`, assigning the generated `_id` back to it
    pub async fn insert_one(&self, document: &mut D) -> Result<Bson> {
        let bson = document.to_bson()?;
        match self.dispatch(Command::InsertOne { document: bson }).await? {
            Reply::Inserted(id) => {
                if let Bson::ObjectId(oid) = &id {
                    document.set_id(*oid);
                }
                Ok(id)
            }
            other => Err(FerrodocError::Internal(format!(
                "insertOne returned a {} reply",
                other.kind()
            ))),
        }
    }

    /// Sends one command to the executor with timing
    #[instrument(skip(self, command), fields(collection = %self.collection, op = command.name()))]
    pub(crate) async fn dispatch(&self, command: Command) -> Result<Reply> {
        let op = command.name();
        let start = Instant::now();

        match self.executor.execute(&self.collection, command).await {
            Ok(reply) => {
                self.log_completion(op, start.elapsed());
                Ok(reply)
            }
            Err(e) => {
                warn!(
                    op = op,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Query failed"
                );
                Err(e)
            }
        }
    }

    fn log_completion(&self, op: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;

        if elapsed_ms >= self.config.slow_query_threshold_ms {
            warn!(
                op = op,
                elapsed_ms = elapsed_ms,
                threshold_ms = self.config.slow_query_threshold_ms,
                "Slow query detected"
            );
        } else {
            debug!(op = op, elapsed_ms = elapsed_ms, "Query completed");
        }
    }
}
