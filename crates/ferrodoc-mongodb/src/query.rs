//! Typed query builder
//!
//! A [`Query`] is parameterized by the document type `D`, a result kind `K`
//! and a helper set `H`. Chain calls consume the builder and return a new
//! one; calls that change what the query resolves to (`or_fail`,
//! `raw_result`, `find`, `find_one`) change `K`. Nothing reaches the executor
//! until one of the terminal calls runs:
//!
//! - `query.exec().await`
//! - `query.await` (via [`IntoFuture`])
//! - `query.exec_with(|result| ...)`, which runs on a spawned task
//!
//! # Helper sets
//!
//! Helpers are an extension trait implemented for every `Query<D, K, H>` with
//! a given `H`. Since every chain call keeps `D` and `H`, helpers stay
//! available for the whole chain:
//!
//! ```ignore
//! struct ByNameHelpers;
//! impl QueryHelpers for ByNameHelpers {}
//!
//! trait ByName {
//!     fn by_name(self, name: &str) -> Self;
//! }
//!
//! impl<D: Document, K: ResultKind<D>> ByName for Query<D, K, ByNameHelpers> {
//!     fn by_name(self, name: &str) -> Self {
//!         self.where_clause(doc! { "name": name })
//!     }
//! }
//!
//! let docs = model.find(doc! {}).by_name("test").sort(doc! { "age": 1 }).by_name("test").await?;
//! ```

use std::error::Error as StdError;
use std::future::IntoFuture;
use std::marker::PhantomData;
use std::time::Duration;

use bson::{Bson, Document as BsonDocument};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cast::{cast_filter, cast_replacement, cast_update};
use crate::document::Document;
use crate::executor::{Command, RawResult, Reply};
use crate::model::Model;
use crate::options::{Collation, FindOptions, ModifyOptions};
use crate::update::Update;
use crate::validation::{validate_filter, validate_replacement};
use crate::{FerrodocError, Result};

/// Marker for a set of user-declared query helpers
pub trait QueryHelpers: Send + Sync + 'static {}

impl QueryHelpers for () {}

/// What a resolved query carries into decoding besides the reply
#[derive(Debug)]
pub struct DecodeContext<'a> {
    collection: &'a str,
    filter: &'a BsonDocument,
    not_found: Option<FerrodocError>,
}

impl DecodeContext<'_> {
    pub fn collection(&self) -> &str {
        self.collection
    }

    pub fn filter(&self) -> &BsonDocument {
        self.filter
    }

    /// Error for an empty result: the caller's, or `NotFound`
    pub fn not_found(&self) -> FerrodocError {
        self.not_found.clone().unwrap_or_else(|| FerrodocError::NotFound {
            collection: self.collection.to_string(),
            filter: self.filter.to_string(),
        })
    }
}

/// Maps an executor reply to the value a query resolves to
pub trait ResultKind<D: Document>: Send + 'static {
    type Output: Send + 'static;

    fn decode(reply: Reply, ctx: &DecodeContext<'_>) -> Result<Self::Output>;
}

/// Kinds whose output can be empty, and so can be narrowed by `or_fail`
pub trait Fallible<D: Document>: ResultKind<D> {
    type Present: Send + 'static;

    /// `None` when the output counts as "nothing found"
    fn present(output: Self::Output) -> Option<Self::Present>;
}

/// Kinds backed by a find-and-modify command
pub trait ModifyKind {
    /// Whether the query resolves to the raw envelope
    const RAW: bool = false;
}

/// All matching documents
#[derive(Debug)]
pub struct Many;
/// First matching document, if any
#[derive(Debug)]
pub struct One;
/// Number of matching documents
#[derive(Debug)]
pub struct Count;
/// Distinct values of one field
#[derive(Debug)]
pub struct Distinct;
/// Document returned by a find-and-modify, if any
#[derive(Debug)]
pub struct Modified;
/// Raw find-and-modify envelope
#[derive(Debug)]
pub struct Raw;
/// `K` with the empty case turned into an error
#[derive(Debug)]
pub struct Required<K>(PhantomData<fn() -> K>);

fn unexpected(expected: &str, reply: &Reply) -> FerrodocError {
    FerrodocError::Internal(format!(
        "Expected a {} reply, executor returned {}",
        expected,
        reply.kind()
    ))
}

fn acknowledged(raw: RawResult) -> Result<RawResult> {
    if raw.is_ok() {
        Ok(raw)
    } else {
        Err(FerrodocError::Database(format!(
            "findAndModify not acknowledged (ok: {})",
            raw.ok
        )))
    }
}

impl<D: Document> ResultKind<D> for Many {
    type Output = Vec<D>;

    fn decode(reply: Reply, _ctx: &DecodeContext<'_>) -> Result<Vec<D>> {
        match reply {
            Reply::Documents(docs) => docs.into_iter().map(D::from_bson).collect(),
            other => Err(unexpected("documents", &other)),
        }
    }
}

impl<D: Document> Fallible<D> for Many {
    type Present = Vec<D>;

    fn present(output: Vec<D>) -> Option<Vec<D>> {
        (!output.is_empty()).then_some(output)
    }
}

impl<D: Document> ResultKind<D> for One {
    type Output = Option<D>;

    fn decode(reply: Reply, _ctx: &DecodeContext<'_>) -> Result<Option<D>> {
        match reply {
            Reply::Document(doc) => doc.map(D::from_bson).transpose(),
            other => Err(unexpected("document", &other)),
        }
    }
}

impl<D: Document> Fallible<D> for One {
    type Present = D;

    fn present(output: Option<D>) -> Option<D> {
        output
    }
}

impl<D: Document> ResultKind<D> for Count {
    type Output = u64;

    fn decode(reply: Reply, _ctx: &DecodeContext<'_>) -> Result<u64> {
        match reply {
            Reply::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }
}

impl<D: Document> ResultKind<D> for Distinct {
    type Output = Vec<Bson>;

    fn decode(reply: Reply, _ctx: &DecodeContext<'_>) -> Result<Vec<Bson>> {
        match reply {
            Reply::Values(values) => Ok(values),
            other => Err(unexpected("values", &other)),
        }
    }
}

impl<D: Document> ResultKind<D> for Modified {
    type Output = Option<D>;

    fn decode(reply: Reply, _ctx: &DecodeContext<'_>) -> Result<Option<D>> {
        match reply {
            Reply::Modified(raw) => acknowledged(raw)?.value.map(D::from_bson).transpose(),
            other => Err(unexpected("modified", &other)),
        }
    }
}

impl<D: Document> Fallible<D> for Modified {
    type Present = D;

    fn present(output: Option<D>) -> Option<D> {
        output
    }
}

impl ModifyKind for Modified {}

impl<D: Document> ResultKind<D> for Raw {
    type Output = RawResult;

    fn decode(reply: Reply, _ctx: &DecodeContext<'_>) -> Result<RawResult> {
        match reply {
            Reply::Modified(raw) => acknowledged(raw),
            other => Err(unexpected("modified", &other)),
        }
    }
}

impl<D: Document> Fallible<D> for Raw {
    type Present = RawResult;

    fn present(output: RawResult) -> Option<RawResult> {
        (output.value.is_some() || output.last_error_object.n > 0).then_some(output)
    }
}

impl ModifyKind for Raw {
    const RAW: bool = true;
}

impl<D: Document, K: Fallible<D>> ResultKind<D> for Required<K> {
    type Output = K::Present;

    fn decode(reply: Reply, ctx: &DecodeContext<'_>) -> Result<K::Present> {
        K::present(K::decode(reply, ctx)?).ok_or_else(|| ctx.not_found())
    }
}

impl<K: ModifyKind> ModifyKind for Required<K> {
    const RAW: bool = K::RAW;
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Find,
    FindOne,
    Count,
    Distinct(String),
    Update(Update),
    Replace(BsonDocument),
}

impl Op {
    fn is_modify(&self) -> bool {
        matches!(self, Op::Update(_) | Op::Replace(_))
    }
}

/// A pending query against one model
pub struct Query<D, K, H = ()> {
    model: Model<D, H>,
    op: Op,
    filter: BsonDocument,
    find: FindOptions,
    modify: ModifyOptions,
    not_found: Option<FerrodocError>,
    _kind: PhantomData<fn() -> K>,
}

impl<D, K, H> std::fmt::Debug for Query<D, K, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("model", &self.model)
            .field("op", &self.op)
            .field("filter", &self.filter)
            .field("find", &self.find)
            .field("modify", &self.modify)
            .finish_non_exhaustive()
    }
}

impl<D: Document, H: QueryHelpers> Query<D, Many, H> {
    pub(crate) fn find_from(model: Model<D, H>, filter: BsonDocument) -> Self {
        Query::from_parts(model, Op::Find, filter)
    }
}

impl<D: Document, H: QueryHelpers> Query<D, One, H> {
    pub(crate) fn find_one_from(model: Model<D, H>, filter: BsonDocument) -> Self {
        Query::from_parts(model, Op::FindOne, filter)
    }
}

impl<D: Document, H: QueryHelpers> Query<D, Count, H> {
    pub(crate) fn count_from(model: Model<D, H>, filter: BsonDocument) -> Self {
        Query::from_parts(model, Op::Count, filter)
    }
}

impl<D: Document, H: QueryHelpers> Query<D, Distinct, H> {
    pub(crate) fn distinct_from(model: Model<D, H>, field: String, filter: BsonDocument) -> Self {
        Query::from_parts(model, Op::Distinct(field), filter)
    }
}

impl<D: Document, H: QueryHelpers> Query<D, Modified, H> {
    pub(crate) fn update_from(model: Model<D, H>, filter: BsonDocument, update: Update) -> Self {
        Query::from_parts(model, Op::Update(update), filter)
    }

    pub(crate) fn replace_from(
        model: Model<D, H>,
        filter: BsonDocument,
        replacement: BsonDocument,
    ) -> Self {
        Query::from_parts(model, Op::Replace(replacement), filter)
    }

    /// Resolve to the raw find-and-modify envelope instead of the document
    pub fn raw_result(mut self) -> Query<D, Raw, H> {
        self.modify.raw_result = true;
        self.into_kind()
    }
}

impl<D: Document, K: ResultKind<D>, H: QueryHelpers> Query<D, K, H> {
    fn from_parts(model: Model<D, H>, op: Op, filter: BsonDocument) -> Self {
        Self {
            model,
            op,
            filter,
            find: FindOptions::default(),
            modify: ModifyOptions::default(),
            not_found: None,
            _kind: PhantomData,
        }
    }

    fn into_kind<K2: ResultKind<D>>(self) -> Query<D, K2, H> {
        Query {
            model: self.model,
            op: self.op,
            filter: self.filter,
            find: self.find,
            modify: self.modify,
            not_found: self.not_found,
            _kind: PhantomData,
        }
    }

    /// Merge `filter` into the current conditions; later keys win
    pub fn where_clause(mut self, filter: BsonDocument) -> Self {
        for (key, value) in filter {
            self.filter.insert(key, value);
        }
        self
    }

    /// Re-target as a find with `filter` merged in
    pub fn find(self, filter: BsonDocument) -> Query<D, Many, H> {
        let mut query: Query<D, Many, H> = self.into_kind();
        query.op = Op::Find;
        query.where_clause(filter)
    }

    /// Re-target as a find-one with `filter` merged in
    pub fn find_one(self, filter: BsonDocument) -> Query<D, One, H> {
        let mut query: Query<D, One, H> = self.into_kind();
        query.op = Op::FindOne;
        query.where_clause(filter)
    }

    /// Projection (`{ field: 1 }` or `{ field: 0 }`)
    pub fn select(mut self, projection: BsonDocument) -> Self {
        if self.op.is_modify() {
            self.modify.projection = Some(projection);
        } else {
            self.find.projection = Some(projection);
        }
        self
    }

    pub fn sort(mut self, sort: BsonDocument) -> Self {
        if self.op.is_modify() {
            self.modify.sort = Some(sort);
        } else {
            self.find.sort = Some(sort);
        }
        self
    }

    pub fn collation(mut self, collation: Collation) -> Self {
        if self.op.is_modify() {
            self.modify.collation = Some(collation);
        } else {
            self.find.collation = Some(collation);
        }
        self
    }

    /// Number of documents to skip; ignored by find-and-modify
    pub fn skip(mut self, skip: u64) -> Self {
        self.find.skip = Some(skip);
        self
    }

    /// Maximum number of documents; ignored by find-and-modify
    pub fn limit(mut self, limit: i64) -> Self {
        self.find.limit = Some(limit);
        self
    }

    /// Server-side time limit, passed to the executor as is
    pub fn max_time(mut self, max_time: Duration) -> Self {
        if self.op.is_modify() {
            self.modify.max_time = Some(max_time);
        } else {
            self.find.max_time = Some(max_time);
        }
        self
    }

    pub fn collection_name(&self) -> &str {
        self.model.collection_name()
    }

    pub fn filter(&self) -> &BsonDocument {
        &self.filter
    }

    pub fn find_options(&self) -> &FindOptions {
        &self.find
    }

    pub fn modify_options(&self) -> &ModifyOptions {
        &self.modify
    }

    /// Validates and casts the query into an executor command
    pub fn to_command(&self) -> Result<Command> {
        let schema = self.model.schema();
        validate_filter(&self.filter)?;
        let filter = cast_filter(schema, &self.filter)?;

        let command = match &self.op {
            Op::Find => Command::Find {
                filter,
                options: self.find.clone(),
            },
            Op::FindOne => Command::FindOne {
                filter,
                options: self.find.clone(),
            },
            Op::Count => Command::Count {
                filter,
                options: self.find.clone(),
            },
            Op::Distinct(field) => Command::Distinct {
                field: field.clone(),
                filter,
                options: self.find.clone(),
            },
            Op::Update(update) => Command::FindOneAndUpdate {
                filter,
                update: cast_update(schema, &update.normalize()?)?,
                options: self.modify.clone(),
            },
            Op::Replace(replacement) => {
                validate_replacement(replacement)?;
                Command::FindOneAndReplace {
                    filter,
                    replacement: cast_replacement(schema, replacement)?,
                    options: self.modify.clone(),
                }
            }
        };
        Ok(command)
    }

    /// Run the query
    pub async fn exec(self) -> Result<K::Output> {
        let command = self.to_command()?;
        let reply = self.model.dispatch(command).await?;
        let ctx = DecodeContext {
            collection: self.model.collection_name(),
            filter: &self.filter,
            not_found: self.not_found,
        };
        K::decode(reply, &ctx)
    }

    /// Run the query on a spawned task and hand the result to `callback`
    ///
    /// Must be called from within a tokio runtime.
    pub fn exec_with<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<K::Output>) + Send + 'static,
    {
        tokio::spawn(async move {
            callback(self.exec().await);
        })
    }
}

impl<D: Document, K: Fallible<D>, H: QueryHelpers> Query<D, K, H> {
    /// Fail with `NotFound` when nothing matches
    pub fn or_fail(self) -> Query<D, Required<K>, H> {
        self.into_kind()
    }

    /// Fail with `error` when nothing matches
    pub fn or_fail_with<E>(mut self, error: E) -> Query<D, Required<K>, H>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.not_found = Some(FerrodocError::custom(error));
        self.into_kind()
    }
}

impl<D: Document, K: ResultKind<D> + ModifyKind, H: QueryHelpers> Query<D, K, H> {
    /// Insert a document built from the filter when nothing matches
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.modify.upsert = upsert;
        self
    }

    /// Return the modified document instead of the original
    pub fn new(mut self, new: bool) -> Self {
        self.modify.new = Some(new);
        self
    }

    pub fn return_original(mut self, return_original: bool) -> Self {
        self.modify.return_original = Some(return_original);
        self
    }

    /// Replace all find-and-modify options at once
    ///
    /// `raw_result` in `options` cannot change what the query resolves to,
    /// so the flag always mirrors the builder; call [`Query::raw_result`] to
    /// switch to the envelope.
    pub fn with_options(mut self, options: ModifyOptions) -> Self {
        if options.raw_result && !K::RAW {
            warn!(
                collection = self.collection_name(),
                "rawResult in options is ignored; call raw_result() to resolve to the envelope"
            );
        }
        self.modify = ModifyOptions {
            raw_result: K::RAW,
            ..options
        };
        self
    }
}

impl<D: Document, K: ResultKind<D>, H: QueryHelpers> IntoFuture for Query<D, K, H> {
    type Output = Result<K::Output>;
    type IntoFuture = BoxFuture<'static, Result<K::Output>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.exec())
    }
}
