//! Typed query builder for MongoDB documents
//!
//! A [`Model`] binds a [`Document`] type to an [`Executor`]. Its finders return
//! [`Query`] builders whose result type follows the chain:
//!
//! ```ignore
//! let model: Model<User> = connection.model()?;
//!
//! let users: Vec<User> = model.find(doc! { "age": { "$gte": 18 } }).sort(doc! { "age": 1 }).await?;
//! let user: User = model.find_one(doc! { "name": "test" }).or_fail().await?;
//! let raw: RawResult = model
//!     .find_one_and_update(doc! { "name": "test" }, doc! { "$inc": { "age": 1 } })
//!     .upsert(true)
//!     .raw_result()
//!     .await?;
//! ```
//!
//! # Features
//! - Filters and updates cast against a declared [`Schema`]
//! - Awaitable and callback-style resolution
//! - User-defined query helper sets that survive chaining
//! - In-memory executor for tests, driver executor for a live server

pub mod cast;
pub mod connection;
pub mod document;
pub mod executor;
pub mod filter;
pub mod model;
pub mod options;
pub mod query;
pub mod schema;
pub mod update;
pub mod validation;

pub use cast::IdRef;
pub use connection::{Connection, PoolConfig};
pub use document::Document;
pub use executor::{
    Command, Executor, ExecutorConfig, LastErrorObject, MemoryExecutor, MongoExecutor, RawResult,
    Reply,
};
pub use ferrodoc_common::{FerrodocError, Result};
pub use model::Model;
pub use options::{Collation, FindOptions, ModifyOptions};
pub use query::{
    Count, DecodeContext, Distinct, Fallible, Many, Modified, ModifyKind, One, Query,
    QueryHelpers, Raw, Required, ResultKind,
};
pub use schema::{FieldType, Schema};
pub use update::Update;
pub use validation::ValidatedCollectionName;

/// Common imports for defining documents and running queries
pub mod prelude {
    pub use crate::{
        Collation, Document, FerrodocError, FieldType, IdRef, Model, ModifyOptions, Query,
        QueryHelpers, RawResult, Result, ResultKind, Schema, Update,
    };
    pub use bson::{doc, oid::ObjectId, Bson};
}
