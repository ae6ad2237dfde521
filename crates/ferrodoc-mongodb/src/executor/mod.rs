//! Execution seam between query builders and a database
//!
//! A [`Query`](crate::Query) compiles into a [`Command`] (already validated
//! and cast) and hands it to an [`Executor`]. Executors own all I/O; the
//! builder only shapes the call and decodes the [`Reply`].

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};

use crate::options::{FindOptions, ModifyOptions};
use crate::Result;

pub use memory::MemoryExecutor;
pub use mongo::MongoExecutor;

/// A single operation against one collection
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Find {
        filter: BsonDocument,
        options: FindOptions,
    },
    FindOne {
        filter: BsonDocument,
        options: FindOptions,
    },
    Count {
        filter: BsonDocument,
        options: FindOptions,
    },
    Distinct {
        field: String,
        filter: BsonDocument,
        options: FindOptions,
    },
    /// `update` is in operator form
    FindOneAndUpdate {
        filter: BsonDocument,
        update: BsonDocument,
        options: ModifyOptions,
    },
    FindOneAndReplace {
        filter: BsonDocument,
        replacement: BsonDocument,
        options: ModifyOptions,
    },
    InsertOne {
        document: BsonDocument,
    },
}

impl Command {
    /// Operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Find { .. } => "find",
            Command::FindOne { .. } => "findOne",
            Command::Count { .. } => "count",
            Command::Distinct { .. } => "distinct",
            Command::FindOneAndUpdate { .. } => "findOneAndUpdate",
            Command::FindOneAndReplace { .. } => "findOneAndReplace",
            Command::InsertOne { .. } => "insertOne",
        }
    }
}

/// Executor output, one variant per command family
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Documents(Vec<BsonDocument>),
    Document(Option<BsonDocument>),
    Count(u64),
    Values(Vec<Bson>),
    Modified(RawResult),
    Inserted(Bson),
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Documents(_) => "documents",
            Reply::Document(_) => "document",
            Reply::Count(_) => "count",
            Reply::Values(_) => "values",
            Reply::Modified(_) => "modified",
            Reply::Inserted(_) => "inserted",
        }
    }
}

/// Raw find-and-modify envelope, as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResult {
    #[serde(default)]
    pub value: Option<BsonDocument>,
    #[serde(default)]
    pub last_error_object: LastErrorObject,
    pub ok: f64,
}

impl RawResult {
    /// Whether the server acknowledged the operation
    pub fn is_ok(&self) -> bool {
        self.ok == 1.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LastErrorObject {
    /// Documents matched or inserted
    pub n: u64,
    pub updated_existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted: Option<Bson>,
}

/// Configuration for command dispatch
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Threshold for slow query logging in milliseconds
    pub slow_query_threshold_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 1000, // 1 second
        }
    }
}

/// Runs commands against a database
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, collection: &str, command: Command) -> Result<Reply>;
}
