//! Executor backed by the MongoDB driver

use async_trait::async_trait;
use bson::{doc, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::{
    options::{
        Collation as DriverCollation, CollationStrength, CountOptions, DistinctOptions,
        FindOneOptions, FindOptions as DriverFindOptions,
    },
    Collection, Database,
};
use tracing::{debug, instrument};

use super::{Command, Executor, RawResult, Reply};
use crate::connection::Connection;
use crate::options::{Collation, FindOptions, ModifyOptions};
use crate::Result;

/// Runs commands through a driver [`Database`] handle
#[derive(Debug, Clone)]
pub struct MongoExecutor {
    database: Database,
}

impl MongoExecutor {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn from_connection(connection: &Connection) -> Self {
        Self::new(connection.database().clone())
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }

    async fn find_one_and_modify(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: &ModifyOptions,
    ) -> Result<RawResult> {
        let command = modify_command(collection, filter, update, options)?;
        let reply = self.database.run_command(command).await?;
        Ok(bson::from_document(reply)?)
    }
}

/// Builds the `findAndModify` command document
fn modify_command(
    collection: &str,
    filter: BsonDocument,
    update: BsonDocument,
    options: &ModifyOptions,
) -> Result<BsonDocument> {
    let mut command = doc! {
        "findAndModify": collection,
        "query": filter,
        "update": update,
        "new": options.returns_new(),
        "upsert": options.upsert,
    };
    if let Some(sort) = &options.sort {
        command.insert("sort", sort.clone());
    }
    if let Some(projection) = &options.projection {
        command.insert("fields", projection.clone());
    }
    if let Some(collation) = &options.collation {
        command.insert("collation", bson::to_document(collation)?);
    }
    if let Some(max_time) = options.max_time {
        let millis = i64::try_from(max_time.as_millis()).unwrap_or(i64::MAX);
        command.insert("maxTimeMS", millis);
    }
    Ok(command)
}

#[async_trait]
impl Executor for MongoExecutor {
    #[instrument(skip(self, command), fields(op = command.name()))]
    async fn execute(&self, collection: &str, command: Command) -> Result<Reply> {
        let reply = match command {
            Command::Find { filter, options } => {
                let cursor = self
                    .collection(collection)
                    .find(filter)
                    .with_options(find_options(&options))
                    .await?;
                Reply::Documents(cursor.try_collect().await?)
            }
            Command::FindOne { filter, options } => {
                let mut find_one = FindOneOptions::default();
                find_one.projection = options.projection;
                find_one.sort = options.sort;
                find_one.skip = options.skip;
                find_one.collation = options.collation.as_ref().map(driver_collation);
                find_one.max_time = options.max_time;
                Reply::Document(
                    self.collection(collection)
                        .find_one(filter)
                        .with_options(find_one)
                        .await?,
                )
            }
            Command::Count { filter, options } => {
                let mut count = CountOptions::default();
                count.skip = options.skip;
                count.limit = options.limit.map(i64::unsigned_abs);
                count.collation = options.collation.as_ref().map(driver_collation);
                count.max_time = options.max_time;
                Reply::Count(
                    self.collection(collection)
                        .count_documents(filter)
                        .with_options(count)
                        .await?,
                )
            }
            Command::Distinct { field, filter, options } => {
                let mut distinct = DistinctOptions::default();
                distinct.collation = options.collation.as_ref().map(driver_collation);
                distinct.max_time = options.max_time;
                Reply::Values(
                    self.collection(collection)
                        .distinct(field, filter)
                        .with_options(distinct)
                        .await?,
                )
            }
            Command::FindOneAndUpdate { filter, update, options } => {
                Reply::Modified(self.find_one_and_modify(collection, filter, update, &options).await?)
            }
            Command::FindOneAndReplace { filter, replacement, options } => Reply::Modified(
                self.find_one_and_modify(collection, filter, replacement, &options)
                    .await?,
            ),
            Command::InsertOne { document } => {
                let result = self.collection(collection).insert_one(document).await?;
                Reply::Inserted(result.inserted_id)
            }
        };
        debug!(reply = reply.kind(), "Driver command complete");
        Ok(reply)
    }
}

fn find_options(options: &FindOptions) -> DriverFindOptions {
    let mut find = DriverFindOptions::default();
    find.projection = options.projection.clone();
    find.sort = options.sort.clone();
    find.skip = options.skip;
    find.limit = options.limit;
    find.collation = options.collation.as_ref().map(driver_collation);
    find.max_time = options.max_time;
    find
}

fn driver_collation(collation: &Collation) -> DriverCollation {
    let mut driver = DriverCollation::builder().locale(collation.locale.clone()).build();
    driver.strength = collation.strength.and_then(strength_level);
    driver.case_level = collation.case_level;
    driver.numeric_ordering = collation.numeric_ordering;
    driver
}

fn strength_level(level: u32) -> Option<CollationStrength> {
    match level {
        1 => Some(CollationStrength::Primary),
        2 => Some(CollationStrength::Secondary),
        3 => Some(CollationStrength::Tertiary),
        4 => Some(CollationStrength::Quaternary),
        5 => Some(CollationStrength::Identical),
        _ => None,
    }
}
