//! Query and find-and-modify options
//!
//! Option structs deserialize from the camelCase keys used on the wire
//! (`returnOriginal`, `rawResult`, ...) so they can be loaded from JSON/BSON
//! as well as built in code.

use std::time::Duration;

use bson::Document as BsonDocument;
use serde::{Deserialize, Serialize};

/// String comparison rules for a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collation {
    pub locale: String,
    /// 1 and 2 ignore case, 3 (default) does not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_level: Option<bool>,
    /// Compare digit runs as numbers ("10" > "9")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_ordering: Option<bool>,
}

impl Collation {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            ..Default::default()
        }
    }

    pub fn strength(mut self, strength: u32) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn numeric_ordering(mut self, numeric: bool) -> Self {
        self.numeric_ordering = Some(numeric);
        self
    }

    /// Whether letter case is ignored when comparing strings
    pub fn ignores_case(&self) -> bool {
        matches!(self.strength, Some(1) | Some(2)) && self.case_level != Some(true)
    }
}

/// Options shared by read queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<BsonDocument>,
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub collation: Option<Collation>,
    pub max_time: Option<Duration>,
}

/// Options for `find_one_and_update` / `find_one_and_replace`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModifyOptions {
    /// Insert a document when nothing matches
    pub upsert: bool,
    /// Return the modified document instead of the original
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<bool>,
    /// Inverse of `new`; `new` wins when both are set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_original: Option<bool>,
    /// Resolve to the raw driver envelope
    pub raw_result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<BsonDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<BsonDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<Collation>,
    /// Server-side time limit, sent as `maxTimeMS`
    #[serde(skip)]
    pub max_time: Option<Duration>,
}

impl ModifyOptions {
    /// Whether the post-modification document is returned
    pub fn returns_new(&self) -> bool {
        match (self.new, self.return_original) {
            (Some(new), _) => new,
            (None, Some(original)) => !original,
            (None, None) => false,
        }
    }
}
