//! Document trait for typed models
//!
//! This module provides the `Document` trait that every document shape handed
//! to a [`Model`](crate::Model) implements. It ties a serde type to its
//! collection and to the [`Schema`] used to cast query values.

use bson::{oid::ObjectId, Document as BsonDocument};
use ferrodoc_common::{FerrodocError, Result};
use serde::{de::DeserializeOwned, Serialize};

use crate::schema::Schema;

/// Core trait for document shapes
///
/// Fields are usually `Option<T>` with `skip_serializing_if = "Option::is_none"`
/// so an absent field stays absent instead of becoming `null`.
///
/// # Example
///
/// ```ignore
/// use serde::{Deserialize, Serialize};
/// use ferrodoc_mongodb::{Document, FieldType, Schema};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct User {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     id: Option<ObjectId>,
///     #[serde(skip_serializing_if = "Option::is_none")]
///     email: Option<String>,
/// }
///
/// impl Document for User {
///     fn collection_name() -> &'static str {
///         "users"
///     }
///
///     fn schema() -> Schema {
///         Schema::new().field("email", FieldType::String)
///     }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    /// Get the collection name for this document type
    fn collection_name() -> &'static str;

    /// Declared field types; undeclared fields are not cast
    fn schema() -> Schema {
        Schema::new()
    }

    /// Get the document's ObjectId (if it has one)
    fn get_id(&self) -> Option<ObjectId> {
        None
    }

    /// Set the document's ObjectId
    fn set_id(&mut self, _id: ObjectId) {}

    /// Convert document to BSON
    fn to_bson(&self) -> Result<BsonDocument> {
        bson::to_document(self).map_err(|e| FerrodocError::Serialization(e.to_string()))
    }

    /// Create document from BSON
    fn from_bson(doc: BsonDocument) -> Result<Self> {
        bson::from_document(doc).map_err(|e| FerrodocError::Deserialization(e.to_string()))
    }
}
