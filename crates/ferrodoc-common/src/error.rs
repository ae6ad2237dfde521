//! Error types for ferrodoc

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for ferrodoc operations
pub type Result<T> = std::result::Result<T, FerrodocError>;

/// Unified error type for all ferrodoc operations
#[derive(Error, Debug, Clone)]
pub enum FerrodocError {
    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A filter or update value could not be cast to the declared field type
    #[error("Cast to {expected} failed for value {value} at path \"{path}\"")]
    Cast {
        path: String,
        value: String,
        expected: &'static str,
    },

    /// Raised by `or_fail` when a query matched nothing
    #[error("No document found for query {filter} on collection \"{collection}\"")]
    NotFound { collection: String, filter: String },

    /// Caller-supplied error, surfaced unchanged
    #[error("{0}")]
    Custom(Arc<dyn StdError + Send + Sync>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FerrodocError {
    /// Wrap an arbitrary error so it can be surfaced through ferrodoc results
    pub fn custom<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        FerrodocError::Custom(Arc::new(err))
    }

    /// Returns true if this is a `Cast` error
    pub fn is_cast(&self) -> bool {
        matches!(self, FerrodocError::Cast { .. })
    }

    /// Returns true if this is the default `or_fail` error
    pub fn is_not_found(&self) -> bool {
        matches!(self, FerrodocError::NotFound { .. })
    }

    /// Returns the caller-supplied error, if this is one
    pub fn as_custom(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            FerrodocError::Custom(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FerrodocError {
    fn from(err: serde_json::Error) -> Self {
        FerrodocError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for FerrodocError {
    fn from(err: mongodb::error::Error) -> Self {
        FerrodocError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for FerrodocError {
    fn from(err: bson::ser::Error) -> Self {
        FerrodocError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for FerrodocError {
    fn from(err: bson::de::Error) -> Self {
        FerrodocError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Bar;

    impl std::fmt::Display for Bar {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "bar")
        }
    }

    impl StdError for Bar {}

    #[test]
    fn test_error_display_mongodb() {
        let err = FerrodocError::MongoDB("connection refused".to_string());
        assert_eq!(err.to_string(), "MongoDB error: connection refused");
    }

    #[test]
    fn test_error_display_validation() {
        let err = FerrodocError::Validation("unknown operator $foo".to_string());
        assert_eq!(err.to_string(), "Validation error: unknown operator $foo");
    }

    #[test]
    fn test_error_display_cast() {
        let err = FerrodocError::Cast {
            path: "parent".to_string(),
            value: "\"xyz\"".to_string(),
            expected: "ObjectId",
        };
        assert_eq!(
            err.to_string(),
            "Cast to ObjectId failed for value \"xyz\" at path \"parent\""
        );
        assert!(err.is_cast());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_display_not_found() {
        let err = FerrodocError::NotFound {
            collection: "tests".to_string(),
            filter: "{ \"name\": \"x\" }".to_string(),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("\"tests\""));
    }

    #[test]
    fn test_custom_error_surfaces_unchanged() {
        let err = FerrodocError::custom(Bar);
        assert_eq!(err.to_string(), "bar");
        assert!(err.as_custom().is_some());
        assert!(FerrodocError::Query("x".to_string()).as_custom().is_none());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: FerrodocError = json_err.into();
        assert!(matches!(err, FerrodocError::Serialization(_)));
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err(FerrodocError::Query("failed".to_string()));
        assert!(result.is_err());
    }
}
