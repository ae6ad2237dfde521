//! Input validation for query and update documents
//!
//! Everything here runs before a command is handed to an executor, so a
//! malformed filter or update fails the same way against any backend.
//!
//! # Checks
//! - Collection names (no system collections, no `$`, bounded length)
//! - Filter documents (known operators only, server-side JavaScript blocked)
//! - Update documents (supported update operators only)
//! - Replacement documents (no operators at all)

use bson::{Bson, Document as BsonDocument};
use ferrodoc_common::FerrodocError;
use tracing::warn;

use crate::Result;

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Update operators an `Update` may carry
pub const UPDATE_OPERATORS: &[&str] = &[
    "$set", "$unset", "$inc", "$push", "$addToSet", "$pull", "$setOnInsert",
];

/// Operators accepted inside a filter document
const QUERY_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin",
    "$and", "$or", "$nor", "$not", "$exists", "$regex", "$options",
    "$elemMatch", "$size", "$all", "$comment",
];

/// Operators that run server-side JavaScript
const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// Validated collection name
///
/// # Guarantees
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(FerrodocError::Validation(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(FerrodocError::Validation(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(FerrodocError::Validation(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(FerrodocError::Validation(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(FerrodocError::Validation(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") {
            warn!(collection = name, "Collection name contains empty segment");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Checks a field path used as a document key
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FerrodocError::Validation(
            "Field name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_FIELD_NAME_LENGTH {
        return Err(FerrodocError::Validation(format!(
            "Field name exceeds maximum length of {} characters",
            MAX_FIELD_NAME_LENGTH
        )));
    }

    if name.contains('\0') {
        return Err(FerrodocError::Validation(
            "Field name cannot contain null bytes".to_string(),
        ));
    }

    if name.starts_with('$') {
        return Err(FerrodocError::Validation(format!(
            "Field name cannot start with '$' (reserved for operators): '{}'",
            name
        )));
    }

    Ok(())
}

pub fn is_update_operator(name: &str) -> bool {
    UPDATE_OPERATORS.contains(&name)
}

/// Validates a filter document
///
/// Top-level keys are either field paths or the logical operators
/// `$and`/`$or`/`$nor`; operator documents under a field may only use
/// known query operators.
pub fn validate_filter(filter: &BsonDocument) -> Result<()> {
    for (key, value) in filter {
        if key.starts_with('$') {
            check_operator(key)?;
            match key.as_str() {
                "$and" | "$or" | "$nor" => validate_clause_list(key, value)?,
                "$comment" => {}
                _ => {
                    return Err(FerrodocError::Query(format!(
                        "Operator '{}' is not valid at the top level of a filter",
                        key
                    )))
                }
            }
        } else {
            validate_field_name(key)?;
            validate_condition(value)?;
        }
    }
    Ok(())
}

fn validate_clause_list(key: &str, value: &Bson) -> Result<()> {
    let clauses = match value {
        Bson::Array(clauses) if !clauses.is_empty() => clauses,
        _ => {
            return Err(FerrodocError::Query(format!(
                "'{}' expects a non-empty array of filters",
                key
            )))
        }
    };
    for clause in clauses {
        match clause {
            Bson::Document(inner) => validate_filter(inner)?,
            other => {
                return Err(FerrodocError::Query(format!(
                    "'{}' entries must be documents, got {}",
                    key, other
                )))
            }
        }
    }
    Ok(())
}

fn validate_condition(value: &Bson) -> Result<()> {
    let Bson::Document(condition) = value else {
        return Ok(());
    };
    for (key, inner) in condition {
        if !key.starts_with('$') {
            // plain sub-document equality
            continue;
        }
        check_operator(key)?;
        match key.as_str() {
            "$in" | "$nin" | "$all" if !matches!(inner, Bson::Array(_)) => {
                return Err(FerrodocError::Query(format!(
                    "'{}' needs an array",
                    key
                )))
            }
            "$elemMatch" => match inner {
                Bson::Document(sub) => {
                    if sub.keys().all(|k| k.starts_with('$')) {
                        validate_condition(inner)?;
                    } else {
                        validate_filter(sub)?;
                    }
                }
                _ => {
                    return Err(FerrodocError::Query(
                        "'$elemMatch' needs a document".to_string(),
                    ))
                }
            },
            "$not" => validate_condition(inner)?,
            _ => {}
        }
    }
    Ok(())
}

fn check_operator(key: &str) -> Result<()> {
    if DANGEROUS_OPERATORS.contains(&key) {
        return Err(FerrodocError::Validation(format!(
            "Dangerous operator '{}' is not allowed",
            key
        )));
    }
    if !QUERY_OPERATORS.contains(&key) {
        return Err(FerrodocError::Query(format!("Unknown operator: {}", key)));
    }
    Ok(())
}

/// Validates an operator-form update document
pub fn validate_update(update: &BsonDocument) -> Result<()> {
    if update.is_empty() {
        return Err(FerrodocError::Validation(
            "Update document cannot be empty".to_string(),
        ));
    }
    for (operator, fields) in update {
        if !is_update_operator(operator) {
            return Err(FerrodocError::Validation(format!(
                "Unsupported update operator: '{}'",
                operator
            )));
        }
        let Bson::Document(fields) = fields else {
            return Err(FerrodocError::Validation(format!(
                "'{}' expects a document of field paths",
                operator
            )));
        };
        for path in fields.keys() {
            validate_field_name(path)?;
        }
    }
    Ok(())
}

/// Validates a replacement document
pub fn validate_replacement(replacement: &BsonDocument) -> Result<()> {
    for key in replacement.keys() {
        if key.starts_with('$') {
            return Err(FerrodocError::Validation(format!(
                "Replacement document cannot contain operator '{}'",
                key
            )));
        }
        validate_field_name(key)?;
    }
    Ok(())
}
