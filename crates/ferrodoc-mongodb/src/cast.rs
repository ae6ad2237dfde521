//! Casting of filter and update values against a document's schema
//!
//! Values are only converted where the schema declares a type. The main case
//! is reference identifiers: at an `ObjectId` path, a 24-character hex string
//! and the `ObjectId` it spells are interchangeable, and both reach the
//! executor as `Bson::ObjectId`. Undeclared paths are never converted.

use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use ferrodoc_common::FerrodocError;

use crate::schema::{FieldType, Schema};
use crate::Result;

/// A reference identifier in either of its accepted forms
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRef {
    ObjectId(ObjectId),
    /// 24-character hex text, checked when the query is cast
    Hex(String),
}

impl IdRef {
    /// Resolve to the canonical form
    pub fn resolve(&self) -> Result<ObjectId> {
        match self {
            IdRef::ObjectId(oid) => Ok(*oid),
            IdRef::Hex(hex) => parse_object_id(hex).ok_or_else(|| FerrodocError::Cast {
                path: "_id".to_string(),
                value: format!("\"{}\"", hex),
                expected: "ObjectId",
            }),
        }
    }
}

impl From<ObjectId> for IdRef {
    fn from(oid: ObjectId) -> Self {
        IdRef::ObjectId(oid)
    }
}

impl From<&str> for IdRef {
    fn from(hex: &str) -> Self {
        IdRef::Hex(hex.to_string())
    }
}

impl From<String> for IdRef {
    fn from(hex: String) -> Self {
        IdRef::Hex(hex)
    }
}

impl From<IdRef> for Bson {
    fn from(id: IdRef) -> Self {
        match id {
            IdRef::ObjectId(oid) => Bson::ObjectId(oid),
            IdRef::Hex(hex) => Bson::String(hex),
        }
    }
}

/// Parses the 24-hex-character text form of an `ObjectId`
pub fn parse_object_id(value: &str) -> Option<ObjectId> {
    if value.len() != 24 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    ObjectId::parse_str(value).ok()
}

/// Casts every field condition of a filter document
pub fn cast_filter(schema: &Schema, filter: &BsonDocument) -> Result<BsonDocument> {
    let mut cast = BsonDocument::new();
    for (key, value) in filter {
        let value = match key.as_str() {
            "$and" | "$or" | "$nor" => cast_clause_list(schema, value)?,
            _ if key.starts_with('$') => value.clone(),
            _ => cast_condition(key, &schema.path_type(key), value)?,
        };
        cast.insert(key.clone(), value);
    }
    Ok(cast)
}

fn cast_clause_list(schema: &Schema, value: &Bson) -> Result<Bson> {
    match value {
        Bson::Array(clauses) => {
            let mut cast = Vec::with_capacity(clauses.len());
            for clause in clauses {
                cast.push(match clause {
                    Bson::Document(inner) => Bson::Document(cast_filter(schema, inner)?),
                    other => other.clone(),
                });
            }
            Ok(Bson::Array(cast))
        }
        other => Ok(other.clone()),
    }
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Casts the right-hand side of one `path: condition` pair
fn cast_condition(path: &str, field_type: &FieldType, value: &Bson) -> Result<Bson> {
    let Bson::Document(condition) = value else {
        return cast_value(path, field_type, value);
    };
    if !is_operator_document(value) {
        return cast_value(path, field_type, value);
    }

    let mut cast = BsonDocument::new();
    for (operator, operand) in condition {
        let operand = match operator.as_str() {
            "$in" | "$nin" | "$all" => match operand {
                Bson::Array(items) => Bson::Array(
                    items
                        .iter()
                        .map(|item| cast_value(path, field_type.element(), item))
                        .collect::<Result<Vec<_>>>()?,
                ),
                other => other.clone(),
            },
            "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                cast_value(path, field_type, operand)?
            }
            "$not" => cast_condition(path, field_type, operand)?,
            "$elemMatch" => cast_elem_match(path, field_type, operand)?,
            _ => operand.clone(),
        };
        cast.insert(operator.clone(), operand);
    }
    Ok(Bson::Document(cast))
}

fn cast_elem_match(path: &str, field_type: &FieldType, operand: &Bson) -> Result<Bson> {
    match (field_type.element(), operand) {
        (_, op) if is_operator_document(op) => cast_condition(path, field_type.element(), op),
        (FieldType::Document(schema), Bson::Document(sub)) => {
            Ok(Bson::Document(cast_filter(schema, sub)?))
        }
        (_, other) => Ok(other.clone()),
    }
}

/// Casts a literal value to the declared type of `path`
pub fn cast_value(path: &str, field_type: &FieldType, value: &Bson) -> Result<Bson> {
    match (field_type, value) {
        (_, Bson::Null) | (_, Bson::RegularExpression(_)) | (FieldType::Mixed, _) => {
            Ok(value.clone())
        }
        (FieldType::Array(inner), Bson::Array(items)) => Ok(Bson::Array(
            items
                .iter()
                .map(|item| cast_value(path, inner, item))
                .collect::<Result<Vec<_>>>()?,
        )),
        // scalar against an array field matches any element
        (FieldType::Array(inner), other) => cast_value(path, inner, other),
        (FieldType::Document(schema), Bson::Document(sub)) => {
            let mut cast = BsonDocument::new();
            for (key, inner) in sub {
                let inner_path = format!("{}.{}", path, key);
                cast.insert(key.clone(), cast_value(&inner_path, &schema.path_type(key), inner)?);
            }
            Ok(Bson::Document(cast))
        }
        _ => cast_scalar(path, field_type, value),
    }
}

fn cast_error(path: &str, field_type: &FieldType, value: &Bson) -> FerrodocError {
    FerrodocError::Cast {
        path: path.to_string(),
        value: value.to_string(),
        expected: field_type.name(),
    }
}

fn cast_scalar(path: &str, field_type: &FieldType, value: &Bson) -> Result<Bson> {
    let fail = || cast_error(path, field_type, value);
    match field_type {
        FieldType::ObjectId => match value {
            Bson::ObjectId(_) => Ok(value.clone()),
            Bson::String(s) => parse_object_id(s).map(Bson::ObjectId).ok_or_else(fail),
            _ => Err(fail()),
        },
        FieldType::Number => match value {
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
                Ok(value.clone())
            }
            Bson::String(s) => {
                let trimmed = s.trim();
                if let Ok(n) = trimmed.parse::<i64>() {
                    Ok(number_from_i64(n))
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Bson::Double)
                        .ok_or_else(fail)
                }
            }
            Bson::Boolean(b) => Ok(Bson::Int32(i32::from(*b))),
            _ => Err(fail()),
        },
        FieldType::String => match value {
            Bson::String(_) => Ok(value.clone()),
            Bson::Int32(n) => Ok(Bson::String(n.to_string())),
            Bson::Int64(n) => Ok(Bson::String(n.to_string())),
            Bson::Double(n) => Ok(Bson::String(n.to_string())),
            Bson::Boolean(b) => Ok(Bson::String(b.to_string())),
            Bson::ObjectId(oid) => Ok(Bson::String(oid.to_hex())),
            _ => Err(fail()),
        },
        FieldType::Boolean => match value {
            Bson::Boolean(_) => Ok(value.clone()),
            Bson::String(s) => match s.as_str() {
                "true" | "1" | "yes" => Ok(Bson::Boolean(true)),
                "false" | "0" | "no" => Ok(Bson::Boolean(false)),
                _ => Err(fail()),
            },
            Bson::Int32(0) | Bson::Int64(0) => Ok(Bson::Boolean(false)),
            Bson::Int32(1) | Bson::Int64(1) => Ok(Bson::Boolean(true)),
            _ => Err(fail()),
        },
        FieldType::Date => match value {
            Bson::DateTime(_) => Ok(value.clone()),
            Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt.with_timezone(&chrono::Utc))))
                .map_err(|_| fail()),
            Bson::Int64(ms) => Ok(Bson::DateTime(bson::DateTime::from_millis(*ms))),
            Bson::Int32(ms) => Ok(Bson::DateTime(bson::DateTime::from_millis(i64::from(*ms)))),
            _ => Err(fail()),
        },
        FieldType::Mixed => Ok(value.clone()),
        FieldType::Array(_) | FieldType::Document(_) => Err(fail()),
    }
}

fn number_from_i64(n: i64) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(n),
    }
}

/// Casts the payload of an operator-form update document
pub fn cast_update(schema: &Schema, update: &BsonDocument) -> Result<BsonDocument> {
    let mut cast = BsonDocument::new();
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            cast.insert(operator.clone(), fields.clone());
            continue;
        };
        let mut cast_fields = BsonDocument::new();
        for (path, value) in fields {
            let field_type = schema.path_type(path);
            let value = match operator.as_str() {
                "$set" | "$setOnInsert" => cast_value(path, &field_type, value)?,
                "$inc" => cast_scalar(path, &FieldType::Number, value)?,
                "$push" | "$addToSet" => cast_append(path, &field_type, value)?,
                "$pull" => match (field_type.element(), value) {
                    (FieldType::Document(sub), Bson::Document(cond))
                        if !is_operator_document(value) =>
                    {
                        Bson::Document(cast_filter(sub, cond)?)
                    }
                    (element, _) => cast_condition(path, element, value)?,
                },
                _ => value.clone(),
            };
            cast_fields.insert(path.clone(), value);
        }
        cast.insert(operator.clone(), cast_fields);
    }
    Ok(cast)
}

fn cast_append(path: &str, field_type: &FieldType, value: &Bson) -> Result<Bson> {
    let element = field_type.element();
    match value {
        Bson::Document(modifier) if modifier.contains_key("$each") => {
            let mut cast = modifier.clone();
            if let Ok(items) = modifier.get_array("$each") {
                let items = items
                    .iter()
                    .map(|item| cast_value(path, element, item))
                    .collect::<Result<Vec<_>>>()?;
                cast.insert("$each", items);
            }
            Ok(Bson::Document(cast))
        }
        other => cast_value(path, element, other),
    }
}

/// Casts a full replacement document
pub fn cast_replacement(schema: &Schema, replacement: &BsonDocument) -> Result<BsonDocument> {
    let mut cast = BsonDocument::new();
    for (key, value) in replacement {
        cast.insert(key.clone(), cast_value(key, &schema.path_type(key), value)?);
    }
    Ok(cast)
}
