//! Declared field types for document shapes
//!
//! A `Schema` records the type of each field a document may carry. It is only
//! used for casting filter and update values before they reach an executor;
//! fields that are not declared are treated as `Mixed` and passed through.

use std::collections::BTreeMap;

static IMPLICIT_ID: FieldType = FieldType::ObjectId;

/// Type of a declared field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    ObjectId,
    Date,
    /// Anything goes, no casting
    Mixed,
    Array(Box<FieldType>),
    Document(Schema),
}

impl FieldType {
    /// Shorthand for `FieldType::Array(Box::new(inner))`
    pub fn array_of(inner: FieldType) -> Self {
        FieldType::Array(Box::new(inner))
    }

    /// Name used in cast error messages
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::ObjectId => "ObjectId",
            FieldType::Date => "Date",
            FieldType::Mixed => "Mixed",
            FieldType::Array(_) => "Array",
            FieldType::Document(_) => "Embedded",
        }
    }

    /// Element type for arrays, the type itself otherwise
    pub fn element(&self) -> &FieldType {
        match self {
            FieldType::Array(inner) => inner,
            other => other,
        }
    }
}

/// Field declarations for one document level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, FieldType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Type declared for a top-level field
    ///
    /// `_id` is an `ObjectId` unless declared otherwise.
    pub fn get(&self, name: &str) -> Option<&FieldType> {
        match self.fields.get(name) {
            Some(field_type) => Some(field_type),
            None if name == "_id" => Some(&IMPLICIT_ID),
            None => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a dotted path (`docs.nested.id`, `tags.0`) to its declared type
    ///
    /// Numeric segments index into arrays; non-numeric segments after an
    /// array traverse its elements. Unknown paths resolve to `Mixed`.
    pub fn path_type(&self, path: &str) -> FieldType {
        let mut current = FieldType::Document(self.clone());
        for segment in path.split('.') {
            current = Self::step(&current, segment);
            if current == FieldType::Mixed {
                break;
            }
        }
        current
    }

    fn step(current: &FieldType, segment: &str) -> FieldType {
        match current {
            FieldType::Document(schema) => {
                schema.get(segment).cloned().unwrap_or(FieldType::Mixed)
            }
            FieldType::Array(inner) => {
                if segment.chars().all(|c| c.is_ascii_digit()) {
                    (**inner).clone()
                } else {
                    Self::step(inner, segment)
                }
            }
            _ => FieldType::Mixed,
        }
    }
}
