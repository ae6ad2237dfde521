//! Update payloads
//!
//! An [`Update`] is either a partial-field document (`{ name: "x" }`, applied
//! as `$set`) or a document keyed by update operators. Both forms normalize to
//! operator form before casting and execution. [`apply_update`] evaluates the
//! normalized form against an in-memory document.

use bson::{Bson, Document as BsonDocument};
use ferrodoc_common::FerrodocError;

use crate::filter::{as_f64, Matcher};
use crate::validation::{validate_update, UPDATE_OPERATORS};
use crate::Result;

/// Largest number of null slots a positional `$set` may append to an array
const MAX_ARRAY_PADDING: usize = 1_500_000;

/// Update payload for find-and-modify queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    doc: BsonDocument,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    fn operator(mut self, operator: &str, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        if !matches!(self.doc.get(operator), Some(Bson::Document(_))) {
            self.doc.insert(operator, BsonDocument::new());
        }
        if let Ok(fields) = self.doc.get_document_mut(operator) {
            fields.insert(path.into(), value.into());
        }
        self
    }

    pub fn set(self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator("$set", path, value)
    }

    pub fn unset(self, path: impl Into<String>) -> Self {
        self.operator("$unset", path, "")
    }

    pub fn inc(self, path: impl Into<String>, amount: impl Into<Bson>) -> Self {
        self.operator("$inc", path, amount)
    }

    pub fn push(self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator("$push", path, value)
    }

    pub fn add_to_set(self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator("$addToSet", path, value)
    }

    /// Removes array elements equal to `condition`, or matching it when it is a filter
    pub fn pull(self, path: impl Into<String>, condition: impl Into<Bson>) -> Self {
        self.operator("$pull", path, condition)
    }

    pub fn set_on_insert(self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator("$setOnInsert", path, value)
    }

    /// The payload as given
    pub fn as_document(&self) -> &BsonDocument {
        &self.doc
    }

    /// Operator form: plain keys fold into `$set`
    pub fn normalize(&self) -> Result<BsonDocument> {
        let mut normalized = BsonDocument::new();
        let mut plain = BsonDocument::new();
        for (key, value) in &self.doc {
            if key.starts_with('$') {
                if !UPDATE_OPERATORS.contains(&key.as_str()) {
                    tracing::warn!(operator = %key, "Rejecting unsupported update operator");
                }
                normalized.insert(key.clone(), value.clone());
            } else {
                plain.insert(key.clone(), value.clone());
            }
        }
        if !plain.is_empty() {
            if !normalized.contains_key("$set") {
                normalized.insert("$set", BsonDocument::new());
            }
            if let Ok(set) = normalized.get_document_mut("$set") {
                for (key, value) in plain {
                    set.insert(key, value);
                }
            }
        }
        validate_update(&normalized)?;
        Ok(normalized)
    }
}

impl From<BsonDocument> for Update {
    fn from(doc: BsonDocument) -> Self {
        Self { doc }
    }
}

/// Applies a normalized update to `doc`; returns whether anything changed
///
/// `inserting` enables `$setOnInsert`.
pub fn apply_update(
    doc: &mut BsonDocument,
    update: &BsonDocument,
    inserting: bool,
    matcher: &Matcher<'_>,
) -> Result<bool> {
    let before = doc.clone();
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(FerrodocError::Validation(format!(
                "'{}' expects a document of field paths",
                operator
            )));
        };
        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(doc, path, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(doc, path, value.clone())?;
                    }
                }
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => increment(doc, path, value)?,
                "$push" => append(doc, path, value, false, matcher)?,
                "$addToSet" => append(doc, path, value, true, matcher)?,
                "$pull" => pull(doc, path, value, matcher)?,
                other => {
                    return Err(FerrodocError::Validation(format!(
                        "Unsupported update operator: '{}'",
                        other
                    )))
                }
            }
        }
    }
    Ok(*doc != before)
}

fn increment(doc: &mut BsonDocument, path: &str, amount: &Bson) -> Result<()> {
    if as_f64(amount).is_none() {
        return Err(FerrodocError::Validation(format!(
            "Cannot increment field '{}' by non-numeric value {}",
            path, amount
        )));
    }
    let current = get_path(doc, path).cloned();
    let next = match current {
        None | Some(Bson::Null) => amount.clone(),
        Some(current) => add_numbers(&current, amount).ok_or_else(|| {
            FerrodocError::Validation(format!(
                "Cannot apply $inc to field '{}' with non-numeric value {}",
                path, current
            ))
        })?,
    };
    set_path(doc, path, next)
}

fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => Some(match x.checked_add(*y) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*x) + i64::from(*y)),
        }),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let x = crate::filter::as_i64(a)?;
            let y = crate::filter::as_i64(b)?;
            x.checked_add(y).map(Bson::Int64)
        }
        _ => Some(Bson::Double(as_f64(a)? + as_f64(b)?)),
    }
}

fn append(
    doc: &mut BsonDocument,
    path: &str,
    value: &Bson,
    unique: bool,
    matcher: &Matcher<'_>,
) -> Result<()> {
    let items: Vec<Bson> = match value {
        Bson::Document(modifier) if modifier.contains_key("$each") => modifier
            .get_array("$each")
            .map_err(|_| FerrodocError::Validation("$each needs an array".to_string()))?
            .clone(),
        other => vec![other.clone()],
    };
    let mut array = match get_path(doc, path) {
        None | Some(Bson::Null) => Vec::new(),
        Some(Bson::Array(existing)) => existing.clone(),
        Some(other) => {
            return Err(FerrodocError::Validation(format!(
                "Cannot append to non-array field '{}' ({})",
                path, other
            )))
        }
    };
    for item in items {
        if unique && contains(&array, &item, matcher) {
            continue;
        }
        array.push(item);
    }
    set_path(doc, path, Bson::Array(array))
}

fn contains(array: &[Bson], item: &Bson, matcher: &Matcher<'_>) -> bool {
    array.iter().any(|existing| {
        existing == item || matcher.compare(existing, item) == Some(std::cmp::Ordering::Equal)
    })
}

fn pull(doc: &mut BsonDocument, path: &str, condition: &Bson, matcher: &Matcher<'_>) -> Result<()> {
    let array = match get_path(doc, path) {
        None => return Ok(()),
        Some(Bson::Array(existing)) => existing.clone(),
        Some(other) => {
            return Err(FerrodocError::Validation(format!(
                "Cannot apply $pull to non-array field '{}' ({})",
                path, other
            )))
        }
    };
    let sub_filter = match condition {
        Bson::Document(sub) if !sub.keys().next().is_some_and(|k| k.starts_with('$')) => Some(sub),
        _ => None,
    };
    let mut kept = Vec::with_capacity(array.len());
    for item in array {
        let remove = match (sub_filter, &item) {
            (Some(sub), Bson::Document(element)) => matcher.matches(element, sub)?,
            (Some(_), _) => false,
            (None, _) => matcher.value_matches(&item, condition)?,
        };
        if !remove {
            kept.push(item);
        }
    }
    set_path(doc, path, Bson::Array(kept))
}

/// Value at a dotted path, indexing into arrays on numeric segments
pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Sets a value at a dotted path, creating intermediate documents
pub fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) || matches!(doc.get(head), Some(Bson::Null)) {
                doc.insert(head, BsonDocument::new());
            }
            match doc.get_mut(head) {
                Some(next) => set_in(next, head, rest, value),
                None => Err(FerrodocError::Internal(format!("Lost field '{}'", head))),
            }
        }
    }
}

fn set_in(current: &mut Bson, parent: &str, path: &str, value: Bson) -> Result<()> {
    match current {
        Bson::Document(inner) => set_path(inner, path, value),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let index: usize = head.parse().map_err(|_| {
                FerrodocError::Validation(format!(
                    "Cannot create field '{}' in array '{}'",
                    head, parent
                ))
            })?;
            if index.saturating_sub(items.len()) > MAX_ARRAY_PADDING {
                return Err(FerrodocError::Validation(format!(
                    "Cannot pad array '{}' out to index {}",
                    parent, index
                )));
            }
            while items.len() <= index {
                items.push(Bson::Null);
            }
            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => {
                    if matches!(items[index], Bson::Null) {
                        items[index] = Bson::Document(BsonDocument::new());
                    }
                    set_in(&mut items[index], head, rest, value)
                }
            }
        }
        other => Err(FerrodocError::Validation(format!(
            "Cannot create field '{}' in element {{{}: {}}}",
            path, parent, other
        ))),
    }
}

/// Removes the value at a dotted path; returns it if present
pub fn remove_path(doc: &mut BsonDocument, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Bson::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}

/// Starting document for an upsert: the filter's equality conditions
pub fn seed_from_filter(filter: &BsonDocument) -> Result<BsonDocument> {
    let mut seed = BsonDocument::new();
    collect_equalities(filter, &mut seed)?;
    Ok(seed)
}

fn collect_equalities(filter: &BsonDocument, seed: &mut BsonDocument) -> Result<()> {
    for (key, value) in filter {
        if key == "$and" {
            if let Bson::Array(clauses) = value {
                for clause in clauses {
                    if let Bson::Document(clause) = clause {
                        collect_equalities(clause, seed)?;
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                if let Some(eq) = ops.get("$eq") {
                    set_path(seed, key, eq.clone())?;
                }
            }
            Bson::RegularExpression(_) => {}
            other => set_path(seed, key, other.clone())?,
        }
    }
    Ok(())
}
