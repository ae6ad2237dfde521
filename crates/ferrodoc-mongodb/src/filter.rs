//! In-memory evaluation of filter documents
//!
//! Used by [`MemoryExecutor`](crate::executor::memory::MemoryExecutor) to
//! answer queries without a server. Semantics follow the server for the
//! supported operators: a condition on a path that reaches an array matches
//! when the array itself or any of its elements satisfies it, and a missing
//! field compares equal to `null`.

use std::cmp::Ordering;

use bson::{Bson, Document as BsonDocument, Regex as BsonRegex};
use ferrodoc_common::FerrodocError;
use regex::RegexBuilder;

use crate::options::Collation;
use crate::Result;

/// Evaluates filters under an optional collation
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher<'c> {
    collation: Option<&'c Collation>,
}

impl<'c> Matcher<'c> {
    pub fn new(collation: Option<&'c Collation>) -> Self {
        Self { collation }
    }

    /// Whether `doc` satisfies every clause of `filter`
    pub fn matches(&self, doc: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
        for (key, condition) in filter {
            let ok = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(key, condition)? {
                        if !self.matches(doc, clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => self.any_clause(doc, key, condition)?,
                "$nor" => !self.any_clause(doc, key, condition)?,
                "$comment" => true,
                _ => {
                    let values = lookup(doc, key);
                    self.condition(&values, condition)?
                }
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether a single value satisfies a field condition (`{ $gte: 3 }`, `"a"`, ...)
    pub fn value_matches(&self, value: &Bson, condition: &Bson) -> Result<bool> {
        self.condition(&[value], condition)
    }

    fn any_clause(&self, doc: &BsonDocument, key: &str, condition: &Bson) -> Result<bool> {
        for clause in clauses(key, condition)? {
            if self.matches(doc, clause)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn condition(&self, values: &[&Bson], condition: &Bson) -> Result<bool> {
        match condition {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                for (operator, operand) in ops {
                    if !self.operator(values, operator, operand, ops)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            other => self.equals_any(values, other),
        }
    }

    fn operator(
        &self,
        values: &[&Bson],
        operator: &str,
        operand: &Bson,
        ops: &BsonDocument,
    ) -> Result<bool> {
        match operator {
            "$eq" => self.equals_any(values, operand),
            "$ne" => Ok(!self.equals_any(values, operand)?),
            "$gt" => Ok(self.compare_any(values, operand, |o| o == Ordering::Greater)),
            "$gte" => Ok(self.compare_any(values, operand, |o| o != Ordering::Less)),
            "$lt" => Ok(self.compare_any(values, operand, |o| o == Ordering::Less)),
            "$lte" => Ok(self.compare_any(values, operand, |o| o != Ordering::Greater)),
            "$in" => {
                for candidate in array_operand(operator, operand)? {
                    if self.equals_any(values, candidate)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            "$nin" => Ok(!self.operator(values, "$in", operand, ops)?),
            "$all" => {
                for candidate in array_operand(operator, operand)? {
                    if !self.equals_any(values, candidate)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            "$exists" => Ok(truthy(operand) == !values.is_empty()),
            "$regex" => {
                let regex = match operand {
                    Bson::RegularExpression(regex) => regex.clone(),
                    Bson::String(pattern) => BsonRegex {
                        pattern: pattern.clone(),
                        options: ops.get_str("$options").unwrap_or_default().to_string(),
                    },
                    other => {
                        return Err(FerrodocError::Query(format!(
                            "$regex needs a string or regular expression, got {}",
                            other
                        )))
                    }
                };
                self.equals_any(values, &Bson::RegularExpression(regex))
            }
            "$options" | "$comment" => Ok(true),
            "$size" => {
                let size = as_i64(operand).ok_or_else(|| {
                    FerrodocError::Query(format!("$size needs a number, got {}", operand))
                })?;
                Ok(values.iter().any(|v| matches!(v, Bson::Array(items) if items.len() as i64 == size)))
            }
            "$not" => Ok(!self.condition(values, operand)?),
            "$elemMatch" => self.elem_match(values, operand),
            other => Err(FerrodocError::Query(format!("Unknown operator: {}", other))),
        }
    }

    fn elem_match(&self, values: &[&Bson], operand: &Bson) -> Result<bool> {
        let Bson::Document(sub) = operand else {
            return Err(FerrodocError::Query("$elemMatch needs a document".to_string()));
        };
        let operator_form = sub.keys().next().is_some_and(|k| k.starts_with('$'));
        for value in values {
            let Bson::Array(items) = value else { continue };
            for item in items {
                let hit = if operator_form {
                    self.condition(&[item], operand)?
                } else {
                    match item {
                        Bson::Document(element) => self.matches(element, sub)?,
                        _ => false,
                    }
                };
                if hit {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Equality against a set of candidate values, descending one level into arrays
    fn equals_any(&self, values: &[&Bson], target: &Bson) -> Result<bool> {
        if values.is_empty() {
            return Ok(matches!(target, Bson::Null));
        }
        for value in values {
            if self.equals(value, target)? {
                return Ok(true);
            }
            if let Bson::Array(items) = value {
                for item in items {
                    if self.equals(item, target)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn equals(&self, value: &Bson, target: &Bson) -> Result<bool> {
        match target {
            Bson::RegularExpression(regex) => match value {
                Bson::String(s) => Ok(compile(regex)?.is_match(s)),
                Bson::RegularExpression(other) => Ok(other == regex),
                _ => Ok(false),
            },
            _ => Ok(self.compare(value, target) == Some(Ordering::Equal) || value == target),
        }
    }

    fn compare_any(&self, values: &[&Bson], target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
        values.iter().any(|value| {
            let direct = self.compare(value, target).is_some_and(&accept);
            direct
                || matches!(value, Bson::Array(items)
                    if items.iter().any(|item| self.compare(item, target).is_some_and(&accept)))
        })
    }

    /// Orders two values of the same type class; `None` across classes
    pub fn compare(&self, a: &Bson, b: &Bson) -> Option<Ordering> {
        match (a, b) {
            (Bson::String(x), Bson::String(y)) => Some(self.compare_strings(x, y)),
            (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
            (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
            (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
            (Bson::Null, Bson::Null) => Some(Ordering::Equal),
            (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
                Some(as_i64(a)?.cmp(&as_i64(b)?))
            }
            _ => {
                let x = as_f64(a)?;
                let y = as_f64(b)?;
                x.partial_cmp(&y)
            }
        }
    }

    fn compare_strings(&self, a: &str, b: &str) -> Ordering {
        let (a, b) = match self.collation {
            Some(collation) if collation.ignores_case() => (a.to_lowercase(), b.to_lowercase()),
            _ => (a.to_string(), b.to_string()),
        };
        match self.collation {
            Some(collation) if collation.numeric_ordering == Some(true) => natural_cmp(&a, &b),
            _ => a.cmp(&b),
        }
    }

    /// Sort comparison over a `{ field: 1 | -1 }` document; missing sorts first
    pub fn compare_by(&self, a: &BsonDocument, b: &BsonDocument, sort: &BsonDocument) -> Ordering {
        for (path, direction) in sort {
            let left = lookup(a, path).first().copied().cloned().unwrap_or(Bson::Null);
            let right = lookup(b, path).first().copied().cloned().unwrap_or(Bson::Null);
            let ordering = match (&left, &right) {
                (Bson::Null, Bson::Null) => Ordering::Equal,
                (Bson::Null, _) => Ordering::Less,
                (_, Bson::Null) => Ordering::Greater,
                _ => self
                    .compare(&left, &right)
                    .unwrap_or_else(|| type_rank(&left).cmp(&type_rank(&right))),
            };
            let ordering = if as_i64(direction).unwrap_or(1) < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn clauses<'a>(key: &str, condition: &'a Bson) -> Result<Vec<&'a BsonDocument>> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(clause) => Ok(clause),
                other => Err(FerrodocError::Query(format!(
                    "{} entries must be documents, got {}",
                    key, other
                ))),
            })
            .collect(),
        other => Err(FerrodocError::Query(format!("{} needs an array, got {}", key, other))),
    }
}

fn array_operand<'a>(operator: &str, operand: &'a Bson) -> Result<&'a Vec<Bson>> {
    match operand {
        Bson::Array(items) => Ok(items),
        other => Err(FerrodocError::Query(format!("{} needs an array, got {}", operator, other))),
    }
}

fn compile(regex: &BsonRegex) -> Result<regex::Regex> {
    RegexBuilder::new(&regex.pattern)
        .case_insensitive(regex.options.contains('i'))
        .multi_line(regex.options.contains('m'))
        .dot_matches_new_line(regex.options.contains('s'))
        .ignore_whitespace(regex.options.contains('x'))
        .build()
        .map_err(|e| FerrodocError::Query(format!("Invalid regular expression: {}", e)))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

pub(crate) fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Cross-type sort order, loosely following the server's
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 1,
        Bson::String(_) | Bson::Symbol(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::Binary(_) => 5,
        Bson::ObjectId(_) => 6,
        Bson::Boolean(_) => 7,
        Bson::DateTime(_) => 8,
        Bson::Timestamp(_) => 9,
        Bson::RegularExpression(_) => 10,
        _ => 11,
    }
}

/// Compares digit runs by numeric value ("item9" < "item10")
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut x_run = String::new();
                while let Some(c) = left.next_if(|c| c.is_ascii_digit()) {
                    x_run.push(c);
                }
                let mut y_run = String::new();
                while let Some(c) = right.next_if(|c| c.is_ascii_digit()) {
                    y_run.push(c);
                }
                let x_trim = x_run.trim_start_matches('0');
                let y_trim = y_run.trim_start_matches('0');
                let ordering = x_trim.len().cmp(&y_trim.len()).then_with(|| x_trim.cmp(y_trim));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                left.next();
                right.next();
            }
        }
    }
}

/// All values reachable at a dotted path
///
/// Non-numeric segments applied to an array fan out over its document
/// elements; numeric segments index into it. An empty result means the field
/// is absent.
pub fn lookup<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*head) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect<'a>(current: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(current);
        return;
    };
    match current {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                collect(next, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect(next, rest, out);
                }
            } else {
                for item in items {
                    if matches!(item, Bson::Document(_)) {
                        collect(item, segments, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Convenience wrapper without collation
pub fn matches(doc: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    Matcher::default().matches(doc, filter)
}
