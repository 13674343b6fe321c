//! Search criteria and their translation into Pulp filter documents.
//!
//! A [`Criteria`] is a boolean tree over field [`Matcher`]s. The real client
//! sends it to the server as a mongo-style filter; the fake service
//! evaluates the same tree against in-memory objects.

use serde_json::{Map, Value, json};

use crate::data::{FieldMap, InvalidDataError, pulp_name};

/// Field holding a unit's type in criteria.
pub const CONTENT_TYPE_ID: &str = "content_type_id";

/// A compiled regular expression that compares by source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    compiled: regex::Regex,
}

impl Pattern {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern matches anywhere in `text`.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Field equals the value.
    Equals(Value),
    /// Field is a string matching the pattern.
    Regex(Pattern),
    /// Field is present and not null.
    Exists,
    /// Field equals one of the values.
    In(Vec<Value>),
    /// Field is less than the value (numbers, strings, or timestamps).
    LessThan(Value),
}

impl Matcher {
    pub fn equals(value: impl Into<Value>) -> Self {
        Self::Equals(value.into())
    }

    /// Builds a regex matcher.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if `pattern` does not compile.
    pub fn regex(pattern: &str) -> Result<Self, InvalidDataError> {
        let compiled = regex::Regex::new(pattern)
            .map_err(|e| InvalidDataError::new(format!("invalid regex '{pattern}': {e}")))?;
        Ok(Self::Regex(Pattern {
            source: pattern.to_string(),
            compiled,
        }))
    }

    #[must_use]
    pub const fn exists() -> Self {
        Self::Exists
    }

    pub fn in_<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(values.into_iter().map(Into::into).collect())
    }

    pub fn less_than(value: impl Into<Value>) -> Self {
        Self::LessThan(value.into())
    }

    fn to_filter(&self) -> Value {
        match self {
            Self::Equals(v) => json!({"$eq": v}),
            Self::Regex(p) => json!({"$regex": p.as_str()}),
            Self::Exists => json!({"$exists": true}),
            Self::In(values) => json!({"$in": values}),
            Self::LessThan(v) => json!({"$lt": v}),
        }
    }
}

/// A boolean tree of field conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Matches everything.
    True,
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Field { name: String, matcher: Matcher },
}

impl Criteria {
    #[must_use]
    pub const fn true_() -> Self {
        Self::True
    }

    pub fn with_field(name: impl Into<String>, matcher: Matcher) -> Self {
        Self::Field {
            name: name.into(),
            matcher,
        }
    }

    /// Objects whose `id` equals `id`.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::with_field("id", Matcher::equals(id.into()))
    }

    /// Objects whose `id` is any of `ids`.
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_field(
            "id",
            Matcher::in_(ids.into_iter().map(|id| Value::String(id.into()))),
        )
    }

    /// Units of the given content type(s).
    pub fn with_content_types<I, S>(type_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_field(
            CONTENT_TYPE_ID,
            Matcher::in_(type_ids.into_iter().map(|t| Value::String(t.into()))),
        )
    }

    pub fn and<I: IntoIterator<Item = Self>>(operands: I) -> Self {
        Self::And(operands.into_iter().collect())
    }

    pub fn or<I: IntoIterator<Item = Self>>(operands: I) -> Self {
        Self::Or(operands.into_iter().collect())
    }

    /// Pulp filter document, with model field names renamed per `fields`.
    ///
    /// Constraints on `content_type_id` are dropped; they are carried in
    /// the search body's type ids instead (see [`type_ids`](Self::type_ids)).
    #[must_use]
    pub fn to_filters(&self, fields: &[FieldMap]) -> Value {
        match self {
            Self::True => Value::Object(Map::new()),
            Self::And(ops) => json!({"$and": ops.iter().map(|c| c.to_filters(fields)).collect::<Vec<_>>()}),
            Self::Or(ops) => json!({"$or": ops.iter().map(|c| c.to_filters(fields)).collect::<Vec<_>>()}),
            Self::Field { name, .. } if name == CONTENT_TYPE_ID => Value::Object(Map::new()),
            Self::Field { name, matcher } => {
                let pulp = pulp_name(fields, name).map_or_else(|| name.clone(), str::to_string);
                let mut out = Map::new();
                out.insert(pulp, matcher.to_filter());
                Value::Object(out)
            }
        }
    }

    /// Content type ids the criteria restrict a unit search to.
    ///
    /// Looks at a top-level `content_type_id` condition, or one directly
    /// inside a top-level `And`. `None` means no restriction.
    #[must_use]
    pub fn type_ids(&self) -> Option<Vec<String>> {
        match self {
            Self::Field { name, matcher } if name == CONTENT_TYPE_ID => match matcher {
                Matcher::Equals(Value::String(s)) => Some(vec![s.clone()]),
                Matcher::In(values) => Some(
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                ),
                _ => None,
            },
            Self::And(ops) => ops.iter().find_map(Self::type_ids),
            _ => None,
        }
    }
}
