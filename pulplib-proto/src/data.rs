//! Conversion between model objects and Pulp's JSON layout.
//!
//! Model structs derive serde with their own (model) field names. A static
//! [`FieldMap`] table per type says where each model field lives in the
//! document Pulp produces, which may be nested (`notes.relative_url`).
//! The same table lets callers refer to a field by either name.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Raised when data received from Pulp does not fit the model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid data: {message}")]
pub struct InvalidDataError {
    message: String,
}

impl InvalidDataError {
    /// Creates an error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description of what was wrong with the data.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for InvalidDataError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Location of one model field within Pulp's JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMap {
    /// Field name on the model struct.
    pub model: &'static str,
    /// Dotted path of the field in Pulp's representation.
    pub pulp: &'static str,
}

/// Shorthand constructor used by the per-type field tables.
#[must_use]
pub const fn field(model: &'static str, pulp: &'static str) -> FieldMap {
    FieldMap { model, pulp }
}

/// Resolves a model field name to its Pulp path, if the table knows it.
#[must_use]
pub fn pulp_name(fields: &[FieldMap], name: &str) -> Option<&'static str> {
    fields.iter().find(|f| f.model == name).map(|f| f.pulp)
}

/// Follows a dotted path (`notes.created`) into a JSON document.
#[must_use]
pub fn lookup<'a>(data: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(data, |current, key| current.as_object()?.get(key))
}

/// Writes `value` at a dotted path, creating intermediate objects.
pub fn insert_path(target: &mut Map<String, Value>, dotted: &str, value: Value) {
    let mut parts = dotted.split('.').peekable();
    let mut current = target;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
}

/// Re-keys a model's serde representation into Pulp's layout.
///
/// Null values are omitted, as Pulp omits unset fields.
#[must_use]
pub fn model_to_pulp(model: &Value, fields: &[FieldMap]) -> Value {
    let mut out = Map::new();
    for f in fields {
        if let Some(v) = model.get(f.model).filter(|v| !v.is_null()) {
            insert_path(&mut out, f.pulp, v.clone());
        }
    }
    Value::Object(out)
}

/// Extracts the fields listed in `fields` from Pulp data into a model-keyed map.
#[must_use]
pub fn pulp_to_model(data: &Value, fields: &[FieldMap]) -> Map<String, Value> {
    let mut out = Map::new();
    for f in fields {
        if let Some(v) = lookup(data, f.pulp) {
            out.insert(f.model.to_string(), v.clone());
        }
    }
    out
}

/// A model type that can be loaded from and exported to Pulp JSON.
///
/// The default methods cover types whose serde representation maps onto
/// Pulp's layout purely by renaming; types with nested objects override
/// [`from_data`](Self::from_data) and [`to_data`](Self::to_data).
pub trait PulpObject: Serialize + DeserializeOwned + Sized {
    /// Model-to-Pulp field table for this type.
    const FIELDS: &'static [FieldMap];

    /// Hook run after deserialization to normalize and validate the value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if the value breaks a model invariant.
    fn validate(self) -> Result<Self, InvalidDataError> {
        Ok(self)
    }

    /// Builds the model object from Pulp data.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if required fields are missing or have
    /// the wrong type, or if [`validate`](Self::validate) rejects the value.
    fn from_data(data: &Value) -> Result<Self, InvalidDataError> {
        if !data.is_object() {
            return Err(InvalidDataError::new(format!(
                "expected an object, got {data}"
            )));
        }
        let model = pulp_to_model(data, Self::FIELDS);
        serde_json::from_value::<Self>(Value::Object(model))?.validate()
    }

    /// Exports the object in Pulp's layout.
    fn to_data(&self) -> Value {
        serde_json::to_value(self).map_or(Value::Null, |model| model_to_pulp(&model, Self::FIELDS))
    }

    /// Reads a field by model name or by Pulp path.
    ///
    /// Returns `None` when the field is absent or null.
    fn field(&self, name: &str) -> Option<Value> {
        if pulp_name(Self::FIELDS, name).is_some() {
            let model = serde_json::to_value(self).ok()?;
            return model.get(name).filter(|v| !v.is_null()).cloned();
        }
        lookup(&self.to_data(), name)
            .filter(|v| !v.is_null())
            .cloned()
    }
}

/// Sorts and deduplicates a list of repository ids in place.
pub fn normalize_memberships(ids: &mut Vec<String>) {
    ids.sort_unstable();
    ids.dedup();
}
