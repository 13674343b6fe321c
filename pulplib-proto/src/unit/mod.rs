//! Content units and the registry that decodes them by type id.
//!
//! Pulp stores many kinds of content; each kind the library understands is
//! one variant of [`Unit`]. Decoding is driven by the `_content_type_id`
//! field through a [`UnitRegistry`], so callers can extend the set of known
//! types without touching this crate.

mod erratum;
mod file;
mod modulemd;
mod repo_metadata;
mod rpm;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::data::{
    FieldMap, InvalidDataError, PulpObject, insert_path, normalize_memberships, pulp_name,
};

pub use erratum::ErratumUnit;
pub use file::FileUnit;
pub use modulemd::{ModulemdDefaultsUnit, ModulemdUnit};
pub use repo_metadata::YumRepoMetadataFileUnit;
pub use rpm::RpmUnit;

/// Pulp field holding a unit's type id.
pub const CONTENT_TYPE_FIELD: &str = "_content_type_id";

static BUILTIN: LazyLock<UnitRegistry> = LazyLock::new(UnitRegistry::builtin);

/// Fields every unit carries regardless of type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCommon {
    /// Server-assigned identity, absent for units not yet stored.
    #[serde(default)]
    pub unit_id: Option<String>,
    /// Repositories containing this unit. Always sorted and deduplicated.
    #[serde(default)]
    pub repository_memberships: Vec<String>,
}

impl UnitCommon {
    pub(crate) fn normalize(&mut self) {
        normalize_memberships(&mut self.repository_memberships);
    }
}

/// Capabilities shared by every unit variant.
pub trait ContentUnit: PulpObject + Clone + Into<Unit> {
    /// Type ids this variant decodes. The first is the default.
    const TYPE_IDS: &'static [&'static str];

    /// Model fields forming the natural key of the unit.
    const KEY_FIELDS: &'static [&'static str];

    /// Model fields an update may change without re-uploading the unit.
    const MUTABLE_FIELDS: &'static [&'static str] = &[];

    fn common(&self) -> &UnitCommon;

    fn common_mut(&mut self) -> &mut UnitCommon;

    fn content_type_id(&self) -> &str {
        Self::TYPE_IDS.first().copied().unwrap_or_default()
    }

    /// Natural key in Pulp's field naming, as reported in task results.
    fn unit_key(&self) -> Value {
        let model = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut out = Map::new();
        for key in Self::KEY_FIELDS {
            if let Some(v) = model.get(*key).filter(|v| !v.is_null()) {
                let path = pulp_name(Self::FIELDS, key).unwrap_or(*key);
                insert_path(&mut out, path, v.clone());
            }
        }
        Value::Object(out)
    }

    /// The mutable fields, unset ones as null.
    fn user_metadata(&self) -> Value {
        let model = serde_json::to_value(self).unwrap_or(Value::Null);
        let fields = Self::MUTABLE_FIELDS
            .iter()
            .map(|name| ((*name).to_string(), model.get(*name).cloned().unwrap_or(Value::Null)))
            .collect();
        Value::Object(fields)
    }

    /// A copy with the mutable fields present in `metadata` replaced.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if a value does not fit its field.
    fn with_user_metadata(&self, metadata: &Value) -> Result<Self, InvalidDataError> {
        let mut model = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut model {
            for name in Self::MUTABLE_FIELDS {
                if let Some(value) = metadata.get(*name) {
                    map.insert((*name).to_string(), value.clone());
                }
            }
        }
        serde_json::from_value::<Self>(model)?.validate()
    }
}

type Decoder = fn(&Value) -> Result<Unit, InvalidDataError>;

fn decode_as<U: ContentUnit>(data: &Value) -> Result<Unit, InvalidDataError> {
    U::from_data(data).map(Into::into)
}

/// Maps content type ids to decoders.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    decoders: BTreeMap<String, Decoder>,
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl UnitRegistry {
    /// A registry that knows no types.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every unit variant in this crate registered.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register::<FileUnit>();
        registry.register::<RpmUnit>();
        registry.register::<ModulemdUnit>();
        registry.register::<ModulemdDefaultsUnit>();
        registry.register::<ErratumUnit>();
        registry.register::<YumRepoMetadataFileUnit>();
        registry
    }

    /// Registers `U` for all its type ids, replacing earlier registrations.
    pub fn register<U: ContentUnit>(&mut self) {
        for type_id in U::TYPE_IDS {
            self.decoders
                .insert((*type_id).to_string(), decode_as::<U> as Decoder);
        }
    }

    #[must_use]
    pub fn knows(&self, type_id: &str) -> bool {
        self.decoders.contains_key(type_id)
    }

    /// Registered type ids, sorted.
    pub fn type_ids(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }

    /// Decodes a unit from Pulp data carrying `_content_type_id`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if the type field is missing, the type
    /// is not registered, or the variant rejects the data.
    pub fn decode(&self, data: &Value) -> Result<Unit, InvalidDataError> {
        let type_id = data
            .get(CONTENT_TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| InvalidDataError::new(format!("unit has no {CONTENT_TYPE_FIELD}")))?;
        let decoder = self
            .decoders
            .get(type_id)
            .ok_or_else(|| InvalidDataError::new(format!("unsupported unit type '{type_id}'")))?;
        decoder(data)
    }

    /// Decodes a `{"type_id": .., "unit_key": {..}}` entry from a task result.
    ///
    /// # Errors
    ///
    /// As [`decode`](Self::decode), plus a malformed entry.
    pub fn decode_task_unit(&self, entry: &Value) -> Result<Unit, InvalidDataError> {
        let type_id = entry
            .get("type_id")
            .and_then(Value::as_str)
            .ok_or_else(|| InvalidDataError::new("task unit has no type_id"))?;
        let Some(Value::Object(key)) = entry.get("unit_key") else {
            return Err(InvalidDataError::new(format!(
                "task unit of type '{type_id}' has no unit_key"
            )));
        };
        let mut data = key.clone();
        data.insert(CONTENT_TYPE_FIELD.to_string(), json!(type_id));
        self.decode(&Value::Object(data))
    }
}

/// Field table for the unit variant handling `type_id`, used to translate
/// search criteria. Unknown types get an empty table.
#[must_use]
pub fn fields_for(type_id: &str) -> &'static [FieldMap] {
    match type_id {
        "iso" => FileUnit::FIELDS,
        "rpm" | "srpm" => RpmUnit::FIELDS,
        "modulemd" => ModulemdUnit::FIELDS,
        "modulemd_defaults" => ModulemdDefaultsUnit::FIELDS,
        "erratum" => ErratumUnit::FIELDS,
        "yum_repo_metadata_file" => YumRepoMetadataFileUnit::FIELDS,
        _ => &[],
    }
}

/// Any content unit known to the library.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    File(FileUnit),
    Rpm(RpmUnit),
    Modulemd(ModulemdUnit),
    ModulemdDefaults(ModulemdDefaultsUnit),
    Erratum(ErratumUnit),
    YumRepoMetadataFile(YumRepoMetadataFileUnit),
}

macro_rules! each_variant {
    ($unit:expr, $inner:ident => $body:expr) => {
        match $unit {
            Unit::File($inner) => $body,
            Unit::Rpm($inner) => $body,
            Unit::Modulemd($inner) => $body,
            Unit::ModulemdDefaults($inner) => $body,
            Unit::Erratum($inner) => $body,
            Unit::YumRepoMetadataFile($inner) => $body,
        }
    };
}

macro_rules! impl_from_variant {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for Unit {
            fn from(unit: $ty) -> Self {
                Self::$variant(unit)
            }
        })*
    };
}

impl_from_variant!(
    File(FileUnit),
    Rpm(RpmUnit),
    Modulemd(ModulemdUnit),
    ModulemdDefaults(ModulemdDefaultsUnit),
    Erratum(ErratumUnit),
    YumRepoMetadataFile(YumRepoMetadataFileUnit),
);

impl Unit {
    /// Decodes a unit with the built-in registry.
    ///
    /// # Errors
    ///
    /// See [`UnitRegistry::decode`].
    pub fn from_data(data: &Value) -> Result<Self, InvalidDataError> {
        BUILTIN.decode(data)
    }

    /// Exports the unit in Pulp's layout, including `_content_type_id`.
    #[must_use]
    pub fn to_data(&self) -> Value {
        let mut data = each_variant!(self, u => u.to_data());
        if let Value::Object(map) = &mut data {
            map.insert(CONTENT_TYPE_FIELD.to_string(), json!(self.content_type_id()));
        }
        data
    }

    #[must_use]
    pub fn content_type_id(&self) -> &str {
        each_variant!(self, u => u.content_type_id())
    }

    #[must_use]
    pub fn unit_id(&self) -> Option<&str> {
        each_variant!(self, u => u.common().unit_id.as_deref())
    }

    #[must_use]
    pub fn repository_memberships(&self) -> &[String] {
        each_variant!(self, u => &u.common().repository_memberships)
    }

    /// Replaces the membership list; the stored list is normalized.
    pub fn set_repository_memberships(&mut self, mut ids: Vec<String>) {
        normalize_memberships(&mut ids);
        each_variant!(self, u => u.common_mut().repository_memberships = ids);
    }

    /// Adds repositories to the membership list.
    pub fn add_memberships<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut merged = self.repository_memberships().to_vec();
        merged.extend(ids.into_iter().map(Into::into));
        self.set_repository_memberships(merged);
    }

    #[must_use]
    pub fn with_unit_id(mut self, id: impl Into<String>) -> Self {
        let id = Some(id.into());
        each_variant!(&mut self, u => u.common_mut().unit_id = id);
        self
    }

    /// Natural key in Pulp's naming.
    #[must_use]
    pub fn unit_key(&self) -> Value {
        each_variant!(self, u => u.unit_key())
    }

    /// The unit reduced to its key fields, as Pulp reports it in task
    /// results.
    #[must_use]
    pub fn with_key_only(&self) -> Self {
        let entry = json!({"type_id": self.content_type_id(), "unit_key": self.unit_key()});
        BUILTIN
            .decode_task_unit(&entry)
            .unwrap_or_else(|_| self.clone())
    }

    /// Fields an update may change, as sent to Pulp's user metadata API.
    #[must_use]
    pub fn user_metadata(&self) -> Value {
        each_variant!(self, u => u.user_metadata())
    }

    /// A copy with the mutable fields of `other` applied. Fails if the two
    /// units are of different types.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] on a type mismatch or a bad value.
    pub fn with_user_metadata_of(&self, other: &Self) -> Result<Self, InvalidDataError> {
        if self.content_type_id() != other.content_type_id() {
            return Err(InvalidDataError::new(format!(
                "cannot update {} unit from {} unit",
                self.content_type_id(),
                other.content_type_id()
            )));
        }
        let metadata = other.user_metadata();
        Ok(each_variant!(self, u => u.with_user_metadata(&metadata)?.into()))
    }

    /// Reads a field by model name or Pulp path.
    ///
    /// `content_type_id` is answered for every variant.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == "content_type_id" || name == CONTENT_TYPE_FIELD {
            return Some(json!(self.content_type_id()));
        }
        each_variant!(self, u => u.field(name))
    }
}
