//! Repositories and their distributors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{FieldMap, InvalidDataError, PulpObject, field, model_to_pulp, pulp_to_model};

/// Broad family of a repository, derived from its `_repo-type` note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryKind {
    Yum,
    File,
    Container,
    Other,
}

impl RepositoryKind {
    #[must_use]
    pub fn from_repo_type(repo_type: Option<&str>) -> Self {
        match repo_type {
            Some("rpm-repo") => Self::Yum,
            Some("iso-repo") => Self::File,
            Some("docker-repo") => Self::Container,
            _ => Self::Other,
        }
    }

    /// The `_repo-type` note value for this kind, if it has one.
    #[must_use]
    pub const fn repo_type(self) -> Option<&'static str> {
        match self {
            Self::Yum => Some("rpm-repo"),
            Self::File => Some("iso-repo"),
            Self::Container => Some("docker-repo"),
            Self::Other => None,
        }
    }
}

/// A publisher attached to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distributor {
    pub id: String,
    /// Distributor plugin, such as `yum_distributor`.
    pub type_id: String,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub relative_url: Option<String>,
    #[serde(default)]
    pub last_publish: Option<DateTime<Utc>>,
}

/// Distributor types that push published content to remote hosts.
const RSYNC_DISTRIBUTOR_TYPES: &[&str] = &[
    "rpm_rsync_distributor",
    "iso_rsync_distributor",
    "docker_rsync_distributor",
];

impl Distributor {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            repo_id: None,
            relative_url: None,
            last_publish: None,
        }
    }

    #[must_use]
    pub fn is_rsync(&self) -> bool {
        RSYNC_DISTRIBUTOR_TYPES.contains(&self.type_id.as_str())
    }
}

impl PulpObject for Distributor {
    const FIELDS: &'static [FieldMap] = &[
        field("id", "id"),
        field("type_id", "distributor_type_id"),
        field("repo_id", "repo_id"),
        field("relative_url", "config.relative_url"),
        field("last_publish", "last_publish"),
    ];
}

/// A Pulp repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    /// Raw `_repo-type` note; see [`Repository::kind`].
    #[serde(default, rename = "type")]
    pub repo_type: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distributors: Vec<Distributor>,
    #[serde(default)]
    pub eng_product_id: Option<String>,
    #[serde(default)]
    pub relative_url: Option<String>,
    /// Repositories created for a single push and deleted afterwards.
    #[serde(default)]
    pub is_temporary: bool,
    #[serde(default)]
    pub signing_keys: Vec<String>,
    #[serde(default)]
    pub content_set: Option<String>,
    /// Product versions the content belongs to, sorted. Pulp keeps them
    /// as a JSON string inside the notes.
    #[serde(default)]
    pub product_versions: Option<Vec<String>>,
}

/// Notes that [`Repository::mutable_notes`] sends on update.
const PRODUCT_VERSIONS: &str = "product_versions";

impl Repository {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repo_type: None,
            created: None,
            distributors: Vec::new(),
            eng_product_id: None,
            relative_url: None,
            is_temporary: false,
            signing_keys: Vec::new(),
            content_set: None,
            product_versions: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: RepositoryKind) -> Self {
        self.repo_type = kind.repo_type().map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_distributors(mut self, distributors: Vec<Distributor>) -> Self {
        self.distributors = distributors;
        self
    }

    #[must_use]
    pub fn kind(&self) -> RepositoryKind {
        RepositoryKind::from_repo_type(self.repo_type.as_deref())
    }

    #[must_use]
    pub fn distributor(&self, id: &str) -> Option<&Distributor> {
        self.distributors.iter().find(|d| d.id == id)
    }

    #[must_use]
    pub fn with_product_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut versions: Vec<String> = versions.into_iter().map(Into::into).collect();
        versions.sort_unstable();
        versions.dedup();
        self.product_versions = Some(versions);
        self
    }

    /// The notes an update may change, in Pulp's layout.
    ///
    /// Every other field of a repository is fixed once it is created.
    #[must_use]
    pub fn mutable_notes(&self) -> Value {
        let versions = self
            .product_versions
            .as_ref()
            .and_then(|v| serde_json::to_string(v).ok())
            .map_or(Value::Null, Value::String);
        let mut notes = Map::new();
        notes.insert(PRODUCT_VERSIONS.into(), versions);
        Value::Object(notes)
    }

    /// Copies the mutable notes of `other` onto this repository.
    pub fn apply_mutable_notes(&mut self, other: &Self) {
        self.product_versions.clone_from(&other.product_versions);
        if let Some(versions) = &mut self.product_versions {
            versions.sort_unstable();
            versions.dedup();
        }
    }
}

impl PulpObject for Repository {
    const FIELDS: &'static [FieldMap] = &[
        field("id", "id"),
        field("type", "notes._repo-type"),
        field("created", "notes.created"),
        field("eng_product_id", "notes.eng_product"),
        field("relative_url", "notes.relative_url"),
        field("is_temporary", "notes.pub_temp_repo"),
        field("signing_keys", "notes.signatures"),
        field("content_set", "notes.content_set"),
        field("product_versions", "notes.product_versions"),
    ];

    fn from_data(data: &Value) -> Result<Self, InvalidDataError> {
        if !data.is_object() {
            return Err(InvalidDataError::new(format!(
                "expected a repository object, got {data}"
            )));
        }
        let mut model = pulp_to_model(data, Self::FIELDS);
        if let Some(Value::String(embedded)) = model.get(PRODUCT_VERSIONS) {
            let mut versions: Vec<String> = serde_json::from_str(embedded)?;
            versions.sort_unstable();
            versions.dedup();
            model.insert(PRODUCT_VERSIONS.into(), serde_json::to_value(versions)?);
        }
        let distributors = match data.get("distributors") {
            Some(Value::Array(items)) => items
                .iter()
                .map(Distributor::from_data)
                .collect::<Result<Vec<_>, _>>()?,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(InvalidDataError::new(format!(
                    "malformed distributors: {other}"
                )));
            }
        };
        model.insert("distributors".into(), serde_json::to_value(distributors)?);
        Ok(serde_json::from_value(Value::Object(model))?)
    }

    fn to_data(&self) -> Value {
        let Ok(model) = serde_json::to_value(self) else {
            return Value::Null;
        };
        let mut data = model_to_pulp(&model, Self::FIELDS);
        if let Value::Object(map) = &mut data {
            let distributors = self.distributors.iter().map(PulpObject::to_data).collect();
            map.insert("distributors".into(), Value::Array(distributors));
            let notes = map
                .entry("notes")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(versions) = notes.get_mut(PRODUCT_VERSIONS) {
                *versions = Value::String(versions.to_string());
            }
        }
        data
    }
}

/// Options changing how a repository is published.
///
/// Unset options leave the server's defaults in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Publish everything rather than only what changed.
    pub force: Option<bool>,
    /// Also erase previously published content no longer in the repository.
    /// Applies to rsync distributors.
    pub clean: Option<bool>,
    /// Only update content units and the origin path on remote hosts.
    /// Applies to rsync distributors.
    pub origin_only: Option<bool>,
}

/// Distributor skipped by publishes with `origin_only` set.
const CONTAINER_CLI_DISTRIBUTOR: &str = "docker_web_distributor_name_cli";

impl PublishOptions {
    /// Whether a publish with these options runs `distributor` at all.
    #[must_use]
    pub fn includes(&self, distributor: &Distributor) -> bool {
        !(self.origin_only == Some(true) && distributor.id == CONTAINER_CLI_DISTRIBUTOR)
    }

    /// The `override_config` object sent when publishing with `distributor`.
    #[must_use]
    pub fn override_config(&self, distributor: &Distributor) -> Value {
        let mut config = Map::new();
        if distributor.is_rsync() {
            if let Some(clean) = self.clean {
                config.insert("delete".into(), Value::Bool(clean));
            }
            if let Some(origin_only) = self.origin_only {
                config.insert("content_units_only".into(), Value::Bool(origin_only));
            }
        }
        if let Some(force) = self.force {
            config.insert("force_full".into(), Value::Bool(force));
        }
        Value::Object(config)
    }
}

/// Options for syncing a repository from a remote feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOptions {
    /// URL of the remote repository. Must not be empty.
    pub feed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_validation: Option<bool>,
    /// Bandwidth cap in bytes per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<u64>,
}

impl SyncOptions {
    pub fn new(feed: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            ..Self::default()
        }
    }

    /// The `override_config` object sent with a sync request.
    #[must_use]
    pub fn to_override_config(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
