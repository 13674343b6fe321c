use serde::{Deserialize, Serialize};

use super::{ContentUnit, UnitCommon};
use crate::data::{FieldMap, InvalidDataError, PulpObject, field};

/// A module stream build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulemdUnit {
    pub name: String,
    pub stream: String,
    pub version: u64,
    pub context: String,
    pub arch: String,
    /// NEVRAs of the RPMs the module contains.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(flatten)]
    pub common: UnitCommon,
}

impl ModulemdUnit {
    pub fn new(
        name: impl Into<String>,
        stream: impl Into<String>,
        version: u64,
        context: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stream: stream.into(),
            version,
            context: context.into(),
            arch: arch.into(),
            artifacts: Vec::new(),
            common: UnitCommon::default(),
        }
    }

    /// `name:stream:version:context:arch`.
    #[must_use]
    pub fn nsvca(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.name, self.stream, self.version, self.context, self.arch
        )
    }
}

impl PulpObject for ModulemdUnit {
    const FIELDS: &'static [FieldMap] = &[
        field("name", "name"),
        field("stream", "stream"),
        field("version", "version"),
        field("context", "context"),
        field("arch", "arch"),
        field("artifacts", "artifacts"),
        field("unit_id", "_id"),
        field("repository_memberships", "repository_memberships"),
    ];

    fn validate(mut self) -> Result<Self, InvalidDataError> {
        self.common.normalize();
        Ok(self)
    }
}

impl ContentUnit for ModulemdUnit {
    const TYPE_IDS: &'static [&'static str] = &["modulemd"];
    const KEY_FIELDS: &'static [&'static str] = &["name", "stream", "version", "context", "arch"];

    fn common(&self) -> &UnitCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut UnitCommon {
        &mut self.common
    }
}

/// Default stream and profiles for a module within one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulemdDefaultsUnit {
    pub name: String,
    #[serde(default)]
    pub stream: Option<String>,
    /// Repository the defaults apply to.
    pub repo_id: String,
    #[serde(flatten)]
    pub common: UnitCommon,
}

impl ModulemdDefaultsUnit {
    pub fn new(name: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: None,
            repo_id: repo_id.into(),
            common: UnitCommon::default(),
        }
    }
}

impl PulpObject for ModulemdDefaultsUnit {
    const FIELDS: &'static [FieldMap] = &[
        field("name", "name"),
        field("stream", "stream"),
        field("repo_id", "repo_id"),
        field("unit_id", "_id"),
        field("repository_memberships", "repository_memberships"),
    ];

    fn validate(mut self) -> Result<Self, InvalidDataError> {
        self.common.normalize();
        Ok(self)
    }
}

impl ContentUnit for ModulemdDefaultsUnit {
    const TYPE_IDS: &'static [&'static str] = &["modulemd_defaults"];
    const KEY_FIELDS: &'static [&'static str] = &["name", "repo_id"];

    fn common(&self) -> &UnitCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut UnitCommon {
        &mut self.common
    }
}
