use serde::{Deserialize, Serialize};

use super::{ContentUnit, UnitCommon};
use crate::data::{FieldMap, InvalidDataError, PulpObject, field};

/// An extra file published into a yum repository's `repodata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YumRepoMetadataFileUnit {
    /// Metadata type, such as `productid`.
    pub data_type: String,
    #[serde(default)]
    pub sha256sum: Option<String>,
    /// Repository the file belongs to.
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(flatten)]
    pub common: UnitCommon,
}

impl YumRepoMetadataFileUnit {
    pub fn new(data_type: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            sha256sum: None,
            repo_id: Some(repo_id.into()),
            common: UnitCommon::default(),
        }
    }
}

impl PulpObject for YumRepoMetadataFileUnit {
    const FIELDS: &'static [FieldMap] = &[
        field("data_type", "data_type"),
        field("sha256sum", "checksum"),
        field("repo_id", "repo_id"),
        field("unit_id", "_id"),
        field("repository_memberships", "repository_memberships"),
    ];

    fn validate(mut self) -> Result<Self, InvalidDataError> {
        self.common.normalize();
        Ok(self)
    }
}

impl ContentUnit for YumRepoMetadataFileUnit {
    const TYPE_IDS: &'static [&'static str] = &["yum_repo_metadata_file"];
    const KEY_FIELDS: &'static [&'static str] = &["data_type", "repo_id"];

    fn common(&self) -> &UnitCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut UnitCommon {
        &mut self.common
    }
}
