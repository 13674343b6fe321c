use serde::{Deserialize, Serialize};

use super::{ContentUnit, UnitCommon};
use crate::data::{FieldMap, InvalidDataError, PulpObject, field};

/// A plain file in an `iso` repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUnit {
    /// Relative path of the file within the repository.
    pub path: String,
    pub size: u64,
    /// Lower-case hex SHA-256 of the content.
    pub sha256sum: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cdn_path: Option<String>,
    #[serde(flatten)]
    pub common: UnitCommon,
}

impl FileUnit {
    /// Creates a file unit.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if `sha256sum` is not a SHA-256 hex digest.
    pub fn new(
        path: impl Into<String>,
        size: u64,
        sha256sum: impl Into<String>,
    ) -> Result<Self, InvalidDataError> {
        Self {
            path: path.into(),
            size,
            sha256sum: sha256sum.into(),
            description: None,
            cdn_path: None,
            common: UnitCommon::default(),
        }
        .validate()
    }
}

/// Checks a SHA-256 hex digest and returns it lower-cased.
pub(crate) fn checked_sha256(raw: &str) -> Result<String, InvalidDataError> {
    let lowered = raw.to_ascii_lowercase();
    if lowered.len() == 64 && lowered.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(lowered)
    } else {
        Err(InvalidDataError::new(format!("not a valid sha256sum: '{raw}'")))
    }
}

impl PulpObject for FileUnit {
    const FIELDS: &'static [FieldMap] = &[
        field("path", "name"),
        field("size", "size"),
        field("sha256sum", "checksum"),
        field("description", "description"),
        field("cdn_path", "cdn_path"),
        field("unit_id", "_id"),
        field("repository_memberships", "repository_memberships"),
    ];

    fn validate(mut self) -> Result<Self, InvalidDataError> {
        self.sha256sum = checked_sha256(&self.sha256sum)?;
        self.common.normalize();
        Ok(self)
    }
}

impl ContentUnit for FileUnit {
    const TYPE_IDS: &'static [&'static str] = &["iso"];
    const KEY_FIELDS: &'static [&'static str] = &["path", "sha256sum", "size"];
    const MUTABLE_FIELDS: &'static [&'static str] = &["description", "cdn_path"];

    fn common(&self) -> &UnitCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut UnitCommon {
        &mut self.common
    }
}
