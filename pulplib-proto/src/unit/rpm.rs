use serde::{Deserialize, Serialize};

use super::file::checked_sha256;
use super::{ContentUnit, UnitCommon};
use crate::data::{FieldMap, InvalidDataError, PulpObject, field};

fn default_epoch() -> String {
    "0".to_string()
}

fn default_type() -> String {
    "rpm".to_string()
}

/// A binary or source RPM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmUnit {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    #[serde(default = "default_epoch")]
    pub epoch: String,
    /// Short key id the RPM is signed with, lower-cased.
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default)]
    pub sha256sum: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub sourcerpm: Option<String>,
    /// `rpm` or `srpm`.
    #[serde(default = "default_type")]
    pub content_type_id: String,
    #[serde(flatten)]
    pub common: UnitCommon,
}

impl RpmUnit {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        let arch = arch.into();
        let content_type_id = if arch == "src" { "srpm" } else { "rpm" };
        Self {
            name: name.into(),
            version: version.into(),
            release: release.into(),
            arch,
            epoch: default_epoch(),
            signing_key: None,
            sha256sum: None,
            filename: None,
            sourcerpm: None,
            content_type_id: content_type_id.to_string(),
            common: UnitCommon::default(),
        }
    }

    /// `name-[epoch:]version-release.arch`, omitting a zero epoch.
    #[must_use]
    pub fn nevra(&self) -> String {
        if self.epoch == "0" || self.epoch.is_empty() {
            format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
        } else {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        }
    }
}

impl PulpObject for RpmUnit {
    const FIELDS: &'static [FieldMap] = &[
        field("name", "name"),
        field("version", "version"),
        field("release", "release"),
        field("arch", "arch"),
        field("epoch", "epoch"),
        field("signing_key", "signing_key"),
        field("sha256sum", "checksums.sha256"),
        field("filename", "filename"),
        field("sourcerpm", "sourcerpm"),
        field("content_type_id", "_content_type_id"),
        field("unit_id", "_id"),
        field("repository_memberships", "repository_memberships"),
    ];

    fn validate(mut self) -> Result<Self, InvalidDataError> {
        if !Self::TYPE_IDS.contains(&self.content_type_id.as_str()) {
            return Err(InvalidDataError::new(format!(
                "'{}' is not an RPM content type",
                self.content_type_id
            )));
        }
        if let Some(sum) = &self.sha256sum {
            self.sha256sum = Some(checked_sha256(sum)?);
        }
        self.signing_key = self.signing_key.map(|k| k.to_ascii_lowercase());
        self.common.normalize();
        Ok(self)
    }
}

impl ContentUnit for RpmUnit {
    const TYPE_IDS: &'static [&'static str] = &["rpm", "srpm"];
    const KEY_FIELDS: &'static [&'static str] =
        &["name", "epoch", "version", "release", "arch", "sha256sum"];

    fn common(&self) -> &UnitCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut UnitCommon {
        &mut self.common
    }

    fn content_type_id(&self) -> &str {
        &self.content_type_id
    }
}
