use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::{ContentUnit, UnitCommon};
use crate::data::{FieldMap, InvalidDataError, PulpObject, field};

/// An advisory (bug fix, enhancement, or security erratum).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErratumUnit {
    pub id: String,
    /// Revision of the advisory; newer uploads replace older ones.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub issued: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pushcount: Option<String>,
    #[serde(default)]
    pub erratum_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub common: UnitCommon,
}

impl ErratumUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            status: None,
            updated: None,
            issued: None,
            description: None,
            pushcount: None,
            erratum_type: None,
            severity: None,
            title: None,
            summary: None,
            common: UnitCommon::default(),
        }
    }

    /// Compares advisory versions numerically when both parse, textually
    /// otherwise. A missing version sorts first.
    #[must_use]
    pub fn compare_version(&self, other: &Self) -> Ordering {
        match (&self.version, &other.version) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => match (a.parse::<u64>(), b.parse::<u64>()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            },
        }
    }
}

impl PulpObject for ErratumUnit {
    const FIELDS: &'static [FieldMap] = &[
        field("id", "id"),
        field("version", "version"),
        field("status", "status"),
        field("updated", "updated"),
        field("issued", "issued"),
        field("description", "description"),
        field("pushcount", "pushcount"),
        field("erratum_type", "type"),
        field("severity", "severity"),
        field("title", "title"),
        field("summary", "summary"),
        field("unit_id", "_id"),
        field("repository_memberships", "repository_memberships"),
    ];

    fn validate(mut self) -> Result<Self, InvalidDataError> {
        if self.id.is_empty() {
            return Err(InvalidDataError::new("erratum has an empty id"));
        }
        self.common.normalize();
        Ok(self)
    }
}

impl ContentUnit for ErratumUnit {
    const TYPE_IDS: &'static [&'static str] = &["erratum"];
    const KEY_FIELDS: &'static [&'static str] = &["id"];

    fn common(&self) -> &UnitCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut UnitCommon {
        &mut self.common
    }
}
