//! Maintenance report: which repositories are currently in maintenance.
//!
//! The report is stored on the server as a `repos.json` file in a dedicated
//! repository. The JSON layout is:
//!
//! ```json
//! {
//!   "last_updated": "2019-08-15T14:21:12Z",
//!   "last_updated_by": "alice",
//!   "repos": {"repo1": {"message": "...", "owner": "alice", "started": "..."}}
//! }
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::data::InvalidDataError;

/// Maintenance record for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceEntry {
    pub repo_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub last_updated: Option<DateTime<Utc>>,
    pub last_updated_by: Option<String>,
    /// At most one entry per repository.
    pub entries: Vec<MaintenanceEntry>,
}

#[derive(Serialize, Deserialize)]
struct EntryBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    started: Option<DateTime<Utc>>,
}

impl MaintenanceReport {
    /// Loads a report from the `repos.json` layout.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if the document is malformed.
    pub fn from_data(data: &Value) -> Result<Self, InvalidDataError> {
        let obj = data
            .as_object()
            .ok_or_else(|| InvalidDataError::new("maintenance report is not an object"))?;

        let last_updated = obj
            .get("last_updated")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()))
            .transpose()?;
        let last_updated_by = obj
            .get("last_updated_by")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut entries = Vec::new();
        if let Some(repos) = obj.get("repos") {
            let repos = repos
                .as_object()
                .ok_or_else(|| InvalidDataError::new("maintenance 'repos' is not an object"))?;
            for (repo_id, body) in repos {
                let body: EntryBody = serde_json::from_value(body.clone())?;
                entries.push(MaintenanceEntry {
                    repo_id: repo_id.clone(),
                    message: body.message,
                    owner: body.owner,
                    started: body.started,
                });
            }
        }
        entries.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));

        Ok(Self {
            last_updated,
            last_updated_by,
            entries,
        })
    }

    /// Exports the report in the `repos.json` layout.
    #[must_use]
    pub fn to_data(&self) -> Value {
        let repos: Map<String, Value> = self
            .entries
            .iter()
            .map(|e| {
                let body = EntryBody {
                    message: e.message.clone(),
                    owner: e.owner.clone(),
                    started: e.started,
                };
                (
                    e.repo_id.clone(),
                    serde_json::to_value(body).unwrap_or(Value::Null),
                )
            })
            .collect();
        json!({
            "last_updated": self.last_updated,
            "last_updated_by": self.last_updated_by,
            "repos": repos,
        })
    }

    /// Ids of repositories in maintenance.
    pub fn repo_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.repo_id.as_str())
    }

    #[must_use]
    pub fn contains(&self, repo_id: &str) -> bool {
        self.entries.iter().any(|e| e.repo_id == repo_id)
    }

    /// Returns a copy with the given repositories put into maintenance.
    ///
    /// Existing entries for the same repositories are replaced.
    #[must_use]
    pub fn add<I, S>(&self, repo_ids: I, owner: &str, message: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_at(repo_ids, owner, message, Utc::now())
    }

    /// [`add`](Self::add) with an explicit timestamp.
    #[must_use]
    pub fn add_at<I, S>(
        &self,
        repo_ids: I,
        owner: &str,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added: BTreeSet<String> = repo_ids.into_iter().map(Into::into).collect();
        let mut entries: Vec<MaintenanceEntry> = self
            .entries
            .iter()
            .filter(|e| !added.contains(&e.repo_id))
            .cloned()
            .collect();
        entries.extend(added.into_iter().map(|repo_id| MaintenanceEntry {
            repo_id,
            message: message.map(str::to_string),
            owner: Some(owner.to_string()),
            started: Some(now),
        }));
        entries.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));

        Self {
            last_updated: Some(now),
            last_updated_by: Some(owner.to_string()),
            entries,
        }
    }

    /// Returns a copy with the given repositories taken out of maintenance.
    #[must_use]
    pub fn remove<I, S>(&self, repo_ids: I, owner: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let removed: BTreeSet<String> = repo_ids.into_iter().map(Into::into).collect();
        Self {
            last_updated: Some(Utc::now()),
            last_updated_by: Some(owner.to_string()),
            entries: self
                .entries
                .iter()
                .filter(|e| !removed.contains(&e.repo_id))
                .cloned()
                .collect(),
        }
    }
}
