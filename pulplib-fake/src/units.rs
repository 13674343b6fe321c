//! Unit bookkeeping for the fake service.
//!
//! Every unit is stored once, under its server-assigned id. Repository
//! contents are not kept separately: a repository holds exactly the units
//! whose memberships name it. Two units are the same unit when their type
//! and natural key match, which is how re-uploads and copies merge instead
//! of duplicating.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use pulplib_proto::Unit;

/// Type and serialized natural key of a unit.
type Identity = (String, String);

fn identity(unit: &Unit) -> Identity {
    (unit.content_type_id().to_string(), unit.unit_key().to_string())
}

/// Whether `incoming` should leave `existing` in place rather than replace it.
///
/// Advisories are only replaced by a newer version; everything else is
/// overwritten by the latest upload.
fn keeps_existing(existing: &Unit, incoming: &Unit) -> bool {
    match (existing, incoming) {
        (Unit::Erratum(old), Unit::Erratum(new)) => new.compare_version(old) != Ordering::Greater,
        _ => false,
    }
}

#[derive(Debug, Default)]
pub(crate) struct UnitStore {
    units: BTreeMap<String, Unit>,
    by_identity: HashMap<Identity, String>,
}

impl UnitStore {
    /// Stores `unit`, merging it into an existing unit with the same key.
    ///
    /// A merged unit keeps the existing id and the union of both membership
    /// lists. `fresh_id` is only called when a new id is needed. Returns the
    /// stored unit.
    pub(crate) fn insert(&mut self, unit: Unit, fresh_id: impl FnOnce() -> String) -> Unit {
        let key = identity(&unit);
        let existing = self
            .by_identity
            .get(&key)
            .and_then(|id| self.units.get(id))
            .cloned();

        let stored = match existing {
            Some(existing) => {
                let id = existing.unit_id().unwrap_or_default().to_string();
                let mut merged = if keeps_existing(&existing, &unit) {
                    existing.clone()
                } else {
                    unit.clone().with_unit_id(id.as_str())
                };
                merged.set_repository_memberships(existing.repository_memberships().to_vec());
                merged.add_memberships(unit.repository_memberships().iter().cloned());
                merged
            }
            None => {
                let id = match unit.unit_id() {
                    Some(id) if !self.units.contains_key(id) => id.to_string(),
                    _ => fresh_id(),
                };
                unit.with_unit_id(id)
            }
        };

        let id = stored.unit_id().unwrap_or_default().to_string();
        self.by_identity.insert(key, id.clone());
        self.units.insert(id, stored.clone());
        stored
    }

    pub(crate) fn remove_membership(&mut self, unit_id: &str, repo_id: &str) {
        if let Some(unit) = self.units.get_mut(unit_id) {
            let kept = unit
                .repository_memberships()
                .iter()
                .filter(|r| *r != repo_id)
                .cloned()
                .collect();
            unit.set_repository_memberships(kept);
        }
    }

    /// Takes a repository out of every unit's memberships. The units
    /// themselves stay stored, as orphans do on a real server.
    pub(crate) fn drop_repository(&mut self, repo_id: &str) {
        let ids: Vec<String> = self
            .in_repository(repo_id)
            .filter_map(|u| u.unit_id().map(str::to_string))
            .collect();
        for id in ids {
            self.remove_membership(&id, repo_id);
        }
    }

    /// Removes file units from `repo_id` that share `path` with the unit
    /// `keep_id`. A repository holds at most one file per path.
    pub(crate) fn evict_path(&mut self, repo_id: &str, path: &str, keep_id: &str) {
        let clashing: Vec<String> = self
            .in_repository(repo_id)
            .filter_map(|u| match u {
                Unit::File(f) if f.path == path => u.unit_id().map(str::to_string),
                _ => None,
            })
            .filter(|id| id != keep_id)
            .collect();
        for id in clashing {
            tracing::debug!(repo_id, path, unit_id = %id, "replacing file with same path");
            self.remove_membership(&id, repo_id);
        }
    }

    pub(crate) fn get_mut(&mut self, unit_id: &str) -> Option<&mut Unit> {
        self.units.get_mut(unit_id)
    }

    pub(crate) fn in_repository<'a>(&'a self, repo_id: &'a str) -> impl Iterator<Item = &'a Unit> {
        self.units
            .values()
            .filter(move |u| u.repository_memberships().iter().any(|r| r == repo_id))
    }

    pub(crate) fn all(&self) -> Vec<Unit> {
        self.units.values().cloned().collect()
    }
}
