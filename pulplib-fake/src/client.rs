//! A [`PulpApi`] implementation over in-memory state.
//!
//! Operations apply their effects to the shared [`FakeState`] on the
//! calling thread, then hand the tasks they created to an [`Awaiter`]
//! polling that same state, so callers see the same futures, failures and
//! cancellation behavior as with a real server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use pulplib::api::{MAINTENANCE_FILE, MAINTENANCE_REPO};
use pulplib::{Awaiter, Page, PollSettings, ProxyFuture, PulpApi, PulpError};
use pulplib_proto::unit::UnitCommon;
use pulplib_proto::{
    Criteria, Distributor, ErratumUnit, FileUnit, InvalidDataError, MaintenanceReport,
    PublishOptions, PulpObject, Repository, SyncOptions, Task, TaskId, Unit,
};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::controller::FakeController;
use crate::matcher::{select, task_field};
use crate::state::{FakeState, PublishRecord, SyncRecord, UploadRecord};

/// Results per page of every fake search, kept small so callers exercise
/// pagination.
pub const PAGE_SIZE: usize = 3;

/// Poll interval of a fake client's awaiter.
pub const FAKE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Most units reported by one copy task.
const COPY_BATCH: usize = 5;

struct FakeInner {
    state: Arc<FakeState>,
    awaiter: Awaiter,
    closed: AtomicBool,
}

/// A client whose server is a [`FakeState`].
pub struct FakeClient {
    inner: Arc<FakeInner>,
}

impl std::fmt::Debug for FakeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeClient")
            .field("state", &self.inner.state)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClient {
    /// A client over fresh, empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(Arc::new(FakeState::new()))
    }

    /// A client over existing state, possibly shared with other clients.
    #[must_use]
    pub fn with_state(state: Arc<FakeState>) -> Self {
        Self::with_settings(
            state,
            PollSettings {
                interval: FAKE_POLL_INTERVAL,
                ..PollSettings::default()
            },
        )
    }

    #[must_use]
    pub fn with_settings(state: Arc<FakeState>, settings: PollSettings) -> Self {
        let source = Arc::clone(&state) as Arc<dyn pulplib::TaskSource>;
        Self {
            inner: Arc::new(FakeInner {
                state,
                awaiter: Awaiter::new(source, settings),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Test control over this client's state.
    #[must_use]
    pub fn controller(&self) -> FakeController {
        FakeController::for_state(Arc::clone(&self.inner.state))
    }
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl PulpApi for FakeClient {
    fn get_repository(&self, repo_id: &str) -> ProxyFuture<Repository> {
        self.inner
            .query(|inner| inner.state.with_store(|s| s.repository(repo_id)))
    }

    fn search_repository(&self, criteria: &Criteria) -> ProxyFuture<Page<Repository>> {
        self.inner.query(|inner| {
            let repos: Vec<Repository> = inner
                .state
                .with_store(|s| s.repositories.values().cloned().collect());
            inner.search(repos, criteria, |r: &Repository, name: &str| r.field(name))
        })
    }

    fn search_distributor(&self, criteria: &Criteria) -> ProxyFuture<Page<Distributor>> {
        self.inner.query(|inner| {
            let distributors: Vec<Distributor> = inner.state.with_store(|s| {
                s.repositories
                    .values()
                    .flat_map(|repo| {
                        repo.distributors.iter().map(|d| Distributor {
                            repo_id: Some(repo.id.clone()),
                            ..d.clone()
                        })
                    })
                    .collect()
            });
            inner.search(distributors, criteria, |d: &Distributor, name: &str| d.field(name))
        })
    }

    fn search_content(&self, criteria: &Criteria) -> ProxyFuture<Page<Unit>> {
        self.inner.query(|inner| {
            let wanted = criteria.type_ids().unwrap_or_default();
            let units = inner.state.with_store(|s| {
                if let Some(missing) = wanted.iter().find(|t| !s.type_ids.contains(t)) {
                    return Err(PulpError::Invalid(format!(
                        "Content type: {missing} is not supported by server"
                    )));
                }
                Ok(s.units.all())
            })?;
            inner.search(units, criteria, |u: &Unit, name: &str| u.field(name))
        })
    }

    fn search_task(&self, criteria: &Criteria) -> ProxyFuture<Page<Task>> {
        self.inner.query(|inner| {
            let tasks = inner.state.with_store(crate::state::Store::tasks);
            inner.search(tasks, criteria, task_field)
        })
    }

    fn get_content_type_ids(&self) -> ProxyFuture<Vec<String>> {
        self.inner.query(|inner| {
            let mut ids = inner.state.with_store(|s| s.type_ids.clone());
            ids.sort();
            ids.dedup();
            Ok(ids)
        })
    }

    fn publish_repository_with(
        &self,
        repo_id: &str,
        options: &PublishOptions,
    ) -> ProxyFuture<Vec<Task>> {
        self.inner.publish(repo_id, *options)
    }

    fn update_repository(&self, repository: &Repository) -> ProxyFuture<()> {
        self.inner.query(|inner| {
            inner.state.with_store(|s| {
                let stored = s.repositories.get_mut(&repository.id).ok_or_else(|| {
                    PulpError::NotFound {
                        kind: "repository",
                        id: repository.id.clone(),
                    }
                })?;
                stored.apply_mutable_notes(repository);
                tracing::debug!(repo_id = %repository.id, "fake repository update");
                Ok(())
            })
        })
    }

    fn update_content(&self, unit: &Unit) -> ProxyFuture<()> {
        let Some(unit_id) = unit.unit_id() else {
            return ProxyFuture::failed(PulpError::Invalid(
                "unit_id missing on call to update_content()".into(),
            ));
        };
        self.inner.query(|inner| {
            inner.state.with_store(|s| {
                let stored = s
                    .units
                    .get_mut(unit_id)
                    .filter(|stored| stored.content_type_id() == unit.content_type_id())
                    .ok_or_else(|| PulpError::NotFound {
                        kind: "unit",
                        id: unit_id.to_string(),
                    })?;
                *stored = stored.with_user_metadata_of(unit)?;
                Ok(())
            })
        })
    }

    fn sync_repository(&self, repo_id: &str, options: &SyncOptions) -> ProxyFuture<Vec<Task>> {
        self.inner.submit(|inner| {
            if options.feed.trim().is_empty() {
                return Err(PulpError::Invalid(format!(
                    "cannot sync {repo_id}: no feed given"
                )));
            }
            inner.state.with_store(|s| {
                let repository = s.repository(repo_id)?;
                let task_ids = vec![s.spawn_task(repo_id, "sync", None)];
                s.sync_history.push(SyncRecord {
                    repository,
                    task_ids: task_ids.clone(),
                    options: options.clone(),
                });
                Ok(task_ids)
            })
        })
    }

    fn copy_content(
        &self,
        from_repo: &str,
        to_repo: &str,
        criteria: &Criteria,
    ) -> ProxyFuture<Vec<Task>> {
        self.inner.submit(|inner| {
            if from_repo == to_repo {
                return Err(PulpError::Invalid(format!(
                    "cannot copy content from {from_repo} into itself"
                )));
            }
            let candidates: Vec<Unit> = inner.state.with_store(|s| {
                s.repository(from_repo)?;
                s.repository(to_repo)?;
                Ok::<_, PulpError>(s.units.in_repository(from_repo).cloned().collect())
            })?;
            let found = select(candidates, criteria, |u: &Unit, name: &str| u.field(name))?;
            tracing::debug!(from_repo, to_repo, count = found.len(), "fake copy");

            inner.state.with_store(|s| {
                s.repository(to_repo)?;
                // The snapshot's memberships may be stale by now; only the
                // destination is added, the rest are left to the store.
                for unit in &found {
                    let mut copy = unit.clone();
                    copy.set_repository_memberships(Vec::new());
                    s.insert_unit(Some(to_repo), copy);
                }
                let copied: Vec<Value> = found.iter().map(task_unit).collect();
                let mut task_ids: Vec<TaskId> = copied
                    .chunks(COPY_BATCH)
                    .map(|batch| s.spawn_task(to_repo, "associate", Some(units_result(batch))))
                    .collect();
                if task_ids.is_empty() {
                    task_ids.push(s.spawn_task(to_repo, "associate", Some(units_result(&[]))));
                }
                Ok(task_ids)
            })
        })
    }

    fn remove_content(&self, repo_id: &str, criteria: &Criteria) -> ProxyFuture<Vec<Task>> {
        self.inner.submit(|inner| {
            if *criteria != Criteria::True && criteria.type_ids().is_none() {
                return Err(PulpError::Invalid(
                    "Criteria to remove_content must specify at least one unit type!".into(),
                ));
            }
            let candidates: Vec<Unit> = inner.state.with_store(|s| {
                s.repository(repo_id)?;
                Ok::<_, PulpError>(s.units.in_repository(repo_id).cloned().collect())
            })?;
            let removed = select(candidates, criteria, |u: &Unit, name: &str| u.field(name))?;

            inner.state.with_store(|s| {
                for unit in &removed {
                    if let Some(unit_id) = unit.unit_id() {
                        s.units.remove_membership(unit_id, repo_id);
                    }
                }
                let reported: Vec<Value> = removed.iter().map(task_unit).collect();
                Ok(vec![s.spawn_task(repo_id, "unassociate", Some(units_result(&reported)))])
            })
        })
    }

    fn delete_repository(&self, repo_id: &str) -> ProxyFuture<Vec<Task>> {
        self.inner.submit(|inner| {
            inner.state.with_store(|s| {
                if s.repositories.remove(repo_id).is_none() {
                    tracing::debug!(repo_id, "deleting absent repository");
                    return Ok(Vec::new());
                }
                s.units.drop_repository(repo_id);
                Ok(vec![s.spawn_task(repo_id, "delete", None)])
            })
        })
    }

    fn upload_file(&self, repo_id: &str, name: &str, content: Vec<u8>) -> ProxyFuture<Vec<Task>> {
        self.inner.upload_file(repo_id, name, &content)
    }

    fn upload_erratum(&self, repo_id: &str, erratum: &ErratumUnit) -> ProxyFuture<Vec<Task>> {
        self.inner.submit(|inner| {
            let mut erratum = erratum.clone();
            erratum.common = UnitCommon::default();
            inner.state.with_store(|s| {
                s.repository(repo_id)?;
                s.insert_unit(Some(repo_id), erratum.into());
                Ok(vec![s.spawn_task(repo_id, "import_upload", None)])
            })
        })
    }

    fn get_maintenance_report(&self) -> ProxyFuture<MaintenanceReport> {
        self.inner.query(|inner| {
            Ok(inner
                .state
                .with_store(|s| s.maintenance.clone())
                .unwrap_or_default())
        })
    }

    fn set_maintenance(&self, report: &MaintenanceReport) -> ProxyFuture<Vec<Task>> {
        let content = match serde_json::to_vec_pretty(&report.to_data()) {
            Ok(content) => content,
            Err(e) => return ProxyFuture::failed(InvalidDataError::from(e).into()),
        };
        let inner = Arc::clone(&self.inner);
        let report = report.clone();
        self.inner
            .upload_file(MAINTENANCE_REPO, MAINTENANCE_FILE, &content)
            .flat_map(move |mut uploaded| {
                inner.state.with_store(|s| s.maintenance = Some(report));
                inner.publish(MAINTENANCE_REPO, PublishOptions::default()).map(move |published| {
                    uploaded.extend(published);
                    uploaded
                })
            })
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// A unit as Pulp reports it in a task result.
fn task_unit(unit: &Unit) -> Value {
    json!({"type_id": unit.content_type_id(), "unit_key": unit.unit_key()})
}

fn units_result(units: &[Value]) -> Value {
    json!({"units_successful": units})
}

impl FakeInner {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("closing fake client");
        }
        self.awaiter.close();
    }

    fn ensure_open(&self) -> Result<(), PulpError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PulpError::Detached)
        } else {
            Ok(())
        }
    }

    /// Runs an operation that answers directly, without tasks.
    fn query<T, F>(&self, op: F) -> ProxyFuture<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Self) -> Result<T, PulpError>,
    {
        ProxyFuture::from_result(self.ensure_open().and_then(|()| op(self)))
    }

    /// Runs a mutating operation and waits on the tasks it created.
    fn submit<F>(&self, op: F) -> ProxyFuture<Vec<Task>>
    where
        F: FnOnce(&Self) -> Result<Vec<TaskId>, PulpError>,
    {
        match self.ensure_open().and_then(|()| op(self)) {
            Ok(task_ids) => self.awaiter.watch(task_ids),
            Err(e) => ProxyFuture::failed(e),
        }
    }

    /// Filters `items` outside the lock, then shuffles and pages them.
    fn search<T, F>(&self, items: Vec<T>, criteria: &Criteria, field: F) -> Result<Page<T>, PulpError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T, &str) -> Option<Value>,
    {
        let mut found = select(items, criteria, field)?;
        self.state.with_store(|s| s.shuffle(&mut found));
        Ok(Page::chunked(found, PAGE_SIZE))
    }

    fn publish(&self, repo_id: &str, options: PublishOptions) -> ProxyFuture<Vec<Task>> {
        self.submit(|inner| {
            inner.state.with_store(|s| {
                let repository = s.repository(repo_id)?;
                let task_ids: Vec<TaskId> = repository
                    .distributors
                    .iter()
                    .filter(|d| options.includes(d))
                    .map(|_| s.spawn_task(repo_id, "publish", None))
                    .collect();
                if let Some(stored) = s.repositories.get_mut(repo_id) {
                    let now = Utc::now();
                    for distributor in stored.distributors.iter_mut().filter(|d| options.includes(d)) {
                        distributor.last_publish = Some(now);
                    }
                }
                s.publish_history.push(PublishRecord {
                    repository,
                    task_ids: task_ids.clone(),
                    options,
                });
                Ok(task_ids)
            })
        })
    }

    fn upload_file(&self, repo_id: &str, name: &str, content: &[u8]) -> ProxyFuture<Vec<Task>> {
        self.submit(|inner| {
            let digest = Sha256::digest(content);
            let sha256sum: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            let size = u64::try_from(content.len()).unwrap_or(u64::MAX);
            let unit = FileUnit::new(name, size, sha256sum.as_str())?;
            inner.state.with_store(|s| {
                let repository = s.repository(repo_id)?;
                s.insert_unit(Some(repo_id), unit.into());
                let task_ids = vec![s.spawn_task(repo_id, "import_upload", None)];
                s.upload_history.push(UploadRecord {
                    repository,
                    task_ids: task_ids.clone(),
                    name: name.to_string(),
                    sha256sum,
                });
                Ok(task_ids)
            })
        })
    }
}
