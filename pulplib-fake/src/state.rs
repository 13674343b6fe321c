//! Shared in-memory state of a fake Pulp server.
//!
//! One [`FakeState`] can back several clients and a controller. Every
//! operation takes the lock once, does its work, and releases it before
//! criteria are evaluated or any future is resolved.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use pulplib::{PulpError, TaskSource};
use pulplib_proto::{
    MaintenanceReport, PublishOptions, Repository, SyncOptions, Task, TaskId, TaskState, Unit,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::units::UnitStore;

/// Content types a default Pulp 2 installation reports.
pub const DEFAULT_TYPE_IDS: &[&str] = &[
    "distribution",
    "drpm",
    "erratum",
    "iso",
    "modulemd",
    "modulemd_defaults",
    "package_category",
    "package_environment",
    "package_group",
    "package_langpacks",
    "rpm",
    "srpm",
    "yum_repo_metadata_file",
];

/// A publish performed through a fake client.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    /// The repository as it was when published.
    pub repository: Repository,
    pub task_ids: Vec<TaskId>,
    pub options: PublishOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub repository: Repository,
    pub task_ids: Vec<TaskId>,
    pub options: SyncOptions,
}

/// A file upload performed through a fake client.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub repository: Repository,
    pub task_ids: Vec<TaskId>,
    pub name: String,
    pub sha256sum: String,
}

struct TaskRecord {
    task: Task,
    /// When a delayed task reaches `outcome`; `None` once it has.
    ready_at: Option<Instant>,
    outcome: TaskState,
}

pub(crate) struct Store {
    pub(crate) repositories: BTreeMap<String, Repository>,
    pub(crate) units: UnitStore,
    tasks: BTreeMap<TaskId, TaskRecord>,
    pub(crate) type_ids: Vec<String>,
    pub(crate) publish_history: Vec<PublishRecord>,
    pub(crate) sync_history: Vec<SyncRecord>,
    pub(crate) upload_history: Vec<UploadRecord>,
    pub(crate) maintenance: Option<MaintenanceReport>,
    pub(crate) task_delay: Duration,
    pub(crate) fail_next: u32,
    rng: StdRng,
}

impl Store {
    fn new(rng: StdRng) -> Self {
        Self {
            repositories: BTreeMap::new(),
            units: UnitStore::default(),
            tasks: BTreeMap::new(),
            type_ids: DEFAULT_TYPE_IDS.iter().map(|t| (*t).to_string()).collect(),
            publish_history: Vec::new(),
            sync_history: Vec::new(),
            upload_history: Vec::new(),
            maintenance: None,
            task_delay: Duration::ZERO,
            fail_next: 0,
            rng,
        }
    }

    /// A random UUID in canonical form, drawn from the seeded generator.
    pub(crate) fn next_id(&mut self) -> String {
        random_uuid(&mut self.rng)
    }

    pub(crate) fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    pub(crate) fn repository(&self, repo_id: &str) -> Result<Repository, PulpError> {
        self.repositories
            .get(repo_id)
            .cloned()
            .ok_or_else(|| PulpError::NotFound {
                kind: "repository",
                id: repo_id.to_string(),
            })
    }

    /// Stores `unit` as a member of `repo_id`, replacing any other file of
    /// the same path there.
    pub(crate) fn insert_unit(&mut self, repo_id: Option<&str>, mut unit: Unit) -> Unit {
        if let Some(repo_id) = repo_id {
            unit.add_memberships([repo_id]);
        }
        let rng = &mut self.rng;
        let stored = self.units.insert(unit, || random_uuid(rng));
        if let (Some(repo_id), Unit::File(file)) = (repo_id, &stored) {
            let keep = stored.unit_id().unwrap_or_default();
            self.units.evict_path(repo_id, &file.path, keep);
        }
        stored
    }

    /// Creates a task for a mutating operation.
    ///
    /// Without a configured delay the task is terminal straight away;
    /// otherwise it runs until the delay has passed and a poll observes it.
    pub(crate) fn spawn_task(&mut self, repo_id: &str, action: &str, result: Option<Value>) -> TaskId {
        let id = TaskId::new(self.next_id());
        let mut task = Task::new(id.clone(), TaskState::Waiting).with_tags([
            format!("pulp:repository:{repo_id}"),
            format!("pulp:action:{action}"),
        ]);
        task.result = result;

        let outcome = if self.fail_next > 0 {
            self.fail_next -= 1;
            TaskState::Error
        } else {
            TaskState::Finished
        };
        if outcome == TaskState::Error {
            task.error_summary = Some(format!("simulated failure of {action}"));
            task.error_details = Some(format!("fake traceback for {action} on {repo_id}"));
        }

        let ready_at = if self.task_delay.is_zero() {
            finish(&mut task, outcome);
            None
        } else {
            finish(&mut task, TaskState::Running);
            Some(Instant::now() + self.task_delay)
        };
        tracing::debug!(task_id = %id, repo_id, action, state = %task.state, "fake task created");
        self.tasks.insert(
            id.clone(),
            TaskRecord {
                task,
                ready_at,
                outcome,
            },
        );
        id
    }

    /// Stores a task exactly as given. It never changes unless cancelled.
    pub(crate) fn insert_task(&mut self, task: Task) {
        let outcome = task.state;
        self.tasks.insert(
            task.id.clone(),
            TaskRecord {
                task,
                ready_at: None,
                outcome,
            },
        );
    }

    /// Moves delayed tasks whose time has come to their final state.
    fn advance(&mut self, now: Instant) {
        for record in self.tasks.values_mut() {
            if record.ready_at.is_some_and(|at| at <= now) {
                record.ready_at = None;
                finish(&mut record.task, record.outcome);
            }
        }
    }

    pub(crate) fn tasks(&mut self) -> Vec<Task> {
        self.advance(Instant::now());
        self.tasks.values().map(|r| r.task.clone()).collect()
    }
}

fn random_uuid(rng: &mut StdRng) -> String {
    uuid::Builder::from_random_bytes(rng.random())
        .into_uuid()
        .to_string()
}

fn finish(task: &mut Task, state: TaskState) {
    if let Err(e) = task.transition(state, Utc::now()) {
        tracing::warn!(task_id = %task.id, error = %e, "fake task transition refused");
    }
}

/// In-memory server state shared by fake clients and their controller.
pub struct FakeState {
    store: Mutex<Store>,
}

impl std::fmt::Debug for FakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.lock();
        f.debug_struct("FakeState")
            .field("repositories", &store.repositories.len())
            .field("tasks", &store.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Default for FakeState {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeState {
    /// Empty state with a fixed seed, so ids and result order repeat from
    /// run to run.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            store: Mutex::new(Store::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Runs `f` with the store locked.
    pub(crate) fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        f(&mut self.store.lock())
    }
}

impl TaskSource for FakeState {
    fn search_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>, PulpError> {
        let mut store = self.store.lock();
        store.advance(Instant::now());
        Ok(ids
            .iter()
            .filter_map(|id| store.tasks.get(id).map(|r| r.task.clone()))
            .collect())
    }

    fn cancel_task(&self, id: &TaskId) -> Result<(), PulpError> {
        let mut store = self.store.lock();
        let pending = store.tasks.get_mut(id).filter(|r| !r.task.is_completed());
        if let Some(record) = pending {
            record.ready_at = None;
            record.outcome = TaskState::Canceled;
            finish(&mut record.task, TaskState::Canceled);
            tracing::info!(task_id = %id, "fake task cancelled");
        }
        Ok(())
    }
}
