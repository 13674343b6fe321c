//! Direct control over fake server state, for test setup and inspection.

use std::sync::Arc;
use std::time::Duration;

use pulplib_proto::{MaintenanceReport, Repository, Task, Unit};

use crate::client::FakeClient;
use crate::state::{FakeState, PublishRecord, SyncRecord, UploadRecord};

/// Manipulates a [`FakeState`] without going through the client API.
///
/// Changes made here take effect immediately and create no tasks.
///
/// ```
/// use pulplib::PulpApi;
/// use pulplib_fake::FakeController;
/// use pulplib_proto::Repository;
///
/// let controller = FakeController::new();
/// controller.insert_repository(Repository::new("my-repo"));
///
/// let client = controller.client();
/// let repo = client.get_repository("my-repo").result().unwrap();
/// assert_eq!(repo.id, "my-repo");
/// ```
#[derive(Debug, Clone)]
pub struct FakeController {
    state: Arc<FakeState>,
}

impl Default for FakeController {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeController {
    /// A controller over fresh, empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::for_state(Arc::new(FakeState::new()))
    }

    #[must_use]
    pub const fn for_state(state: Arc<FakeState>) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> Arc<FakeState> {
        Arc::clone(&self.state)
    }

    /// A new client sharing this controller's state.
    #[must_use]
    pub fn client(&self) -> FakeClient {
        FakeClient::with_state(self.state())
    }

    /// Adds a repository, replacing any with the same id.
    pub fn insert_repository(&self, repository: Repository) {
        self.state.with_store(|s| {
            s.repositories.insert(repository.id.clone(), repository);
        });
    }

    /// Removes a repository and its memberships. Returns whether it existed.
    pub fn remove_repository(&self, repo_id: &str) -> bool {
        self.state.with_store(|s| {
            let existed = s.repositories.remove(repo_id).is_some();
            s.units.drop_repository(repo_id);
            existed
        })
    }

    /// All repositories, ordered by id.
    #[must_use]
    pub fn repositories(&self) -> Vec<Repository> {
        self.state
            .with_store(|s| s.repositories.values().cloned().collect())
    }

    /// Stores units, merging with existing units of the same key, and adds
    /// them to `repo_id` if given. Returns the stored units with their ids.
    pub fn insert_units(&self, repo_id: Option<&str>, units: Vec<Unit>) -> Vec<Unit> {
        self.state.with_store(|s| {
            units
                .into_iter()
                .map(|unit| s.insert_unit(repo_id, unit))
                .collect()
        })
    }

    /// Every stored unit, including those in no repository.
    #[must_use]
    pub fn content_units(&self) -> Vec<Unit> {
        self.state.with_store(|s| s.units.all())
    }

    /// Units currently in `repo_id`.
    #[must_use]
    pub fn repository_units(&self, repo_id: &str) -> Vec<Unit> {
        self.state
            .with_store(|s| s.units.in_repository(repo_id).cloned().collect())
    }

    /// Stores a task as given. It keeps its state unless cancelled, so a
    /// non-terminal task stays pending for whoever waits on it.
    pub fn insert_task(&self, task: Task) {
        self.state.with_store(|s| s.insert_task(task));
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.state.with_store(crate::state::Store::tasks)
    }

    #[must_use]
    pub fn publish_history(&self) -> Vec<PublishRecord> {
        self.state.with_store(|s| s.publish_history.clone())
    }

    #[must_use]
    pub fn sync_history(&self) -> Vec<SyncRecord> {
        self.state.with_store(|s| s.sync_history.clone())
    }

    #[must_use]
    pub fn upload_history(&self) -> Vec<UploadRecord> {
        self.state.with_store(|s| s.upload_history.clone())
    }

    #[must_use]
    pub fn content_type_ids(&self) -> Vec<String> {
        self.state.with_store(|s| s.type_ids.clone())
    }

    /// Replaces the content types the fake claims to support.
    pub fn set_content_type_ids<I, S>(&self, type_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let type_ids = type_ids.into_iter().map(Into::into).collect();
        self.state.with_store(|s| s.type_ids = type_ids);
    }

    /// The report last stored by `set_maintenance`, if any.
    #[must_use]
    pub fn maintenance_report(&self) -> Option<MaintenanceReport> {
        self.state.with_store(|s| s.maintenance.clone())
    }

    /// Keeps new tasks running for `delay` before they reach their final
    /// state. Zero restores immediate completion.
    pub fn set_task_delay(&self, delay: Duration) {
        self.state.with_store(|s| s.task_delay = delay);
    }

    /// Makes the next `count` tasks end in error. The operations creating
    /// them still apply their effects.
    pub fn fail_next_tasks(&self, count: u32) {
        self.state.with_store(|s| s.fail_next = count);
    }
}
