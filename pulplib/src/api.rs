//! The operations shared by the real client and the fake service.

use pulplib_proto::{
    Criteria, Distributor, ErratumUnit, MaintenanceReport, PublishOptions, Repository,
    SyncOptions, Task, Unit,
};

use crate::future::ProxyFuture;
use crate::page::Page;

/// Repository id the maintenance report is published from.
pub const MAINTENANCE_REPO: &str = "redhat-maintenance";

/// File name of the maintenance report inside [`MAINTENANCE_REPO`].
pub const MAINTENANCE_FILE: &str = "repos.json";

/// A Pulp server, real or fake.
///
/// Every method returns immediately. Operations that make Pulp spawn tasks
/// resolve with the final snapshots of those tasks once all of them are
/// terminal, and fail with [`PulpError::TaskFailed`](crate::PulpError::TaskFailed)
/// if any of them did not succeed.
pub trait PulpApi: Send + Sync {
    /// Looks up one repository by id.
    fn get_repository(&self, repo_id: &str) -> ProxyFuture<Repository>;

    fn search_repository(&self, criteria: &Criteria) -> ProxyFuture<Page<Repository>>;

    /// Searches distributors across all repositories.
    fn search_distributor(&self, criteria: &Criteria) -> ProxyFuture<Page<Distributor>>;

    /// Searches units across every content type named by `criteria`, or
    /// every type the server supports if it names none.
    fn search_content(&self, criteria: &Criteria) -> ProxyFuture<Page<Unit>>;

    fn search_task(&self, criteria: &Criteria) -> ProxyFuture<Page<Task>>;

    /// Content type ids the server supports, sorted.
    fn get_content_type_ids(&self) -> ProxyFuture<Vec<String>>;

    /// Publishes a repository through each of its distributors in turn,
    /// with the server's default options.
    fn publish_repository(&self, repo_id: &str) -> ProxyFuture<Vec<Task>> {
        self.publish_repository_with(repo_id, &PublishOptions::default())
    }

    fn publish_repository_with(&self, repo_id: &str, options: &PublishOptions)
    -> ProxyFuture<Vec<Task>>;

    /// Stores the mutable notes of `repository` on the repository with the
    /// same id. Other fields are ignored.
    fn update_repository(&self, repository: &Repository) -> ProxyFuture<()>;

    /// Stores the mutable fields of `unit` on the stored unit with the same
    /// id. Fails at once if `unit` has no id.
    fn update_content(&self, unit: &Unit) -> ProxyFuture<()>;

    fn sync_repository(&self, repo_id: &str, options: &SyncOptions) -> ProxyFuture<Vec<Task>>;

    /// Copies units matching `criteria` from one repository to another.
    fn copy_content(&self, from_repo: &str, to_repo: &str, criteria: &Criteria)
    -> ProxyFuture<Vec<Task>>;

    /// Removes units matching `criteria` from a repository.
    fn remove_content(&self, repo_id: &str, criteria: &Criteria) -> ProxyFuture<Vec<Task>>;

    /// Deletes a repository. Deleting one that does not exist succeeds
    /// with no tasks.
    fn delete_repository(&self, repo_id: &str) -> ProxyFuture<Vec<Task>>;

    /// Uploads `content` as a file unit named `name`.
    fn upload_file(&self, repo_id: &str, name: &str, content: Vec<u8>) -> ProxyFuture<Vec<Task>>;

    /// Uploads an advisory. An erratum already stored under the same id
    /// is only replaced by a newer version.
    fn upload_erratum(&self, repo_id: &str, erratum: &ErratumUnit) -> ProxyFuture<Vec<Task>>;

    fn get_maintenance_report(&self) -> ProxyFuture<MaintenanceReport>;

    /// Replaces the maintenance report and publishes it.
    fn set_maintenance(&self, report: &MaintenanceReport) -> ProxyFuture<Vec<Task>>;

    /// Stops background work. Futures still pending fail with
    /// [`PulpError::Detached`](crate::PulpError::Detached), and so does
    /// every later operation.
    fn close(&self);
}
