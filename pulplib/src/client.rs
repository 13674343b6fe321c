//! Client for a real Pulp 2.x server.
//!
//! Requests go through a [`Transport`] on the client's [`RequestPool`], so
//! no more than the configured number run at once. Each one is retried per
//! the client's [`RetryPolicy`]; requests that spawn tasks are retried as a
//! whole, so a task that fails causes the request to be submitted again.
//! Spawned tasks are handed to the client's [`Awaiter`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pulplib_proto::task::TASK_FIELDS;
use pulplib_proto::unit::{self, CONTENT_TYPE_FIELD};
use pulplib_proto::{
    ContentUnit, Criteria, Distributor, ErratumUnit, FieldMap, InvalidDataError,
    MaintenanceReport, PublishOptions, PulpObject, Repository, SyncOptions, Task, TaskId, Unit,
    UnitRegistry, codec,
};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::api::{MAINTENANCE_FILE, MAINTENANCE_REPO, PulpApi};
use crate::config::ClientConfig;
use crate::error::PulpError;
use crate::future::ProxyFuture;
use crate::page::Page;
use crate::poller::{Awaiter, TaskSource};
use crate::pool::RequestPool;
use crate::retry::RetryPolicy;
use crate::transport::{Method, Request, Transport};

const API: &str = "pulp/api/v2/";

/// Where the published maintenance report lives.
const MAINTENANCE_REPORT_PATH: &str = "pulp/isos/redhat-maintenance/repos.json";

/// Size of each PUT when uploading content.
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Task lookups for the awaiter, straight through the transport.
struct TransportTaskSource<T> {
    transport: Arc<T>,
}

impl<T: Transport> TaskSource for TransportTaskSource<T> {
    fn search_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>, PulpError> {
        let request = Request::post(format!("{API}tasks/search/"), codec::task_search_body(ids));
        tracing::debug!(count = ids.len(), "searching Pulp tasks");
        let response = self.transport.call(&request)?;
        Ok(codec::decode_tasks(&response)?)
    }

    fn cancel_task(&self, id: &TaskId) -> Result<(), PulpError> {
        match self.transport.call(&Request::delete(format!("{API}tasks/{id}/"))) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Content on its way into a repository through Pulp's upload API.
struct Upload {
    repo_id: String,
    unit_type_id: &'static str,
    unit_key: Value,
    unit_metadata: Value,
    content: Vec<u8>,
}

impl Upload {
    fn file(repo_id: &str, name: &str, content: Vec<u8>) -> Self {
        let digest = Sha256::digest(&content);
        let sha256: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            repo_id: repo_id.to_string(),
            unit_type_id: "iso",
            unit_key: json!({"name": name, "checksum": sha256, "size": content.len()}),
            unit_metadata: json!({}),
            content,
        }
    }

    /// Errata carry no file; everything but the key goes in the metadata.
    fn erratum(repo_id: &str, erratum: &ErratumUnit) -> Self {
        let mut metadata = erratum.to_data();
        if let Value::Object(map) = &mut metadata {
            for key in ["id", "_id", "repository_memberships"] {
                map.remove(key);
            }
        }
        Self {
            repo_id: repo_id.to_string(),
            unit_type_id: "erratum",
            unit_key: erratum.unit_key(),
            unit_metadata: metadata,
            content: Vec::new(),
        }
    }

    fn describe(&self) -> String {
        format!("upload {} {} to {}", self.unit_type_id, self.unit_key, self.repo_id)
    }
}

struct ClientInner<T> {
    transport: Arc<T>,
    awaiter: Awaiter,
    pool: RequestPool,
    retry: RetryPolicy,
    page_size: usize,
    registry: UnitRegistry,
    /// Type ids reported by the server, fetched on first use.
    server_types: Mutex<Option<Vec<String>>>,
    closed: AtomicBool,
}

/// A client for one Pulp server.
///
/// Dropping the client closes it.
pub struct Client<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("awaiter", &self.inner.awaiter)
            .field("pool", &self.inner.pool)
            .field("retry", &self.inner.retry)
            .field("page_size", &self.inner.page_size)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Client<T> {
    /// A client with default settings.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &ClientConfig::default())
    }

    pub fn with_config(transport: T, config: &ClientConfig) -> Self {
        Self::with_retry_policy(transport, config, config.retry_policy())
    }

    /// Like [`with_config`](Self::with_config) but with an explicit retry
    /// policy, e.g. one that does not sleep.
    pub fn with_retry_policy(transport: T, config: &ClientConfig, retry: RetryPolicy) -> Self {
        Self::with_registry(transport, config, retry, UnitRegistry::builtin())
    }

    /// Full constructor; `registry` decides which unit types searches can
    /// return.
    pub fn with_registry(
        transport: T,
        config: &ClientConfig,
        retry: RetryPolicy,
        registry: UnitRegistry,
    ) -> Self {
        let transport = Arc::new(transport);
        let source = Arc::new(TransportTaskSource {
            transport: Arc::clone(&transport),
        });
        Self {
            inner: Arc::new(ClientInner {
                transport,
                awaiter: Awaiter::new(source, config.poll_settings()),
                pool: RequestPool::new(config.request_threads),
                retry,
                page_size: config.page_size.max(1),
                registry,
                server_types: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The transport this client sends requests through.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<T: Transport> PulpApi for Client<T> {
    fn get_repository(&self, repo_id: &str) -> ProxyFuture<Repository> {
        self.inner.get_repository(repo_id)
    }

    fn search_repository(&self, criteria: &Criteria) -> ProxyFuture<Page<Repository>> {
        self.inner.search_repository(criteria)
    }

    fn search_distributor(&self, criteria: &Criteria) -> ProxyFuture<Page<Distributor>> {
        let inner = Arc::clone(&self.inner);
        let filters = criteria.to_filters(Distributor::FIELDS);
        let page_size = self.inner.page_size;
        self.inner.pool.run(move || {
            Page::by_offset(1, page_size, move |_, skip, limit| {
                let request = Request::post(
                    format!("{API}distributors/search/"),
                    codec::search_body(filters.clone(), skip, limit),
                );
                Ok(codec::decode_list(&inner.request(&request)?)?)
            })
        })
    }

    fn search_content(&self, criteria: &Criteria) -> ProxyFuture<Page<Unit>> {
        let inner = Arc::clone(&self.inner);
        let criteria = criteria.clone();
        self.inner.pool.run(move || inner.search_units(&criteria))
    }

    fn search_task(&self, criteria: &Criteria) -> ProxyFuture<Page<Task>> {
        let inner = Arc::clone(&self.inner);
        let filters = criteria.to_filters(TASK_FIELDS);
        let page_size = self.inner.page_size;
        self.inner.pool.run(move || {
            Page::by_offset(1, page_size, move |_, skip, limit| {
                let request = Request::post(
                    format!("{API}tasks/search/"),
                    codec::search_body(filters.clone(), skip, limit),
                );
                Ok(codec::decode_tasks(&inner.request(&request)?)?)
            })
        })
    }

    fn get_content_type_ids(&self) -> ProxyFuture<Vec<String>> {
        let inner = Arc::clone(&self.inner);
        self.inner.pool.run(move || inner.fetch_type_ids())
    }

    fn publish_repository_with(
        &self,
        repo_id: &str,
        options: &PublishOptions,
    ) -> ProxyFuture<Vec<Task>> {
        self.inner.publish_repository(repo_id, *options)
    }

    fn update_repository(&self, repository: &Repository) -> ProxyFuture<()> {
        let request = Request::put(
            format!("{API}repositories/{}/", repository.id),
            json!({"delta": {"notes": repository.mutable_notes()}}),
        );
        let inner = Arc::clone(&self.inner);
        self.inner
            .pool
            .run(move || inner.request(&request).map(|_| ()))
    }

    fn update_content(&self, unit: &Unit) -> ProxyFuture<()> {
        let Some(unit_id) = unit.unit_id() else {
            return ProxyFuture::failed(PulpError::Invalid(
                "unit_id missing on call to update_content()".into(),
            ));
        };
        let request = Request::put(
            format!(
                "{API}content/units/{}/{unit_id}/pulp_user_metadata/",
                unit.content_type_id()
            ),
            unit.user_metadata(),
        );
        let inner = Arc::clone(&self.inner);
        self.inner
            .pool
            .run(move || inner.request(&request).map(|_| ()))
    }

    fn sync_repository(&self, repo_id: &str, options: &SyncOptions) -> ProxyFuture<Vec<Task>> {
        if options.feed.trim().is_empty() {
            return ProxyFuture::failed(PulpError::Invalid(format!(
                "cannot sync {repo_id}: no feed given"
            )));
        }
        self.inner.submit(Request::post(
            format!("{API}repositories/{repo_id}/actions/sync/"),
            json!({"override_config": options.to_override_config()}),
        ))
    }

    fn copy_content(
        &self,
        from_repo: &str,
        to_repo: &str,
        criteria: &Criteria,
    ) -> ProxyFuture<Vec<Task>> {
        if from_repo == to_repo {
            return ProxyFuture::failed(PulpError::Invalid(format!(
                "cannot copy content from {from_repo} into itself"
            )));
        }
        let path = format!("{API}repositories/{to_repo}/actions/associate/");
        let bodies: Vec<Value> = match criteria.type_ids() {
            Some(type_ids) => type_ids
                .iter()
                .map(|type_id| {
                    let filters = criteria.to_filters(unit::fields_for(type_id));
                    unit_criteria(Some(std::slice::from_ref(type_id)), filters)
                })
                .collect(),
            None => vec![unit_criteria(None, criteria.to_filters(&[]))],
        };
        let copies = bodies.into_iter().map(|body| {
            self.inner.submit(Request::post(
                path.clone(),
                json!({"source_repo_id": from_repo, "criteria": body}),
            ))
        });
        ProxyFuture::join_all(copies).map(|batches| batches.into_iter().flatten().collect())
    }

    fn remove_content(&self, repo_id: &str, criteria: &Criteria) -> ProxyFuture<Vec<Task>> {
        let type_ids = criteria.type_ids();
        let fields: &[FieldMap] = match type_ids.as_deref() {
            Some([type_id]) => unit::fields_for(type_id),
            _ => &[],
        };
        let body = unit_criteria(type_ids.as_deref(), criteria.to_filters(fields));
        self.inner.submit(Request::post(
            format!("{API}repositories/{repo_id}/actions/unassociate/"),
            json!({"criteria": body}),
        ))
    }

    fn delete_repository(&self, repo_id: &str) -> ProxyFuture<Vec<Task>> {
        self.inner
            .submit(Request::delete(format!("{API}repositories/{repo_id}/")))
    }

    fn upload_file(&self, repo_id: &str, name: &str, content: Vec<u8>) -> ProxyFuture<Vec<Task>> {
        self.inner.upload(Upload::file(repo_id, name, content))
    }

    fn upload_erratum(&self, repo_id: &str, erratum: &ErratumUnit) -> ProxyFuture<Vec<Task>> {
        self.inner.upload(Upload::erratum(repo_id, erratum))
    }

    fn get_maintenance_report(&self) -> ProxyFuture<MaintenanceReport> {
        let inner = Arc::clone(&self.inner);
        self.inner.pool.run(move || {
            match inner.request(&Request::get(MAINTENANCE_REPORT_PATH)) {
                Ok(data) => Ok(MaintenanceReport::from_data(&data)?),
                Err(PulpError::Transport(e)) if e.is_not_found() => {
                    tracing::debug!("no maintenance report published yet");
                    Ok(MaintenanceReport::default())
                }
                Err(e) => Err(e),
            }
        })
    }

    fn set_maintenance(&self, report: &MaintenanceReport) -> ProxyFuture<Vec<Task>> {
        let content = match serde_json::to_vec_pretty(&report.to_data()) {
            Ok(content) => content,
            Err(e) => return ProxyFuture::failed(InvalidDataError::from(e).into()),
        };
        let inner = Arc::clone(&self.inner);
        self.inner
            .upload(Upload::file(MAINTENANCE_REPO, MAINTENANCE_FILE, content))
            .flat_map(move |mut uploaded| {
                inner
                    .publish_repository(MAINTENANCE_REPO, PublishOptions::default())
                    .map(move |published| {
                        uploaded.extend(published);
                        uploaded
                    })
            })
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// The `criteria` object of an associate or unassociate request.
fn unit_criteria(type_ids: Option<&[String]>, filters: Value) -> Value {
    let mut criteria = json!({"filters": {"unit": filters}});
    if let (Some(type_ids), Value::Object(map)) = (type_ids, &mut criteria) {
        map.insert("type_ids".into(), json!(type_ids));
    }
    criteria
}

impl<T: Transport> ClientInner<T> {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("closing Pulp client");
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

    /// Sends one request, retrying per policy.
    fn request(&self, request: &Request) -> Result<Value, PulpError> {
        self.ensure_open()?;
        tracing::debug!(%request, "sending Pulp request");
        self.retry.call(&request.to_string(), || {
            self.ensure_open()?;
            Ok(self.transport.call(request)?)
        })
    }

    /// Submits a task-spawning request, retrying it together with the wait
    /// on its tasks.
    fn submit(self: &Arc<Self>, request: Request) -> ProxyFuture<Vec<Task>> {
        let inner = Arc::clone(self);
        self.retry.future(&self.pool, request.to_string(), move || {
            inner.spawn_tasks(&request)
        })
    }

    /// One attempt of [`submit`](Self::submit).
    fn spawn_tasks(&self, request: &Request) -> ProxyFuture<Vec<Task>> {
        if let Err(e) = self.ensure_open() {
            return ProxyFuture::failed(e);
        }
        tracing::debug!(%request, "submitting Pulp request");
        match self.transport.call(request) {
            Ok(report) => self.watch_report(&report),
            Err(e) if request.method == Method::Delete && e.is_not_found() => {
                tracing::debug!(%request, "already deleted");
                ProxyFuture::ready(Vec::new())
            }
            Err(e) => ProxyFuture::failed(e.into()),
        }
    }

    fn watch_report(&self, report: &Value) -> ProxyFuture<Vec<Task>> {
        match codec::decode_call_report(report) {
            Ok(ids) => {
                for id in &ids {
                    tracing::info!(task_id = %id, "Created Pulp task");
                }
                self.awaiter.watch(ids)
            }
            Err(e) => ProxyFuture::failed(e.into()),
        }
    }

    fn get_repository(self: &Arc<Self>, repo_id: &str) -> ProxyFuture<Repository> {
        let id = repo_id.to_string();
        self.search_repository(&Criteria::with_id(repo_id))
            .and_then(move |page| {
                page.data.into_iter().next().ok_or(PulpError::NotFound {
                    kind: "repository",
                    id,
                })
            })
    }

    fn search_repository(self: &Arc<Self>, criteria: &Criteria) -> ProxyFuture<Page<Repository>> {
        let inner = Arc::clone(self);
        let filters = criteria.to_filters(Repository::FIELDS);
        let page_size = self.page_size;
        self.pool.run(move || {
            Page::by_offset(1, page_size, move |_, skip, limit| {
                let request = Request::post(
                    format!("{API}repositories/search/"),
                    codec::repository_search_body(filters.clone(), skip, limit),
                );
                Ok(codec::decode_list(&inner.request(&request)?)?)
            })
        })
    }

    /// Fetches the server's content type ids and caches them.
    fn fetch_type_ids(&self) -> Result<Vec<String>, PulpError> {
        let response = self.request(&Request::get(format!("{API}plugins/types/")))?;
        let types = response.as_array().ok_or_else(|| {
            InvalidDataError::new(format!("expected a list of types, got {response}"))
        })?;
        let mut ids: Vec<String> = types
            .iter()
            .filter_map(|t| t.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        *self.server_types.lock() = Some(ids.clone());
        Ok(ids)
    }

    fn type_ids(&self) -> Result<Vec<String>, PulpError> {
        let cached = self.server_types.lock().clone();
        match cached {
            Some(ids) => Ok(ids),
            None => self.fetch_type_ids(),
        }
    }

    /// Searches each requested content type in turn.
    fn search_units(self: &Arc<Self>, criteria: &Criteria) -> Result<Page<Unit>, PulpError> {
        let server_types = self.type_ids()?;
        let type_ids = match criteria.type_ids() {
            Some(wanted) => {
                if let Some(missing) = wanted.iter().find(|t| !server_types.contains(t)) {
                    return Err(PulpError::Invalid(format!(
                        "Content type: {missing} is not supported by server"
                    )));
                }
                wanted
            }
            None => server_types
                .into_iter()
                .filter(|t| self.registry.knows(t))
                .collect(),
        };
        let searches: Vec<(String, Value)> = type_ids
            .into_iter()
            .map(|type_id| {
                let filters = criteria.to_filters(unit::fields_for(&type_id));
                (type_id, filters)
            })
            .collect();
        tracing::debug!(types = searches.len(), "searching Pulp content");

        let inner = Arc::clone(self);
        Page::by_offset(searches.len(), self.page_size, move |segment, skip, limit| {
            let Some((type_id, filters)) = searches.get(segment) else {
                return Ok(Vec::new());
            };
            let request = Request::post(
                format!("{API}content/units/{type_id}/search/"),
                codec::unit_search_body(filters.clone(), skip, limit),
            );
            let response = inner.request(&request)?;
            inner.decode_units(type_id, &response)
        })
    }

    fn decode_units(&self, type_id: &str, response: &Value) -> Result<Vec<Unit>, PulpError> {
        let items = response.as_array().ok_or_else(|| {
            InvalidDataError::new(format!("expected a list of units, got {response}"))
        })?;
        items
            .iter()
            .map(|item| {
                let mut item = item.clone();
                if let Value::Object(map) = &mut item {
                    map.entry(CONTENT_TYPE_FIELD)
                        .or_insert_with(|| json!(type_id));
                }
                Ok(self.registry.decode(&item)?)
            })
            .collect()
    }

    /// Publishes through each distributor, one after the other.
    fn publish_repository(
        self: &Arc<Self>,
        repo_id: &str,
        options: PublishOptions,
    ) -> ProxyFuture<Vec<Task>> {
        let inner = Arc::clone(self);
        self.get_repository(repo_id).flat_map(move |repo| {
            let mut chain = ProxyFuture::ready(Vec::new());
            for distributor in repo.distributors.iter().filter(|d| options.includes(d)) {
                let inner = Arc::clone(&inner);
                let request = Request::post(
                    format!("{API}repositories/{}/actions/publish/", repo.id),
                    json!({"id": distributor.id, "override_config": options.override_config(distributor)}),
                );
                chain = chain.flat_map(move |mut done: Vec<Task>| {
                    inner.submit(request).map(move |tasks| {
                        done.extend(tasks);
                        done
                    })
                });
            }
            chain
        })
    }

    fn upload(self: &Arc<Self>, upload: Upload) -> ProxyFuture<Vec<Task>> {
        let inner = Arc::clone(self);
        let upload = Arc::new(upload);
        self.retry.future(&self.pool, upload.describe(), move || {
            inner.start_upload(&upload)
        })
    }

    /// One upload attempt. The upload request is deleted once the import
    /// tasks are done, whatever their outcome.
    fn start_upload(self: &Arc<Self>, upload: &Upload) -> ProxyFuture<Vec<Task>> {
        let (upload_id, report) = match self.push_upload(upload) {
            Ok(pushed) => pushed,
            Err(e) => return ProxyFuture::failed(e),
        };
        let inner = Arc::clone(self);
        self.watch_report(&report).then(move |outcome| {
            let cleanup = Arc::clone(&inner);
            inner.pool.run(move || {
                cleanup.delete_upload(&upload_id);
                outcome
            })
        })
    }

    /// Sends the content and asks Pulp to import it; returns the upload id
    /// and the import call report.
    fn push_upload(&self, upload: &Upload) -> Result<(String, Value), PulpError> {
        self.ensure_open()?;
        let response = self
            .transport
            .call(&Request::post(format!("{API}content/uploads/"), json!({})))?;
        let upload_id = response
            .get("upload_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| InvalidDataError::new(format!("no upload_id in {response}")))?;

        for (index, chunk) in upload.content.chunks(UPLOAD_CHUNK_SIZE).enumerate() {
            let offset = index * UPLOAD_CHUNK_SIZE;
            tracing::debug!(upload_id = %upload_id, offset, size = chunk.len(), "uploading chunk");
            let put = Request::put_bytes(
                format!("{API}content/uploads/{upload_id}/{offset}/"),
                chunk.to_vec(),
            );
            if let Err(e) = self.transport.call(&put) {
                self.delete_upload(&upload_id);
                return Err(e.into());
            }
        }

        let import = Request::post(
            format!("{API}repositories/{}/actions/import_upload/", upload.repo_id),
            json!({
                "unit_type_id": upload.unit_type_id,
                "upload_id": upload_id,
                "unit_key": upload.unit_key,
                "unit_metadata": upload.unit_metadata,
            }),
        );
        match self.transport.call(&import) {
            Ok(report) => Ok((upload_id, report)),
            Err(e) => {
                self.delete_upload(&upload_id);
                Err(e.into())
            }
        }
    }

    fn delete_upload(&self, upload_id: &str) {
        let request = Request::delete(format!("{API}content/uploads/{upload_id}/"));
        match self.transport.call(&request) {
            Ok(_) => tracing::debug!(upload_id, "deleted upload request"),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(upload_id, error = %e, "failed to delete upload request"),
        }
    }
}
