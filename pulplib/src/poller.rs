//! Background polling of Pulp tasks.
//!
//! An [`Awaiter`] owns one polling thread. Callers register batches of task
//! ids with [`Awaiter::watch`] and get back a [`ProxyFuture`] that resolves
//! once every task in the batch is terminal. Each cycle the thread searches
//! for all outstanding ids in a single request, however many futures share
//! them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pulplib_proto::task::UNKNOWN_ERROR;
use pulplib_proto::{Task, TaskId, TaskState};

use crate::error::PulpError;
use crate::future::{ProxyFuture, Resolver};

/// Default pause between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default pause between "still waiting" log lines.
pub const DEFAULT_ACTIVITY_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default number of consecutive failed polls before giving up.
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 60;

/// Where the awaiter gets task state from.
pub trait TaskSource: Send + Sync + 'static {
    /// Current snapshots of the given tasks.
    ///
    /// Ids the service does not know are simply absent from the result.
    ///
    /// # Errors
    ///
    /// Returns [`PulpError`] if the lookup itself failed.
    fn search_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>, PulpError>;

    /// Asks the service to cancel a task. Does not wait for it to stop.
    ///
    /// # Errors
    ///
    /// Returns [`PulpError`] if the request failed.
    fn cancel_task(&self, id: &TaskId) -> Result<(), PulpError>;
}

/// Timing knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub activity_interval: Duration,
    pub max_failures: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            activity_interval: DEFAULT_ACTIVITY_INTERVAL,
            max_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

/// One registered batch and the future waiting on it.
struct Tracker {
    key: u64,
    ids: Vec<TaskId>,
    resolver: Resolver<Vec<Task>>,
    cancel_requested: bool,
}

#[derive(Default)]
struct Registry {
    trackers: Vec<Tracker>,
    /// Last observed state of every tracked task.
    known: HashMap<TaskId, TaskState>,
    cancels: Vec<TaskId>,
    next_key: u64,
    woken: bool,
    shutdown: bool,
}

struct Inner {
    source: Arc<dyn TaskSource>,
    settings: PollSettings,
    registry: Mutex<Registry>,
    wake: Condvar,
}

/// Polls a [`TaskSource`] on a background thread and resolves futures
/// waiting on tasks.
pub struct Awaiter {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Awaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("Awaiter")
            .field("trackers", &registry.trackers.len())
            .field("shutdown", &registry.shutdown)
            .finish_non_exhaustive()
    }
}

impl Awaiter {
    /// Creates an awaiter. The polling thread starts on the first watch.
    pub fn new(source: Arc<dyn TaskSource>, settings: PollSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                settings,
                registry: Mutex::new(Registry::default()),
                wake: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// A future resolving with the final snapshots of `ids`, in order.
    ///
    /// Fails with [`PulpError::TaskFailed`] if any task did not finish
    /// successfully, [`PulpError::MissingTask`] if one disappears, and
    /// [`PulpError::Detached`] if the awaiter is closed first.
    pub fn watch(&self, ids: Vec<TaskId>) -> ProxyFuture<Vec<Task>> {
        if ids.is_empty() {
            return ProxyFuture::ready(Vec::new());
        }
        if let Err(e) = self.ensure_thread() {
            return ProxyFuture::failed(e);
        }

        let (future, resolver) = ProxyFuture::pending();
        let key = {
            let mut registry = self.inner.registry.lock();
            if registry.shutdown {
                return ProxyFuture::failed(PulpError::Detached);
            }
            let key = registry.next_key;
            registry.next_key += 1;
            for id in &ids {
                registry
                    .known
                    .entry(id.clone())
                    .or_insert(TaskState::Waiting);
            }
            registry.trackers.push(Tracker {
                key,
                ids,
                resolver: resolver.clone(),
                cancel_requested: false,
            });
            registry.woken = true;
            key
        };
        self.inner.wake.notify_all();

        let inner = Arc::downgrade(&self.inner);
        resolver.on_cancel(move || {
            if let Some(inner) = inner.upgrade() {
                inner.request_cancel(key);
            }
        });
        future
    }

    /// Like [`watch`](Self::watch), then builds the final value from the
    /// task snapshots with `combine`.
    pub fn watch_with<U, F>(&self, ids: Vec<TaskId>, combine: F) -> ProxyFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Vec<Task>) -> U + Send + 'static,
    {
        self.watch(ids).map(combine)
    }

    /// Number of futures still waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.registry.lock().trackers.len()
    }

    /// Stops polling and fails every waiting future with
    /// [`PulpError::Detached`]. Idempotent.
    pub fn close(&self) {
        {
            let mut registry = self.inner.registry.lock();
            registry.shutdown = true;
        }
        self.inner.wake.notify_all();

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                tracing::debug!("awaiter closed from its own thread");
            } else if handle.join().is_err() {
                tracing::error!("task poller thread panicked");
            }
        }

        let leftover = {
            let mut registry = self.inner.registry.lock();
            registry.known.clear();
            std::mem::take(&mut registry.trackers)
        };
        for tracker in leftover {
            tracker.resolver.resolve(Err(PulpError::Detached));
        }
    }

    fn ensure_thread(&self) -> Result<(), PulpError> {
        let mut thread = self.thread.lock();
        if thread.is_some() || self.inner.registry.lock().shutdown {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("pulplib-poller".into())
            .spawn(move || inner.run())
            .map_err(|e| PulpError::Thread(e.to_string()))?;
        *thread = Some(handle);
        Ok(())
    }
}

impl Drop for Awaiter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outcome for a tracker given the latest snapshots, or `None` to keep
/// waiting.
fn evaluate(tracker: &Tracker, tasks: &HashMap<TaskId, Task>) -> Option<Result<Vec<Task>, PulpError>> {
    let mut done = Vec::with_capacity(tracker.ids.len());
    for id in &tracker.ids {
        match tasks.get(id) {
            None if tracker.cancel_requested => {
                return Some(Err(PulpError::Cancelled {
                    task_ids: tracker.ids.clone(),
                }));
            }
            None => return Some(Err(PulpError::MissingTask(id.clone()))),
            Some(task) if !task.is_completed() => return None,
            Some(task) => done.push(task.clone()),
        }
    }
    if tracker.cancel_requested {
        return Some(Err(PulpError::Cancelled {
            task_ids: tracker.ids.clone(),
        }));
    }
    match done.iter().find(|t| t.failed()) {
        Some(failed) => Some(Err(PulpError::task_failed(failed.clone()))),
        None => Some(Ok(done)),
    }
}

impl Inner {
    fn request_cancel(&self, key: u64) {
        {
            let mut registry = self.registry.lock();
            let Some(index) = registry.trackers.iter().position(|t| t.key == key) else {
                return;
            };
            let ids = {
                let tracker = &mut registry.trackers[index];
                tracker.cancel_requested = true;
                tracker.ids.clone()
            };
            registry.cancels.extend(ids);
            registry.woken = true;
        }
        self.wake.notify_all();
    }

    fn run(&self) {
        tracing::debug!("task poller started");
        let mut failures: u32 = 0;
        let mut last_activity_log = Instant::now();

        while let Some((ids, cancels)) = self.next_batch() {
            for id in cancels {
                match self.source.cancel_task(&id) {
                    Ok(()) => tracing::info!(task_id = %id, "Cancelled Pulp task"),
                    Err(e) => tracing::warn!(task_id = %id, error = %e, "failed to cancel Pulp task"),
                }
            }

            if !ids.is_empty() {
                match self.source.search_tasks(&ids) {
                    Ok(tasks) => {
                        failures = 0;
                        self.resolve(tasks);
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            error = %e,
                            failures,
                            max_failures = self.settings.max_failures,
                            "error polling Pulp tasks"
                        );
                        if failures >= self.settings.max_failures {
                            tracing::error!(error = %e, "giving up on Pulp tasks after repeated poll failures");
                            self.reject_all(&e);
                            failures = 0;
                        }
                    }
                }
            }

            if last_activity_log.elapsed() >= self.settings.activity_interval {
                self.log_activity();
                last_activity_log = Instant::now();
            }

            let mut registry = self.registry.lock();
            if !registry.woken && !registry.shutdown {
                let _ = self
                    .wake
                    .wait_for(&mut registry, self.settings.interval);
            }
            registry.woken = false;
        }
        tracing::debug!("task poller stopped");
    }

    /// Blocks until there is something to poll or cancel. Returns `None` on
    /// shutdown.
    fn next_batch(&self) -> Option<(Vec<TaskId>, Vec<TaskId>)> {
        let mut registry = self.registry.lock();
        loop {
            if registry.shutdown {
                return None;
            }
            let before = registry.trackers.len();
            registry.trackers.retain(|t| !t.resolver.is_abandoned());
            let dropped = before - registry.trackers.len();
            if dropped > 0 {
                tracing::debug!(dropped, "no longer polling tasks for dropped futures");
                Self::prune_known(&mut registry);
            }
            if !registry.trackers.is_empty() || !registry.cancels.is_empty() {
                break;
            }
            self.wake.wait(&mut registry);
        }

        let mut seen = BTreeSet::new();
        let ids = registry
            .trackers
            .iter()
            .flat_map(|t| t.ids.iter())
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();
        let cancels = std::mem::take(&mut registry.cancels);
        Some((ids, cancels))
    }

    fn prune_known(registry: &mut Registry) {
        let tracked: BTreeSet<&TaskId> = registry.trackers.iter().flat_map(|t| t.ids.iter()).collect();
        registry.known.retain(|id, _| tracked.contains(id));
    }

    fn resolve(&self, tasks: Vec<Task>) {
        let by_id: HashMap<TaskId, Task> = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        let finished = {
            let mut registry = self.registry.lock();
            for (id, task) in &by_id {
                if let Some(state) = registry.known.get_mut(id) {
                    *state = task.state;
                }
            }
            let mut finished = Vec::new();
            registry.trackers.retain(|tracker| match evaluate(tracker, &by_id) {
                Some(outcome) => {
                    finished.push((tracker.resolver.clone(), outcome));
                    false
                }
                None => true,
            });
            if !finished.is_empty() {
                Self::prune_known(&mut registry);
            }
            finished
        };

        for (resolver, outcome) in finished {
            match &outcome {
                Ok(tasks) => {
                    for task in tasks {
                        tracing::info!(task_id = %task.id, "Pulp task completed");
                    }
                }
                Err(PulpError::TaskFailed { task }) => {
                    tracing::warn!(
                        task_id = %task.id,
                        state = %task.state,
                        error = task.error_summary.as_deref().unwrap_or(UNKNOWN_ERROR),
                        "Pulp task failed"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "Pulp task wait ended"),
            }
            resolver.resolve(outcome);
        }
    }

    fn reject_all(&self, error: &PulpError) {
        let rejected = {
            let mut registry = self.registry.lock();
            registry.known.clear();
            std::mem::take(&mut registry.trackers)
        };
        for tracker in rejected {
            tracker.resolver.resolve(Err(error.clone()));
        }
    }

    fn log_activity(&self) {
        let (running, waiting) = {
            let registry = self.registry.lock();
            registry.known.values().fold((0, 0), |(running, waiting), state| match state {
                TaskState::Running => (running + 1, waiting),
                TaskState::Accepted | TaskState::Waiting => (running, waiting + 1),
                _ => (running, waiting),
            })
        };
        if running + waiting > 0 {
            tracing::info!(running, waiting, "Still waiting on Pulp, load: {running} running, {waiting} waiting");
        }
    }
}
