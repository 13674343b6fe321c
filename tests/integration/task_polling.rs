//! Integration tests for the task awaiter.
//!
//! Drives an `Awaiter` against an in-test task source to check fan-in of
//! many watchers, failure reporting, cancellation, poll error handling and
//! shutdown.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::significant_drop_tightening
)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulplib::model::{Task, TaskId, TaskState};
use pulplib::{Awaiter, PollSettings, ProxyFuture, PulpError, TaskSource, TransportError};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SourceState {
    /// Remaining states per task; the last one sticks.
    scripts: HashMap<TaskId, Vec<TaskState>>,
    /// Error summaries for tasks that fail.
    errors: HashMap<TaskId, String>,
    searches: Vec<Vec<TaskId>>,
    cancelled: Vec<TaskId>,
    /// Number of upcoming searches that fail.
    failing_searches: u32,
}

/// A task service whose tasks walk through scripted states, one per poll.
#[derive(Default)]
struct ScriptedTasks {
    state: Mutex<SourceState>,
}

impl ScriptedTasks {
    fn with_task(self, id: &str, states: &[TaskState]) -> Self {
        self.state
            .lock()
            .scripts
            .insert(TaskId::new(id), states.to_vec());
        self
    }

    fn with_error(self, id: &str, summary: &str) -> Self {
        self.state
            .lock()
            .errors
            .insert(TaskId::new(id), summary.to_string());
        self
    }

    fn fail_searches(&self, count: u32) {
        self.state.lock().failing_searches = count;
    }

    fn searches(&self) -> Vec<Vec<TaskId>> {
        self.state.lock().searches.clone()
    }

    fn cancelled(&self) -> Vec<TaskId> {
        self.state.lock().cancelled.clone()
    }
}

impl TaskSource for ScriptedTasks {
    fn search_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>, PulpError> {
        let mut state = self.state.lock();
        state.searches.push(ids.to_vec());
        if state.failing_searches > 0 {
            state.failing_searches -= 1;
            return Err(TransportError::Connection("poll refused".into()).into());
        }
        let mut found = Vec::new();
        for id in ids {
            let cancelled = state.cancelled.contains(id);
            let Some(script) = state.scripts.get_mut(id) else {
                continue;
            };
            let current = if script.len() > 1 {
                script.remove(0)
            } else {
                script[0]
            };
            let task_state = if cancelled && !current.is_terminal() {
                TaskState::Canceled
            } else {
                current
            };
            let mut task = Task::new(id.clone(), task_state);
            if let Some(summary) = state.errors.get(id) {
                task.error_summary = Some(summary.clone());
            }
            found.push(task);
        }
        Ok(found)
    }

    fn cancel_task(&self, id: &TaskId) -> Result<(), PulpError> {
        self.state.lock().cancelled.push(id.clone());
        Ok(())
    }
}

fn fast() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(5),
        ..PollSettings::default()
    }
}

fn ids(raw: &[&str]) -> Vec<TaskId> {
    raw.iter().copied().map(TaskId::new).collect()
}

const RUN_THEN_FINISH: &[TaskState] = &[TaskState::Running, TaskState::Running, TaskState::Finished];
const FOREVER: &[TaskState] = &[TaskState::Running];
const SLOW: &[TaskState] = &[
    TaskState::Waiting,
    TaskState::Running,
    TaskState::Running,
    TaskState::Running,
    TaskState::Finished,
];

// ===========================================================================
// Resolution
// ===========================================================================

#[test]
fn resolves_with_final_snapshots_in_order() {
    let source = Arc::new(
        ScriptedTasks::default()
            .with_task("b", RUN_THEN_FINISH)
            .with_task("a", &[TaskState::Finished]),
    );
    let awaiter = Awaiter::new(source, fast());
    let tasks = awaiter.watch(ids(&["b", "a"])).result().unwrap();
    let got: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(got, ["b", "a"]);
    assert!(tasks.iter().all(Task::succeeded));
}

#[test]
fn one_search_per_cycle_for_all_watchers() {
    let source = Arc::new(
        ScriptedTasks::default()
            .with_task("t1", RUN_THEN_FINISH)
            .with_task("t2", RUN_THEN_FINISH)
            .with_task("t3", RUN_THEN_FINISH),
    );
    let awaiter = Awaiter::new(Arc::clone(&source) as Arc<dyn TaskSource>, fast());
    let watchers = vec![
        awaiter.watch(ids(&["t1", "t2"])),
        awaiter.watch(ids(&["t2", "t3"])),
        awaiter.watch(ids(&["t1"])),
    ];
    for result in ProxyFuture::join_all(watchers).result().unwrap() {
        assert!(result.iter().all(Task::succeeded));
    }
    for search in source.searches() {
        let mut unique = search.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), search.len(), "duplicate ids in {search:?}");
    }
    assert_eq!(awaiter.pending(), 0);
}

#[test]
fn combine_builds_the_final_value() {
    let source = Arc::new(
        ScriptedTasks::default()
            .with_task("x", &[TaskState::Finished])
            .with_task("y", RUN_THEN_FINISH),
    );
    let awaiter = Awaiter::new(source, fast());
    let count = awaiter.watch_with(ids(&["x", "y"]), |tasks| tasks.len());
    assert_eq!(count.result().unwrap(), 2);
}

#[test]
fn failure_names_the_task_and_its_error() {
    let source = Arc::new(
        ScriptedTasks::default()
            .with_task("ok", &[TaskState::Finished])
            .with_task("bad", &[TaskState::Running, TaskState::Error])
            .with_error("bad", "disk full"),
    );
    let awaiter = Awaiter::new(source, fast());
    let err = awaiter.watch(ids(&["ok", "bad"])).result().unwrap_err();
    assert_eq!(err.to_string(), "Pulp task [bad] failed: disk full");
    assert_eq!(err.failed_task().map(|t| t.state), Some(TaskState::Error));
    assert!(err.is_retryable());
}

#[test]
fn failure_waits_for_the_rest_of_the_batch() {
    let source = Arc::new(
        ScriptedTasks::default()
            .with_task("fails", &[TaskState::Error])
            .with_task("slow", RUN_THEN_FINISH),
    );
    let awaiter = Awaiter::new(Arc::clone(&source) as Arc<dyn TaskSource>, fast());
    let err = awaiter.watch(ids(&["fails", "slow"])).result().unwrap_err();
    assert_eq!(err.failed_task().map(|t| t.id.as_str()), Some("fails"));
    assert!(source.searches().len() >= 3);
}

#[test]
fn vanished_task_is_reported() {
    let source = Arc::new(ScriptedTasks::default());
    let awaiter = Awaiter::new(source, fast());
    let err = awaiter.watch(ids(&["ghost"])).result().unwrap_err();
    assert!(matches!(&err, PulpError::MissingTask(id) if id.as_str() == "ghost"));
    assert_eq!(err.to_string(), "Task ghost disappeared from Pulp!");
}

// ===========================================================================
// Poll failures
// ===========================================================================

#[test]
fn transient_poll_errors_are_tolerated() {
    let source = Arc::new(ScriptedTasks::default().with_task("t", &[TaskState::Finished]));
    source.fail_searches(3);
    let settings = PollSettings {
        max_failures: 5,
        ..fast()
    };
    let awaiter = Awaiter::new(Arc::clone(&source) as Arc<dyn TaskSource>, settings);
    assert!(awaiter.watch(ids(&["t"])).result().unwrap()[0].succeeded());
    assert_eq!(source.searches().len(), 4);
}

#[test]
fn consecutive_poll_errors_fail_every_watcher() {
    let source = Arc::new(ScriptedTasks::default().with_task("t", FOREVER));
    source.fail_searches(100);
    let settings = PollSettings {
        max_failures: 3,
        ..fast()
    };
    let awaiter = Awaiter::new(source, settings);
    let first = awaiter.watch(ids(&["t"]));
    let second = awaiter.watch(ids(&["t"]));
    for future in [first, second] {
        let err = future.result().unwrap_err();
        assert_eq!(err.to_string(), "connection error: poll refused");
    }
}

// ===========================================================================
// Cancellation and shutdown
// ===========================================================================

#[test]
fn cancel_asks_the_service_once() {
    let source = Arc::new(ScriptedTasks::default().with_task("long", FOREVER));
    let awaiter = Awaiter::new(Arc::clone(&source) as Arc<dyn TaskSource>, fast());
    let future = awaiter.watch(ids(&["long"]));
    future.cancel();
    future.cancel();

    let err = future.result().unwrap_err();
    assert!(matches!(&err, PulpError::Cancelled { task_ids } if *task_ids == ids(&["long"])));
    assert_eq!(source.cancelled(), ids(&["long"]));
}

#[test]
fn cancelling_one_watcher_leaves_others() {
    let source = Arc::new(
        ScriptedTasks::default()
            .with_task("a", FOREVER)
            .with_task("b", RUN_THEN_FINISH),
    );
    let awaiter = Awaiter::new(Arc::clone(&source) as Arc<dyn TaskSource>, fast());
    let doomed = awaiter.watch(ids(&["a"]));
    let kept = awaiter.watch(ids(&["b"]));
    doomed.cancel();
    assert!(doomed.result().unwrap_err().is_cancelled());
    assert!(kept.result().unwrap()[0].succeeded());
    assert_eq!(source.cancelled(), ids(&["a"]));
}

#[test]
fn close_detaches_waiting_futures() {
    let source = Arc::new(ScriptedTasks::default().with_task("t", FOREVER));
    let awaiter = Awaiter::new(source, fast());
    let pending = awaiter.watch(ids(&["t"]));
    assert_eq!(awaiter.pending(), 1);

    awaiter.close();
    awaiter.close();
    assert!(pending.result().unwrap_err().is_detached());
    assert!(awaiter.watch(ids(&["t"])).result().unwrap_err().is_detached());
    assert_eq!(awaiter.pending(), 0);
}

#[test]
fn dropped_futures_stop_being_polled() {
    let source = Arc::new(
        ScriptedTasks::default()
            .with_task("dropped", FOREVER)
            .with_task("kept", SLOW),
    );
    let awaiter = Awaiter::new(Arc::clone(&source) as Arc<dyn TaskSource>, fast());
    drop(awaiter.watch(ids(&["dropped"])));
    let kept = awaiter.watch(ids(&["kept"]));
    kept.result().unwrap();

    let last = source.searches().pop().unwrap();
    assert_eq!(last, ids(&["kept"]));
    assert_eq!(awaiter.pending(), 0);
}

#[test]
fn watching_nothing_is_ready_without_polling() {
    let source = Arc::new(ScriptedTasks::default());
    let awaiter = Awaiter::new(Arc::clone(&source) as Arc<dyn TaskSource>, fast());
    assert!(awaiter.watch(Vec::new()).result().unwrap().is_empty());
    assert!(source.searches().is_empty());
}
