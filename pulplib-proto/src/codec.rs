//! Request bodies and response decoding for Pulp's REST API.

use serde_json::{Value, json};

use crate::data::{InvalidDataError, PulpObject};
use crate::task::{Task, TaskId};

/// Extracts spawned task ids from a call report.
///
/// Pulp answers every asynchronous request with
/// `{"spawned_tasks": [{"task_id": ..}, ..]}`.
///
/// # Errors
///
/// Returns [`InvalidDataError`] if the report is not in that shape.
pub fn decode_call_report(report: &Value) -> Result<Vec<TaskId>, InvalidDataError> {
    let spawned = report
        .get("spawned_tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| InvalidDataError::new(format!("not a call report: {report}")))?;
    spawned
        .iter()
        .map(|t| {
            t.get("task_id")
                .and_then(Value::as_str)
                .map(TaskId::new)
                .ok_or_else(|| InvalidDataError::new(format!("spawned task without id: {t}")))
        })
        .collect()
}

/// Encodes a call report; the inverse of [`decode_call_report`].
#[must_use]
pub fn encode_call_report(ids: &[TaskId]) -> Value {
    let spawned: Vec<Value> = ids.iter().map(|id| json!({"task_id": id})).collect();
    json!({"spawned_tasks": spawned})
}

/// Body for `POST tasks/search/` looking up the given ids.
#[must_use]
pub fn task_search_body(ids: &[TaskId]) -> Value {
    json!({"criteria": {"filters": {"task_id": {"$in": ids}}}})
}

/// Body for a paged search (`tasks/search/` and friends).
#[must_use]
pub fn search_body(filters: Value, skip: usize, limit: usize) -> Value {
    json!({"criteria": {"skip": skip, "limit": limit, "filters": filters}})
}

/// Body for a paged repository search, which also returns distributors.
#[must_use]
pub fn repository_search_body(filters: Value, skip: usize, limit: usize) -> Value {
    json!({
        "criteria": {"skip": skip, "limit": limit, "filters": filters},
        "distributors": true,
    })
}

/// Body for a paged unit search under `content/units/<type>/search/`.
#[must_use]
pub fn unit_search_body(filters: Value, skip: usize, limit: usize) -> Value {
    json!({
        "criteria": {"skip": skip, "limit": limit, "filters": filters},
        "include_repos": true,
    })
}

/// Decodes a JSON array of objects of type `T`.
///
/// # Errors
///
/// Returns [`InvalidDataError`] if `value` is not an array or any element
/// fails to load.
pub fn decode_list<T: PulpObject>(value: &Value) -> Result<Vec<T>, InvalidDataError> {
    value
        .as_array()
        .ok_or_else(|| InvalidDataError::new(format!("expected a list, got {value}")))?
        .iter()
        .map(T::from_data)
        .collect()
}

/// Decodes a JSON array of tasks.
///
/// # Errors
///
/// As [`decode_list`].
pub fn decode_tasks(value: &Value) -> Result<Vec<Task>, InvalidDataError> {
    value
        .as_array()
        .ok_or_else(|| InvalidDataError::new(format!("expected a task list, got {value}")))?
        .iter()
        .map(Task::from_data)
        .collect()
}
