//! Pulp tasks: the server-side record of one piece of asynchronous work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::data::{FieldMap, InvalidDataError, field};
use crate::unit::{Unit, UnitRegistry};

/// Tag prefix Pulp uses to record which repository a task acted on.
const REPOSITORY_TAG_PREFIX: &str = "pulp:repository:";

/// Summary of a failed task whose error Pulp did not describe.
pub const UNKNOWN_ERROR: &str = "<unknown error>";

/// Model-to-Pulp field names used when searching tasks.
pub const TASK_FIELDS: &[FieldMap] = &[
    field("id", "task_id"),
    field("error_summary", "error.description"),
    field("error_details", "traceback"),
    field("completed_at", "finish_time"),
];

/// Opaque task identifier assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a task.
///
/// States only move forward: `Accepted`/`Waiting` to `Running` to one of
/// the four terminal states. A terminal task never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Accepted,
    Waiting,
    Running,
    Finished,
    Error,
    Canceled,
    Skipped,
}

impl TaskState {
    /// Parses the lower-case name Pulp uses on the wire.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "accepted" => Self::Accepted,
            "waiting" => Self::Waiting,
            "running" => Self::Running,
            "finished" => Self::Finished,
            "error" => Self::Error,
            "canceled" => Self::Canceled,
            "skipped" => Self::Skipped,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        }
    }

    /// True for the four states a task never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Error | Self::Canceled | Self::Skipped
        )
    }

    /// True only for `Finished`.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Whether a task in this state may next be observed in `next`.
    ///
    /// Observing the same state again is always allowed, since a poll may
    /// return an unchanged snapshot.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self as u8 == next as u8 {
            return true;
        }
        match self {
            Self::Accepted => !matches!(next, Self::Accepted),
            Self::Waiting => !matches!(next, Self::Accepted | Self::Waiting),
            Self::Running => next.is_terminal(),
            Self::Finished | Self::Error | Self::Canceled | Self::Skipped => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of a Pulp task.
///
/// The client never changes a task it received; polling replaces the local
/// copy with a fresh snapshot. Only the fake service calls
/// [`transition`](Self::transition).
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    /// Tags categorizing the operation, in server order.
    pub tags: Vec<String>,
    /// Short description of the failure, for tasks in `Error`.
    pub error_summary: Option<String>,
    /// Longer failure detail, typically a traceback.
    pub error_details: Option<String>,
    /// Task-type specific payload.
    pub result: Option<Value>,
    /// Set once the task reaches a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a task with no tags, errors, or result.
    pub fn new(id: impl Into<TaskId>, state: TaskState) -> Self {
        Self {
            id: id.into(),
            state,
            tags: Vec::new(),
            error_summary: None,
            error_details: None,
            result: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_error(mut self, summary: impl Into<String>, details: Option<String>) -> Self {
        self.error_summary = Some(summary.into());
        self.error_details = details;
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Loads a task from Pulp's JSON representation.
    ///
    /// Tolerates an `error` task with no description by synthesizing a
    /// summary, since real servers do produce such records.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if `task_id` or `state` is missing or
    /// the state is not one of the known values.
    pub fn from_data(data: &Value) -> Result<Self, InvalidDataError> {
        let mut task = Self::decode(data)?;
        if task.state == TaskState::Error && task.error_summary.is_none() {
            task.error_summary = Some(UNKNOWN_ERROR.to_string());
        }
        Ok(task)
    }

    /// Like [`from_data`](Self::from_data), but an `error` task must carry
    /// a description.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] on any structural problem, including a
    /// failed task with no error summary.
    pub fn from_data_strict(data: &Value) -> Result<Self, InvalidDataError> {
        let task = Self::decode(data)?;
        if task.state == TaskState::Error && task.error_summary.is_none() {
            return Err(InvalidDataError::new(format!(
                "task {} is in error state without an error description",
                task.id
            )));
        }
        Ok(task)
    }

    fn decode(data: &Value) -> Result<Self, InvalidDataError> {
        let obj = data
            .as_object()
            .ok_or_else(|| InvalidDataError::new(format!("task is not an object: {data}")))?;

        let id = obj
            .get("task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| InvalidDataError::new("task is missing 'task_id'"))?;
        let raw_state = obj
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| InvalidDataError::new(format!("task {id} is missing 'state'")))?;
        let state = TaskState::parse(raw_state).ok_or_else(|| {
            InvalidDataError::new(format!("task {id} has unknown state '{raw_state}'"))
        })?;

        let tags = match obj.get("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|t| {
                    t.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| InvalidDataError::new(format!("task {id} has a non-string tag")))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(InvalidDataError::new(format!(
                    "task {id} has malformed tags: {other}"
                )));
            }
        };

        let error_summary = obj
            .get("error")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let error_details = obj
            .get("traceback")
            .and_then(Value::as_str)
            .map(str::to_string);

        let completed_at = match obj.get("finish_time").and_then(Value::as_str) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        InvalidDataError::new(format!("task {id} has bad finish_time '{raw}': {e}"))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            id: TaskId::new(id),
            state,
            tags,
            error_summary,
            error_details,
            result: obj.get("result").filter(|r| !r.is_null()).cloned(),
            completed_at,
        })
    }

    /// Exports the task in Pulp's JSON representation.
    #[must_use]
    pub fn to_data(&self) -> Value {
        let mut out = Map::new();
        out.insert("task_id".into(), json!(self.id));
        out.insert("state".into(), json!(self.state.as_str()));
        out.insert("tags".into(), json!(self.tags));
        if let Some(summary) = &self.error_summary {
            out.insert("error".into(), json!({ "description": summary }));
        }
        if let Some(details) = &self.error_details {
            out.insert("traceback".into(), json!(details));
        }
        if let Some(result) = &self.result {
            out.insert("result".into(), result.clone());
        }
        if let Some(at) = self.completed_at {
            out.insert(
                "finish_time".into(),
                json!(at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            );
        }
        Value::Object(out)
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.state.is_success()
    }

    /// True if the task is terminal but did not finish successfully.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.state.is_terminal() && !self.state.is_success()
    }

    /// Repository the task acted on, from its `pulp:repository:` tag.
    #[must_use]
    pub fn repo_id(&self) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|t| t.strip_prefix(REPOSITORY_TAG_PREFIX))
    }

    /// Units the task reported as successfully processed.
    ///
    /// Uses the built-in unit registry.
    #[must_use]
    pub fn units(&self) -> Vec<Unit> {
        self.units_with(&UnitRegistry::builtin())
    }

    /// Units from `result.units_successful`, decoded with `registry`.
    ///
    /// Entries of unknown type or with an invalid key are skipped and logged.
    #[must_use]
    pub fn units_with(&self, registry: &UnitRegistry) -> Vec<Unit> {
        let Some(entries) = self
            .result
            .as_ref()
            .and_then(|r| r.get("units_successful"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| match registry.decode_task_unit(entry) {
                Ok(unit) => Some(unit),
                Err(e) => {
                    tracing::warn!(task_id = %self.id, error = %e, "skipping unit in task result");
                    None
                }
            })
            .collect()
    }

    /// Moves the task to `next`, stamping the completion time on terminal
    /// states.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDataError`] if the move goes backwards or leaves a
    /// terminal state.
    pub fn transition(&mut self, next: TaskState, now: DateTime<Utc>) -> Result<(), InvalidDataError> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidDataError::new(format!(
                "task {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        if next.is_terminal() && !self.state.is_terminal() {
            self.completed_at = Some(now);
        }
        self.state = next;
        Ok(())
    }
}
