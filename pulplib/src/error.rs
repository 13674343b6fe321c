//! Error taxonomy for client operations.

use std::time::Duration;

use pulplib_proto::task::UNKNOWN_ERROR;
use pulplib_proto::{InvalidDataError, Task, TaskId};

use crate::transport::TransportError;

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by client operations and their futures.
///
/// Cloneable so a resolved future can hand the same error to every caller
/// of [`ProxyFuture::result`](crate::ProxyFuture::result).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PulpError {
    /// A request failed at the transport level.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A task reached `error`, `canceled` or `skipped`.
    #[error(
        "Pulp task [{}] failed: {}",
        .task.id,
        .task.error_summary.as_deref().unwrap_or(UNKNOWN_ERROR)
    )]
    TaskFailed {
        /// Snapshot of the failed task, including tags and error details.
        task: Box<Task>,
    },

    /// A tracked task is no longer known to the server.
    #[error("Task {0} disappeared from Pulp!")]
    MissingTask(TaskId),

    /// The future was cancelled before it completed.
    #[error("cancelled while waiting for tasks [{}]", join_ids(.task_ids))]
    Cancelled {
        /// Tasks the future was waiting on, if any.
        task_ids: Vec<TaskId>,
    },

    /// The owning client was closed before the future resolved.
    #[error("client was closed before the operation completed")]
    Detached,

    /// The server returned data that does not fit the model.
    #[error(transparent)]
    InvalidData(#[from] InvalidDataError),

    /// A bounded wait elapsed; the future is still pending.
    #[error("timed out after {0:?} waiting for a result")]
    Timeout(Duration),

    /// A requested object does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of object, e.g. `repository`.
        kind: &'static str,
        id: String,
    },

    /// The caller asked for something the client will not do.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// A background thread could not be started.
    #[error("cannot start background thread: {0}")]
    Thread(String),

    /// The retry budget ran out.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        /// Error from the final attempt.
        last: Box<PulpError>,
    },
}

impl PulpError {
    /// Whether an operation failing with this error is worth repeating.
    ///
    /// Transport failures (other than 404) and failed or vanished tasks are
    /// transient from the point of view of the request that spawned them.
    /// Everything else is final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_not_found(),
            Self::TaskFailed { .. } | Self::MissingTask(_) => true,
            Self::Cancelled { .. }
            | Self::Detached
            | Self::InvalidData(_)
            | Self::Timeout(_)
            | Self::NotFound { .. }
            | Self::Invalid(_)
            | Self::Thread(_)
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// The failed task behind this error, looking through retry wrapping.
    #[must_use]
    pub fn failed_task(&self) -> Option<&Task> {
        match self.root_cause() {
            Self::TaskFailed { task } => Some(task),
            _ => None,
        }
    }

    /// The innermost error, unwrapping [`RetriesExhausted`](Self::RetriesExhausted).
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    #[must_use]
    pub const fn is_detached(&self) -> bool {
        matches!(self, Self::Detached)
    }

    pub(crate) fn task_failed(task: Task) -> Self {
        Self::TaskFailed {
            task: Box::new(task),
        }
    }
}
