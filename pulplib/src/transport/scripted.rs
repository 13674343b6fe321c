//! Scripted transport for testing.
//!
//! Responses are queued per `(method, path)`. Each call pops the next
//! queued response; the last one repeats for any further calls. Every
//! request is recorded so tests can assert on what the client sent.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde_json::Value;

use super::{Method, Request, Transport, TransportError};

type Reply = Result<Value, TransportError>;

#[derive(Default)]
struct Script {
    routes: HashMap<(Method, String), VecDeque<Reply>>,
    history: Vec<Request>,
}

/// In-process transport that answers from a script.
///
/// Requests with no scripted response fail with HTTP 404.
///
/// # Example
///
/// ```rust
/// use pulplib::transport::scripted::ScriptedTransport;
/// use pulplib::transport::{Method, Request, Transport};
/// use serde_json::json;
///
/// let transport = ScriptedTransport::new();
/// transport.respond_json(Method::Get, "pulp/api/v2/plugins/types/", json!([]));
/// let body = transport.call(&Request::get("pulp/api/v2/plugins/types/")).unwrap();
/// assert_eq!(body, json!([]));
/// ```
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn respond(&self, method: Method, path: impl Into<String>, reply: Reply) -> &Self {
        self.script
            .lock()
            .routes
            .entry((method, path.into()))
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a successful JSON response.
    pub fn respond_json(&self, method: Method, path: impl Into<String>, body: Value) -> &Self {
        self.respond(method, path, Ok(body))
    }

    /// Queue an HTTP error response.
    pub fn respond_status(&self, method: Method, path: impl Into<String>, status: u16) -> &Self {
        self.respond(
            method,
            path,
            Err(TransportError::Http {
                status,
                body: format!("scripted status {status}"),
            }),
        )
    }

    /// All requests received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.script.lock().history.clone()
    }

    /// Requests received for one route.
    #[must_use]
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<Request> {
        self.script
            .lock()
            .history
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn call(&self, request: &Request) -> Result<Value, TransportError> {
        let mut script = self.script.lock();
        script.history.push(request.clone());
        tracing::debug!(%request, "scripted request");

        let Some(queue) = script
            .routes
            .get_mut(&(request.method, request.path.clone()))
        else {
            return Err(TransportError::Http {
                status: 404,
                body: format!("no scripted response for {request}"),
            });
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Ok(Value::Null))
        } else {
            queue.front().cloned().unwrap_or(Ok(Value::Null))
        }
    }
}
