//! Transport layer abstraction for talking to a Pulp server.
//!
//! Defines the [`Transport`] trait the client issues every request through.
//! The library does not ship an HTTP stack; applications plug in their own.
//! [`scripted::ScriptedTransport`] plays canned responses for tests.

pub mod scripted;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    /// Raw bytes, used for upload chunks.
    Bytes(Vec<u8>),
}

/// One request against the server.
///
/// `path` is relative to the server's base URL, e.g.
/// `pulp/api/v2/tasks/search/`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Body,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: Body::Empty,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Body::Json(body),
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Body::Json(body),
        }
    }

    pub fn put_bytes(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Body::Bytes(bytes),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: Body::Empty,
        }
    }

    /// Absolute URL of this request on a server rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if the path cannot be joined onto `base`.
    pub fn url_on(&self, base: &url::Url) -> Result<url::Url, url::ParseError> {
        let mut root = base.clone();
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        root.join(self.path.trim_start_matches('/'))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Errors that can occur while performing a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached or the connection dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code of the response.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

impl TransportError {
    /// HTTP status code, for errors that carry one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Timeout | Self::Connection(_) => None,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }
}

/// Synchronous request/response transport.
///
/// Implementations perform the request and return the decoded JSON body
/// (`Value::Null` for empty responses). Authentication, TLS and connection
/// pooling are the implementation's business.
pub trait Transport: Send + Sync + 'static {
    /// Perform `request` and return the decoded response body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on timeout, connection failure, or any
    /// non-success HTTP status.
    fn call(&self, request: &Request) -> Result<Value, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn call(&self, request: &Request) -> Result<Value, TransportError> {
        (**self).call(request)
    }
}
