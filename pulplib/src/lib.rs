//! `pulplib`: task-aware client library for Pulp 2.x.
//!
//! Operations return [`ProxyFuture`]s that resolve once the Pulp tasks they
//! spawned are finished. A single background [`Awaiter`] per client polls
//! all outstanding tasks; requests run on a bounded [`RequestPool`] and are
//! retried per a [`RetryPolicy`].

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod future;
pub mod page;
pub mod poller;
pub mod pool;
pub mod retry;
pub mod transport;

pub use api::PulpApi;
pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use error::PulpError;
pub use future::{ProxyFuture, Resolver};
pub use page::Page;
pub use poller::{Awaiter, PollSettings, TaskSource};
pub use pool::RequestPool;
pub use retry::RetryPolicy;
pub use transport::{Request, Transport, TransportError};

pub use pulplib_proto as model;
pub use pulplib_proto::{
    Criteria, Matcher, MaintenanceReport, Repository, SyncOptions, Task, TaskId, TaskState, Unit,
};
