//! `pulplib-fake`: an in-memory Pulp server for tests.
//!
//! [`FakeClient`] implements [`pulplib::PulpApi`] against a [`FakeState`]
//! instead of a network service. Repositories, units and tasks live in
//! memory; [`FakeController`] sets them up and inspects what clients did.
//! Tasks go through the same awaiter the real client uses, and can be
//! delayed or made to fail for testing retry and cancellation paths.

pub mod client;
pub mod controller;
pub mod matcher;
pub mod state;
mod units;

pub use client::{FakeClient, PAGE_SIZE};
pub use controller::FakeController;
pub use state::{FakeState, PublishRecord, SyncRecord, UploadRecord};
