//! Shared model definitions and wire format for `pulplib`.
//!
//! Everything in this crate is plain data: values are constructed from the
//! JSON documents a Pulp 2.x server returns and can be serialized back into
//! the same layout. No I/O happens here.

pub mod codec;
pub mod criteria;
pub mod data;
pub mod maintenance;
pub mod repository;
pub mod task;
pub mod unit;

pub use criteria::{Criteria, Matcher};
pub use data::{FieldMap, InvalidDataError, PulpObject};
pub use maintenance::{MaintenanceEntry, MaintenanceReport};
pub use repository::{Distributor, PublishOptions, Repository, RepositoryKind, SyncOptions};
pub use task::{Task, TaskId, TaskState};
pub use unit::{
    ContentUnit, ErratumUnit, FileUnit, ModulemdDefaultsUnit, ModulemdUnit, RpmUnit, Unit,
    UnitRegistry, YumRepoMetadataFileUnit,
};
