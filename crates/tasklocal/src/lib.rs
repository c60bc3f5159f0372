//! Task-local dynamic variables.
//!
//! A [`DynVar`] holds one value per task: code reading it sees whatever the
//! calling task last wrote, or a default shared by all tasks. Values live in a
//! process-wide [`Registry`] keyed by task id and variable id. Task ids come
//! from a pluggable [`TaskIdentity`] provider.
//!
//! Nothing reclaims a task's entry when the task ends. Start tasks through the
//! spawn wrappers ([`spawn`], [`spawn_thread`], [`InheritingJoinSet`], ...) and
//! they copy the caller's store into the child and delete the child's entry
//! when it finishes. Use [`run_with_overrides`] or [`scope`] for scoped writes
//! on the current task, and the tokens in [`token`] for manual save/restore.

pub mod config;
mod error;
pub mod identity;
mod join_set;
pub mod registry;
mod scope;
mod spawn;
pub mod token;
mod var;

pub use config::{Config, init};
pub use error::{BoxError, Error, Result};
pub use identity::{IdentitySource, TaskIdentity, current_task_id};
pub use join_set::InheritingJoinSet;
pub use registry::{Registry, RegistrySnapshot, registry};
pub use scope::{run_with_overrides, scope};
pub use spawn::{spawn, spawn_blocking, spawn_isolated, spawn_named_thread, spawn_thread, spawn_with_snapshot};
pub use token::{Override, Overrides, Restore, RestoreAll, Snapshot, apply_and_capture_restore, snapshot};
pub use var::{DynVar, VarId};

#[cfg(test)]
use rstest as _;
#[cfg(test)]
use serial_test as _;
#[cfg(test)]
use tracing_subscriber as _;
