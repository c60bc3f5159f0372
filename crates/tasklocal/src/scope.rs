//! Scoped overrides on the current task.

use std::future::Future;

use crate::identity::current_task_id;
use crate::token::{Overrides, RestoreAll};

/// Restores on drop, onto the task that applied the overrides.
struct RestoreOnDrop {
	task: u64,
	restore: Option<RestoreAll>,
}

impl RestoreOnDrop {
	fn apply(overrides: Overrides) -> Self {
		let task = current_task_id();
		Self {
			task,
			restore: Some(overrides.apply_on(task)),
		}
	}
}

impl Drop for RestoreOnDrop {
	fn drop(&mut self) {
		if let Some(restore) = self.restore.take() {
			drop(restore.restore_on(self.task));
		}
	}
}

/// Runs `f` with `overrides` applied to the current task.
///
/// The previous state comes back when `f` returns or unwinds.
pub fn run_with_overrides<R>(overrides: Overrides, f: impl FnOnce() -> R) -> R {
	let _restore = RestoreOnDrop::apply(overrides);
	f()
}

/// Awaits `fut` with `overrides` applied to the awaiting task.
///
/// Overrides are applied on first poll and restored when `fut` completes or
/// the returned future is dropped.
pub async fn scope<F>(overrides: Overrides, fut: F) -> F::Output
where
	F: Future,
{
	let _restore = RestoreOnDrop::apply(overrides);
	fut.await
}
