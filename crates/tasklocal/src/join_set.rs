use std::future::Future;

use tokio::task::{AbortHandle, JoinError, JoinSet};

use crate::spawn::{Child, runtime_handle};
use crate::token::{Overrides, snapshot};

/// A Tokio [`JoinSet`] whose tasks start with a copy of the spawner's store.
///
/// Each [`spawn`](Self::spawn) snapshots the calling task at that moment, so
/// tasks spawned after a write see it and earlier ones do not.
#[derive(Debug)]
pub struct InheritingJoinSet<T> {
	inner: JoinSet<T>,
}

impl<T> Default for InheritingJoinSet<T> {
	fn default() -> Self {
		Self { inner: JoinSet::new() }
	}
}

impl<T> InheritingJoinSet<T>
where
	T: Send + 'static,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the number of tasks currently in the set.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Returns `true` if the set is empty.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Spawns a future into the set with the caller's store plus `overrides`.
	pub fn spawn<F>(&mut self, overrides: Overrides, fut: F) -> AbortHandle
	where
		F: Future<Output = T> + Send + 'static,
	{
		let child = Child::task(snapshot(overrides));
		tracing::trace!(pending = self.inner.len(), "tasklocal.join_set.spawn");
		let handle = runtime_handle();
		let _guard = handle.enter();
		self.inner.spawn(child.wrap(fut))
	}

	/// Waits for the next completed task.
	pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
		self.inner.join_next().await
	}

	/// Returns one ready completion without waiting.
	pub fn try_join_next(&mut self) -> Option<Result<T, JoinError>> {
		self.inner.try_join_next()
	}

	/// Waits for every task, in completion order.
	pub async fn join_all(mut self) -> Vec<Result<T, JoinError>> {
		let mut results = Vec::with_capacity(self.inner.len());
		while let Some(result) = self.inner.join_next().await {
			results.push(result);
		}
		results
	}

	/// Aborts every task; their registry entries are removed as they drop.
	pub async fn shutdown(&mut self) {
		self.inner.shutdown().await;
	}
}
