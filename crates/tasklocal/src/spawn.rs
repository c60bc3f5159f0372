//! Spawn wrappers that hand a copy of the caller's store to the new task.
//!
//! Every wrapper installs the child's store before user code runs and deletes
//! the child's registry entry when that code finishes: on return, on panic,
//! and when a Tokio task is aborted. Tasks started any other way must clean up
//! after themselves.

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tasklocal_stack_id::{IdLease, with_id};
use tokio::task::JoinHandle;

use crate::identity::{self, IdentitySource, current_task_id};
use crate::registry::registry;
use crate::token::{Overrides, Snapshot, snapshot};

pub(crate) fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("tasklocal-global")
			.build()
			.expect("failed to build tasklocal global tokio runtime")
	});
	runtime.handle().clone()
}

/// Deletes one task's registry entry on drop.
struct Cleanup {
	task: u64,
}

impl Drop for Cleanup {
	fn drop(&mut self) {
		let removed = registry().delete(self.task);
		tracing::trace!(task = self.task, entries = removed.as_ref().map_or(0, |store| store.len()), "tasklocal.cleanup");
	}
}

/// Makes `snapshot` the calling task's store until the guard drops.
fn install(snapshot: Snapshot) -> Cleanup {
	let task = current_task_id();
	let entries = snapshot.len();
	if let Some(stale) = registry().set(task, snapshot.into_store()) {
		tracing::warn!(task, entries = stale.len(), "tasklocal.install.stale");
	}
	tracing::trace!(task, entries, "tasklocal.install");
	Cleanup { task }
}

/// Everything a child needs before its first instruction runs.
pub(crate) struct Child {
	snapshot: Snapshot,
	lease: Option<IdLease<'static>>,
}

impl Child {
	/// A child that will run as a Tokio task, possibly sharing its worker thread.
	pub(crate) fn task(snapshot: Snapshot) -> Self {
		let leased = matches!(identity::source(), Some(IdentitySource::Stack | IdentitySource::Thread));
		Self::new(snapshot, leased)
	}

	/// A child that owns an OS thread for as long as it runs.
	fn thread(snapshot: Snapshot) -> Self {
		let leased = identity::source() == Some(IdentitySource::Stack);
		Self::new(snapshot, leased)
	}

	fn new(snapshot: Snapshot, leased: bool) -> Self {
		let lease = leased.then(|| tasklocal_stack_id::pool().lease());
		Self { snapshot, lease }
	}

	fn run<R>(self, f: impl FnOnce() -> R) -> R {
		let Self { snapshot, lease } = self;
		let body = move || {
			let _cleanup = install(snapshot);
			f()
		};
		match &lease {
			Some(lease) => with_id(lease.id(), body),
			None => body(),
		}
	}

	pub(crate) fn wrap<F>(self, fut: F) -> Inherit<impl Future<Output = F::Output>>
	where
		F: Future,
	{
		let Self { snapshot, lease } = self;
		Inherit {
			inner: async move {
				let _cleanup = install(snapshot);
				fut.await
			},
			lease,
		}
	}
}

pin_project! {
	/// A child future, polled inside its stack encoding when it has one.
	pub(crate) struct Inherit<F> {
		#[pin]
		inner: F,
		// Dropped after `inner`, so the id is reused only once the entry is gone.
		lease: Option<IdLease<'static>>,
	}
}

impl<F: Future> Future for Inherit<F> {
	type Output = F::Output;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();
		match this.lease {
			Some(lease) => with_id(lease.id(), || this.inner.poll(cx)),
			None => this.inner.poll(cx),
		}
	}
}

/// Spawns `fut` as a Tokio task that starts with a copy of the caller's store,
/// with `overrides` taking precedence.
///
/// Later writes by either task are invisible to the other.
pub fn spawn<F>(overrides: Overrides, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	spawn_with_snapshot(snapshot(overrides), fut)
}

/// Spawns `fut` as a Tokio task that starts with nothing set.
pub fn spawn_isolated<F>(fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	spawn_with_snapshot(Snapshot::empty(), fut)
}

/// Spawns `fut` as a Tokio task whose store starts as `snapshot`.
pub fn spawn_with_snapshot<F>(snapshot: Snapshot, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(entries = snapshot.len(), "tasklocal.spawn");
	runtime_handle().spawn(Child::task(snapshot).wrap(fut))
}

/// Runs `f` on Tokio's blocking pool with a copy of the caller's store.
pub fn spawn_blocking<F, R>(overrides: Overrides, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let child = Child::thread(snapshot(overrides));
	tracing::trace!(entries = child.snapshot.len(), "tasklocal.spawn_blocking");
	runtime_handle().spawn_blocking(move || child.run(f))
}

/// Runs `f` on a new OS thread with a copy of the caller's store.
pub fn spawn_thread<F, R>(overrides: Overrides, f: F) -> std::thread::JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let child = Child::thread(snapshot(overrides));
	tracing::trace!(entries = child.snapshot.len(), "tasklocal.spawn_thread");
	std::thread::spawn(move || child.run(f))
}

/// Runs `f` on a new named OS thread with a copy of the caller's store.
pub fn spawn_named_thread<F, R>(overrides: Overrides, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let child = Child::thread(snapshot(overrides));
	tracing::trace!(entries = child.snapshot.len(), "tasklocal.spawn_named_thread");
	std::thread::Builder::new().name(name.into()).spawn(move || child.run(f))
}
