//! Dynamic variables.
//!
//! A [`DynVar`] is a typed handle whose value lives in the calling task's
//! registry entry, keyed by the variable's [`VarId`]. The variable itself holds
//! only its identity and the process-wide default.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{BoxError, Error, Result};
use crate::identity::current_task_id;
use crate::registry::registry;
use crate::token::{Override, Restore};

/// Identity of one [`DynVar`], fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

static NEXT_VAR: AtomicU64 = AtomicU64::new(1);

impl VarId {
	fn fresh() -> Self {
		Self(NEXT_VAR.fetch_add(1, Ordering::Relaxed))
	}

	#[cfg(test)]
	pub(crate) const fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for VarId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "var#{}", self.0)
	}
}

enum DefaultFactory<A> {
	Pointer(fn() -> Result<A, BoxError>),
	Boxed(Box<dyn FnMut() -> Result<A, BoxError> + Send>),
}

fn zero<A: Default>() -> Result<A, BoxError> {
	Ok(A::default())
}

impl<A> DefaultFactory<A> {
	fn call(&mut self) -> Result<A, BoxError> {
		match self {
			Self::Pointer(f) => f(),
			Self::Boxed(f) => f(),
		}
	}
}

/// A task-local variable.
///
/// Declare variables as `static`s; each has one identity for the life of the
/// process.
///
/// ```
/// use tasklocal::DynVar;
///
/// static REQUEST_ID: DynVar<u64> = DynVar::new("request_id");
///
/// let restore = REQUEST_ID.set(7);
/// assert_eq!(REQUEST_ID.get(), 7);
/// restore.restore();
/// assert_eq!(REQUEST_ID.got(), None);
/// ```
///
/// # Defaults
///
/// When the calling task has no value, [`get`](Self::get) falls back to a
/// default shared by all tasks: the factory's result, which for variables
/// built with [`new`](Self::new) is `A::default()`. The factory runs under the
/// variable's lock until it succeeds once, then is dropped. Failures are
/// returned to the caller and never cached; the next read runs the factory again.
pub struct DynVar<A> {
	name: &'static str,
	id: AtomicU64,
	cached: OnceLock<A>,
	factory: Mutex<Option<DefaultFactory<A>>>,
}

impl<A: Default> DynVar<A> {
	/// A variable whose shared default is `A::default()`.
	pub const fn new(name: &'static str) -> Self {
		Self::with_default(name, zero::<A>)
	}
}

impl<A> DynVar<A> {
	/// A variable whose shared default comes from `factory`.
	pub const fn with_default(name: &'static str, factory: fn() -> Result<A, BoxError>) -> Self {
		Self {
			name,
			id: AtomicU64::new(0),
			cached: OnceLock::new(),
			factory: Mutex::new(Some(DefaultFactory::Pointer(factory))),
		}
	}

	/// Like [`with_default`](Self::with_default), for factories that capture state.
	pub fn with_default_fn(name: &'static str, factory: impl FnMut() -> Result<A, BoxError> + Send + 'static) -> Self {
		Self {
			name,
			id: AtomicU64::new(0),
			cached: OnceLock::new(),
			factory: Mutex::new(Some(DefaultFactory::Boxed(Box::new(factory)))),
		}
	}

	pub const fn name(&self) -> &'static str {
		self.name
	}

	/// This variable's identity, assigned on first use.
	pub fn id(&self) -> VarId {
		let current = self.id.load(Ordering::Acquire);
		if current != 0 {
			return VarId(current);
		}
		let fresh = VarId::fresh();
		match self.id.compare_exchange(0, fresh.0, Ordering::AcqRel, Ordering::Acquire) {
			Ok(_) => fresh,
			Err(winner) => VarId(winner),
		}
	}
}

impl<A> DynVar<A>
where
	A: Clone + Send + Sync + 'static,
{
	/// The calling task's value, without falling back to the default.
	pub fn got(&self) -> Option<A> {
		let value = registry().lookup(current_task_id(), self.id())?;
		value.downcast_ref::<A>().cloned()
	}

	/// Whether the calling task has a value.
	pub fn is_set(&self) -> bool {
		registry().lookup(current_task_id(), self.id()).is_some()
	}

	/// The calling task's value, or the shared default.
	///
	/// # Panics
	///
	/// Panics if the default factory fails. Use [`try_get`](Self::try_get) to
	/// handle the failure.
	pub fn get(&self) -> A {
		match self.try_get() {
			Ok(value) => value,
			Err(err) => panic!("{err}"),
		}
	}

	/// The calling task's value, or the shared default.
	pub fn try_get(&self) -> Result<A> {
		match self.got() {
			Some(value) => Ok(value),
			None => self.default_value(),
		}
	}

	/// The calling task's value, or `f()` stored as the calling task's value.
	///
	/// The stored value takes precedence over the shared default on later reads
	/// from this task. Without a factory of its own this is [`get`](Self::get),
	/// which falls back to the shared default and stores nothing.
	pub fn get_or(&self, f: impl FnOnce() -> A) -> A {
		if let Some(value) = self.got() {
			return value;
		}
		let value = f();
		self.set(value.clone());
		value
	}

	/// Fallible [`get_or`](Self::get_or). Nothing is stored if `f` fails.
	pub fn try_get_or<E>(&self, f: impl FnOnce() -> Result<A, E>) -> Result<A, E> {
		if let Some(value) = self.got() {
			return Ok(value);
		}
		let value = f()?;
		self.set(value.clone());
		Ok(value)
	}

	/// Sets the calling task's value. The returned token restores the previous state.
	pub fn set(&self, value: A) -> Restore {
		self.with(value).apply()
	}

	/// Removes the calling task's value. The returned token restores the previous state.
	pub fn clear(&self) -> Restore {
		self.with_clear().apply()
	}

	/// An unapplied override setting this variable to `value`.
	pub fn with(&self, value: A) -> Override {
		Override::set(self.id(), Arc::new(value))
	}

	/// An unapplied override clearing this variable.
	pub fn with_clear(&self) -> Override {
		Override::clear(self.id())
	}

	/// Whether the shared default has been materialized.
	pub fn default_ready(&self) -> bool {
		self.cached.get().is_some()
	}

	fn default_value(&self) -> Result<A> {
		if let Some(value) = self.cached.get() {
			return Ok(value.clone());
		}

		let mut factory = self.factory.lock();
		// Another task may have finished while this one waited for the lock.
		if let Some(value) = self.cached.get() {
			return Ok(value.clone());
		}

		let Some(f) = factory.as_mut() else {
			unreachable!("factory for `{}` dropped before its default was cached", self.name);
		};
		let value = match f.call() {
			Ok(value) => value,
			Err(source) => {
				tracing::debug!(var = self.name, error = %source, "tasklocal.default.failed");
				return Err(Error::DefaultFactory { var: self.name, source });
			}
		};
		*factory = None;
		tracing::trace!(var = self.name, "tasklocal.default.init");
		Ok(self.cached.get_or_init(|| value).clone())
	}
}

impl<A> fmt::Debug for DynVar<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DynVar")
			.field("name", &self.name)
			.field("id", &self.id.load(Ordering::Acquire))
			.field("default_ready", &self.cached.get().is_some())
			.finish()
	}
}
