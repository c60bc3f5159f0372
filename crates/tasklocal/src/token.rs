//! Override tokens: immutable descriptions of task-local state.
//!
//! Tokens are plain values. Applying one affects whichever task applies it,
//! which need not be the task that produced it; restoring a token on the wrong
//! task is a caller error and is not detected.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::identity::current_task_id;
use crate::registry::{Store, Value, registry};
use crate::var::{DynVar, VarId};

/// One variable's state: set to a value, or absent.
#[derive(Clone)]
pub struct Override {
	var: VarId,
	value: Option<Value>,
}

impl Override {
	pub(crate) fn set(var: VarId, value: Value) -> Self {
		Self { var, value: Some(value) }
	}

	pub(crate) fn clear(var: VarId) -> Self {
		Self { var, value: None }
	}

	pub fn var(&self) -> VarId {
		self.var
	}

	/// Whether this token clears its variable.
	pub fn is_clear(&self) -> bool {
		self.value.is_none()
	}

	/// Applies this state to the calling task.
	pub fn apply(self) -> Restore {
		self.apply_on(current_task_id())
	}

	pub(crate) fn apply_on(self, task: u64) -> Restore {
		let Self { var, value } = self;
		let prior = registry().with_store_mut(task, |store| match value {
			Some(value) => store.insert(var, value),
			None => store.remove(&var),
		});
		Restore(Self { var, value: prior })
	}
}

impl fmt::Debug for Override {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Override")
			.field("var", &self.var)
			.field("set", &self.value.is_some())
			.finish()
	}
}

/// State displaced by a single-variable write.
///
/// [`restore`](Self::restore) puts it back and returns the state it displaced
/// in turn, so restores chain.
#[derive(Debug, Clone)]
pub struct Restore(Override);

impl Restore {
	/// Reinstates the captured state on the calling task.
	pub fn restore(self) -> Restore {
		self.0.apply()
	}

	/// Whether the variable had a value before the write.
	pub fn was_set(&self) -> bool {
		!self.0.is_clear()
	}

	pub fn into_override(self) -> Override {
		self.0
	}
}

/// Several variables' states, or with [`replace_all`](Self::replace_all) an
/// entire store. Entry order is irrelevant; a later entry for the same
/// variable replaces an earlier one.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	entries: FxHashMap<VarId, Option<Value>>,
	replace_all: bool,
}

impl Overrides {
	/// Overrides layered on top of the existing store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Overrides that replace the whole store; unnamed variables become absent.
	pub fn replace_all() -> Self {
		Self {
			entries: FxHashMap::default(),
			replace_all: true,
		}
	}

	pub fn with<A>(self, var: &DynVar<A>, value: A) -> Self
	where
		A: Clone + Send + Sync + 'static,
	{
		self.push(var.with(value))
	}

	pub fn with_clear<A>(self, var: &DynVar<A>) -> Self
	where
		A: Clone + Send + Sync + 'static,
	{
		self.push(var.with_clear())
	}

	pub fn push(mut self, entry: Override) -> Self {
		self.insert(entry);
		self
	}

	pub fn insert(&mut self, entry: Override) {
		self.entries.insert(entry.var, entry.value);
	}

	pub fn is_replace_all(&self) -> bool {
		self.replace_all
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Applies these overrides to the calling task.
	pub fn apply(self) -> RestoreAll {
		apply_and_capture_restore(self)
	}

	pub(crate) fn apply_on(self, task: u64) -> RestoreAll {
		let Self { entries, replace_all } = self;
		let prior = registry().with_store_mut(task, |store| {
			if replace_all {
				let previous = std::mem::take(store);
				store.extend(entries.into_iter().filter_map(|(var, value)| value.map(|value| (var, value))));
				Self {
					entries: previous.into_iter().map(|(var, value)| (var, Some(value))).collect(),
					replace_all: true,
				}
			} else {
				let entries = entries
					.into_iter()
					.map(|(var, value)| {
						let previous = match value {
							Some(value) => store.insert(var, value),
							None => store.remove(&var),
						};
						(var, previous)
					})
					.collect();
				Self { entries, replace_all: false }
			}
		});
		RestoreAll(prior)
	}
}

impl From<Override> for Overrides {
	fn from(entry: Override) -> Self {
		Self::new().push(entry)
	}
}

impl FromIterator<Override> for Overrides {
	fn from_iter<I: IntoIterator<Item = Override>>(iter: I) -> Self {
		let mut overrides = Self::new();
		overrides.extend(iter);
		overrides
	}
}

impl Extend<Override> for Overrides {
	fn extend<I: IntoIterator<Item = Override>>(&mut self, iter: I) {
		for entry in iter {
			self.insert(entry);
		}
	}
}

/// State displaced by [`apply_and_capture_restore`].
#[derive(Debug, Clone)]
pub struct RestoreAll(Overrides);

impl RestoreAll {
	/// Undoes exactly the change that produced this token, on the calling task.
	pub fn restore(self) -> RestoreAll {
		self.0.apply()
	}

	pub(crate) fn restore_on(self, task: u64) -> RestoreAll {
		self.0.apply_on(task)
	}
}

/// Replaces the named entries (or the whole store) of the calling task's
/// store, returning what was there before.
///
/// Restoring the result to an empty state deletes the task's registry entry.
pub fn apply_and_capture_restore(overrides: Overrides) -> RestoreAll {
	overrides.apply_on(current_task_id())
}

/// A complete store, typically handed to a new task.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
	store: Store,
}

impl Snapshot {
	/// A snapshot with no variables; installing it means no inheritance.
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.store.len()
	}

	pub fn is_empty(&self) -> bool {
		self.store.is_empty()
	}

	pub fn contains<A>(&self, var: &DynVar<A>) -> bool {
		self.store.contains_key(&var.id())
	}

	pub fn get<A>(&self, var: &DynVar<A>) -> Option<A>
	where
		A: Clone + 'static,
	{
		self.store.get(&var.id())?.downcast_ref::<A>().cloned()
	}

	/// Makes this snapshot the calling task's entire store.
	pub fn install(self) -> RestoreAll {
		self.into_overrides().apply()
	}

	pub fn into_overrides(self) -> Overrides {
		Overrides {
			entries: self.store.into_iter().map(|(var, value)| (var, Some(value))).collect(),
			replace_all: true,
		}
	}

	pub(crate) fn into_store(self) -> Store {
		self.store
	}
}

/// Copies the calling task's store with `overrides` taking precedence.
///
/// Nothing is mutated. With [`Overrides::replace_all`] the current store is
/// ignored and the snapshot holds only the overrides.
pub fn snapshot(overrides: Overrides) -> Snapshot {
	let Overrides { entries, replace_all } = overrides;
	let mut store = if replace_all { Store::default() } else { registry().get(current_task_id()).unwrap_or_default() };
	for (var, value) in entries {
		match value {
			Some(value) => {
				store.insert(var, value);
			}
			None => {
				store.remove(&var);
			}
		}
	}
	Snapshot { store }
}
