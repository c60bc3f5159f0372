//! Process-wide map from task id to that task's local store.
//!
//! A task id is present if and only if its store is non-empty. Nothing runs
//! when a task ends, so entries disappear only when emptied or deleted; the
//! spawn wrappers delete the entries of the tasks they start.

use std::any::Any;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rustc_hash::FxHashMap;

use crate::var::VarId;

/// A stored value. Never mutated in place, so sharing one between stores is a copy.
pub type Value = Arc<dyn Any + Send + Sync>;

/// One task's variables.
pub type Store = FxHashMap<VarId, Value>;

/// Sharded concurrent map of task stores.
///
/// Each task normally touches only its own entry; sharding keeps tasks with
/// disjoint ids off each other's locks. Values displaced from the map are
/// handed back to the caller so they drop after the shard lock is released.
#[derive(Debug, Default)]
pub struct Registry {
	tasks: DashMap<u64, Store>,
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// The process-wide registry used by every dynamic variable.
pub fn registry() -> &'static Registry {
	&REGISTRY
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Copy of `task`'s store.
	pub fn get(&self, task: u64) -> Option<Store> {
		self.tasks.get(&task).map(|store| store.clone())
	}

	/// One variable of `task`'s store.
	pub fn lookup(&self, task: u64, var: VarId) -> Option<Value> {
		self.tasks.get(&task).and_then(|store| store.get(&var).cloned())
	}

	/// Runs `f` on `task`'s store, creating it if absent.
	///
	/// The store is inserted only if `f` leaves it non-empty, and removed if
	/// `f` empties it, all under one shard lock. `f` must not touch the registry.
	pub fn with_store_mut<R>(&self, task: u64, f: impl FnOnce(&mut Store) -> R) -> R {
		match self.tasks.entry(task) {
			Entry::Occupied(mut entry) => {
				let out = f(entry.get_mut());
				if entry.get().is_empty() {
					entry.remove();
				}
				out
			}
			Entry::Vacant(entry) => {
				let mut store = Store::default();
				let out = f(&mut store);
				if !store.is_empty() {
					entry.insert(store);
				}
				out
			}
		}
	}

	/// Replaces `task`'s store, deleting the entry if `store` is empty.
	pub fn set(&self, task: u64, store: Store) -> Option<Store> {
		if store.is_empty() { self.delete(task) } else { self.tasks.insert(task, store) }
	}

	/// Removes `task`'s entry.
	pub fn delete(&self, task: u64) -> Option<Store> {
		self.tasks.remove(&task).map(|(_, store)| store)
	}

	pub fn contains(&self, task: u64) -> bool {
		self.tasks.contains_key(&task)
	}

	/// Number of tasks with a non-empty store.
	pub fn len(&self) -> usize {
		self.tasks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tasks.is_empty()
	}

	/// Copies the whole registry. For diagnostics and tests.
	///
	/// Shards are visited one at a time, so the copy is not an atomic cut
	/// across tasks.
	pub fn snapshot(&self) -> RegistrySnapshot {
		let tasks = self.tasks.iter().map(|entry| (*entry.key(), entry.value().clone())).collect();
		RegistrySnapshot { tasks }
	}
}

/// Point-in-time copy of a [`Registry`].
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
	tasks: FxHashMap<u64, Store>,
}

impl RegistrySnapshot {
	pub fn contains(&self, task: u64) -> bool {
		self.tasks.contains_key(&task)
	}

	pub fn store(&self, task: u64) -> Option<&Store> {
		self.tasks.get(&task)
	}

	/// Task ids in ascending order.
	pub fn task_ids(&self) -> Vec<u64> {
		let mut ids: Vec<_> = self.tasks.keys().copied().collect();
		ids.sort_unstable();
		ids
	}

	pub fn len(&self) -> usize {
		self.tasks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tasks.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (u64, &Store)> {
		self.tasks.iter().map(|(task, store)| (*task, store))
	}
}
