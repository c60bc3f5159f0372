use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::chain::with_id;

/// Source of stack identifiers with reuse.
///
/// Released identifiers are handed out again last-in first-out. Only when the
/// free list is empty does the pool mint a new value from its counter, so the
/// id space stays as small as the peak number of simultaneous holders. Ids that
/// are never released are never reclaimed.
#[derive(Debug)]
pub struct IdPool {
	free: Mutex<Vec<u64>>,
	next: AtomicU64,
}

impl Default for IdPool {
	fn default() -> Self {
		Self::new()
	}
}

impl IdPool {
	/// Creates an empty pool whose first minted id is 1.
	pub const fn new() -> Self {
		Self {
			free: Mutex::new(Vec::new()),
			next: AtomicU64::new(0),
		}
	}

	/// Takes an id, preferring the most recently released one.
	pub fn acquire(&self) -> u64 {
		if let Some(id) = self.free.lock().pop() {
			tracing::trace!(id, reused = true, "stack_id.acquire");
			return id;
		}
		let id = self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		tracing::trace!(id, reused = false, "stack_id.acquire");
		id
	}

	/// Returns `id` to the pool.
	///
	/// Releasing an id that is still in use elsewhere hands out duplicates.
	pub fn release(&self, id: u64) {
		self.free.lock().push(id);
	}

	/// Takes an id that is released when the lease drops.
	pub fn lease(&self) -> IdLease<'_> {
		IdLease { pool: self, id: self.acquire() }
	}

	/// Number of released ids waiting for reuse.
	pub fn idle(&self) -> usize {
		self.free.lock().len()
	}

	/// Number of ids minted by the counter so far.
	pub fn minted(&self) -> u64 {
		self.next.load(Ordering::Acquire)
	}
}

/// An id borrowed from an [`IdPool`].
#[derive(Debug)]
pub struct IdLease<'a> {
	pool: &'a IdPool,
	id: u64,
}

impl IdLease<'_> {
	pub const fn id(&self) -> u64 {
		self.id
	}
}

impl Drop for IdLease<'_> {
	fn drop(&mut self) {
		self.pool.release(self.id);
	}
}

static POOL: IdPool = IdPool::new();

/// Process-wide pool used for task identities.
pub fn pool() -> &'static IdPool {
	&POOL
}

/// Runs `f` under a freshly leased id from [`pool`], encoded on the stack.
pub fn with_fresh_id<R>(f: impl FnOnce(u64) -> R) -> R {
	let lease = pool().lease();
	let id = lease.id();
	with_id(id, || f(id))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mints_from_one() {
		let pool = IdPool::new();
		assert_eq!(pool.acquire(), 1);
		assert_eq!(pool.acquire(), 2);
		assert_eq!(pool.minted(), 2);
	}

	#[test]
	fn reuses_last_released_first() {
		let pool = IdPool::new();
		let a = pool.acquire();
		let b = pool.acquire();
		pool.release(a);
		pool.release(b);
		assert_eq!(pool.idle(), 2);
		assert_eq!(pool.acquire(), b);
		assert_eq!(pool.acquire(), a);
		assert_eq!(pool.acquire(), 3);
	}

	#[test]
	fn lease_returns_id_on_drop() {
		let pool = IdPool::new();
		let id = {
			let lease = pool.lease();
			assert_eq!(pool.idle(), 0);
			lease.id()
		};
		assert_eq!(pool.idle(), 1);
		assert_eq!(pool.lease().id(), id);
		assert_eq!(pool.minted(), 1);
	}

	#[test]
	fn lease_is_released_on_unwind() {
		let pool = IdPool::new();
		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			let _lease = pool.lease();
			panic!("boom");
		}));
		assert!(result.is_err());
		assert_eq!(pool.idle(), 1);
	}
}
