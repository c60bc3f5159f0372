//! Task identity providers.
//!
//! Every task-local operation is keyed by the `u64` returned from
//! [`current_task_id`]. The installed provider must return a value that is
//! stable across calls on one task and distinct between any two live tasks.
//! Ids need not be contiguous, monotonic, or promptly reused.
//!
//! Built-in providers occupy disjoint ranges: runtime ids stay below
//! [`STACK_TAG`], stack ids carry [`STACK_TAG`], thread ids carry [`THREAD_TAG`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

use crate::error::Error;

/// High bit marking ids derived from the calling OS thread.
pub const THREAD_TAG: u64 = 1 << 63;

/// Bit marking ids decoded from a stack encoding.
pub const STACK_TAG: u64 = 1 << 62;

/// Source of the calling task's identity.
pub trait TaskIdentity: Send + Sync + 'static {
	/// Identity of the calling task.
	fn current(&self) -> u64;

	/// Short name used in logs.
	fn name(&self) -> &'static str;
}

/// Built-in identity sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdentitySource {
	/// Tokio task id, falling back to [`Thread`](Self::Thread) outside a task.
	#[default]
	Runtime,
	/// One id per OS thread. Tokio tasks started by the spawn wrappers carry a
	/// stack encoding, since many of them share a worker thread.
	Thread,
	/// Nearest stack-encoded id, falling back to [`Thread`](Self::Thread).
	Stack,
}

impl IdentitySource {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Runtime => "runtime",
			Self::Thread => "thread",
			Self::Stack => "stack",
		}
	}

	/// Whether this source reads stack encodings and so needs the platform check.
	pub const fn uses_stack_encoding(self) -> bool {
		matches!(self, Self::Thread | Self::Stack)
	}

	fn provider(self) -> Box<dyn TaskIdentity> {
		match self {
			Self::Runtime => Box::new(RuntimeIdentity),
			Self::Thread => Box::new(ThreadIdentity),
			Self::Stack => Box::new(StackIdentity),
		}
	}
}

impl fmt::Display for IdentitySource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for IdentitySource {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.trim().to_ascii_lowercase().as_str() {
			"runtime" => Ok(Self::Runtime),
			"thread" => Ok(Self::Thread),
			"stack" => Ok(Self::Stack),
			_ => Err(Error::UnknownIdentitySource(value.to_string())),
		}
	}
}

/// Tokio task ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeIdentity;

impl TaskIdentity for RuntimeIdentity {
	fn current(&self) -> u64 {
		runtime_task_id().unwrap_or_else(thread_task_id)
	}

	fn name(&self) -> &'static str {
		IdentitySource::Runtime.as_str()
	}
}

/// Per-thread ids assigned on first use, or the nearest stack encoding for
/// Tokio tasks started by the spawn wrappers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadIdentity;

impl TaskIdentity for ThreadIdentity {
	fn current(&self) -> u64 {
		stack_or_thread_id()
	}

	fn name(&self) -> &'static str {
		IdentitySource::Thread.as_str()
	}
}

/// Stack-encoded ids placed by the spawn wrappers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackIdentity;

impl TaskIdentity for StackIdentity {
	fn current(&self) -> u64 {
		stack_or_thread_id()
	}

	fn name(&self) -> &'static str {
		IdentitySource::Stack.as_str()
	}
}

fn stack_or_thread_id() -> u64 {
	tasklocal_stack_id::current().map_or_else(thread_task_id, |id| id | STACK_TAG)
}

/// Id of the calling Tokio task, if any.
pub fn runtime_task_id() -> Option<u64> {
	let id = tokio::task::try_id()?;
	// `tokio::task::Id` exposes its integer only through `Display`.
	let mut sink = DecimalSink::default();
	fmt::write(&mut sink, format_args!("{id}")).ok()?;
	sink.value
}

#[derive(Default)]
struct DecimalSink {
	value: Option<u64>,
}

impl fmt::Write for DecimalSink {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		for byte in s.bytes() {
			if !byte.is_ascii_digit() {
				return Err(fmt::Error);
			}
			let acc = self.value.unwrap_or(0);
			let next = acc.checked_mul(10).and_then(|acc| acc.checked_add(u64::from(byte - b'0')));
			self.value = Some(next.ok_or(fmt::Error)?);
		}
		Ok(())
	}
}

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
	static THREAD_ID: u64 = NEXT_THREAD.fetch_add(1, Ordering::Relaxed) | THREAD_TAG;
}

/// Id of the calling OS thread, assigned on first use and never reused.
pub fn thread_task_id() -> u64 {
	THREAD_ID.with(|id| *id)
}

struct Installed {
	source: Option<IdentitySource>,
	provider: Box<dyn TaskIdentity>,
}

static PROVIDER: LazyLock<ArcSwap<Installed>> = LazyLock::new(|| {
	ArcSwap::from_pointee(Installed {
		source: Some(IdentitySource::Runtime),
		provider: IdentitySource::Runtime.provider(),
	})
});

/// Identity of the calling task according to the installed provider.
pub fn current_task_id() -> u64 {
	PROVIDER.load().provider.current()
}

/// The installed built-in source, or `None` when a host provider is installed.
pub fn source() -> Option<IdentitySource> {
	PROVIDER.load().source
}

/// Name of the installed provider.
pub fn provider_name() -> &'static str {
	PROVIDER.load().provider.name()
}

/// Installs a built-in provider.
///
/// Registry entries written under the previous provider stay keyed by the old
/// ids; switch providers before any task-local state exists.
pub fn install(source: IdentitySource) {
	tracing::debug!(source = source.as_str(), "tasklocal.identity.install");
	PROVIDER.store(
		Installed {
			source: Some(source),
			provider: source.provider(),
		}
		.into(),
	);
}

/// Installs a host-supplied provider.
pub fn set_provider(provider: impl TaskIdentity) {
	tracing::debug!(source = provider.name(), "tasklocal.identity.install");
	PROVIDER.store(
		Installed {
			source: None,
			provider: Box::new(provider),
		}
		.into(),
	);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn thread_ids_are_stable_and_tagged() {
		let id = thread_task_id();
		assert_eq!(id, thread_task_id());
		assert_ne!(id & THREAD_TAG, 0);
		let other = std::thread::spawn(thread_task_id).join().unwrap();
		assert_ne!(id, other);
	}

	#[test]
	fn no_runtime_id_outside_tokio() {
		assert_eq!(runtime_task_id(), None);
		assert_eq!(RuntimeIdentity.current(), thread_task_id());
	}

	#[tokio::test]
	async fn runtime_ids_distinguish_tasks() {
		let a = tokio::spawn(async { runtime_task_id() }).await.unwrap();
		let b = tokio::spawn(async { runtime_task_id() }).await.unwrap();
		let (Some(a), Some(b)) = (a, b) else {
			panic!("spawned tasks must report a runtime id");
		};
		assert_ne!(a, b);
		assert_eq!(a & (THREAD_TAG | STACK_TAG), 0);
	}

	#[test]
	fn stack_identity_reads_the_nearest_encoding() {
		let id = tasklocal_stack_id::with_id(0x77, || StackIdentity.current());
		assert_eq!(id, 0x77 | STACK_TAG);
		assert_eq!(StackIdentity.current(), thread_task_id());
	}

	#[test]
	fn thread_identity_prefers_a_stack_encoding() {
		let id = tasklocal_stack_id::with_id(5, || ThreadIdentity.current());
		assert_eq!(id, 5 | STACK_TAG);
		assert_eq!(ThreadIdentity.current(), thread_task_id());
	}

	#[test]
	fn only_runtime_skips_the_stack_check() {
		assert!(!IdentitySource::Runtime.uses_stack_encoding());
		assert!(IdentitySource::Thread.uses_stack_encoding());
		assert!(IdentitySource::Stack.uses_stack_encoding());
	}

	#[test]
	fn decimal_sink_rejects_non_digits() {
		let mut sink = DecimalSink::default();
		assert!(fmt::write(&mut sink, format_args!("12x")).is_err());
		let mut sink = DecimalSink::default();
		assert!(fmt::write(&mut sink, format_args!("{}", u64::MAX)).is_ok());
		assert_eq!(sink.value, Some(u64::MAX));
	}

	#[test]
	fn parses_source_names() {
		assert_eq!("Stack".parse::<IdentitySource>().ok(), Some(IdentitySource::Stack));
		assert_eq!(" thread ".parse::<IdentitySource>().ok(), Some(IdentitySource::Thread));
		assert!(matches!("fiber".parse::<IdentitySource>(), Err(Error::UnknownIdentitySource(name)) if name == "fiber"));
	}
}
