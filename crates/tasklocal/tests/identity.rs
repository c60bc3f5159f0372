//! Tests that swap the process-wide identity provider. All of them run serially.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use serial_test::serial;
use tasklocal::config::IDENTITY_ENV;
use tasklocal::identity::{self, STACK_TAG, THREAD_TAG, thread_task_id};
use tasklocal::{Config, DynVar, IdentitySource, Overrides, TaskIdentity, current_task_id, init, registry, spawn, spawn_thread};

static X: DynVar<u32> = DynVar::new("x");

/// Puts the default provider back when a test ends, pass or fail.
struct ResetIdentity;

impl Drop for ResetIdentity {
	fn drop(&mut self) {
		identity::install(IdentitySource::Runtime);
	}
}

fn multi_thread_runtime() -> tokio::runtime::Runtime {
	tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap()
}

#[test]
#[serial]
fn runtime_is_the_default_source() {
	assert_eq!(identity::source(), Some(IdentitySource::Runtime));
	assert_eq!(identity::provider_name(), "runtime");
	assert_eq!(current_task_id(), thread_task_id());
}

#[test]
#[serial]
fn stack_source_passes_startup_check() {
	let _reset = ResetIdentity;
	init(Config::default().identity(IdentitySource::Stack)).unwrap();
	assert_eq!(identity::source(), Some(IdentitySource::Stack));
	assert_eq!(current_task_id(), thread_task_id(), "no encoding on this stack yet");
}

#[test]
#[serial]
fn stack_source_identifies_spawned_threads() {
	let _reset = ResetIdentity;
	init(Config::default().identity(IdentitySource::Stack)).unwrap();

	X.set(1);
	let (x, id) = spawn_thread(Overrides::new(), || (X.get(), current_task_id())).join().unwrap();

	assert_eq!(x, 1);
	assert_ne!(id & STACK_TAG, 0);
	assert_eq!(id & THREAD_TAG, 0);
	assert!(!registry().contains(id));
	X.clear();
}

#[test]
#[serial]
fn stack_source_follows_futures_across_polls() {
	let _reset = ResetIdentity;
	init(Config::default().identity(IdentitySource::Stack)).unwrap();

	multi_thread_runtime().block_on(async {
		X.set(3);
		let (before, after, x) = spawn(Overrides::new(), async {
			let before = current_task_id();
			tokio::task::yield_now().await;
			tokio::time::sleep(Duration::from_millis(2)).await;
			(before, current_task_id(), X.get())
		})
		.await
		.unwrap();

		assert_eq!(before, after);
		assert_ne!(before & STACK_TAG, 0);
		assert_eq!(x, 3);
		assert!(!registry().contains(before));
		X.clear();
	});
}

#[test]
#[serial]
fn stack_source_gives_live_children_distinct_ids() {
	let _reset = ResetIdentity;
	init(Config::default().identity(IdentitySource::Stack)).unwrap();

	let ids = multi_thread_runtime().block_on(async {
		let barrier = Arc::new(tokio::sync::Barrier::new(8));
		let handles: Vec<_> = (0..8u32)
			.map(|n| {
				let barrier = Arc::clone(&barrier);
				spawn(Overrides::new().with(&X, n), async move {
					barrier.wait().await;
					assert_eq!(X.get(), n);
					current_task_id()
				})
			})
			.collect();
		let mut ids = Vec::new();
		for handle in handles {
			ids.push(handle.await.unwrap());
		}
		ids
	});

	let mut distinct = ids.clone();
	distinct.sort_unstable();
	distinct.dedup();
	assert_eq!(distinct.len(), ids.len());
	assert!(tasklocal_stack_id::pool().idle() >= ids.len());
}

#[test]
#[serial]
fn thread_source_tags_threads_and_encodes_tasks() {
	let _reset = ResetIdentity;
	init(Config::default().identity(IdentitySource::Thread)).unwrap();

	let thread_id = spawn_thread(Overrides::new(), current_task_id).join().unwrap();
	assert_ne!(thread_id & THREAD_TAG, 0);

	let task_id = multi_thread_runtime().block_on(async { spawn(Overrides::new(), async { current_task_id() }).await.unwrap() });
	assert_ne!(task_id & STACK_TAG, 0);
	assert_eq!(task_id & THREAD_TAG, 0);
}

#[test]
#[serial]
fn thread_source_keeps_tasks_on_one_thread_apart() {
	let _reset = ResetIdentity;
	init(Config::default().identity(IdentitySource::Thread)).unwrap();

	let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
	rt.block_on(async {
		X.set(9);
		let parent = current_task_id();
		let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();

		let first = spawn(Overrides::new().with(&X, 1), async move {
			let _ = go_rx.await;
			(X.got(), current_task_id())
		});
		let second = spawn(Overrides::new().with(&X, 2), async move {
			tokio::task::yield_now().await;
			let _ = go_tx.send(());
			(X.got(), current_task_id())
		});

		let (second_x, second_id) = second.await.unwrap();
		let (first_x, first_id) = first.await.unwrap();

		assert_eq!((first_x, second_x), (Some(1), Some(2)));
		assert_ne!(first_id, second_id);
		assert!(first_id != parent && second_id != parent);
		assert_eq!(X.got(), Some(9), "children must not touch the parent's entry");
		assert!(!registry().contains(first_id) && !registry().contains(second_id));
		X.clear();
	});
}

struct Fixed;

impl TaskIdentity for Fixed {
	fn current(&self) -> u64 {
		0xF1_ED
	}

	fn name(&self) -> &'static str {
		"fixed"
	}
}

#[test]
#[serial]
fn host_provider_replaces_builtin() {
	let _reset = ResetIdentity;
	identity::set_provider(Fixed);

	assert_eq!(identity::source(), None);
	assert_eq!(identity::provider_name(), "fixed");
	assert_eq!(current_task_id(), 0xF1_ED);

	X.set(4);
	assert_eq!(std::thread::spawn(|| X.got()).join().unwrap(), Some(4), "every thread is one task under this provider");
	X.clear();
	assert!(!registry().contains(0xF1_ED));
}

#[rstest]
#[case(None, IdentitySource::Runtime)]
#[case(Some(""), IdentitySource::Runtime)]
#[case(Some("stack"), IdentitySource::Stack)]
#[case(Some("Thread"), IdentitySource::Thread)]
#[serial]
fn config_reads_the_environment(#[case] value: Option<&str>, #[case] expected: IdentitySource) {
	// SAFETY: serialized with every other test in this binary that touches the environment.
	unsafe {
		match value {
			Some(value) => std::env::set_var(IDENTITY_ENV, value),
			None => std::env::remove_var(IDENTITY_ENV),
		}
	}
	let config = Config::from_env();
	// SAFETY: as above.
	unsafe { std::env::remove_var(IDENTITY_ENV) };

	assert_eq!(config.unwrap().identity, expected);
}

#[test]
#[serial]
fn config_rejects_unknown_sources() {
	// SAFETY: serialized with every other test in this binary that touches the environment.
	unsafe { std::env::set_var(IDENTITY_ENV, "coroutine") };
	let config = Config::from_env();
	// SAFETY: as above.
	unsafe { std::env::remove_var(IDENTITY_ENV) };

	assert!(matches!(config, Err(tasklocal::Error::UnknownIdentitySource(name)) if name == "coroutine"));
}
