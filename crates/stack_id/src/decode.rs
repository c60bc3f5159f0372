use std::ffi::c_void;
use std::sync::LazyLock;

use rustc_hash::FxHashMap;

use crate::chain::{DIGITS, MAX_DIGITS, sentinel, with_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
	Sentinel,
	Digit(u8),
}

/// Reverse lookup from function entry address to chain frame.
static MARKS: LazyLock<FxHashMap<usize, Mark>> = LazyLock::new(|| {
	let mut marks = FxHashMap::with_capacity_and_hasher(DIGITS.len() + 1, Default::default());
	marks.insert(sentinel as usize, Mark::Sentinel);
	for (value, frame) in (0u8..).zip(DIGITS) {
		marks.insert(frame as usize, Mark::Digit(value));
	}
	marks
});

fn mark_at(addr: *mut c_void) -> Option<Mark> {
	MARKS.get(&(addr as usize)).copied()
}

fn classify(frame: &backtrace::Frame) -> Option<Mark> {
	if let Some(mark) = mark_at(frame.symbol_address()) {
		return Some(mark);
	}
	// Apple's compact unwind tables do not give the unwinder function starts,
	// so `symbol_address` is just the instruction pointer there.
	if cfg!(target_vendor = "apple") {
		let mut found = None;
		backtrace::resolve_frame(frame, |symbol| {
			if found.is_none() {
				found = symbol.addr().and_then(mark_at);
			}
		});
		return found;
	}
	None
}

/// Walk state, innermost frame first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
	/// No chain frame seen yet.
	Seeking,
	Reading { value: u64, digits: usize },
	Done(Option<u64>),
}

impl Walk {
	fn visit(&mut self, mark: Option<Mark>) -> bool {
		*self = match (*self, mark) {
			(Self::Seeking, None) => Self::Seeking,
			(Self::Seeking, Some(Mark::Sentinel)) => Self::Done(Some(0)),
			(Self::Seeking, Some(Mark::Digit(d))) => Self::Reading {
				value: u64::from(d),
				digits: 1,
			},
			(Self::Reading { value, .. }, Some(Mark::Sentinel)) => Self::Done(Some(value)),
			(Self::Reading { digits, .. }, Some(Mark::Digit(_))) if digits == MAX_DIGITS => Self::Done(None),
			(Self::Reading { value, digits }, Some(Mark::Digit(d))) => Self::Reading {
				value: value | (u64::from(d) << (digits * 4)),
				digits: digits + 1,
			},
			// Broken chain: a foreign frame between digits and the sentinel.
			(Self::Reading { .. }, None) => Self::Done(None),
			(done @ Self::Done(_), _) => done,
		};
		!matches!(self, Self::Done(_))
	}

	fn finish(self) -> Option<u64> {
		match self {
			Self::Done(value) => value,
			Self::Seeking | Self::Reading { .. } => None,
		}
	}
}

/// Returns the identifier encoded nearest to the caller on the current stack.
///
/// Returns `None` when no encoding is active on this stack, or when the
/// nearest chain is not terminated by its sentinel.
pub fn current() -> Option<u64> {
	let mut walk = Walk::Seeking;
	backtrace::trace(|frame| walk.visit(classify(frame)));
	walk.finish()
}

/// Probes whether this platform's unwinder can decode stack encodings.
pub fn is_supported() -> bool {
	const PROBE: u64 = 0x9_0F1E;
	let supported = with_id(PROBE, current) == Some(PROBE);
	tracing::debug!(supported, "stack_id.probe");
	supported
}
