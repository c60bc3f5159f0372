use std::hint::black_box;

/// Maximum number of digit frames one identifier can occupy.
pub(crate) const MAX_DIGITS: usize = (u64::BITS / 4) as usize;

/// One frame of the encoding chain.
pub(crate) type Frame = for<'a, 'b> fn(&'a mut Chain<'b>);

/// Digit frames indexed by nibble value.
pub(crate) const DIGITS: [Frame; 16] = [
	digit::<0x0>,
	digit::<0x1>,
	digit::<0x2>,
	digit::<0x3>,
	digit::<0x4>,
	digit::<0x5>,
	digit::<0x6>,
	digit::<0x7>,
	digit::<0x8>,
	digit::<0x9>,
	digit::<0xA>,
	digit::<0xB>,
	digit::<0xC>,
	digit::<0xD>,
	digit::<0xE>,
	digit::<0xF>,
];

/// Remaining digits of an identifier being pushed onto the stack.
pub(crate) struct Chain<'a> {
	digits: [u8; MAX_DIGITS],
	len: usize,
	next: usize,
	body: &'a mut dyn FnMut(),
}

impl<'a> Chain<'a> {
	fn new(id: u64, body: &'a mut dyn FnMut()) -> Self {
		let len = nibble_count(id);
		let mut digits = [0u8; MAX_DIGITS];
		for (i, slot) in digits[..len].iter_mut().enumerate() {
			let shift = (len - 1 - i) * 4;
			*slot = ((id >> shift) & 0xF) as u8;
		}
		Self { digits, len, next: 0, body }
	}
}

/// Number of significant hexadecimal digits in `id`; zero for `0`.
pub(crate) fn nibble_count(id: u64) -> usize {
	(u64::BITS - id.leading_zeros()).div_ceil(4) as usize
}

// Expanded in place rather than called so no helper frame sits between two
// digits of the chain.
macro_rules! descend {
	($chain:expr) => {{
		let chain: &mut Chain<'_> = $chain;
		if chain.next < chain.len {
			let digit = chain.digits[chain.next];
			chain.next += 1;
			DIGITS[usize::from(digit)](chain);
		} else {
			(chain.body)();
		}
	}};
}

/// Outermost frame of every encoding. The decoder stops here.
#[inline(never)]
pub(crate) fn sentinel(chain: &mut Chain<'_>) {
	descend!(chain);
	// Keeps the call above out of tail position.
	black_box(chain.len);
}

#[inline(never)]
fn digit<const D: u8>(chain: &mut Chain<'_>) {
	black_box(D);
	descend!(chain);
	black_box(D);
}

/// Runs `f` with `id` encoded on the call stack.
///
/// Code running inside `f` (on the same thread, without an intervening
/// encoding) observes `id` through [`current`](crate::current).
pub fn with_id<R>(id: u64, f: impl FnOnce() -> R) -> R {
	let mut f = Some(f);
	let mut out = None;
	let mut body = || {
		if let Some(f) = f.take() {
			out = Some(f());
		}
	};
	sentinel(&mut Chain::new(id, &mut body));
	match out {
		Some(out) => out,
		None => unreachable!("stack chain returned without running its body"),
	}
}
