//! Identifiers encoded in the shape of the call stack.
//!
//! [`with_id`] writes an integer onto the stack as a chain of non-inlined
//! frames: a sentinel frame followed by one frame per hexadecimal digit, most
//! significant digit outermost. The callback runs below the innermost frame.
//! Any code running inside the callback recovers the integer with
//! [`current`], which walks its own return addresses outward and maps each
//! frame back to the digit function that owns it.
//!
//! Each thread (and each poll of a future) has its own stack, so encodings on
//! different tasks never interfere. Nested encodings shadow outer ones: the
//! decoder stops at the nearest sentinel.
//!
//! [`IdPool`] hands out fresh identifiers and takes them back, so a process can
//! keep encoding new identities without growing the id space unboundedly.

mod chain;
mod decode;
mod pool;

pub use chain::with_id;
pub use decode::{current, is_supported};
pub use pool::{IdLease, IdPool, pool, with_fresh_id};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
