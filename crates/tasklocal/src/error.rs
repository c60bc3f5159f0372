//! Error types for task-local variables.

use thiserror::Error;

use crate::identity::IdentitySource;

/// Boxed error produced by a default factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by task-local variables and their configuration.
#[derive(Debug, Error)]
pub enum Error {
	/// A variable's default factory failed. Nothing was cached; the next read retries.
	#[error("default value for `{var}` could not be produced: {source}")]
	DefaultFactory {
		/// Name of the variable whose default was requested.
		var: &'static str,
		/// The factory's own error.
		#[source]
		source: BoxError,
	},

	/// The configured identity source cannot distinguish tasks on this platform.
	#[error("task identity source `{identity}` is not usable on this platform")]
	IdentityUnavailable {
		/// The source that failed its startup check.
		identity: IdentitySource,
	},

	/// An identity source name could not be parsed.
	#[error("unknown task identity source: {0} (expected 'runtime', 'thread' or 'stack')")]
	UnknownIdentitySource(String),
}
