//! Startup configuration.

use crate::error::{Error, Result};
use crate::identity::{self, IdentitySource};

/// Environment variable selecting the identity source.
pub const IDENTITY_ENV: &str = "TASKLOCAL_IDENTITY";

/// Process-wide task-local configuration, applied once with [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
	pub identity: IdentitySource,
}

impl Config {
	/// Reads `TASKLOCAL_IDENTITY`. Unset or empty selects the default source.
	pub fn from_env() -> Result<Self> {
		Self::from_value(std::env::var(IDENTITY_ENV).ok().as_deref())
	}

	fn from_value(value: Option<&str>) -> Result<Self> {
		let identity = match value.map(str::trim) {
			None | Some("") => IdentitySource::default(),
			Some(name) => name.parse()?,
		};
		Ok(Self { identity })
	}

	pub fn identity(mut self, identity: IdentitySource) -> Self {
		self.identity = identity;
		self
	}
}

/// Verifies and installs `config`.
///
/// An identity source that cannot tell tasks apart on this platform is a fatal
/// configuration error, reported here rather than on every access.
pub fn init(config: Config) -> Result<()> {
	let supported = !config.identity.uses_stack_encoding() || tasklocal_stack_id::is_supported();
	check(config, supported)?;
	identity::install(config.identity);
	Ok(())
}

fn check(config: Config, stack_supported: bool) -> Result<()> {
	if config.identity.uses_stack_encoding() && !stack_supported {
		tracing::warn!(source = config.identity.as_str(), "tasklocal.identity.unavailable");
		return Err(Error::IdentityUnavailable { identity: config.identity });
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[test]
	fn unset_or_blank_selects_runtime() {
		assert_eq!(Config::from_value(None).ok(), Some(Config::default()));
		assert_eq!(Config::from_value(Some("  ")).ok(), Some(Config::default()));
		assert_eq!(Config::default().identity, IdentitySource::Runtime);
	}

	#[test]
	fn names_are_case_insensitive() {
		let config = Config::from_value(Some("STACK")).ok();
		assert_eq!(config.map(|c| c.identity), Some(IdentitySource::Stack));
	}

	#[test]
	fn unknown_name_is_an_error() {
		let err = Config::from_value(Some("green-threads")).unwrap_err();
		assert!(matches!(err, Error::UnknownIdentitySource(_)));
		assert!(err.to_string().contains("green-threads"));
	}

	#[rstest]
	#[case(IdentitySource::Stack)]
	#[case(IdentitySource::Thread)]
	fn unsupported_stack_encoding_is_fatal(#[case] source: IdentitySource) {
		let before = identity::provider_name();
		let err = check(Config::default().identity(source), false).unwrap_err();

		assert!(matches!(err, Error::IdentityUnavailable { identity } if identity == source));
		assert!(err.to_string().contains(source.as_str()));
		assert_eq!(identity::provider_name(), before);
	}

	#[test]
	fn runtime_needs_no_stack_support() {
		assert!(check(Config::default(), false).is_ok());
		assert!(check(Config::default().identity(IdentitySource::Stack), true).is_ok());
	}

	#[test]
	fn builder_overrides_identity() {
		assert_eq!(Config::default().identity(IdentitySource::Thread).identity, IdentitySource::Thread);
	}
}
