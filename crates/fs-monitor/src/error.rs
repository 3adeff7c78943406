use std::{io, path::PathBuf};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by [`Monitor`](crate::Monitor) operations.
///
/// Transient conditions (interrupted waits, empty non-blocking reads) are
/// absorbed inside the backends and never reach callers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The path did not exist when registration was attempted.
	#[error("attempt to watch non-existent path: {}", .0.display())]
	InvalidArgument(PathBuf),

	/// An OS-level failure, carrying the underlying error.
	///
	/// May make the whole monitor or a single directory watch unusable;
	/// the operation that returned it is not retried internally.
	#[error("{context}: {source}")]
	System {
		context: String,
		#[source]
		source: io::Error,
	},

	/// Internal consistency violation, e.g. a kernel record referring to a
	/// watch that is not in the registry. Indicates a logic defect, not an
	/// environmental condition.
	#[error("unexpected state: {0}")]
	UnexpectedState(String),
}

impl Error {
	pub(crate) fn system(context: impl Into<String>, source: io::Error) -> Self {
		Self::System {
			context: context.into(),
			source,
		}
	}

	/// Raw OS error code, when the failure came from the OS and it supplied one.
	pub fn os_error(&self) -> Option<i32> {
		match self {
			Self::System { source, .. } => source.raw_os_error(),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn os_error_code_is_exposed_for_system_failures() {
		let err = Error::system("epoll wait failure", io::Error::from_raw_os_error(4));
		assert_eq!(err.os_error(), Some(4));
	}

	#[test]
	fn non_system_failures_carry_no_os_error() {
		let err = Error::InvalidArgument(PathBuf::from("/no/such/path"));
		assert_eq!(err.os_error(), None);
		assert!(err.to_string().contains("/no/such/path"));
	}
}
