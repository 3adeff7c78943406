use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use crate::{error::Result, platform::Backend, sink::EventSink};

/// Filesystem change monitor over the target platform's native notification
/// facility.
///
/// The monitor exclusively owns the native notification channel, which
/// cannot be duplicated: there is no `Clone`, and `add`/`poll` take
/// `&mut self`, so concurrent use from several threads is ruled out at
/// compile time. Threads that need independent watching each own their own
/// `Monitor`.
///
/// There is no internal thread and no mid-wait cancellation: `poll` blocks
/// the calling thread for at most the given timeout, and prompt shutdown is
/// the caller's business (short timeouts plus a stop flag checked between
/// calls). Dropping the monitor releases every native watch and handle.
pub struct Monitor {
	backend: Backend,
}

impl Monitor {
	/// Initialize the platform notification facility.
	///
	/// Fails with [`Error::System`](crate::Error::System) if the facility
	/// cannot be acquired; no retry is attempted.
	pub fn new() -> Result<Self> {
		Ok(Self {
			backend: Backend::new()?,
		})
	}

	/// Register a path for watching.
	///
	/// The path is canonicalized once, here; aliases of an already watched
	/// path (and re-registrations) converge to the existing watch and
	/// return success. Registering a directory watches its immediate
	/// contents, not its subtrees.
	///
	/// Fails with [`Error::InvalidArgument`](crate::Error::InvalidArgument)
	/// if the path does not exist, or
	/// [`Error::System`](crate::Error::System) if native registration fails.
	pub fn add(&mut self, path: impl AsRef<Path>) -> Result<()> {
		self.backend.add(path.as_ref())
	}

	/// Block for at most `timeout`, then dispatch any detected changes into
	/// the sink's bound slots, synchronously on this thread.
	///
	/// Returns the number of kernel records processed, or 0 when the
	/// timeout elapsed with nothing to deliver.
	pub fn poll<S: EventSink + ?Sized>(&mut self, timeout: Duration, sink: &mut S) -> Result<usize> {
		self.backend.poll(timeout, sink)
	}

	/// Canonical keys currently held by the watch registry, in no
	/// particular order. Single-file watches report the covering parent
	/// directory on platforms that watch through it.
	pub fn watched_paths(&self) -> Vec<PathBuf> {
		self.backend.watched_paths()
	}
}
