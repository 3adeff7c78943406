//! Edge-triggered backend over inotify + epoll.
//!
//! The inotify queue reports changes one kernel record at a time, keyed by
//! an opaque watch descriptor; an epoll instance multiplexes readiness of
//! the queue descriptor so `poll` can block with a timeout. Records are
//! drained non-blocking until the queue runs dry, then each record's mask is
//! fanned out into the sink slots.

use std::{
	collections::HashMap,
	io,
	os::fd::{AsRawFd, FromRawFd, OwnedFd},
	path::{Path, PathBuf},
	time::Duration,
};

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use tracing::{debug, trace};

use crate::{
	error::{Error, Result},
	path::canonicalize_watch_path,
	sink::EventSink,
};

/// Bidirectional map between watch descriptors handed out by the kernel and
/// the canonical paths they were registered for. Entries live for the
/// backend's lifetime; there is no per-path removal.
#[derive(Debug, Default)]
struct WatchRegistry {
	by_token: HashMap<WatchDescriptor, PathBuf>,
	by_path: HashMap<PathBuf, WatchDescriptor>,
}

impl WatchRegistry {
	fn locate(&self, token: &WatchDescriptor) -> Option<&Path> {
		self.by_token.get(token).map(PathBuf::as_path)
	}

	fn contains_path(&self, path: &Path) -> bool {
		self.by_path.contains_key(path)
	}

	fn insert(&mut self, token: WatchDescriptor, path: PathBuf) {
		self.by_path.insert(path.clone(), token.clone());
		self.by_token.insert(token, path);
	}

	fn tokens(&self) -> impl Iterator<Item = &WatchDescriptor> {
		self.by_token.keys()
	}

	fn paths(&self) -> Vec<PathBuf> {
		self.by_path.keys().cloned().collect()
	}
}

pub(crate) struct Backend {
	inotify: Inotify,
	epoll: OwnedFd,
	registry: WatchRegistry,
}

impl Backend {
	/// Acquire the notification queue and the readiness multiplexer, and
	/// register the former with the latter. Descriptors acquired before a
	/// failure are released by their owning guards on the early return.
	pub(crate) fn new() -> Result<Self> {
		let inotify = Inotify::init().map_err(|e| Error::system("inotify init failure", e))?;

		let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
		if raw < 0 {
			return Err(Error::system(
				"epoll create failure",
				io::Error::last_os_error(),
			));
		}
		let epoll = unsafe { OwnedFd::from_raw_fd(raw) };

		let mut event = libc::epoll_event {
			events: (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLET) as u32,
			u64: inotify.as_raw_fd() as u64,
		};
		let rc = unsafe {
			libc::epoll_ctl(
				epoll.as_raw_fd(),
				libc::EPOLL_CTL_ADD,
				inotify.as_raw_fd(),
				&mut event,
			)
		};
		if rc < 0 {
			return Err(Error::system(
				"add inotify descriptor to epoll failure",
				io::Error::last_os_error(),
			));
		}

		Ok(Self {
			inotify,
			epoll,
			registry: WatchRegistry::default(),
		})
	}

	/// Register a path for watching. Re-adding a path that canonicalizes to
	/// an already watched key is a no-op success.
	pub(crate) fn add(&mut self, path: &Path) -> Result<()> {
		let canonical = canonicalize_watch_path(path)?;

		if self.registry.contains_path(&canonical) {
			return Ok(());
		}

		let token = self
			.inotify
			.watches()
			.add(&canonical, WatchMask::ALL_EVENTS)
			.map_err(|e| {
				Error::system(
					format!("add path to watching failure: {}", canonical.display()),
					e,
				)
			})?;

		debug!(path = %canonical.display(), "watching path");
		self.registry.insert(token, canonical);

		Ok(())
	}

	/// Block for at most `timeout` and dispatch whatever the queue holds.
	///
	/// Returns the number of kernel records drained; 0 on a quiet timeout.
	/// An interrupted wait is retried once; a second interruption returns 0
	/// and leaves the retry to the caller's poll loop.
	pub(crate) fn poll<S: EventSink + ?Sized>(
		&mut self,
		timeout: Duration,
		sink: &mut S,
	) -> Result<usize> {
		let timeout_ms: i32 = timeout.as_millis().try_into().unwrap_or(i32::MAX);
		let mut ready = [libc::epoll_event { events: 0, u64: 0 }; 1];

		let mut retried = false;
		let rc = loop {
			let rc = unsafe {
				libc::epoll_wait(self.epoll.as_raw_fd(), ready.as_mut_ptr(), 1, timeout_ms)
			};
			if rc < 0 {
				let err = io::Error::last_os_error();
				if err.kind() == io::ErrorKind::Interrupted {
					if retried {
						return Ok(0);
					}
					retried = true;
					continue;
				}
				return Err(Error::system("epoll wait failure", err));
			}
			break rc;
		};

		if rc == 0 {
			return Ok(0);
		}

		if ready[0].events & libc::EPOLLERR as u32 != 0 {
			return Err(Error::system(
				"error condition on inotify descriptor",
				io::Error::last_os_error(),
			));
		}

		self.drain(sink)
	}

	/// Read records until the non-blocking queue reports "would block".
	fn drain<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
		let mut buffer = [0u8; 4096];
		let mut processed = 0;

		loop {
			let records = match self.inotify.read_events(&mut buffer) {
				Ok(records) => records,
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) => return Err(Error::system("read inotify event failure", e)),
			};

			let mut batch = 0usize;
			for record in records {
				batch += 1;

				// Watch removal notices and queue overflow carry no usable
				// token; detail is lost but nothing is broken.
				if record
					.mask
					.intersects(EventMask::IGNORED | EventMask::Q_OVERFLOW)
				{
					trace!(mask = ?record.mask, "skipping control record");
					continue;
				}

				let watch_path = self.registry.locate(&record.wd).ok_or_else(|| {
					Error::UnexpectedState(format!(
						"entry not found in watch map by descriptor: {:?}",
						record.wd
					))
				})?;

				let mut path = watch_path.to_path_buf();
				if let Some(name) = record.name {
					path.push(name);
				}

				trace!(mask = ?record.mask, path = %path.display(), "inotify record");

				if record.mask.contains(EventMask::ACCESS) {
					sink.accessed(&path);
				}
				if record.mask.contains(EventMask::MODIFY) {
					sink.modified(&path);
				}
				if record.mask.contains(EventMask::ATTRIB) {
					sink.metadata_changed(&path);
				}
				if record.mask.contains(EventMask::OPEN) {
					sink.opened(&path);
				}
				if record
					.mask
					.intersects(EventMask::CLOSE_WRITE | EventMask::CLOSE_NOWRITE)
				{
					sink.closed(&path);
				}
				if record.mask.contains(EventMask::CREATE) {
					sink.created(&path);
				}
				if record
					.mask
					.intersects(EventMask::DELETE | EventMask::DELETE_SELF)
				{
					sink.deleted(&path);
				}
				if record.mask.intersects(
					EventMask::MOVED_FROM | EventMask::MOVED_TO | EventMask::MOVE_SELF,
				) {
					sink.moved(&path);
				}

				processed += 1;
			}

			if batch == 0 {
				break;
			}
		}

		Ok(processed)
	}

	pub(crate) fn watched_paths(&self) -> Vec<PathBuf> {
		self.registry.paths()
	}
}

impl Drop for Backend {
	fn drop(&mut self) {
		// De-register every outstanding token before the queue descriptor
		// closes; dropping `inotify` and `epoll` then releases both fds.
		let tokens: Vec<_> = self.registry.tokens().cloned().collect();
		let mut watches = self.inotify.watches();
		for token in tokens {
			let _ = watches.remove(token);
		}
	}
}
