//! Completion-based backend over overlapped `ReadDirectoryChangesW`.
//!
//! Each watched directory keeps one outstanding asynchronous read into a
//! fixed-size buffer; completion is signaled through a manual-reset event
//! that `poll` waits on. A completed read delivers a batch of
//! variable-length records (action code + filename relative to the
//! directory) which are filtered, fanned out into the sink and followed by
//! an immediate re-arm of the read.
//!
//! A single-file watch is a directory watch over the file's parent with the
//! filename added to the entry's child filter.

use std::{
	collections::{HashMap, HashSet},
	ffi::{c_void, OsString},
	io, iter, mem,
	os::windows::ffi::{OsStrExt, OsStringExt},
	path::{Path, PathBuf},
	ptr, slice,
	time::Duration,
};

use tracing::{debug, trace};
use windows_sys::Win32::{
	Foundation::{
		CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
	},
	Storage::FileSystem::{
		CreateFileW, ReadDirectoryChangesW, FILE_ACTION_ADDED, FILE_ACTION_MODIFIED,
		FILE_ACTION_REMOVED, FILE_ACTION_RENAMED_NEW_NAME, FILE_ACTION_RENAMED_OLD_NAME,
		FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY,
		FILE_NOTIFY_CHANGE_ATTRIBUTES, FILE_NOTIFY_CHANGE_CREATION, FILE_NOTIFY_CHANGE_DIR_NAME,
		FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_ACCESS,
		FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SECURITY, FILE_NOTIFY_CHANGE_SIZE,
		FILE_NOTIFY_INFORMATION, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
		OPEN_EXISTING,
	},
	System::{
		IO::{CancelIo, GetOverlappedResult, OVERLAPPED},
		Threading::{CreateEventW, ResetEvent, WaitForMultipleObjects},
	},
};

use crate::{
	error::{Error, Result},
	path::canonicalize_watch_path,
	sink::EventSink,
};

const RESULT_BUFFER_SIZE: usize = 16 * 1024;

const NOTIFY_FILTERS: u32 = FILE_NOTIFY_CHANGE_FILE_NAME
	| FILE_NOTIFY_CHANGE_DIR_NAME
	| FILE_NOTIFY_CHANGE_ATTRIBUTES
	| FILE_NOTIFY_CHANGE_SIZE
	| FILE_NOTIFY_CHANGE_LAST_WRITE
	| FILE_NOTIFY_CHANGE_LAST_ACCESS
	| FILE_NOTIFY_CHANGE_CREATION
	| FILE_NOTIFY_CHANGE_SECURITY;

/// Closes the wrapped handle exactly once, on every exit path.
struct HandleGuard(HANDLE);

impl HandleGuard {
	fn raw(&self) -> HANDLE {
		self.0
	}
}

impl Drop for HandleGuard {
	fn drop(&mut self) {
		if self.0 != 0 && self.0 != INVALID_HANDLE_VALUE {
			unsafe { CloseHandle(self.0) };
		}
	}
}

/// `ReadDirectoryChangesW` requires DWORD alignment of the result buffer.
#[repr(C, align(4))]
struct ResultBuffer([u8; RESULT_BUFFER_SIZE]);

/// One watched directory: the native handles, the in-flight read state and
/// the set of child names of interest (empty = the whole directory).
struct DirWatch {
	dir_path: PathBuf,
	dir_handle: HandleGuard,
	wait_handle: HandleGuard,
	// Boxed so the kernel-visible address stays stable while entries move
	// around the registry map.
	overlapped: Box<OVERLAPPED>,
	buffer: Box<ResultBuffer>,
	notify_filters: u32,
	child_filter: HashSet<OsString>,
	armed: bool,
}

// The handles, the overlapped block and the buffer are owned exclusively by
// this entry; nothing else aliases them.
unsafe impl Send for DirWatch {}

impl DirWatch {
	/// Open the directory for overlapped change notification and issue the
	/// first asynchronous read. Handles acquired before a failure are closed
	/// by their guards on the early return.
	fn open(dir_path: PathBuf) -> Result<Self> {
		let wide: Vec<u16> = dir_path
			.as_os_str()
			.encode_wide()
			.chain(iter::once(0))
			.collect();

		let raw_dir = unsafe {
			CreateFileW(
				wide.as_ptr(),
				FILE_LIST_DIRECTORY,
				FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
				ptr::null(),
				OPEN_EXISTING,
				FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
				0,
			)
		};
		if raw_dir == INVALID_HANDLE_VALUE {
			return Err(Error::system(
				format!("add path to watching failure: {}", dir_path.display()),
				io::Error::last_os_error(),
			));
		}
		let dir_handle = HandleGuard(raw_dir);

		let raw_event = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
		if raw_event == 0 {
			return Err(Error::system(
				format!("create waiting event failure: {}", dir_path.display()),
				io::Error::last_os_error(),
			));
		}
		let wait_handle = HandleGuard(raw_event);

		let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { mem::zeroed() });
		overlapped.hEvent = wait_handle.raw();

		let mut watch = Self {
			dir_path,
			dir_handle,
			wait_handle,
			overlapped,
			buffer: Box::new(ResultBuffer([0; RESULT_BUFFER_SIZE])),
			notify_filters: NOTIFY_FILTERS,
			child_filter: HashSet::new(),
			armed: false,
		};
		watch.rearm()?;

		Ok(watch)
	}

	/// Issue (or re-issue) the asynchronous read on the directory handle.
	fn rearm(&mut self) -> Result<()> {
		let ok = unsafe {
			ReadDirectoryChangesW(
				self.dir_handle.raw(),
				self.buffer.0.as_mut_ptr() as *mut c_void,
				RESULT_BUFFER_SIZE as u32,
				0,
				self.notify_filters,
				ptr::null_mut(),
				&mut *self.overlapped,
				None,
			)
		};
		if ok == 0 {
			return Err(Error::system(
				format!(
					"arm directory change notification failure: {}",
					self.dir_path.display()
				),
				io::Error::last_os_error(),
			));
		}
		self.armed = true;

		Ok(())
	}
}

impl Drop for DirWatch {
	fn drop(&mut self) {
		// The in-flight read writes into `buffer`; cancel and drain it
		// before the guards close the handles and the buffer is freed.
		if self.armed {
			unsafe {
				CancelIo(self.dir_handle.raw());
				let mut transferred = 0u32;
				GetOverlappedResult(
					self.dir_handle.raw(),
					&*self.overlapped,
					&mut transferred,
					1,
				);
			}
		}
	}
}

pub(crate) struct Backend {
	/// Watch entries keyed by their wait handle.
	entries: HashMap<HANDLE, DirWatch>,
	/// Flat wait array handed to `WaitForMultipleObjects`; handles are owned
	/// by the entries.
	wait_handles: Vec<HANDLE>,
}

impl Backend {
	pub(crate) fn new() -> Result<Self> {
		Ok(Self {
			entries: HashMap::new(),
			wait_handles: Vec::new(),
		})
	}

	fn locate_dir_mut(&mut self, dir_path: &Path) -> Option<&mut DirWatch> {
		self.entries
			.values_mut()
			.find(|entry| entry.dir_path == dir_path)
	}

	fn insert(&mut self, entry: DirWatch) {
		let wait_handle = entry.wait_handle.raw();
		self.wait_handles.push(wait_handle);
		self.entries.insert(wait_handle, entry);
	}

	/// Register a path. Directories are watched whole; files are watched
	/// through their parent directory with a child-name filter. Registering
	/// an already covered path is a no-op success.
	pub(crate) fn add(&mut self, path: &Path) -> Result<()> {
		if !path.exists() {
			return Err(Error::InvalidArgument(path.to_path_buf()));
		}

		if path.is_dir() {
			self.add_dir(path)
		} else {
			self.add_file(path)
		}
	}

	fn add_dir(&mut self, path: &Path) -> Result<()> {
		let canonical = canonicalize_watch_path(path)?;

		if let Some(entry) = self.locate_dir_mut(&canonical) {
			// Directory registration covers the whole directory; widen an
			// entry that was created for individual files.
			entry.child_filter.clear();
			return Ok(());
		}

		debug!(path = %canonical.display(), "watching directory");
		self.insert(DirWatch::open(canonical)?);

		Ok(())
	}

	fn add_file(&mut self, path: &Path) -> Result<()> {
		let canonical = canonicalize_watch_path(path)?;
		let parent = canonical
			.parent()
			.ok_or_else(|| Error::InvalidArgument(canonical.clone()))?
			.to_path_buf();
		let filename = canonical
			.file_name()
			.ok_or_else(|| Error::InvalidArgument(canonical.clone()))?
			.to_os_string();

		if let Some(entry) = self.locate_dir_mut(&parent) {
			// An empty filter already covers every child.
			if !entry.child_filter.is_empty() {
				entry.child_filter.insert(filename);
			}
			return Ok(());
		}

		debug!(path = %canonical.display(), "watching file");
		let mut entry = DirWatch::open(parent)?;
		entry.child_filter.insert(filename);
		self.insert(entry);

		Ok(())
	}

	/// Wait for a completion on any armed directory watch and deliver its
	/// batch. Returns the number of records dispatched into the sink; 0 on
	/// a quiet timeout or an overflowed batch.
	pub(crate) fn poll<S: EventSink + ?Sized>(
		&mut self,
		timeout: Duration,
		sink: &mut S,
	) -> Result<usize> {
		if self.wait_handles.is_empty() {
			return Ok(0);
		}

		// u32::MAX would mean "infinite"
		let timeout_ms: u32 = timeout
			.as_millis()
			.try_into()
			.unwrap_or(u32::MAX)
			.min(u32::MAX - 1);

		let rc = unsafe {
			WaitForMultipleObjects(
				self.wait_handles.len() as u32,
				self.wait_handles.as_ptr(),
				0,
				timeout_ms,
			)
		};

		if rc == WAIT_TIMEOUT {
			return Ok(0);
		}
		if rc == WAIT_FAILED {
			return Err(Error::system(
				"wait for directory changes failure",
				io::Error::last_os_error(),
			));
		}

		let index = rc.wrapping_sub(WAIT_OBJECT_0) as usize;
		let signaled = match self.wait_handles.get(index) {
			Some(handle) => *handle,
			None => {
				return Err(Error::UnexpectedState(format!(
					"unexpected wait result: {rc}"
				)))
			}
		};
		let entry = self.entries.get_mut(&signaled).ok_or_else(|| {
			Error::UnexpectedState(format!(
				"watch entry not found for signaled handle: {signaled}"
			))
		})?;

		let mut transferred = 0u32;
		let ok = unsafe {
			GetOverlappedResult(
				entry.dir_handle.raw(),
				&*entry.overlapped,
				&mut transferred,
				1,
			)
		};
		entry.armed = false;
		if ok == 0 {
			return Err(Error::system(
				format!(
					"retrieve directory changes failure: {}",
					entry.dir_path.display()
				),
				io::Error::last_os_error(),
			));
		}

		unsafe { ResetEvent(entry.wait_handle.raw()) };

		// A zero-length completion means the batch outgrew the buffer:
		// something changed, exact detail lost. Re-arm and report quiet.
		if transferred == 0 {
			debug!(path = %entry.dir_path.display(), "notification batch overflowed, changes lost");
			entry.rearm()?;
			return Ok(0);
		}

		let mut processed = 0;
		for (action, filename) in batch_records(&entry.buffer.0, transferred as usize) {
			if !entry.child_filter.is_empty() && !entry.child_filter.contains(&filename) {
				continue;
			}

			let path = entry.dir_path.join(&filename);
			trace!(action, path = %path.display(), "directory change record");

			match action {
				FILE_ACTION_ADDED => sink.created(&path),
				FILE_ACTION_REMOVED => sink.deleted(&path),
				FILE_ACTION_MODIFIED => sink.modified(&path),
				FILE_ACTION_RENAMED_OLD_NAME | FILE_ACTION_RENAMED_NEW_NAME => sink.moved(&path),
				other => {
					trace!(action = other, path = %path.display(), "unhandled action code");
					continue;
				}
			}
			processed += 1;
		}

		// Failure here is fatal for this directory's watch: no further
		// events will be delivered for it without a fresh registration.
		entry.rearm()?;

		Ok(processed)
	}

	pub(crate) fn watched_paths(&self) -> Vec<PathBuf> {
		self.entries
			.values()
			.map(|entry| entry.dir_path.clone())
			.collect()
	}
}

/// Walk a completed batch buffer as a sequence of variable-length
/// `FILE_NOTIFY_INFORMATION` records, yielding action codes and filenames.
fn batch_records(buffer: &[u8], len: usize) -> Vec<(u32, OsString)> {
	let mut records = Vec::new();
	let mut offset = 0usize;

	// Header up to and excluding the trailing variable-length name
	const HEADER_LEN: usize = mem::offset_of!(FILE_NOTIFY_INFORMATION, FileName);

	while offset + HEADER_LEN <= len {
		let info = buffer[offset..].as_ptr() as *const FILE_NOTIFY_INFORMATION;

		// Offsets are DWORD-aligned per the API contract and the buffer
		// itself is aligned, so these reads are in-bounds and aligned.
		let (next, action, name_bytes) = unsafe {
			(
				ptr::addr_of!((*info).NextEntryOffset).read(),
				ptr::addr_of!((*info).Action).read(),
				ptr::addr_of!((*info).FileNameLength).read() as usize,
			)
		};

		if offset + HEADER_LEN + name_bytes <= len {
			let name = unsafe {
				slice::from_raw_parts(
					ptr::addr_of!((*info).FileName) as *const u16,
					name_bytes / mem::size_of::<u16>(),
				)
			};
			records.push((action, OsString::from_wide(name)));
		}

		if next == 0 {
			break;
		}
		offset += next as usize;
	}

	records
}

#[cfg(test)]
mod tests {
	use super::*;

	fn push_record(buffer: &mut Vec<u8>, next_offset: u32, action: u32, name: &str) {
		let wide: Vec<u16> = name.encode_utf16().collect();
		buffer.extend_from_slice(&next_offset.to_ne_bytes());
		buffer.extend_from_slice(&action.to_ne_bytes());
		buffer.extend_from_slice(&((wide.len() * 2) as u32).to_ne_bytes());
		for unit in wide {
			buffer.extend_from_slice(&unit.to_ne_bytes());
		}
		while buffer.len() % 4 != 0 {
			buffer.push(0);
		}
	}

	#[test]
	fn batch_walk_yields_every_record() {
		let mut raw = Vec::new();
		push_record(&mut raw, 0, FILE_ACTION_ADDED, "a.txt");
		let first_len = raw.len() as u32;
		raw[0..4].copy_from_slice(&first_len.to_ne_bytes());
		push_record(&mut raw, 0, FILE_ACTION_REMOVED, "b.txt");

		let mut aligned = ResultBuffer([0; RESULT_BUFFER_SIZE]);
		aligned.0[..raw.len()].copy_from_slice(&raw);

		let records = batch_records(&aligned.0, raw.len());
		assert_eq!(
			records,
			vec![
				(FILE_ACTION_ADDED, OsString::from("a.txt")),
				(FILE_ACTION_REMOVED, OsString::from("b.txt")),
			]
		);
	}

	#[test]
	fn truncated_batch_does_not_read_past_the_result_length() {
		let mut raw = Vec::new();
		push_record(&mut raw, 0, FILE_ACTION_MODIFIED, "long-file-name.dat");

		let mut aligned = ResultBuffer([0; RESULT_BUFFER_SIZE]);
		aligned.0[..raw.len()].copy_from_slice(&raw);

		// Claim fewer valid bytes than the record's name needs
		let records = batch_records(&aligned.0, 16);
		assert!(records.is_empty());
	}
}
