use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Classes of filesystem change deliverable by a [`Monitor`](crate::Monitor) poll.
///
/// Each variant corresponds to one slot of [`EventSink`](crate::EventSink).
/// Both backends normalize their native records into these classes; a single
/// kernel record may fan out into several of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
	/// File was read.
	Accessed,
	/// File contents changed.
	Modified,
	/// Metadata (permissions, timestamps, ...) changed.
	MetadataChanged,
	/// File was opened.
	Opened,
	/// File was closed.
	Closed,
	/// Entry appeared under a watched directory.
	Created,
	/// Entry was removed.
	Deleted,
	/// Entry was renamed; reported for the old name and the new name.
	Moved,
}

/// A change event as a plain value, for sinks that forward rather than react.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
	pub kind: EventKind,
	/// Absolute path of the affected entry.
	pub path: PathBuf,
}

impl Event {
	pub fn new(kind: EventKind, path: &Path) -> Self {
		Self {
			kind,
			path: path.to_path_buf(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn event_serializes_with_kind_and_path() {
		let event = Event::new(EventKind::Created, Path::new("/watched/new.txt"));
		let json = serde_json::to_string(&event).unwrap();
		assert!(json.contains("Created"));
		assert!(json.contains("/watched/new.txt"));

		let back: Event = serde_json::from_str(&json).unwrap();
		assert_eq!(back, event);
	}
}
