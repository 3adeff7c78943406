//! Callback sinks receiving the events detected by a poll.
//!
//! A sink is any type implementing [`EventSink`]: eight independent slots,
//! one per event class, each defaulting to a no-op. A slot a sink does not
//! override is simply never heard from; the monitor skips unbound slots
//! silently. Three ready-made flavors are provided: [`Callbacks`] (one
//! optional closure per slot), [`Subscribers`] (any number of handlers per
//! slot) and a forwarding impl for [`mpsc::Sender<Event>`].

use std::{path::Path, sync::mpsc};

use crate::event::{Event, EventKind};

/// The eight notification slots a [`Monitor`](crate::Monitor) poll dispatches into.
///
/// Slots are invoked synchronously, on the polling thread, with the absolute
/// path of the affected entry. Default method bodies are no-ops, so an
/// implementation only overrides the slots it cares about.
pub trait EventSink {
	fn accessed(&mut self, _path: &Path) {}
	fn modified(&mut self, _path: &Path) {}
	fn metadata_changed(&mut self, _path: &Path) {}
	fn opened(&mut self, _path: &Path) {}
	fn closed(&mut self, _path: &Path) {}
	fn created(&mut self, _path: &Path) {}
	fn deleted(&mut self, _path: &Path) {}
	fn moved(&mut self, _path: &Path) {}
}

type Slot = Option<Box<dyn FnMut(&Path) + Send>>;

/// Sink holding at most one closure per slot.
///
/// ```
/// use fs_monitor::Callbacks;
///
/// let sink = Callbacks::default()
/// 	.on_created(|path| println!("created: {}", path.display()))
/// 	.on_deleted(|path| println!("deleted: {}", path.display()));
/// ```
#[derive(Default)]
pub struct Callbacks {
	accessed: Slot,
	modified: Slot,
	metadata_changed: Slot,
	opened: Slot,
	closed: Slot,
	created: Slot,
	deleted: Slot,
	moved: Slot,
}

macro_rules! callbacks_setter {
	($setter:ident, $slot:ident) => {
		pub fn $setter(mut self, handler: impl FnMut(&Path) + Send + 'static) -> Self {
			self.$slot = Some(Box::new(handler));
			self
		}
	};
}

impl Callbacks {
	callbacks_setter!(on_accessed, accessed);
	callbacks_setter!(on_modified, modified);
	callbacks_setter!(on_metadata_changed, metadata_changed);
	callbacks_setter!(on_opened, opened);
	callbacks_setter!(on_closed, closed);
	callbacks_setter!(on_created, created);
	callbacks_setter!(on_deleted, deleted);
	callbacks_setter!(on_moved, moved);
}

impl EventSink for Callbacks {
	fn accessed(&mut self, path: &Path) {
		if let Some(handler) = &mut self.accessed {
			handler(path);
		}
	}

	fn modified(&mut self, path: &Path) {
		if let Some(handler) = &mut self.modified {
			handler(path);
		}
	}

	fn metadata_changed(&mut self, path: &Path) {
		if let Some(handler) = &mut self.metadata_changed {
			handler(path);
		}
	}

	fn opened(&mut self, path: &Path) {
		if let Some(handler) = &mut self.opened {
			handler(path);
		}
	}

	fn closed(&mut self, path: &Path) {
		if let Some(handler) = &mut self.closed {
			handler(path);
		}
	}

	fn created(&mut self, path: &Path) {
		if let Some(handler) = &mut self.created {
			handler(path);
		}
	}

	fn deleted(&mut self, path: &Path) {
		if let Some(handler) = &mut self.deleted {
			handler(path);
		}
	}

	fn moved(&mut self, path: &Path) {
		if let Some(handler) = &mut self.moved {
			handler(path);
		}
	}
}

/// Multi-subscriber sink: every slot fans out to all handlers connected to
/// it, in connection order.
#[derive(Default)]
pub struct Subscribers {
	accessed: Vec<Box<dyn FnMut(&Path) + Send>>,
	modified: Vec<Box<dyn FnMut(&Path) + Send>>,
	metadata_changed: Vec<Box<dyn FnMut(&Path) + Send>>,
	opened: Vec<Box<dyn FnMut(&Path) + Send>>,
	closed: Vec<Box<dyn FnMut(&Path) + Send>>,
	created: Vec<Box<dyn FnMut(&Path) + Send>>,
	deleted: Vec<Box<dyn FnMut(&Path) + Send>>,
	moved: Vec<Box<dyn FnMut(&Path) + Send>>,
}

macro_rules! subscribers_connect {
	($connect:ident, $slot:ident) => {
		pub fn $connect(&mut self, handler: impl FnMut(&Path) + Send + 'static) {
			self.$slot.push(Box::new(handler));
		}
	};
}

impl Subscribers {
	subscribers_connect!(connect_accessed, accessed);
	subscribers_connect!(connect_modified, modified);
	subscribers_connect!(connect_metadata_changed, metadata_changed);
	subscribers_connect!(connect_opened, opened);
	subscribers_connect!(connect_closed, closed);
	subscribers_connect!(connect_created, created);
	subscribers_connect!(connect_deleted, deleted);
	subscribers_connect!(connect_moved, moved);
}

impl EventSink for Subscribers {
	fn accessed(&mut self, path: &Path) {
		for handler in &mut self.accessed {
			handler(path);
		}
	}

	fn modified(&mut self, path: &Path) {
		for handler in &mut self.modified {
			handler(path);
		}
	}

	fn metadata_changed(&mut self, path: &Path) {
		for handler in &mut self.metadata_changed {
			handler(path);
		}
	}

	fn opened(&mut self, path: &Path) {
		for handler in &mut self.opened {
			handler(path);
		}
	}

	fn closed(&mut self, path: &Path) {
		for handler in &mut self.closed {
			handler(path);
		}
	}

	fn created(&mut self, path: &Path) {
		for handler in &mut self.created {
			handler(path);
		}
	}

	fn deleted(&mut self, path: &Path) {
		for handler in &mut self.deleted {
			handler(path);
		}
	}

	fn moved(&mut self, path: &Path) {
		for handler in &mut self.moved {
			handler(path);
		}
	}
}

/// Forward every delivery as an [`Event`] value.
///
/// Send failures are ignored: a dropped receiver makes the sink inert
/// rather than poisoning the poll loop.
impl EventSink for mpsc::Sender<Event> {
	fn accessed(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::Accessed, path));
	}

	fn modified(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::Modified, path));
	}

	fn metadata_changed(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::MetadataChanged, path));
	}

	fn opened(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::Opened, path));
	}

	fn closed(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::Closed, path));
	}

	fn created(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::Created, path));
	}

	fn deleted(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::Deleted, path));
	}

	fn moved(&mut self, path: &Path) {
		let _ = self.send(Event::new(EventKind::Moved, path));
	}
}
