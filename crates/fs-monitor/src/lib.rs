//! Cross-platform filesystem change monitoring with a blocking poll
//! interface.
//!
//! A [`Monitor`] watches explicitly registered paths through the native
//! notification facility — inotify behind an epoll multiplexer on
//! Linux/Android, overlapped `ReadDirectoryChangesW` batches on Windows —
//! and normalizes both into the same eight event classes, dispatched into
//! any [`EventSink`] implementation.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use fs_monitor::{Callbacks, Monitor};
//!
//! # fn main() -> fs_monitor::Result<()> {
//! let mut monitor = Monitor::new()?;
//! monitor.add("/tmp/t1")?;
//!
//! let mut sink = Callbacks::default()
//! 	.on_created(|path| println!("created: {}", path.display()))
//! 	.on_modified(|path| println!("modified: {}", path.display()));
//!
//! // The caller owns the loop; use a short timeout and its own stop flag
//! // for prompt shutdown.
//! monitor.poll(Duration::from_millis(500), &mut sink)?;
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod monitor;
mod path;
mod platform;
mod sink;

pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use monitor::Monitor;
pub use sink::{Callbacks, EventSink, Subscribers};
