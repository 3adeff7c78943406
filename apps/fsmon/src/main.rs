//! Demo front end: watch the given paths and print every delivered event
//! until interrupted.

use std::{
	path::{Path, PathBuf},
	sync::atomic::{AtomicBool, Ordering},
	time::Duration,
};

use anyhow::Context;
use clap::Parser;
use fs_monitor::{Event, EventKind, EventSink, Monitor};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fsmon", about = "Watch paths for filesystem changes")]
struct Args {
	/// Paths to watch (files or directories)
	#[arg(required = true)]
	paths: Vec<PathBuf>,

	/// Poll timeout in milliseconds
	#[arg(long, default_value_t = 500)]
	timeout_ms: u64,

	/// Print events as JSON lines on stdout instead of log output
	#[arg(long)]
	json: bool,
}

static STOP: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
fn install_stop_handler() {
	extern "C" fn request_stop(_sig: libc::c_int) {
		STOP.store(true, Ordering::SeqCst);
	}

	unsafe {
		libc::signal(libc::SIGINT, request_stop as libc::sighandler_t);
		libc::signal(libc::SIGTERM, request_stop as libc::sighandler_t);
	}
}

#[cfg(not(unix))]
fn install_stop_handler() {}

/// Sink printing every delivery, one line per event.
struct Reporter {
	json: bool,
}

impl Reporter {
	fn report(&self, kind: EventKind, path: &Path) {
		if self.json {
			match serde_json::to_string(&Event::new(kind, path)) {
				Ok(line) => println!("{line}"),
				Err(e) => info!(?e, "failed to serialize event"),
			}
		} else {
			info!(?kind, path = %path.display(), "filesystem event");
		}
	}
}

impl EventSink for Reporter {
	fn accessed(&mut self, path: &Path) {
		self.report(EventKind::Accessed, path);
	}

	fn modified(&mut self, path: &Path) {
		self.report(EventKind::Modified, path);
	}

	fn metadata_changed(&mut self, path: &Path) {
		self.report(EventKind::MetadataChanged, path);
	}

	fn opened(&mut self, path: &Path) {
		self.report(EventKind::Opened, path);
	}

	fn closed(&mut self, path: &Path) {
		self.report(EventKind::Closed, path);
	}

	fn created(&mut self, path: &Path) {
		self.report(EventKind::Created, path);
	}

	fn deleted(&mut self, path: &Path) {
		self.report(EventKind::Deleted, path);
	}

	fn moved(&mut self, path: &Path) {
		self.report(EventKind::Moved, path);
	}
}

fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();

	let args = Args::parse();

	install_stop_handler();

	let mut monitor = Monitor::new().context("failed to initialize filesystem monitor")?;
	for path in &args.paths {
		monitor
			.add(path)
			.with_context(|| format!("cannot watch {}", path.display()))?;
		info!(path = %path.display(), "watching");
	}

	let timeout = Duration::from_millis(args.timeout_ms);
	let mut sink = Reporter { json: args.json };

	while !STOP.load(Ordering::SeqCst) {
		monitor.poll(timeout, &mut sink)?;
	}

	info!("shutting down");

	Ok(())
}
