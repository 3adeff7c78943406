//! Live-kernel monitor tests against temporary directories.
//!
//! Filesystem notification latency varies between kernels and filesystems,
//! so deliveries are collected by polling until the queue goes quiet rather
//! than asserting on a single poll.

use std::{
	fs,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicUsize, Ordering},
		mpsc, Arc,
	},
	time::Duration,
};

use fs_monitor::{Callbacks, Error, Event, EventKind, Monitor};
use tempfile::tempdir;

const POLL_TIMEOUT: Duration = Duration::from_millis(300);

/// Poll until something arrives and the queue then reports quiet, bailing
/// out after a bounded number of attempts.
fn collect_events(monitor: &mut Monitor) -> Vec<Event> {
	let (mut tx, rx) = mpsc::channel();
	let mut seen = 0usize;

	for _ in 0..10 {
		let processed = monitor.poll(POLL_TIMEOUT, &mut tx).expect("poll failure");
		if processed == 0 && seen > 0 {
			break;
		}
		seen += processed;
	}

	drop(tx);
	rx.try_iter().collect()
}

fn canonical(path: &Path) -> PathBuf {
	path.canonicalize().expect("canonicalize failure")
}

#[test]
fn add_missing_path_is_rejected_without_registering() {
	let dir = tempdir().unwrap();
	let mut monitor = Monitor::new().unwrap();

	let err = monitor.add(dir.path().join("absent")).unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
	assert!(monitor.watched_paths().is_empty());
}

#[test]
fn repeated_registration_converges_to_one_watch() {
	let dir = tempdir().unwrap();
	let mut monitor = Monitor::new().unwrap();

	monitor.add(dir.path()).unwrap();
	monitor.add(dir.path()).unwrap();

	assert_eq!(monitor.watched_paths().len(), 1);
}

#[cfg(unix)]
#[test]
fn symlink_alias_converges_to_one_watch() {
	let root = tempdir().unwrap();
	let target = root.path().join("target");
	let alias = root.path().join("alias");
	fs::create_dir(&target).unwrap();
	std::os::unix::fs::symlink(&target, &alias).unwrap();

	let mut monitor = Monitor::new().unwrap();
	monitor.add(&target).unwrap();
	monitor.add(&alias).unwrap();

	assert_eq!(monitor.watched_paths().len(), 1);
}

#[test]
fn file_creation_reports_created_once() {
	let dir = tempdir().unwrap();
	let mut monitor = Monitor::new().unwrap();
	monitor.add(dir.path()).unwrap();

	fs::write(dir.path().join("note.txt"), b"x").unwrap();

	let events = collect_events(&mut monitor);
	let expected = canonical(dir.path()).join("note.txt");

	let created: Vec<_> = events
		.iter()
		.filter(|event| event.kind == EventKind::Created)
		.collect();
	assert_eq!(created.len(), 1, "events: {events:?}");
	assert_eq!(created[0].path, expected);

	assert!(
		!events
			.iter()
			.any(|event| matches!(event.kind, EventKind::Deleted | EventKind::Moved)),
		"events: {events:?}"
	);
}

#[test]
fn single_file_watch_ignores_siblings() {
	let dir = tempdir().unwrap();
	let watched = dir.path().join("watched.txt");
	fs::write(&watched, b"x").unwrap();

	let mut monitor = Monitor::new().unwrap();
	monitor.add(&watched).unwrap();

	fs::write(dir.path().join("sibling.txt"), b"y").unwrap();

	let events = collect_events(&mut monitor);
	assert!(events.is_empty(), "events: {events:?}");
}

#[test]
fn quiet_polls_return_zero_and_invoke_nothing() {
	let dir = tempdir().unwrap();
	let mut monitor = Monitor::new().unwrap();
	monitor.add(dir.path()).unwrap();

	let (mut tx, rx) = mpsc::channel();
	for _ in 0..3 {
		let processed = monitor
			.poll(Duration::from_millis(100), &mut tx)
			.expect("poll failure");
		assert_eq!(processed, 0);
	}

	drop(tx);
	assert_eq!(rx.try_iter().count(), 0);
}

#[test]
fn watch_stays_armed_across_polls() {
	let dir = tempdir().unwrap();
	let mut monitor = Monitor::new().unwrap();
	monitor.add(dir.path()).unwrap();

	fs::write(dir.path().join("first.txt"), b"1").unwrap();
	let first = collect_events(&mut monitor);
	assert!(
		first
			.iter()
			.any(|event| event.kind == EventKind::Created),
		"events: {first:?}"
	);

	// A later change must be observed without a fresh registration.
	fs::write(dir.path().join("second.txt"), b"2").unwrap();
	let second = collect_events(&mut monitor);
	let expected = canonical(dir.path()).join("second.txt");
	assert!(
		second
			.iter()
			.any(|event| event.kind == EventKind::Created && event.path == expected),
		"events: {second:?}"
	);
}

#[test]
fn rename_reports_moved() {
	let dir = tempdir().unwrap();
	let old = dir.path().join("old.txt");
	fs::write(&old, b"x").unwrap();

	let mut monitor = Monitor::new().unwrap();
	monitor.add(dir.path()).unwrap();

	fs::rename(&old, dir.path().join("new.txt")).unwrap();

	let events = collect_events(&mut monitor);
	let moved = events
		.iter()
		.filter(|event| event.kind == EventKind::Moved)
		.count();
	assert!(moved >= 1, "events: {events:?}");
}

#[test]
fn bulk_write_reports_creation_and_modification() {
	let dir = tempdir().unwrap();
	let mut monitor = Monitor::new().unwrap();
	monitor.add(dir.path()).unwrap();

	fs::write(dir.path().join("bulk.dat"), vec![0u8; 10 * 1024]).unwrap();

	let events = collect_events(&mut monitor);
	let expected = canonical(dir.path()).join("bulk.dat");

	assert!(!events.is_empty());
	assert!(
		events
			.iter()
			.any(|event| event.kind == EventKind::Created && event.path == expected),
		"events: {events:?}"
	);
	assert!(
		events
			.iter()
			.any(|event| event.kind == EventKind::Modified && event.path == expected),
		"events: {events:?}"
	);
}

#[test]
fn closure_sink_only_hears_bound_slots() {
	let dir = tempdir().unwrap();
	let mut monitor = Monitor::new().unwrap();
	monitor.add(dir.path()).unwrap();

	let created = Arc::new(AtomicUsize::new(0));
	let deleted = Arc::new(AtomicUsize::new(0));
	let mut sink = Callbacks::default()
		.on_created({
			let created = created.clone();
			move |_| {
				created.fetch_add(1, Ordering::SeqCst);
			}
		})
		.on_deleted({
			let deleted = deleted.clone();
			move |_| {
				deleted.fetch_add(1, Ordering::SeqCst);
			}
		});

	fs::write(dir.path().join("note.txt"), b"x").unwrap();

	let mut seen = 0usize;
	for _ in 0..10 {
		let processed = monitor.poll(POLL_TIMEOUT, &mut sink).expect("poll failure");
		if processed == 0 && seen > 0 {
			break;
		}
		seen += processed;
	}

	assert_eq!(created.load(Ordering::SeqCst), 1);
	assert_eq!(deleted.load(Ordering::SeqCst), 0);
}
