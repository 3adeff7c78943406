use std::{
	io,
	path::{Path, PathBuf},
};

use normpath::PathExt;

use crate::error::{Error, Result};

/// Resolve a user-supplied path to the canonical absolute form used as the
/// watch registry key, so that two strings naming the same entry converge to
/// one watch.
///
/// Computed once at registration time and never re-run afterward: a path
/// deleted and recreated under the same name stays tracked under the
/// originally resolved key.
///
/// Internally `normalize` resolves symlinks and relative segments on Unix;
/// on Windows it goes through `GetFullPathNameW`, which yields a stable
/// absolute key in native form.
pub(crate) fn canonicalize_watch_path(path: &Path) -> Result<PathBuf> {
	if !path.exists() {
		return Err(Error::InvalidArgument(path.to_path_buf()));
	}

	path.normalize()
		.map(normpath::BasePathBuf::into_path_buf)
		.map_err(|e| match e.kind() {
			// Deleted between the existence check and normalization
			io::ErrorKind::NotFound => Error::InvalidArgument(path.to_path_buf()),
			_ => Error::system(
				format!("canonicalize path failure: {}", path.display()),
				e,
			),
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_path_is_invalid_argument() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("absent");

		match canonicalize_watch_path(&missing) {
			Err(Error::InvalidArgument(path)) => assert_eq!(path, missing),
			other => panic!("expected InvalidArgument, got {other:?}"),
		}
	}

	#[test]
	fn relative_segments_resolve_to_absolute() {
		let resolved = canonicalize_watch_path(Path::new(".")).unwrap();
		assert!(resolved.is_absolute());
	}

	#[cfg(unix)]
	#[test]
	fn symlink_aliases_converge() {
		let dir = tempfile::tempdir().unwrap();
		let target = dir.path().join("target");
		let alias = dir.path().join("alias");
		std::fs::create_dir(&target).unwrap();
		std::os::unix::fs::symlink(&target, &alias).unwrap();

		assert_eq!(
			canonicalize_watch_path(&target).unwrap(),
			canonicalize_watch_path(&alias).unwrap()
		);
	}
}
