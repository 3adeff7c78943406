//! Compile-time selection of the one backend for the target platform.
//!
//! Exactly one implementation is compiled in; no process needs both, so the
//! choice is a build-time alias rather than runtime polymorphism.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use linux::Backend;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub(crate) use windows::Backend;

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "windows")))]
compile_error!(
	"filesystem monitoring is only implemented for inotify (Linux/Android) \
	 and ReadDirectoryChangesW (Windows) targets"
);
