//! One-slot cache of the parsed config, keyed by the backing file's
//! `(mtime, size)`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use tracing::trace;

use super::codec::Config;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Stamp {
	mtime: SystemTime,
	size: u64,
}

struct Slot {
	path: PathBuf,
	stamp: Stamp,
	config: Config,
}

/// Advisory, single-slot cache in front of [`Config::parse`]. A miss is
/// never an error — callers fall back to re-parsing.
#[derive(Default)]
pub struct ConfigCache {
	slot: RwLock<Option<Slot>>,
}

fn stat(path: &Path) -> Option<Stamp> {
	let meta = fs::metadata(path).ok()?;
	Some(Stamp { mtime: meta.modified().ok()?, size: meta.len() })
}

impl ConfigCache {
	pub fn new() -> Self {
		ConfigCache { slot: RwLock::new(None) }
	}

	/// Returns the cached config and `true` if the file's current mtime
	/// and size still match what was cached; any stat error or a path
	/// mismatch is reported as a miss.
	pub fn get(&self, path: &Path) -> Option<Config> {
		let guard = self.slot.read().unwrap_or_else(|e| e.into_inner());
		let slot = guard.as_ref()?;
		if slot.path != path {
			return None;
		}
		let current = stat(path)?;
		if current == slot.stamp {
			trace!(path = %path.display(), "config cache hit");
			Some(slot.config.clone())
		} else {
			trace!(path = %path.display(), "config cache stale");
			None
		}
	}

	/// Stores `config` stamped with a fresh stat of `path`. On stat
	/// failure the cache is left untouched (not stored).
	pub fn set(&self, path: &Path, config: Config) {
		let Some(stamp) = stat(path) else {
			trace!(path = %path.display(), "config cache set skipped: stat failed");
			return;
		};
		let mut guard = self.slot.write().unwrap_or_else(|e| e.into_inner());
		*guard = Some(Slot { path: path.to_path_buf(), stamp, config });
	}

	pub fn invalidate(&self) {
		let mut guard = self.slot.write().unwrap_or_else(|e| e.into_inner());
		*guard = None;
	}
}
