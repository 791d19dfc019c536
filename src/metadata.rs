//! JSON sidecar metadata store: load/save with inter-process file locking
//! and write-temp-rename atomicity.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SshmError;
use crate::lock::{FileLock, Mode};

/// Per-alias annotations not representable in the shell-client config
/// grammar. Fields are omitted from the JSON when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetaEntry {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_seen: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pinned_at: Option<DateTime<Utc>>,
	#[serde(default, rename = "ssh_count")]
	pub use_count: u64,
}

type MetaMap = HashMap<String, MetaEntry>;

/// Owns the sidecar file; in-process operations are serialized by an
/// `RwLock` before any file-lock traffic.
pub struct MetadataStore {
	path: PathBuf,
	guard: RwLock<()>,
}

impl MetadataStore {
	pub fn new(path: PathBuf) -> Self {
		MetadataStore { path, guard: RwLock::new(()) }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn ensure_parent_dir(&self, op: &str) -> Result<(), SshmError> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() && !parent.exists() {
				fs::create_dir_all(parent).map_err(|e| SshmError::io(op, Some(parent), e))?;
				#[cfg(unix)]
				{
					use std::os::unix::fs::PermissionsExt;
					let perms = fs::Permissions::from_mode(0o750);
					let _ = fs::set_permissions(parent, perms);
				}
			}
		}
		Ok(())
	}

	/// Returns an empty map if the file does not exist.
	pub fn load_all(&self) -> Result<MetaMap, SshmError> {
		let _r = self.guard.read().unwrap_or_else(|e| e.into_inner());
		self.load_all_locked("load_all")
	}

	fn load_all_locked(&self, op: &str) -> Result<MetaMap, SshmError> {
		if !self.path.exists() {
			return Ok(MetaMap::new());
		}
		let _lock = FileLock::acquire(&self.path, Mode::Shared, op)?;
		let bytes = fs::read(&self.path).map_err(|e| SshmError::io(op, Some(&self.path), e))?;
		if bytes.is_empty() {
			return Ok(MetaMap::new());
		}
		serde_json::from_slice(&bytes)
			.map_err(|e| SshmError::Malformed { op: op.to_string(), message: e.to_string() })
	}

	/// Atomic replacement: ensure the parent dir exists, take the
	/// exclusive lock, serialize, write to `<file>.tmp`, rename over
	/// `<file>`, release the lock. On any error writing/renaming the temp
	/// file is removed so a crash never leaves partial bytes visible.
	pub fn save_all(&self, map: &MetaMap) -> Result<(), SshmError> {
		let _w = self.guard.write().unwrap_or_else(|e| e.into_inner());
		self.save_all_locked(map, "save_all")
	}

	fn save_all_locked(&self, map: &MetaMap, op: &str) -> Result<(), SshmError> {
		self.ensure_parent_dir(op)?;
		let _lock = FileLock::acquire(&self.path, Mode::Exclusive, op)?;

		let tmp_path = {
			let mut s = self.path.as_os_str().to_os_string();
			s.push(".tmp");
			PathBuf::from(s)
		};

		let result = (|| -> Result<(), SshmError> {
			let json = serde_json::to_vec_pretty(map)
				.map_err(|e| SshmError::Malformed { op: op.to_string(), message: e.to_string() })?;

			let mut file = {
				#[cfg(unix)]
				{
					use std::os::unix::fs::OpenOptionsExt;
					fs::OpenOptions::new()
						.create(true)
						.write(true)
						.truncate(true)
						.mode(0o600)
						.open(&tmp_path)
						.map_err(|e| SshmError::io(op, Some(&tmp_path), e))?
				}
				#[cfg(not(unix))]
				{
					fs::File::create(&tmp_path).map_err(|e| SshmError::io(op, Some(&tmp_path), e))?
				}
			};
			file.write_all(&json).map_err(|e| SshmError::io(op, Some(&tmp_path), e))?;
			file.sync_all().map_err(|e| SshmError::io(op, Some(&tmp_path), e))?;
			drop(file);

			fs::rename(&tmp_path, &self.path).map_err(|e| SshmError::io(op, Some(&self.path), e))?;
			Ok(())
		})();

		if result.is_err() {
			let _ = fs::remove_file(&tmp_path);
		}
		result
	}

	/// Load, rename the key if `old_alias` differs from `host_alias`,
	/// merge `update` into the (possibly renamed) entry, save.
	pub fn update(&self, host_alias: &str, old_alias: Option<&str>, update: MetaEntry) -> Result<(), SshmError> {
		let _w = self.guard.write().unwrap_or_else(|e| e.into_inner());
		let mut map = self.load_all_locked("update")?;
		if let Some(old) = old_alias {
			if old != host_alias {
				if let Some(entry) = map.remove(old) {
					map.insert(host_alias.to_string(), entry);
				}
			}
		}
		map.insert(host_alias.to_string(), update);
		self.save_all_locked(&map, "update")
	}

	pub fn delete(&self, alias: &str) -> Result<(), SshmError> {
		let _w = self.guard.write().unwrap_or_else(|e| e.into_inner());
		let mut map = self.load_all_locked("delete")?;
		map.remove(alias);
		self.save_all_locked(&map, "delete")
	}

	pub fn set_pinned(&self, alias: &str, pinned: bool) -> Result<(), SshmError> {
		let _w = self.guard.write().unwrap_or_else(|e| e.into_inner());
		let mut map = self.load_all_locked("set_pinned")?;
		let entry = map.entry(alias.to_string()).or_default();
		entry.pinned_at = if pinned { Some(Utc::now()) } else { None };
		self.save_all_locked(&map, "set_pinned")
	}

	/// Monotonically increments `use_count` and bumps `last_seen`. Under
	/// concurrent calls (same or cross process) the terminal file is
	/// always valid JSON with a non-decreasing count, guaranteed by the
	/// in-process write lock serializing callers ahead of the file lock.
	pub fn record_session(&self, alias: &str) -> Result<(), SshmError> {
		let _w = self.guard.write().unwrap_or_else(|e| e.into_inner());
		let mut map = self.load_all_locked("record_session")?;
		let entry = map.entry(alias.to_string()).or_default();
		entry.use_count += 1;
		entry.last_seen = Some(Utc::now());
		self.save_all_locked(&map, "record_session")?;
		debug!(alias, "session recorded");
		Ok(())
	}

	pub fn get(&self, alias: &str) -> Result<Option<MetaEntry>, SshmError> {
		let map = self.load_all()?;
		Ok(map.get(alias).cloned())
	}
}

impl Drop for MetadataStore {
	fn drop(&mut self) {
		info!(path = %self.path.display(), "metadata store closed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;
	use tempfile::TempDir;

	fn store(dir: &TempDir) -> MetadataStore {
		MetadataStore::new(dir.path().join("metadata.json"))
	}

	#[test]
	fn load_all_missing_file_is_empty() {
		let dir = TempDir::new().unwrap();
		let s = store(&dir);
		assert!(s.load_all().unwrap().is_empty());
	}

	#[test]
	fn save_then_load_round_trips() {
		let dir = TempDir::new().unwrap();
		let s = store(&dir);
		let mut map = MetaMap::new();
		map.insert("a".to_string(), MetaEntry { tags: vec!["x".into()], use_count: 3, ..Default::default() });
		s.save_all(&map).unwrap();
		let loaded = s.load_all().unwrap();
		assert_eq!(loaded.get("a").unwrap().use_count, 3);
	}

	#[test]
	fn parent_dir_created_on_first_write() {
		let dir = TempDir::new().unwrap();
		let nested = dir.path().join("nested").join("metadata.json");
		let s = MetadataStore::new(nested.clone());
		s.save_all(&MetaMap::new()).unwrap();
		assert!(nested.exists());
	}

	#[test]
	fn rename_carries_entry_to_new_alias() {
		let dir = TempDir::new().unwrap();
		let s = store(&dir);
		let mut entry = MetaEntry::default();
		entry.tags = vec!["prod".into(), "web".into()];
		entry.use_count = 7;
		s.update("old", None, entry.clone()).unwrap();

		s.update("new", Some("old"), entry).unwrap();
		let map = s.load_all().unwrap();
		assert!(map.get("old").is_none());
		assert_eq!(map.get("new").unwrap().use_count, 7);
		assert_eq!(map.get("new").unwrap().tags, vec!["prod", "web"]);
	}

	#[test]
	fn orphan_entries_survive_round_trip() {
		let dir = TempDir::new().unwrap();
		let s = store(&dir);
		s.record_session("ghost-host").unwrap();
		drop(s);
		let s2 = store(&dir);
		let map = s2.load_all().unwrap();
		assert_eq!(map.get("ghost-host").unwrap().use_count, 1);
	}

	#[test]
	fn crash_surrogate_tmp_left_behind_leaves_original_intact() {
		let dir = TempDir::new().unwrap();
		let s = store(&dir);
		let mut map = MetaMap::new();
		map.insert("a".to_string(), MetaEntry { use_count: 1, ..Default::default() });
		s.save_all(&map).unwrap();
		let original_bytes = fs::read(s.path()).unwrap();

		// Simulate a crash mid-save_all: write the tmp file but never rename.
		let tmp_path = {
			let mut p = s.path().as_os_str().to_os_string();
			p.push(".tmp");
			PathBuf::from(p)
		};
		fs::write(&tmp_path, b"{\"corrupt\": true}").unwrap();

		let after = fs::read(s.path()).unwrap();
		assert_eq!(after, original_bytes);
		let reloaded = s.load_all().unwrap();
		assert_eq!(reloaded.get("a").unwrap().use_count, 1);
	}

	#[test]
	fn concurrent_record_session_is_monotonic_and_valid_json() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("metadata.json");
		let store = Arc::new(MetadataStore::new(path));

		let mut handles = Vec::new();
		for _ in 0..10 {
			let s = Arc::clone(&store);
			handles.push(thread::spawn(move || {
				for _ in 0..10 {
					s.record_session("host-1").unwrap();
				}
			}));
		}
		for h in handles {
			h.join().unwrap();
		}

		let map = store.load_all().unwrap();
		let entry = map.get("host-1").unwrap();
		assert!(entry.use_count >= 10);
		assert!(entry.last_seen.is_some());

		// Terminal file is valid JSON.
		let bytes = fs::read(store.path()).unwrap();
		let _: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	}
}

// vim: ts=4
