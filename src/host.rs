//! The merged `Host` entity and the `HostRepository` that keeps the
//! shell-client config and the metadata sidecar coherent.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::SshmError;
use crate::metadata::{MetaEntry, MetadataStore};
use crate::ssh_config::codec::{Config, HostBlock};
use crate::ssh_config::ConfigCache;
use crate::validation;

/// The merged view of one entry: config-derived fields plus
/// metadata-derived annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
	pub alias: String,
	pub hostname: String,
	pub user: Option<String>,
	pub port: u32,
	pub identity_files: Vec<String>,
	pub tags: Vec<String>,
	pub pinned_at: Option<DateTime<Utc>>,
	pub last_seen: Option<DateTime<Utc>>,
	pub use_count: u64,
	/// Verbatim (keyword, value) directives not promoted to a first-class
	/// field above (proxy-jump, forwardings, ciphers, keepalive, etc.).
	pub extra_directives: Vec<(String, String)>,
}

impl Host {
	fn from_block_and_meta(block: &HostBlock, meta: Option<&MetaEntry>) -> Self {
		let meta = meta.cloned().unwrap_or_default();
		Host {
			alias: block.alias.clone(),
			hostname: block.hostname().unwrap_or_default().to_string(),
			user: block.user().map(str::to_string),
			port: block.port().unwrap_or(0),
			identity_files: block.identity_files(),
			tags: meta.tags,
			pinned_at: meta.pinned_at,
			last_seen: meta.last_seen,
			use_count: meta.use_count,
			extra_directives: block.opaque_directives(),
		}
	}

	fn to_block(&self) -> HostBlock {
		let mut block = HostBlock::new(&self.alias);
		block.set_singular("HostName", Some(&self.hostname));
		block.set_singular("User", self.user.as_deref());
		if self.port != 0 {
			block.set_singular("Port", Some(&self.port.to_string()));
		}
		block.set_identity_files(&self.identity_files);
		for (k, v) in &self.extra_directives {
			block.set_singular(k, Some(v));
		}
		block
	}

	fn to_meta_entry(&self) -> MetaEntry {
		MetaEntry {
			tags: self.tags.clone(),
			last_seen: self.last_seen,
			pinned_at: self.pinned_at,
			use_count: self.use_count,
		}
	}

	fn validate(&self) -> Result<(), SshmError> {
		validation::validate_alias(&self.alias)
			.map_err(|e| SshmError::Validation { op: "validate".into(), message: e.0 })?;
		validation::validate_hostname(&self.hostname)
			.map_err(|e| SshmError::Validation { op: "validate".into(), message: e.0 })?;
		validation::validate_port(self.port)
			.map_err(|e| SshmError::Validation { op: "validate".into(), message: e.0 })?;
		if self.identity_files.len() != dedup_count(&self.identity_files) {
			return Err(SshmError::Validation {
				op: "validate".into(),
				message: format!("identity_files for {:?} contains duplicates", self.alias),
			});
		}
		Ok(())
	}
}

fn dedup_count(items: &[String]) -> usize {
	let mut seen = std::collections::HashSet::new();
	items.iter().filter(|i| seen.insert(i.as_str())).count()
}

/// Combines [`ConfigCache`]/[`Config`] and [`MetadataStore`] into the
/// alias-keyed host view, mutating both files coherently.
pub struct HostRepository {
	config_path: PathBuf,
	cache: ConfigCache,
	metadata: MetadataStore,
	/// Serializes config-file mutations within this process, ahead of any
	/// file-lock traffic metadata writes incur.
	write_lock: Mutex<()>,
}

impl HostRepository {
	pub fn new(config_path: PathBuf, metadata_path: PathBuf) -> Self {
		HostRepository {
			config_path,
			cache: ConfigCache::new(),
			metadata: MetadataStore::new(metadata_path),
			write_lock: Mutex::new(()),
		}
	}

	fn read_config(&self, op: &str) -> Result<Config, SshmError> {
		if let Some(cfg) = self.cache.get(&self.config_path) {
			return Ok(cfg);
		}
		let bytes = match std::fs::read(&self.config_path) {
			Ok(b) => b,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
			Err(e) => return Err(SshmError::io(op, Some(&self.config_path), e)),
		};
		let cfg = Config::parse(&bytes)?;
		self.cache.set(&self.config_path, cfg.clone());
		Ok(cfg)
	}

	/// Writes via `<file>.tmp` then `rename`, the same atomic-replacement
	/// shape `MetadataStore::save_all_locked` uses, so a concurrent reader
	/// or a crash mid-write never observes a truncated or partial config
	/// file.
	fn write_config(&self, cfg: &Config, op: &str) -> Result<(), SshmError> {
		if let Some(parent) = self.config_path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent).map_err(|e| SshmError::io(op, Some(parent), e))?;
			}
		}

		let tmp_path = {
			let mut s = self.config_path.as_os_str().to_os_string();
			s.push(".tmp");
			PathBuf::from(s)
		};

		let result = (|| -> Result<(), SshmError> {
			let mut file =
				std::fs::File::create(&tmp_path).map_err(|e| SshmError::io(op, Some(&tmp_path), e))?;
			file.write_all(&cfg.serialize()).map_err(|e| SshmError::io(op, Some(&tmp_path), e))?;
			file.sync_all().map_err(|e| SshmError::io(op, Some(&tmp_path), e))?;
			drop(file);
			std::fs::rename(&tmp_path, &self.config_path)
				.map_err(|e| SshmError::io(op, Some(&self.config_path), e))?;
			Ok(())
		})();

		if result.is_err() {
			let _ = std::fs::remove_file(&tmp_path);
			return result;
		}

		self.cache.set(&self.config_path, cfg.clone());
		Ok(())
	}

	/// All hosts whose alias, hostname, user, or any tag contains `query`
	/// (case-insensitive substring); empty query returns all. Pinned hosts
	/// sort first (most recent `pinned_at` first), then alias ascending
	/// byte-wise.
	#[instrument(skip(self), fields(op = "list"))]
	pub fn list(&self, query: &str) -> Result<Vec<Host>, SshmError> {
		let cfg = self.read_config("list")?;
		let meta = self.metadata.load_all()?;
		let q = query.to_lowercase();

		let mut hosts: Vec<Host> = cfg
			.blocks()
			.map(|b| Host::from_block_and_meta(b, meta.get(&b.alias)))
			.filter(|h| {
				q.is_empty()
					|| h.alias.to_lowercase().contains(&q)
					|| h.hostname.to_lowercase().contains(&q)
					|| h.user.as_deref().unwrap_or_default().to_lowercase().contains(&q)
					|| h.tags.iter().any(|t| t.to_lowercase().contains(&q))
			})
			.collect();

		hosts.sort_by(|a, b| match (a.pinned_at, b.pinned_at) {
			(Some(_), None) => std::cmp::Ordering::Less,
			(None, Some(_)) => std::cmp::Ordering::Greater,
			(Some(pa), Some(pb)) => pb.cmp(&pa).then_with(|| a.alias.as_bytes().cmp(b.alias.as_bytes())),
			(None, None) => a.alias.as_bytes().cmp(b.alias.as_bytes()),
		});
		Ok(hosts)
	}

	pub fn get(&self, alias: &str) -> Result<Option<Host>, SshmError> {
		let cfg = self.read_config("get")?;
		match cfg.find(alias) {
			Some(block) => {
				let meta = self.metadata.get(alias)?;
				Ok(Some(Host::from_block_and_meta(block, meta.as_ref())))
			}
			None => Ok(None),
		}
	}

	/// Validates, fails `SshmError::Duplicate` if the alias exists, writes config
	/// then metadata; if the metadata write fails the config write is
	/// rolled back. Orphaned metadata under the same alias is **merged**
	/// into the new host (tags/pinned_at/last_seen/use_count carried over)
	/// rather than discarded.
	#[instrument(skip(self, host), fields(op = "add", alias = %host.alias))]
	pub fn add(&self, mut host: Host) -> Result<Host, SshmError> {
		host.validate()?;
		let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

		let mut cfg = self.read_config("add")?;
		if cfg.find(&host.alias).is_some() {
			return Err(SshmError::Duplicate { op: "add".into(), alias: host.alias });
		}

		if let Some(orphan) = self.metadata.get(&host.alias)? {
			info!(alias = %host.alias, "merging orphaned metadata into re-added host");
			host.tags = orphan.tags;
			host.pinned_at = orphan.pinned_at;
			host.last_seen = orphan.last_seen;
			host.use_count = orphan.use_count;
		}

		cfg.upsert(host.to_block());
		self.write_config(&cfg, "add")?;

		if let Err(e) = self.metadata.update(&host.alias, None, host.to_meta_entry()) {
			warn!(alias = %host.alias, error = %e, "rolling back config write after metadata failure");
			cfg.remove(&host.alias);
			let _ = self.write_config(&cfg, "add:rollback");
			return Err(e);
		}
		Ok(host)
	}

	/// Validates `new`; if `old`'s alias differs, renames in both files.
	/// On partial failure, best-effort rollback is attempted and the
	/// original error surfaced. `new` carries the full desired metadata
	/// state (tags, pin, last-seen, use-count) — callers that want to
	/// preserve existing metadata across a rename fetch via [`Self::get`]
	/// first and mutate just the alias, rather than relying on `update`
	/// to merge anything in for them.
	#[instrument(skip(self, old_alias, new), fields(op = "update", old_alias = %old_alias, new_alias = %new.alias))]
	pub fn update(&self, old_alias: &str, mut new: Host) -> Result<Host, SshmError> {
		new.validate()?;
		let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

		let mut cfg = self.read_config("update")?;
		if cfg.find(old_alias).is_none() {
			return Err(SshmError::NotFound { op: "update".into(), alias: old_alias.to_string() });
		}
		if old_alias != new.alias && cfg.find(&new.alias).is_some() {
			return Err(SshmError::Duplicate { op: "update".into(), alias: new.alias });
		}

		if old_alias != new.alias {
			cfg.remove(old_alias);
		}
		cfg.upsert(new.to_block());
		if let Err(e) = self.write_config(&cfg, "update") {
			self.cache.invalidate();
			return Err(e);
		}

		let old_for_meta = if old_alias != new.alias { Some(old_alias) } else { None };
		if let Err(e) = self.metadata.update(&new.alias, old_for_meta, new.to_meta_entry()) {
			warn!(old_alias, new_alias = %new.alias, error = %e, "update metadata write failed; config left updated");
			return Err(e);
		}
		Ok(new)
	}

	/// Fails `SshmError::NotFound` if the alias is absent from config; removes
	/// from config then metadata.
	#[instrument(skip(self), fields(op = "delete", alias))]
	pub fn delete(&self, alias: &str) -> Result<(), SshmError> {
		let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
		let mut cfg = self.read_config("delete")?;
		if !cfg.remove(alias) {
			return Err(SshmError::NotFound { op: "delete".into(), alias: alias.to_string() });
		}
		self.write_config(&cfg, "delete")?;
		self.metadata.delete(alias)
	}

	pub fn set_pinned(&self, alias: &str, pinned: bool) -> Result<(), SshmError> {
		self.metadata.set_pinned(alias, pinned)
	}

	pub fn record_session(&self, alias: &str) -> Result<(), SshmError> {
		self.metadata.record_session(alias)
	}

	pub fn config_path(&self) -> &Path {
		&self.config_path
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn repo(dir: &TempDir) -> HostRepository {
		HostRepository::new(dir.path().join("config"), dir.path().join("metadata.json"))
	}

	fn sample(alias: &str) -> Host {
		Host {
			alias: alias.to_string(),
			hostname: "10.0.0.1".to_string(),
			user: Some("ops".to_string()),
			port: 22,
			identity_files: vec![],
			tags: vec![],
			pinned_at: None,
			last_seen: None,
			use_count: 0,
			extra_directives: vec![],
		}
	}

	#[test]
	fn add_then_list() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		r.add(sample("prod-01")).unwrap();
		assert!(dir.path().join("metadata.json").exists());

		let hosts = r.list("").unwrap();
		assert_eq!(hosts.len(), 1);
		assert_eq!(hosts[0].alias, "prod-01");
		assert_eq!(hosts[0].hostname, "10.0.0.1");
		assert_eq!(hosts[0].user.as_deref(), Some("ops"));
		assert_eq!(hosts[0].port, 22);
	}

	#[test]
	fn add_rejects_duplicate_alias() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		r.add(sample("prod-01")).unwrap();
		let err = r.add(sample("prod-01")).unwrap_err();
		assert!(matches!(err, SshmError::Duplicate { .. }));
	}

	#[test]
	fn pin_ordering() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		r.add(sample("a-srv")).unwrap();
		r.add(sample("m-srv")).unwrap();
		r.add(sample("z-srv")).unwrap();

		r.set_pinned("z-srv", true).unwrap();
		std::thread::sleep(std::time::Duration::from_millis(5));
		r.set_pinned("a-srv", true).unwrap();

		let hosts = r.list("").unwrap();
		let order: Vec<&str> = hosts.iter().map(|h| h.alias.as_str()).collect();
		assert_eq!(order, vec!["a-srv", "z-srv", "m-srv"]);
	}

	#[test]
	fn rename_preserves_metadata() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		let mut old = sample("old");
		old.tags = vec!["prod".to_string(), "web".to_string()];
		r.add(old).unwrap();
		for _ in 0..7 {
			r.record_session("old").unwrap();
		}

		let mut renamed = r.get("old").unwrap().unwrap();
		renamed.alias = "new".to_string();
		r.update("old", renamed).unwrap();

		let hosts = r.list("").unwrap();
		assert_eq!(hosts.len(), 1);
		assert_eq!(hosts[0].alias, "new");
		assert_eq!(hosts[0].tags, vec!["prod", "web"]);
		assert_eq!(hosts[0].use_count, 7);
		assert!(r.get("old").unwrap().is_none());
	}

	#[test]
	fn update_with_cleared_fields_clears_metadata() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		let mut host = sample("srv");
		host.tags = vec!["prod".to_string()];
		r.add(host).unwrap();
		r.set_pinned("srv", true).unwrap();

		let mut cleared = r.get("srv").unwrap().unwrap();
		cleared.tags = vec![];
		cleared.pinned_at = None;
		r.update("srv", cleared).unwrap();

		let host = r.get("srv").unwrap().unwrap();
		assert!(host.tags.is_empty());
		assert!(host.pinned_at.is_none());
	}

	#[test]
	fn delete_removes_both_config_and_metadata() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		r.add(sample("gone")).unwrap();
		r.delete("gone").unwrap();
		assert!(r.get("gone").unwrap().is_none());
		let meta = r.metadata.load_all().unwrap();
		assert!(meta.get("gone").is_none());
	}

	#[test]
	fn delete_missing_alias_is_not_found() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		let err = r.delete("nope").unwrap_err();
		assert!(matches!(err, SshmError::NotFound { .. }));
	}

	#[test]
	fn orphan_metadata_merges_on_readd() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		let mut h = sample("ghost");
		h.tags = vec!["k8s".to_string()];
		r.add(h).unwrap();
		r.set_pinned("ghost", true).unwrap();
		r.delete("ghost").unwrap(); // deletes both config and metadata

		let meta = r.metadata.load_all().unwrap();
		assert!(meta.get("ghost").is_none(), "delete removes metadata too, by design");

		// Simulate metadata surviving independently of a config delete: set
		// it back up as an orphan (no config block) and re-add.
		r.metadata.set_pinned("ghost", true).unwrap();
		let readded = r.add(sample("ghost")).unwrap();
		assert!(readded.pinned_at.is_some());
	}

	#[test]
	fn validation_rejects_bad_hostname() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		let mut h = sample("x");
		h.hostname = "".to_string();
		let err = r.add(h).unwrap_err();
		assert!(matches!(err, SshmError::Validation { .. }));
	}

	#[test]
	fn rejects_duplicate_identity_files() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		let mut h = sample("x");
		h.identity_files = vec!["~/.ssh/id".to_string(), "~/.ssh/id".to_string()];
		let err = r.add(h).unwrap_err();
		assert!(matches!(err, SshmError::Validation { .. }));
	}

	#[test]
	fn untouched_blocks_round_trip_on_unrelated_mutation() {
		let dir = TempDir::new().unwrap();
		let r = repo(&dir);
		r.add(sample("a")).unwrap();
		r.add(sample("b")).unwrap();
		r.set_pinned("b", true).unwrap();

		let bytes_before = std::fs::read(r.config_path()).unwrap();
		r.set_pinned("b", false).unwrap(); // metadata-only, config untouched
		let bytes_after = std::fs::read(r.config_path()).unwrap();
		assert_eq!(bytes_before, bytes_after);
	}
}

// vim: ts=4
