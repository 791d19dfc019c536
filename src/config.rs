//! Unified configuration for `sshm`.
//!
//! Priority chain, highest last:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (`~/.config/sshm/config.toml`)
//! 3. Environment variables (`SSHM_*` prefix)
//! 4. CLI flags (applied by `main.rs`, highest priority)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Single source of truth for `sshm` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Path to the shell-client config file (`~/.ssh/config` by default).
	pub ssh_config_path: PathBuf,

	/// Path to the sidecar metadata file.
	pub metadata_path: PathBuf,

	// ------------------------------------------------------------------
	// TTLCache tuning (LLM response cache / key-validation cache)
	// ------------------------------------------------------------------
	/// Maximum entries held by the LLM response cache.
	pub response_cache_max_size: usize,
	/// Time-to-live, in seconds, for LLM response cache entries.
	pub response_cache_ttl_secs: u64,
	/// Maximum entries held by the key-validation cache.
	pub key_cache_max_size: usize,
	/// Time-to-live, in seconds, for key-validation cache entries.
	pub key_cache_ttl_secs: u64,

	// ------------------------------------------------------------------
	// RateLimiter tuning
	// ------------------------------------------------------------------
	pub rate_limit_max_tokens: f64,
	pub rate_limit_refill_per_second: f64,
	pub rate_limit_block_on_exhaust: bool,

	// ------------------------------------------------------------------
	// ClientPool tuning
	// ------------------------------------------------------------------
	pub client_pool_size: usize,
	pub client_pool_max_idle_per_host: usize,
	pub client_pool_idle_timeout_secs: u64,
	pub client_pool_dial_timeout_secs: u64,

	/// `RUST_LOG`-style directive, consulted only if `RUST_LOG` itself is
	/// unset (see `logging::init_tracing`).
	pub log_level: String,
}

impl Config {
	pub fn response_cache_ttl(&self) -> Duration {
		Duration::from_secs(self.response_cache_ttl_secs)
	}

	pub fn key_cache_ttl(&self) -> Duration {
		Duration::from_secs(self.key_cache_ttl_secs)
	}

	pub fn client_pool_config(&self) -> crate::client_pool::ClientPoolConfig {
		crate::client_pool::ClientPoolConfig {
			size: self.client_pool_size,
			max_idle_per_host: self.client_pool_max_idle_per_host,
			idle_timeout: Duration::from_secs(self.client_pool_idle_timeout_secs),
			dial_timeout: Duration::from_secs(self.client_pool_dial_timeout_secs),
			..crate::client_pool::ClientPoolConfig::default()
		}
	}

	/// Load defaults, then overlay a TOML file at `path` (if it exists),
	/// then overlay `SSHM_*` environment variables. CLI flags are applied
	/// by the caller afterwards, as the final, highest-priority layer.
	pub fn load(path: Option<&std::path::Path>) -> Self {
		let mut config = Config::default();

		if let Some(path) = path {
			match std::fs::read_to_string(path) {
				Ok(text) => match toml::from_str::<Config>(&text) {
					Ok(parsed) => config = parsed,
					Err(e) => warn!(path = %path.display(), error = %e, "ignoring malformed config file"),
				},
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					debug!(path = %path.display(), "no config file present, using defaults");
				}
				Err(e) => warn!(path = %path.display(), error = %e, "could not read config file"),
			}
		}

		config.apply_env_overrides();
		config
	}

	fn apply_env_overrides(&mut self) {
		if let Ok(v) = std::env::var("SSHM_SSH_CONFIG_PATH") {
			self.ssh_config_path = PathBuf::from(v);
		}
		if let Ok(v) = std::env::var("SSHM_METADATA_PATH") {
			self.metadata_path = PathBuf::from(v);
		}
		if let Ok(v) = std::env::var("SSHM_LOG_LEVEL") {
			self.log_level = v;
		}
		if let Ok(v) = std::env::var("SSHM_RATE_LIMIT_MAX_TOKENS") {
			if let Ok(n) = v.parse() {
				self.rate_limit_max_tokens = n;
			}
		}
		if let Ok(v) = std::env::var("SSHM_RATE_LIMIT_REFILL_PER_SECOND") {
			if let Ok(n) = v.parse() {
				self.rate_limit_refill_per_second = n;
			}
		}
	}
}

fn home_dir() -> PathBuf {
	std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

impl Default for Config {
	fn default() -> Self {
		Config {
			ssh_config_path: home_dir().join(".ssh").join("config"),
			metadata_path: home_dir().join(".ssh").join("sshm-metadata.json"),

			response_cache_max_size: 1000,
			response_cache_ttl_secs: 3600,
			key_cache_max_size: 500,
			key_cache_ttl_secs: 86400,

			rate_limit_max_tokens: 10.0,
			rate_limit_refill_per_second: 1.0,
			rate_limit_block_on_exhaust: true,

			client_pool_size: 4,
			client_pool_max_idle_per_host: 8,
			client_pool_idle_timeout_secs: 90,
			client_pool_dial_timeout_secs: 10,

			log_level: "info".to_string(),
		}
	}
}

/// Conventional location for the optional TOML config file.
pub fn default_config_file_path() -> PathBuf {
	home_dir().join(".config").join("sshm").join("config.toml")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_points_at_conventional_ssh_paths() {
		let config = Config::default();
		assert!(config.ssh_config_path.ends_with(".ssh/config"));
		assert!(config.metadata_path.ends_with(".ssh/sshm-metadata.json"));
	}

	#[test]
	fn load_without_file_falls_back_to_defaults() {
		let config = Config::load(Some(std::path::Path::new("/nonexistent/sshm-config.toml")));
		assert_eq!(config.rate_limit_max_tokens, 10.0);
	}

	#[test]
	fn load_overlays_toml_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, "rateLimitMaxTokens = 42.0\n").unwrap();
		let config = Config::load(Some(&path));
		assert_eq!(config.rate_limit_max_tokens, 42.0);
	}

	#[test]
	fn config_round_trips_through_json() {
		let config = Config::default();
		let json = serde_json::to_string(&config).unwrap();
		let back: Config = serde_json::from_str(&json).unwrap();
		assert_eq!(config.ssh_config_path, back.ssh_config_path);
	}
}

// vim: ts=4
