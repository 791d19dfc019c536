//! # sshm — a local-machine manager for a collection of SSH host entries
//!
//! `sshm` owns two coupled on-disk resources — the user's `~/.ssh/config`
//! file and a JSON sidecar `metadata.json` — and exposes a merged,
//! searchable [`host::Host`] view over both, with command-injection-safe
//! handling of the alias handed to the shell-client subprocess.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sshm::config::Config;
//! use sshm::host::HostRepository;
//! use sshm::service::{HostService, NoopResolver};
//!
//! let config = Config::default();
//! let repo = Arc::new(HostRepository::new(config.ssh_config_path.clone(), config.metadata_path.clone()));
//! let hosts = repo.list("")?;
//! # Ok::<(), sshm::error::SshmError>(())
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod cancel;
pub mod client_pool;
pub mod config;
pub mod error;
pub mod host;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod rate_limiter;
pub mod service;
pub mod ssh_config;
pub mod ttl_cache;
pub mod validation;

pub use error::SshmError;
pub use host::{Host, HostRepository};
pub use metadata::{MetaEntry, MetadataStore};
pub use service::HostService;

// vim: ts=4
