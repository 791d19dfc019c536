//! Line-oriented parser/serializer for the shell-client config file
//! (`~/.ssh/config`) plus the one-slot mtime+size cache in front of it.

pub mod cache;
pub mod codec;

pub use cache::ConfigCache;
pub use codec::{Config, Directive, HostBlock, Item};
