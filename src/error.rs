//! Error types for sshm operations

use std::error::Error;
use std::fmt;
use std::io;

/// Unified error type for the host repository and its supporting primitives.
///
/// Each variant carries the contextual fields called for by the error
/// taxonomy: operation name, alias/path, and the wrapped source error where
/// one exists. Variants are never converted into one another — callers see
/// the original kind.
#[derive(Debug)]
pub enum SshmError {
	/// Input violates a data-model invariant (alias/hostname/port shape).
	Validation { op: String, message: String },

	/// Alias not present in the config file / repository.
	NotFound { op: String, alias: String },

	/// Alias already present in the config file.
	Duplicate { op: String, alias: String },

	/// Read/write/rename/mkdir failure.
	Io { op: String, path: Option<String>, source: io::Error },

	/// Advisory lock unavailable within the 5 second deadline.
	LockTimeout { op: String, path: String },

	/// Config or JSON content could not be parsed.
	Malformed { op: String, message: String },

	/// Alias failed the launch-session safety rule, or resolves to nothing.
	Security { op: String, alias: String, reason: String },

	/// Caller-supplied cancellation token fired before completion.
	Canceled { op: String },

	/// A deadline elapsed before completion.
	Timeout { op: String },

	/// Token bucket exhausted on a non-blocking `allow()`.
	RateLimited { op: String },

	/// Non-retryable remote HTTP error from an LLM or other upstream call.
	Upstream { op: String, status: Option<u16>, message: String },
}

impl fmt::Display for SshmError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SshmError::Validation { op, message } => {
				write!(f, "{op}: validation failed: {message}")
			}
			SshmError::NotFound { op, alias } => write!(f, "{op}: host {alias:?} not found"),
			SshmError::Duplicate { op, alias } => write!(f, "{op}: host {alias:?} already exists"),
			SshmError::Io { op, path, source } => match path {
				Some(p) => write!(f, "{op}: I/O error on {p}: {source}"),
				None => write!(f, "{op}: I/O error: {source}"),
			},
			SshmError::LockTimeout { op, path } => {
				write!(f, "{op}: timed out acquiring lock on {path}")
			}
			SshmError::Malformed { op, message } => write!(f, "{op}: malformed input: {message}"),
			SshmError::Security { op, alias, reason } => {
				write!(f, "{op}: alias {alias:?} rejected: {reason}")
			}
			SshmError::Canceled { op } => write!(f, "{op}: canceled"),
			SshmError::Timeout { op } => write!(f, "{op}: timed out"),
			SshmError::RateLimited { op } => write!(f, "{op}: rate limited"),
			SshmError::Upstream { op, status, message } => match status {
				Some(code) => write!(f, "{op}: upstream error ({code}): {message}"),
				None => write!(f, "{op}: upstream error: {message}"),
			},
		}
	}
}

impl Error for SshmError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SshmError::Io { source, .. } => Some(source),
			_ => None,
		}
	}
}

impl SshmError {
	pub fn io(op: impl Into<String>, path: Option<&std::path::Path>, source: io::Error) -> Self {
		SshmError::Io {
			op: op.into(),
			path: path.map(|p| p.display().to_string()),
			source,
		}
	}

	/// Whether the error kind permits an automatic retry: timeouts,
	/// connection resets, and classified-temporary upstream errors.
	pub fn is_retryable(&self) -> bool {
		match self {
			SshmError::Timeout { .. } => true,
			SshmError::Upstream { status, message, .. } => {
				matches!(status, Some(502) | Some(503) | Some(504))
					|| message.to_lowercase().contains("temporary")
					|| message.to_lowercase().contains("connection reset")
			}
			SshmError::Io { source, .. } => {
				matches!(source.kind(), io::ErrorKind::TimedOut | io::ErrorKind::ConnectionReset)
			}
			_ => false,
		}
	}
}


// vim: ts=4
