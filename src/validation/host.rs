//! Hostname and port validation.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;

use super::ValidationError;

fn label_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| {
		Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?$").expect("static label regex is valid")
	})
}

/// Non-empty, either an IP literal or hostname-label rules (labels
/// non-empty, no leading/trailing hyphen, characters from `[A-Za-z0-9.-]`).
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
	if hostname.is_empty() {
		return Err(ValidationError("hostname must not be empty".into()));
	}
	if hostname.parse::<IpAddr>().is_ok() {
		return Ok(());
	}
	if hostname.starts_with('.') || hostname.ends_with('.') {
		return Err(ValidationError(format!("hostname {hostname:?} has a leading/trailing dot")));
	}
	for label in hostname.split('.') {
		if label.is_empty() {
			return Err(ValidationError(format!("hostname {hostname:?} has an empty label")));
		}
		if !label_pattern().is_match(label) {
			return Err(ValidationError(format!(
				"hostname label {label:?} is not a valid DNS label"
			)));
		}
	}
	Ok(())
}

/// Port is 0 (meaning "use default 22") or in 1..65535.
pub fn validate_port(port: u32) -> Result<(), ValidationError> {
	if port > 65535 {
		return Err(ValidationError(format!("port {port} exceeds 65535")));
	}
	Ok(())
}
