//! Alias shape and the launch-session safety rule.

use std::sync::OnceLock;

use regex::Regex;

use super::ValidationError;

const MAX_ALIAS_LEN: usize = 100;

fn alias_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static alias regex is valid"))
}

/// Characters forbidden in an alias by the launch-safety rule, beyond
/// what the whitelist regex already excludes — kept as an explicit
/// denylist so the defense-in-depth check is easy to audit on its own.
const FORBIDDEN_CHARS: &[char] =
	&[';', '&', '|', '`', '$', '(', ')', '<', '>', '"', '\'', '\n', '\r', '\t'];

/// `alias` matches `^[A-Za-z0-9_.-]+$`, length 1..100.
pub fn validate_alias(alias: &str) -> Result<(), ValidationError> {
	if alias.is_empty() || alias.len() > MAX_ALIAS_LEN {
		return Err(ValidationError(format!(
			"alias length must be 1..={MAX_ALIAS_LEN}, got {}",
			alias.len()
		)));
	}
	if !alias_pattern().is_match(alias) {
		return Err(ValidationError(format!(
			"alias {alias:?} contains characters outside [A-Za-z0-9_.-]"
		)));
	}
	Ok(())
}

/// Defense-in-depth check run immediately before any subprocess
/// hand-off. Broader than [`validate_alias`]: rejects `..`, path
/// separators and shell metacharacters explicitly, in addition to the
/// regex whitelist, so a future relaxation of the whitelist alone cannot
/// silently reopen an injection path.
pub fn validate_alias_for_launch(alias: &str) -> Result<(), ValidationError> {
	if alias.is_empty() || alias.len() > MAX_ALIAS_LEN {
		return Err(ValidationError(format!(
			"alias length must be 1..={MAX_ALIAS_LEN}, got {}",
			alias.len()
		)));
	}
	if alias.contains("..") || alias.contains('/') || alias.contains('\\') {
		return Err(ValidationError(format!(
			"alias {alias:?} contains a path separator or parent-dir reference"
		)));
	}
	if let Some(c) = alias.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
		return Err(ValidationError(format!("alias {alias:?} contains forbidden character {c:?}")));
	}
	if !alias_pattern().is_match(alias) {
		return Err(ValidationError(format!(
			"alias {alias:?} contains characters outside [A-Za-z0-9_.-]"
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_typical_alias() {
		assert!(validate_alias("prod-01.web_1").is_ok());
	}

	#[test]
	fn rejects_empty() {
		assert!(validate_alias("").is_err());
	}

	#[test]
	fn boundary_100_chars_accepted() {
		let alias = "a".repeat(100);
		assert!(validate_alias(&alias).is_ok());
	}

	#[test]
	fn boundary_101_chars_rejected() {
		let alias = "a".repeat(101);
		assert!(validate_alias(&alias).is_err());
	}

	#[test]
	fn rejects_path_separator() {
		assert!(validate_alias("a/b").is_err());
	}

	#[test]
	fn rejects_space() {
		assert!(validate_alias("a b").is_err());
	}

	#[test]
	fn launch_rejects_command_injection() {
		assert!(validate_alias_for_launch("srv;rm -rf /").is_err());
	}

	#[test]
	fn launch_rejects_dotdot_even_without_slash() {
		// '..' alone does not violate the regex whitelist, but must still be rejected.
		assert!(validate_alias_for_launch("..").is_err());
	}

	#[test]
	fn launch_rejects_backtick() {
		assert!(validate_alias_for_launch("srv`whoami`").is_err());
	}

	#[test]
	fn launch_accepts_clean_alias() {
		assert!(validate_alias_for_launch("prod-01").is_ok());
	}
}
