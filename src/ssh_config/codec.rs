//! Parse/serialize the `Host <pattern>` block grammar, preserving unknown
//! directives, comments, and blank lines so that untouched blocks round
//! trip byte-for-byte (the non-destructive-edit rule).

use crate::error::SshmError;

/// A single line inside a `Host` block: either a recognized `Keyword value`
/// directive or an opaque line (comment, blank, or a directive this
/// implementation doesn't promote to a first-class `Host` field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
	/// Exact original line text (no trailing newline).
	pub raw: String,
	/// Directive keyword with its original casing, `None` for
	/// comments/blank lines.
	pub keyword: Option<String>,
	/// Trimmed value portion, `None` for comments/blank lines.
	pub value: Option<String>,
}

impl Directive {
	fn parse(raw: &str) -> Self {
		let trimmed = raw.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			return Directive { raw: raw.to_string(), keyword: None, value: None };
		}
		match trimmed.split_once(char::is_whitespace) {
			Some((kw, rest)) => Directive {
				raw: raw.to_string(),
				keyword: Some(kw.to_string()),
				value: Some(rest.trim().to_string()),
			},
			None => Directive { raw: raw.to_string(), keyword: Some(trimmed.to_string()), value: None },
		}
	}

	fn is_opaque(&self) -> bool {
		self.keyword.is_none()
	}

	fn keyword_eq(&self, kw: &str) -> bool {
		self.keyword.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(kw))
	}

	fn new_known(keyword: &str, value: &str) -> Self {
		Directive {
			raw: format!("\t{keyword} {value}"),
			keyword: Some(keyword.to_string()),
			value: Some(value.to_string()),
		}
	}
}

/// One `Host <patterns>` block: a header line plus its directives in
/// source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBlock {
	/// Exact original `Host ...` line text.
	pub header_raw: String,
	/// First pattern on the header line — the stable alias / map key.
	pub alias: String,
	pub directives: Vec<Directive>,
}

impl HostBlock {
	pub fn new(alias: &str) -> Self {
		HostBlock { header_raw: format!("Host {alias}"), alias: alias.to_string(), directives: vec![] }
	}

	/// Whether this is OpenSSH's catch-all defaults block (`Host *`),
	/// which has no stable alias and is excluded from the alias-keyed
	/// view, but still round-trips byte-identical.
	pub fn is_wildcard(&self) -> bool {
		self.alias == "*"
	}

	fn header_patterns(&self) -> Vec<&str> {
		self.header_raw.split_whitespace().skip(1).collect()
	}

	/// Rewrite just the first pattern token on the header line, leaving
	/// any additional patterns and original spacing style untouched.
	fn set_alias(&mut self, new_alias: &str) {
		let rest: Vec<&str> = self.header_patterns().into_iter().skip(1).collect();
		let mut header = format!("Host {new_alias}");
		for p in rest {
			header.push(' ');
			header.push_str(p);
		}
		self.header_raw = header;
		self.alias = new_alias.to_string();
	}

	fn first_value(&self, keyword: &str) -> Option<&str> {
		self.directives.iter().find(|d| d.keyword_eq(keyword)).and_then(|d| d.value.as_deref())
	}

	pub fn hostname(&self) -> Option<&str> {
		self.first_value("HostName")
	}

	pub fn user(&self) -> Option<&str> {
		self.first_value("User")
	}

	pub fn port(&self) -> Option<u32> {
		self.first_value("Port").and_then(|v| v.parse().ok())
	}

	pub fn identity_files(&self) -> Vec<String> {
		self.directives
			.iter()
			.filter(|d| d.keyword_eq("IdentityFile"))
			.filter_map(|d| d.value.clone())
			.collect()
	}

	/// Every directive not promoted to a first-class field, verbatim
	/// (keyword, value) pairs — the open-ended set of shell-client
	/// directives.
	pub fn opaque_directives(&self) -> Vec<(String, String)> {
		const KNOWN: &[&str] = &["HostName", "User", "Port", "IdentityFile"];
		self.directives
			.iter()
			.filter(|d| !d.is_opaque())
			.filter(|d| !KNOWN.iter().any(|k| d.keyword_eq(k)))
			.map(|d| (d.keyword.clone().unwrap(), d.value.clone().unwrap_or_default()))
			.collect()
	}

	/// Insert or update a singular (at most one occurrence) known
	/// directive. `None` removes every occurrence of `keyword`.
	pub fn set_singular(&mut self, keyword: &str, value: Option<&str>) {
		let idx = self.directives.iter().position(|d| d.keyword_eq(keyword));
		match (idx, value) {
			(Some(i), Some(v)) => {
				let kw = self.directives[i].keyword.clone().unwrap();
				self.directives[i] = Directive::new_known(&kw, v);
			}
			(Some(i), None) => {
				self.directives.remove(i);
			}
			(None, Some(v)) => {
				self.directives.push(Directive::new_known(keyword, v));
			}
			(None, None) => {}
		}
	}

	/// Replace every `IdentityFile` directive with `paths`, in order,
	/// inserted at the position of the first previous occurrence (or
	/// appended if there was none) so unrelated directives keep their
	/// relative order.
	pub fn set_identity_files(&mut self, paths: &[String]) {
		let first_idx = self.directives.iter().position(|d| d.keyword_eq("IdentityFile"));
		self.directives.retain(|d| !d.keyword_eq("IdentityFile"));
		let insert_at = first_idx.unwrap_or(self.directives.len()).min(self.directives.len());
		let new_lines: Vec<Directive> =
			paths.iter().map(|p| Directive::new_known("IdentityFile", p)).collect();
		self.directives.splice(insert_at..insert_at, new_lines);
	}
}

/// A line belonging to the file but not to any `Host` block: a comment or
/// blank line appearing before the first block or between two blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
	Raw(String),
	Block(HostBlock),
}

/// The parsed config file: an ordered sequence of top-level lines and
/// `Host` blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
	pub items: Vec<Item>,
	had_trailing_newline: bool,
}

impl Config {
	pub fn empty() -> Self {
		Config { items: vec![], had_trailing_newline: true }
	}

	/// Parse the `Host <pattern>` block grammar.
	///
	/// `SshmError::Malformed` is returned only for the single unrecoverable
	/// structure: an indented/plain directive line with no preceding
	/// `Host` line. Unknown directives, blank lines and comments never
	/// error.
	pub fn parse(bytes: &[u8]) -> Result<Self, SshmError> {
		let text = String::from_utf8_lossy(bytes);
		let had_trailing_newline = text.ends_with('\n');
		let mut items = Vec::new();
		let mut current: Option<HostBlock> = None;

		for line in text.lines() {
			let trimmed = line.trim();
			let is_host_line =
				trimmed.split_once(char::is_whitespace).map(|(k, _)| k).unwrap_or(trimmed).eq_ignore_ascii_case("host");

			if is_host_line && !trimmed.is_empty() {
				if let Some(block) = current.take() {
					items.push(Item::Block(block));
				}
				let patterns: Vec<&str> = trimmed.split_whitespace().skip(1).collect();
				if patterns.is_empty() {
					return Err(SshmError::Malformed {
						op: "parse".into(),
						message: "Host line has no pattern".into(),
					});
				}
				current = Some(HostBlock {
					header_raw: line.to_string(),
					alias: patterns[0].to_string(),
					directives: vec![],
				});
				continue;
			}

			if trimmed.is_empty() || trimmed.starts_with('#') {
				match current.as_mut() {
					Some(block) => block.directives.push(Directive::parse(line)),
					None => items.push(Item::Raw(line.to_string())),
				}
				continue;
			}

			match current.as_mut() {
				Some(block) => block.directives.push(Directive::parse(line)),
				None => {
					return Err(SshmError::Malformed {
						op: "parse".into(),
						message: format!("directive {trimmed:?} has no preceding Host line"),
					});
				}
			}
		}
		if let Some(block) = current.take() {
			items.push(Item::Block(block));
		}

		Ok(Config { items, had_trailing_newline })
	}

	/// Serialize back to bytes such that `parse(serialize(c)) == c` for
	/// any `c` produced by `parse`.
	pub fn serialize(&self) -> Vec<u8> {
		let mut lines: Vec<&str> = Vec::new();
		for item in &self.items {
			match item {
				Item::Raw(s) => lines.push(s),
				Item::Block(b) => {
					lines.push(&b.header_raw);
					for d in &b.directives {
						lines.push(&d.raw);
					}
				}
			}
		}
		let mut out = lines.join("\n");
		if self.had_trailing_newline && !out.is_empty() {
			out.push('\n');
		} else if self.had_trailing_newline && out.is_empty() {
			// empty file that originally ended in a newline stays empty
		}
		out.into_bytes()
	}

	pub fn find(&self, alias: &str) -> Option<&HostBlock> {
		self.items.iter().find_map(|i| match i {
			Item::Block(b) if b.alias == alias => Some(b),
			_ => None,
		})
	}

	pub fn find_mut(&mut self, alias: &str) -> Option<&mut HostBlock> {
		self.items.iter_mut().find_map(|i| match i {
			Item::Block(b) if b.alias == alias => Some(b),
			_ => None,
		})
	}

	/// All addressable blocks (excludes the `Host *` catch-all), in file
	/// order.
	pub fn blocks(&self) -> impl Iterator<Item = &HostBlock> {
		self.items.iter().filter_map(|i| match i {
			Item::Block(b) if !b.is_wildcard() => Some(b),
			_ => None,
		})
	}

	/// Insert a new block, or replace the existing block with the same
	/// alias in place. Replacing never touches any other item; inserting
	/// appends after the last existing block, separated by one blank
	/// line.
	pub fn upsert(&mut self, block: HostBlock) {
		if let Some(pos) = self.items.iter().position(
			|i| matches!(i, Item::Block(b) if b.alias == block.alias),
		) {
			self.items[pos] = Item::Block(block);
			return;
		}
		let last_is_blank = matches!(self.items.last(), Some(Item::Raw(s)) if s.trim().is_empty());
		if !self.items.is_empty() && !last_is_blank {
			self.items.push(Item::Raw(String::new()));
		}
		self.items.push(Item::Block(block));
	}

	/// Remove the block with the given alias. Returns `true` if a block
	/// was removed.
	pub fn remove(&mut self, alias: &str) -> bool {
		let before = self.items.len();
		self.items.retain(|i| !matches!(i, Item::Block(b) if b.alias == alias));
		self.items.len() != before
	}

	/// Rename a block's alias in place, touching only its header line's
	/// first pattern token.
	pub fn rename(&mut self, old: &str, new: &str) -> bool {
		match self.find_mut(old) {
			Some(block) => {
				block.set_alias(new);
				true
			}
			None => false,
		}
	}
}
