//! Persistent, parent-linked addresses of nodes within a rendered tree.
//!
//! A [`Path`] is rendered to a string in two places that must agree exactly:
//! the [`Reconciler`](`crate::reconciler::Reconciler`) stores it as per-node metadata when it creates
//! a DOM node, and the [`Events`](`crate::events::Events`) registry uses it (plus the event name) as
//! the lookup key for handlers.

use core::fmt::{self, Display, Formatter};
use std::rc::Rc;

/// Separates path segments in the rendered form.
pub const SEPARATOR_ELEMENT: char = '\t';

/// Separates the rendered path from the event name in handler keys.
pub const SEPARATOR_EVENT: char = '\n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Path {
	Root,
	Key(Rc<str>, Rc<Path>),
	Index(usize, Rc<Path>),
}

impl Default for Path {
	fn default() -> Self {
		Self::Root
	}
}

impl Path {
	#[must_use]
	pub fn root() -> Self {
		Self::Root
	}

	/// Addresses a child of `self`.
	///
	/// Keyed children are addressed by identity, so their path survives reordering.
	#[must_use]
	pub fn child(&self, index: usize, key: &str) -> Self {
		let parent = Rc::new(self.clone());
		if key.is_empty() {
			Self::Index(index, parent)
		} else {
			Self::Key(key.into(), parent)
		}
	}

	/// Whether this path lies at or below any of `candidates` (rendered paths).
	///
	/// Unlike a plain string prefix test, `0\t1` does not match `0\t10`.
	#[must_use]
	pub fn matches(&self, candidates: &[String]) -> bool {
		if candidates.is_empty() {
			return false;
		}
		let path = self.to_string();
		candidates.iter().any(|candidate| is_within(&path, candidate))
	}

	/// The registry key of the handler for `event` on this node.
	#[must_use]
	pub fn event_key(&self, event: &str) -> String {
		handler_key(&self.to_string(), event)
	}
}

impl Display for Path {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let mut segments = Vec::new();
		let mut path = self;
		loop {
			match path {
				Path::Root => break,
				Path::Key(key, parent) => {
					segments.push(Segment::Key(key));
					path = parent;
				}
				Path::Index(index, parent) => {
					segments.push(Segment::Index(*index));
					path = parent;
				}
			}
		}

		for (i, segment) in segments.iter().rev().enumerate() {
			if i > 0 {
				write!(f, "{}", SEPARATOR_ELEMENT)?;
			}
			match segment {
				Segment::Key(key) => f.write_str(key)?,
				Segment::Index(index) => write!(f, "{}", index)?,
			}
		}
		Ok(())
	}
}

enum Segment<'a> {
	Key(&'a str),
	Index(usize),
}

/// Appends one segment to an already rendered path.
///
/// The reconciler builds DOM node paths incrementally with this, so it must stay in sync with [`Path`]'s [`Display`].
#[must_use]
pub fn join(parent: &str, index: usize, key: &str) -> String {
	let segment = if key.is_empty() { index.to_string() } else { key.to_string() };
	if parent.is_empty() {
		segment
	} else {
		format!("{}{}{}", parent, SEPARATOR_ELEMENT, segment)
	}
}

#[must_use]
pub fn handler_key(path: &str, event: &str) -> String {
	format!("{}{}{}", path, SEPARATOR_EVENT, event)
}

fn is_within(path: &str, candidate: &str) -> bool {
	match path.strip_prefix(candidate) {
		Some(rest) => rest.is_empty() || candidate.is_empty() || rest.starts_with(SEPARATOR_ELEMENT),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_segments_root_first() {
		let path = Path::root().child(0, "").child(3, "row-7").child(2, "");
		assert_eq!(path.to_string(), "0\trow-7\t2");
		assert_eq!(Path::root().to_string(), "");
	}

	#[test]
	fn join_agrees_with_display() {
		let path = Path::root().child(1, "").child(0, "item");
		let joined = join(&join("", 1, ""), 0, "item");
		assert_eq!(path.to_string(), joined);
	}

	#[test]
	fn event_keys() {
		let path = Path::root().child(0, "").child(1, "");
		assert_eq!(path.event_key("click"), "0\t1\nclick");
	}

	#[test]
	fn matches_whole_segments_only() {
		let form = Path::root().child(0, "").child(1, "");
		let input = form.child(4, "");
		let sibling = Path::root().child(0, "").child(10, "");

		let dispatched = vec![form.to_string()];
		assert!(form.matches(&dispatched));
		assert!(input.matches(&dispatched));
		assert!(!sibling.matches(&dispatched));
		assert!(!input.matches(&[]));
	}
}
