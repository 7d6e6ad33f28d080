//! The diff engine's output.

use crate::vnode::{Attr, Node};

/// Changes for the DOM node reached by following [`Patch::index`] from the parent patch's node.
///
/// The root patch addresses the mount point itself.
#[derive(Debug, Clone, Default)]
pub struct Patch {
	/// Index of the addressed node among its parent's DOM children, after the parent's changes are applied.
	pub index: usize,
	/// How many trailing DOM children to remove after [`Patch::changes`] are applied.
	pub removed: usize,
	/// In application order.
	pub changes: Vec<Change>,
	/// In ascending [`Patch::index`] order.
	pub children: Vec<Patch>,
}

impl Patch {
	#[must_use]
	pub fn new(index: usize) -> Self {
		Self { index, ..Self::default() }
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.removed == 0 && self.changes.is_empty() && self.children.is_empty()
	}

	/// All changes in this patch and below, depth-first.
	pub fn changes_recursive(&self) -> impl Iterator<Item = &Change> + '_ {
		let nested: Box<dyn Iterator<Item = &Change>> = Box::new(self.children.iter().flat_map(Patch::changes_recursive));
		self.changes.iter().chain(nested)
	}
}

/// One edit of a DOM node or of its list of children.
///
/// Indices are DOM child indices of the node the containing [`Patch`] addresses,
/// valid at the time the change is applied.
#[derive(Debug, Clone)]
pub enum Change {
	ReplaceText { content: String },
	ReplaceInnerHtml { inner_html: String },
	Update { added: Vec<Attr>, removed: Vec<Attr> },
	/// Moves the `count` DOM nodes starting at the keyed child `key` before the child currently at `before`.
	Move { key: String, before: usize, count: usize },
	RemoveKey { key: String, count: usize },
	Replace { from: usize, count: usize, with: Node },
	Insert { children: Vec<Node>, before: usize },
	Remove { from: usize, count: usize },
}

impl Change {
	#[must_use]
	pub fn kind(&self) -> &'static str {
		match self {
			Change::ReplaceText { .. } => "replace_text",
			Change::ReplaceInnerHtml { .. } => "replace_inner_html",
			Change::Update { .. } => "update",
			Change::Move { .. } => "move",
			Change::RemoveKey { .. } => "remove_key",
			Change::Replace { .. } => "replace",
			Change::Insert { .. } => "insert",
			Change::Remove { .. } => "remove",
		}
	}
}
