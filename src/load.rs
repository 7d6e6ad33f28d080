//! Loading existing (server-rendered) DOM content into a node tree, so the first render can diff against it.

use crate::{
	host::{Document, NodeKind},
	reconciler::{Reconciler, KEY_ATTRIBUTE},
	vnode::{Attr, KeyedChildren, Mapper, Node},
};
use serde_json::Value;
use tracing::{instrument, trace, trace_span};

/// The result of [`virtualise`].
#[derive(Debug)]
pub struct Virtualised<N> {
	pub node: Node,
	/// Form controls that already hold user input and should have it replayed as events once handlers are attached.
	pub prefilled: Vec<Prefilled<N>>,
}

/// A form control's user input as found before the first render, which may overwrite it.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefilled<N> {
	pub node: N,
	pub value: Option<Value>,
	pub checked: Option<Value>,
}

/// Reads the mount point's children into a single node, normalising the DOM to what rendering that node would produce.
///
/// - Comments and other unrenderable nodes, and empty text nodes, are removed.
/// - Without children, an empty text node is appended and represented as empty text.
/// - With several children, an empty marker text node is prepended and they're represented as a fragment.
/// - [`KEY_ATTRIBUTE`] is consumed into node keys.
#[instrument(skip(reconciler))]
pub fn virtualise<D: Document>(reconciler: &mut Reconciler<D>) -> Virtualised<D::Node> {
	let root = reconciler.root();
	let mut prefilled = Vec::new();

	let first_index = if count_renderable(reconciler.document(), root) > 1 { 1 } else { 0 };
	let (mut children, keyed_children) = load_child_nodes(reconciler, root, first_index, &mut prefilled);

	let node = match children.len() {
		0 => {
			let empty = reconciler.document_mut().create_text("");
			reconciler.initialise(Some(root), empty, 0, "");
			reconciler.document_mut().insert_before(root, empty, None);
			Node::text(String::new(), Mapper::identity(), String::new())
		}
		1 => children.remove(0),
		_ => {
			let first = reconciler.document().first_child(root);
			let marker = reconciler.document_mut().create_text("");
			reconciler.initialise(Some(root), marker, 0, "");
			reconciler.document_mut().insert_before(root, marker, first);
			Node::fragment(String::new(), Mapper::identity(), children, keyed_children)
		}
	};
	trace!(prefilled = prefilled.len(), "Virtualised.");
	Virtualised { node, prefilled }
}

fn count_renderable<D: Document>(document: &D, parent: D::Node) -> usize {
	let mut count = 0;
	let mut child = document.first_child(parent);
	while let Some(node) = child {
		match document.kind(node) {
			NodeKind::Element => count += 1,
			NodeKind::Text if document.text(node).map_or(false, |text| !text.is_empty()) => count += 1,
			NodeKind::Text | NodeKind::Other => (),
		}
		child = document.next_sibling(node);
	}
	count
}

fn load_child_nodes<D: Document>(reconciler: &mut Reconciler<D>, parent: D::Node, first_index: usize, prefilled: &mut Vec<Prefilled<D::Node>>) -> (Vec<Node>, KeyedChildren) {
	let mut children = Vec::new();
	let mut keyed_children = KeyedChildren::new();
	let mut child = reconciler.document().first_child(parent);
	while let Some(node) = child {
		child = reconciler.document().next_sibling(node);
		match load_node(reconciler, parent, node, first_index + children.len(), prefilled) {
			Some(vnode) => {
				if !vnode.key().is_empty() {
					keyed_children.insert(vnode.key().to_owned(), vnode.clone());
				}
				children.push(vnode);
			}
			None => reconciler.document_mut().remove_child(parent, node),
		}
	}
	(children, keyed_children)
}

fn load_node<D: Document>(reconciler: &mut Reconciler<D>, parent: D::Node, node: D::Node, index: usize, prefilled: &mut Vec<Prefilled<D::Node>>) -> Option<Node> {
	match reconciler.document().kind(node) {
		NodeKind::Element => Some(load_element(reconciler, parent, node, index, prefilled)),
		NodeKind::Text => {
			let content = reconciler.document().text(node).unwrap_or_default();
			if content.is_empty() {
				return None;
			}
			reconciler.initialise(Some(parent), node, index, "");
			Some(Node::text(String::new(), Mapper::identity(), content))
		}
		NodeKind::Other => None,
	}
}

fn load_element<D: Document>(reconciler: &mut Reconciler<D>, parent: D::Node, node: D::Node, index: usize, prefilled: &mut Vec<Prefilled<D::Node>>) -> Node {
	let document = reconciler.document();
	let key = document.get_attribute(node, KEY_ATTRIBUTE).unwrap_or_default();
	let namespace = document.namespace(node);
	let tag = document.tag_name(node);

	let span = trace_span!("Loading element", %tag, %key);
	let _enter = span.enter();

	reconciler.initialise(Some(parent), node, index, &key);
	if !key.is_empty() && !reconciler.config().expose_keys {
		reconciler.document_mut().remove_attribute(node, KEY_ATTRIBUTE);
	}

	if namespace.is_empty() && matches!(tag.as_str(), "input" | "select" | "textarea") && is_prefilled(reconciler.document(), node) {
		let document = reconciler.document();
		prefilled.push(Prefilled { node, value: document.property(node, "value"), checked: document.property(node, "checked") });
	}

	let attributes = reconciler
		.document()
		.attributes(node)
		.into_iter()
		.filter(|(name, _)| name != KEY_ATTRIBUTE)
		.map(|(name, value)| Attr::Attribute { name, value })
		.collect();
	let (children, keyed_children) = load_child_nodes(reconciler, node, 0, prefilled);

	let vnode = Node::element(String::new(), Mapper::identity(), namespace, tag, attributes, children, keyed_children, false, false);
	if key.is_empty() {
		vnode
	} else {
		vnode.to_keyed(&key)
	}
}

/// Whether the control carries a value worth replaying: checked checkboxes and radios, and non-empty values of anything else.
fn is_prefilled<D: Document>(document: &D, node: D::Node) -> bool {
	let kind = document.property(node, "type").and_then(|value| value.as_str().map(str::to_owned)).unwrap_or_default();
	if kind == "checkbox" || kind == "radio" {
		document.property(node, "checked") == Some(Value::Bool(true))
	} else {
		document.property(node, "value").and_then(|value| value.as_str().map(|value| !value.is_empty())).unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{memory::MemoryDocument, reconciler::ReconcilerConfig};
	use pretty_assertions::assert_eq;

	#[test]
	fn empty_roots_get_an_empty_text_node() {
		let mut reconciler = Reconciler::new(MemoryDocument::new(), ReconcilerConfig::default());
		let Virtualised { node, prefilled } = virtualise(&mut reconciler);
		assert!(matches!(&node, Node::Text(text) if text.content.is_empty()));
		assert!(prefilled.is_empty());
		assert_eq!(reconciler.document().child_count(reconciler.root()), 1);
	}

	#[test]
	fn several_children_become_a_fragment_behind_a_marker() {
		let mut document = MemoryDocument::new();
		let root = document.root();
		let comment = document.create_comment("server");
		document.append(root, comment);
		let p = document.create_element("", "p");
		document.append(root, p);
		let li = document.create_element("", "li");
		document.set_attribute(li, KEY_ATTRIBUTE, "a");
		document.append(root, li);

		let mut reconciler = Reconciler::new(document, ReconcilerConfig::default());
		let Virtualised { node, .. } = virtualise(&mut reconciler);
		let Node::Fragment(fragment) = &node else { panic!("expected a fragment, got {:?}", node) };
		assert_eq!(fragment.children.len(), 2);
		assert!(fragment.keyed_children.contains_key("a"));

		let document = reconciler.document();
		assert_eq!(document.to_html(root), "<p></p><li></li>");
		assert_eq!(document.child_count(root), 3);
		assert_eq!(reconciler.path_of(p), Some("1"));
		assert_eq!(reconciler.path_of(li), Some("a"));
		assert_eq!(reconciler.keyed_child(root, "a"), Some(li));
	}

	#[test]
	fn filled_inputs_are_reported() {
		let mut document = MemoryDocument::new();
		let root = document.root();
		let form = document.create_element("", "form");
		document.append(root, form);
		for (kind, value, checked) in [("text", "typed", false), ("text", "", false), ("checkbox", "on", false), ("checkbox", "on", true)] {
			let input = document.create_element("", "input");
			document.set_attribute(input, "type", kind);
			document.set_attribute(input, "value", value);
			if checked {
				document.set_attribute(input, "checked", "");
			}
			document.append(form, input);
		}

		let mut reconciler = Reconciler::new(document, ReconcilerConfig::default());
		let Virtualised { prefilled, .. } = virtualise(&mut reconciler);
		let inputs = reconciler.document().children(form);
		assert_eq!(prefilled.iter().map(|prefilled| prefilled.node).collect::<Vec<_>>(), vec![inputs[0], inputs[3]]);
		assert_eq!(prefilled[0].value, Some(Value::String("typed".to_owned())));
		assert_eq!(prefilled[1].checked, Some(Value::Bool(true)));
	}
}
