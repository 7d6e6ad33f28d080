//! Construction of elements and fragments whose children are identified by key, so reordering moves DOM nodes instead of rewriting them.

use crate::{
	attribute::Attribute,
	element::{attributes, Html},
	vnode::{KeyedChildren, Mapper, Node},
};
use tracing::error;

fn keyed_children<Msg>(children: impl IntoIterator<Item = (String, Html<Msg>)>) -> (Vec<Node>, KeyedChildren) {
	let mut nodes = Vec::new();
	let mut keyed = KeyedChildren::new();
	for (key, child) in children {
		if key.is_empty() {
			nodes.push(child.into_node());
			continue;
		}
		if keyed.contains_key(&key) {
			error!("Duplicate key {:?} among siblings. Dropping the later child.", key);
			continue;
		}
		let child = child.node().to_keyed(&key);
		keyed.insert(key, child.clone());
		nodes.push(child);
	}
	(nodes, keyed)
}

/// An HTML element with keyed children. Keys must be unique among the children; later duplicates are dropped.
pub fn element<Msg>(tag: &str, attributes: impl IntoIterator<Item = Attribute<Msg>>, children: impl IntoIterator<Item = (String, Html<Msg>)>) -> Html<Msg> {
	namespaced("", tag, attributes, children)
}

pub fn namespaced<Msg>(namespace: &str, tag: &str, attributes: impl IntoIterator<Item = Attribute<Msg>>, children: impl IntoIterator<Item = (String, Html<Msg>)>) -> Html<Msg> {
	let (children, keyed) = keyed_children(children);
	Html::from_node(Node::element(String::new(), Mapper::identity(), namespace.to_owned(), tag.to_owned(), self::attributes(attributes), children, keyed, false, false))
}

/// A fragment with keyed children. Keys must be unique among the children; later duplicates are dropped.
pub fn fragment<Msg>(children: impl IntoIterator<Item = (String, Html<Msg>)>) -> Html<Msg> {
	let (children, keyed) = keyed_children(children);
	Html::from_node(Node::fragment(String::new(), Mapper::identity(), children, keyed))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::element::text;

	#[test]
	fn duplicate_keys_keep_the_first_child() {
		let list: Html<()> = element("ul", [], [("a".to_owned(), text("first")), ("b".to_owned(), text("b")), ("a".to_owned(), text("second"))]);
		let Node::Element(ul) = list.node() else { panic!("not an element") };
		assert_eq!(ul.children.len(), 2);
		let Some(Node::Text(a)) = ul.keyed_children.get("a") else { panic!("missing key") };
		assert_eq!(a.content, "first");
	}
}
