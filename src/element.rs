//! Typed construction of node trees.

use crate::{
	attribute::Attribute,
	vnode::{KeyedChildren, Mapper, Node},
};
use core::marker::PhantomData;

/// A node tree whose event handlers produce `Msg`.
pub struct Html<Msg> {
	node: Node,
	_message: PhantomData<fn() -> Msg>,
}

impl<Msg> Clone for Html<Msg> {
	fn clone(&self) -> Self {
		Self { node: self.node.clone(), _message: PhantomData }
	}
}

impl<Msg> core::fmt::Debug for Html<Msg> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		self.node.fmt(f)
	}
}

impl<Msg> Html<Msg> {
	/// Asserts that the handlers in `node` produce `Msg`.
	#[must_use]
	pub fn from_node(node: Node) -> Self {
		Self { node, _message: PhantomData }
	}

	#[must_use]
	pub fn node(&self) -> &Node {
		&self.node
	}

	#[must_use]
	pub fn into_node(self) -> Node {
		self.node
	}
}

impl<Msg: 'static> Html<Msg> {
	/// Converts every message this subtree produces.
	#[must_use]
	pub fn map<B: 'static>(self, f: impl Fn(Msg) -> B + 'static) -> Html<B> {
		let mapper = Mapper::from_fn(f).compose(self.node.mapper());
		Html::from_node(self.node.with_mapper(mapper))
	}
}

pub(crate) fn attributes<Msg>(attributes: impl IntoIterator<Item = Attribute<Msg>>) -> Vec<crate::vnode::Attr> {
	attributes.into_iter().map(Attribute::into_attr).collect()
}

pub(crate) fn nodes<Msg>(children: impl IntoIterator<Item = Html<Msg>>) -> Vec<Node> {
	children.into_iter().map(Html::into_node).collect()
}

/// An HTML element.
pub fn element<Msg>(tag: &str, attributes: impl IntoIterator<Item = Attribute<Msg>>, children: impl IntoIterator<Item = Html<Msg>>) -> Html<Msg> {
	namespaced("", tag, attributes, children)
}

/// An element in `namespace`, like `http://www.w3.org/2000/svg`.
pub fn namespaced<Msg>(namespace: &str, tag: &str, attributes: impl IntoIterator<Item = Attribute<Msg>>, children: impl IntoIterator<Item = Html<Msg>>) -> Html<Msg> {
	Html::from_node(Node::element(
		String::new(),
		Mapper::identity(),
		namespace.to_owned(),
		tag.to_owned(),
		self::attributes(attributes),
		nodes(children),
		KeyedChildren::new(),
		false,
		false,
	))
}

/// An element rendered as `<tag />` when serialised.
pub fn self_closing<Msg>(tag: &str, attributes: impl IntoIterator<Item = Attribute<Msg>>) -> Html<Msg> {
	Html::from_node(Node::element(String::new(), Mapper::identity(), String::new(), tag.to_owned(), self::attributes(attributes), Vec::new(), KeyedChildren::new(), true, false))
}

pub fn text<Msg>(content: &str) -> Html<Msg> {
	Html::from_node(Node::text(String::new(), Mapper::identity(), content.to_owned()))
}

/// Renders as an empty text node.
pub fn none<Msg>() -> Html<Msg> {
	text("")
}

/// Children spliced into the parent without a wrapper element.
pub fn fragment<Msg>(children: impl IntoIterator<Item = Html<Msg>>) -> Html<Msg> {
	Html::from_node(Node::fragment(String::new(), Mapper::identity(), nodes(children), KeyedChildren::new()))
}

/// An element whose content is set as markup, unchecked.
pub fn unsafe_raw_html<Msg>(namespace: &str, tag: &str, attributes: impl IntoIterator<Item = Attribute<Msg>>, inner_html: &str) -> Html<Msg> {
	Html::from_node(Node::raw_html(String::new(), Mapper::identity(), namespace.to_owned(), tag.to_owned(), self::attributes(attributes), inner_html.to_owned()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{attribute::class, event::on_click, vnode::Attr};

	#[derive(Debug, Clone, PartialEq)]
	enum Child {
		Clicked,
	}

	#[derive(Debug, PartialEq)]
	enum Parent {
		Child(Child),
	}

	#[test]
	fn map_wraps_child_messages() {
		let child: Html<Child> = element("button", [class("a"), on_click(Child::Clicked)], [text("go")]);
		let parent: Html<Parent> = child.map(Parent::Child);

		let Node::Element(button) = parent.node() else { panic!("not an element") };
		let Some(Attr::Event(binding)) = button.attributes.iter().find(|attr| attr.name() == "click") else { panic!("no listener") };
		let message = button.mapper.apply((binding.handler)(&serde_json::Value::Null).unwrap());
		assert_eq!(*message.downcast::<Parent>().unwrap(), Parent::Child(Child::Clicked));
	}
}
