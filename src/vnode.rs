//! The immutable node model the diff engine operates on.
//!
//! Application code normally builds these through [`Html`](`crate::element::Html`), which adds a message type.
//! Here messages are erased to [`AnyMessage`] so that [`Mapper`]s can change the message type of a subtree.

use crate::event::DecodeError;
use core::{
	any::Any,
	fmt::{self, Debug, Formatter},
};
use hashbrown::HashMap;
use serde_json::Value;
use std::rc::Rc;
use tracing::error;

pub type AnyMessage = Box<dyn Any>;

/// Decodes a raw event payload into a message.
pub type Decoder = Rc<dyn Fn(&Value) -> Result<AnyMessage, DecodeError>>;

/// Keyed children of one sibling scope, by key.
pub type KeyedChildren = HashMap<String, Node>;

pub const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// A message transform attached to a subtree.
///
/// The identity mapper carries no function at all, so composing with it is free.
#[derive(Clone, Default)]
pub struct Mapper(Option<Rc<dyn Fn(AnyMessage) -> AnyMessage>>);

impl Mapper {
	#[must_use]
	pub fn identity() -> Self {
		Self(None)
	}

	pub fn new(f: impl Fn(AnyMessage) -> AnyMessage + 'static) -> Self {
		Self(Some(Rc::new(f)))
	}

	/// A mapper from `A` to `B` messages.
	///
	/// Messages of any other type are passed through unchanged (and logged), which only happens for mis-assembled trees.
	pub fn from_fn<A: 'static, B: 'static>(f: impl Fn(A) -> B + 'static) -> Self {
		Self::new(move |message: AnyMessage| match message.downcast::<A>() {
			Ok(message) => Box::new(f(*message)),
			Err(message) => {
				error!("Mapper received a message of an unexpected type. Passing it through unchanged.");
				message
			}
		})
	}

	#[must_use]
	pub fn is_identity(&self) -> bool {
		self.0.is_none()
	}

	/// `self ∘ child`: applies `child` first, then `self`.
	#[must_use]
	pub fn compose(&self, child: &Mapper) -> Mapper {
		match (&self.0, &child.0) {
			(_, None) => self.clone(),
			(None, Some(_)) => child.clone(),
			(Some(outer), Some(inner)) => {
				let (outer, inner) = (outer.clone(), inner.clone());
				Mapper::new(move |message| outer(inner(message)))
			}
		}
	}

	#[must_use]
	pub fn apply(&self, message: AnyMessage) -> AnyMessage {
		match &self.0 {
			Some(f) => f(message),
			None => message,
		}
	}
}

impl Debug for Mapper {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(if self.is_identity() { "Mapper(identity)" } else { "Mapper(..)" })
	}
}

/// An event listener descriptor.
#[derive(Clone)]
pub struct EventBinding {
	pub name: String,
	pub handler: Decoder,
	/// Payload fields (dot paths) forwarded when events are projected for a server.
	pub include: Vec<String>,
	pub prevent_default: bool,
	pub stop_propagation: bool,
	/// Whether a dispatch from this listener flushes the render synchronously.
	pub immediate: bool,
	/// Milliseconds, `0` to disable.
	pub debounce: u32,
	/// Milliseconds, `0` to disable.
	pub throttle: u32,
}

impl EventBinding {
	/// Whether rebinding `self` as `other` needs the listener itself to be touched.
	#[must_use]
	pub fn same_modifiers(&self, other: &EventBinding) -> bool {
		self.prevent_default == other.prevent_default
			&& self.stop_propagation == other.stop_propagation
			&& self.immediate == other.immediate
			&& self.debounce == other.debounce
			&& self.throttle == other.throttle
	}
}

impl Debug for EventBinding {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventBinding")
			.field("name", &self.name)
			.field("include", &self.include)
			.field("prevent_default", &self.prevent_default)
			.field("stop_propagation", &self.stop_propagation)
			.field("immediate", &self.immediate)
			.field("debounce", &self.debounce)
			.field("throttle", &self.throttle)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Clone)]
pub enum Attr {
	/// A DOM attribute.
	Attribute { name: String, value: String },
	/// A value set directly on the DOM node.
	Property { name: String, value: Value },
	Event(EventBinding),
}

impl Attr {
	#[must_use]
	pub fn name(&self) -> &str {
		match self {
			Attr::Attribute { name, .. } | Attr::Property { name, .. } => name,
			Attr::Event(binding) => &binding.name,
		}
	}

	/// Orders kinds sharing a name.
	fn rank(&self) -> u8 {
		match self {
			Attr::Attribute { .. } => 0,
			Attr::Property { .. } => 1,
			Attr::Event(_) => 2,
		}
	}
}

/// Brings attributes into canonical order: ascending by name, with runs of `class` joined by `' '` and runs of `style` joined by `';'`.
///
/// Attributes without a name, and `class` or `style` attributes without a value, are dropped.
/// Other repeated names keep only their last occurrence per kind, as repeated `setAttribute` calls would.
/// The sort is stable, so merged values keep their original order.
#[must_use]
pub fn prepare(mut attributes: Vec<Attr>) -> Vec<Attr> {
	attributes.retain(|attribute| match attribute {
		Attr::Attribute { name, value } => !(name.is_empty() || (value.is_empty() && (name == "class" || name == "style"))),
		Attr::Property { name, .. } => !name.is_empty(),
		Attr::Event(_) => true,
	});
	if attributes.len() < 2 {
		return attributes;
	}

	attributes.sort_by(|a, b| a.name().cmp(b.name()).then(a.rank().cmp(&b.rank())));

	let mut merged = Vec::with_capacity(attributes.len());
	let mut attributes = attributes.into_iter().peekable();
	while let Some(mut attribute) = attributes.next() {
		if let Attr::Attribute { name, value } = &mut attribute {
			if name.as_str() == "class" || name.as_str() == "style" {
				let separator = if name.as_str() == "class" { ' ' } else { ';' };
				while let Some(Attr::Attribute { name: next, .. }) = attributes.peek() {
					if *next != *name {
						break;
					}
					if let Some(Attr::Attribute { value: next, .. }) = attributes.next() {
						value.push(separator);
						value.push_str(&next);
					}
				}
				merged.push(attribute);
				continue;
			}
		}
		while let Some(next) = attributes.peek() {
			if next.name() != attribute.name() || next.rank() != attribute.rank() {
				break;
			}
			if let Some(next) = attributes.next() {
				attribute = next;
			}
		}
		merged.push(attribute);
	}
	merged
}

#[must_use]
pub fn is_void_element(tag: &str, namespace: &str) -> bool {
	namespace.is_empty()
		&& matches!(tag, "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta" | "param" | "source" | "track" | "wbr")
}

#[derive(Debug)]
pub struct Fragment {
	pub key: String,
	pub mapper: Mapper,
	pub children: Vec<Node>,
	pub keyed_children: KeyedChildren,
	/// Total DOM slots of all children, nested fragments included.
	pub children_count: usize,
}

#[derive(Debug)]
pub struct Element {
	pub key: String,
	pub mapper: Mapper,
	/// Empty for HTML.
	pub namespace: String,
	pub tag: String,
	pub attributes: Vec<Attr>,
	pub children: Vec<Node>,
	pub keyed_children: KeyedChildren,
	pub self_closing: bool,
	pub void: bool,
}

#[derive(Debug)]
pub struct Text {
	pub key: String,
	pub mapper: Mapper,
	pub content: String,
}

#[derive(Debug)]
pub struct RawHtml {
	pub key: String,
	pub mapper: Mapper,
	pub namespace: String,
	pub tag: String,
	pub attributes: Vec<Attr>,
	pub inner_html: String,
}

/// One node of an immutable UI tree.
///
/// Cloning is cheap, which lets patches carry the subtrees they insert.
#[derive(Debug, Clone)]
pub enum Node {
	/// Renders as an empty marker text node followed by its children, all spliced into the parent.
	Fragment(Rc<Fragment>),
	Element(Rc<Element>),
	Text(Rc<Text>),
	RawHtml(Rc<RawHtml>),
}

impl Node {
	#[must_use]
	pub fn fragment(key: String, mapper: Mapper, children: Vec<Node>, keyed_children: KeyedChildren) -> Self {
		let children_count = count_children(&children);
		Self::Fragment(Rc::new(Fragment { key, mapper, children, keyed_children, children_count }))
	}

	#[allow(clippy::too_many_arguments)]
	#[must_use]
	pub fn element(
		key: String,
		mapper: Mapper,
		namespace: String,
		tag: String,
		attributes: Vec<Attr>,
		children: Vec<Node>,
		keyed_children: KeyedChildren,
		self_closing: bool,
		void: bool,
	) -> Self {
		let void = void || is_void_element(&tag, &namespace);
		Self::Element(Rc::new(Element {
			key,
			mapper,
			namespace,
			tag,
			attributes: prepare(attributes),
			children,
			keyed_children,
			self_closing,
			void,
		}))
	}

	#[must_use]
	pub fn text(key: String, mapper: Mapper, content: String) -> Self {
		Self::Text(Rc::new(Text { key, mapper, content }))
	}

	#[must_use]
	pub fn raw_html(key: String, mapper: Mapper, namespace: String, tag: String, attributes: Vec<Attr>, inner_html: String) -> Self {
		Self::RawHtml(Rc::new(RawHtml { key, mapper, namespace, tag, attributes: prepare(attributes), inner_html }))
	}

	#[must_use]
	pub fn key(&self) -> &str {
		match self {
			Node::Fragment(fragment) => &fragment.key,
			Node::Element(element) => &element.key,
			Node::Text(text) => &text.key,
			Node::RawHtml(raw_html) => &raw_html.key,
		}
	}

	#[must_use]
	pub fn mapper(&self) -> &Mapper {
		match self {
			Node::Fragment(fragment) => &fragment.mapper,
			Node::Element(element) => &element.mapper,
			Node::Text(text) => &text.mapper,
			Node::RawHtml(raw_html) => &raw_html.mapper,
		}
	}

	/// The number of DOM slots this node occupies among its siblings.
	#[must_use]
	pub fn advance(&self) -> usize {
		match self {
			Node::Fragment(fragment) => 1 + fragment.children_count,
			Node::Element(_) | Node::Text(_) | Node::RawHtml(_) => 1,
		}
	}

	/// A copy of this node with `mapper` in place of its own.
	#[must_use]
	pub fn with_mapper(&self, mapper: Mapper) -> Node {
		match self {
			Node::Fragment(fragment) => Node::Fragment(Rc::new(Fragment {
				key: fragment.key.clone(),
				mapper,
				children: fragment.children.clone(),
				keyed_children: fragment.keyed_children.clone(),
				children_count: fragment.children_count,
			})),
			Node::Element(element) => Node::Element(Rc::new(Element { mapper, ..clone_element(element) })),
			Node::Text(text) => Node::Text(Rc::new(Text { key: text.key.clone(), mapper, content: text.content.clone() })),
			Node::RawHtml(raw_html) => Node::RawHtml(Rc::new(RawHtml { mapper, ..clone_raw_html(raw_html) })),
		}
	}

	/// A copy of this node carrying `key`.
	///
	/// Fragments additionally namespace the keys of their descendants as `key::child` (keyed children)
	/// or `key::index` (unkeyed child fragments), so keys stay unique within the enclosing keyed scope.
	#[must_use]
	pub fn to_keyed(&self, key: &str) -> Node {
		match self {
			Node::Fragment(fragment) => {
				let (children, keyed_children) = set_fragment_key(key, &fragment.children);
				Node::Fragment(Rc::new(Fragment {
					key: key.to_owned(),
					mapper: fragment.mapper.clone(),
					children,
					keyed_children,
					children_count: fragment.children_count,
				}))
			}
			Node::Element(element) => Node::Element(Rc::new(Element { key: key.to_owned(), ..clone_element(element) })),
			Node::Text(text) => Node::Text(Rc::new(Text { key: key.to_owned(), mapper: text.mapper.clone(), content: text.content.clone() })),
			Node::RawHtml(raw_html) => Node::RawHtml(Rc::new(RawHtml { key: key.to_owned(), ..clone_raw_html(raw_html) })),
		}
	}
}

#[must_use]
pub fn count_children(children: &[Node]) -> usize {
	children.iter().map(Node::advance).sum()
}

fn set_fragment_key(key: &str, children: &[Node]) -> (Vec<Node>, KeyedChildren) {
	let mut new_children = Vec::with_capacity(children.len());
	let mut keyed_children = KeyedChildren::new();
	for (index, child) in children.iter().enumerate() {
		match child {
			Node::Fragment(fragment) if fragment.key.is_empty() => {
				let (children, nested_keyed_children) = set_fragment_key(&format!("{}::{}", key, index), &fragment.children);
				new_children.push(Node::Fragment(Rc::new(Fragment {
					key: String::new(),
					mapper: fragment.mapper.clone(),
					children,
					keyed_children: nested_keyed_children,
					children_count: fragment.children_count,
				})));
			}
			child if !child.key().is_empty() => {
				let child_key = format!("{}::{}", key, child.key());
				let keyed = child.to_keyed(&child_key);
				keyed_children.insert(child_key, keyed.clone());
				new_children.push(keyed);
			}
			child => new_children.push(child.clone()),
		}
	}
	(new_children, keyed_children)
}

fn clone_element(element: &Element) -> Element {
	Element {
		key: element.key.clone(),
		mapper: element.mapper.clone(),
		namespace: element.namespace.clone(),
		tag: element.tag.clone(),
		attributes: element.attributes.clone(),
		children: element.children.clone(),
		keyed_children: element.keyed_children.clone(),
		self_closing: element.self_closing,
		void: element.void,
	}
}

fn clone_raw_html(raw_html: &RawHtml) -> RawHtml {
	RawHtml {
		key: raw_html.key.clone(),
		mapper: raw_html.mapper.clone(),
		namespace: raw_html.namespace.clone(),
		tag: raw_html.tag.clone(),
		attributes: raw_html.attributes.clone(),
		inner_html: raw_html.inner_html.clone(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn attribute(name: &str, value: &str) -> Attr {
		Attr::Attribute { name: name.to_owned(), value: value.to_owned() }
	}

	fn names_and_values(attributes: &[Attr]) -> Vec<(String, String)> {
		attributes
			.iter()
			.map(|attribute| match attribute {
				Attr::Attribute { name, value } => (name.clone(), value.clone()),
				other => (other.name().to_owned(), String::new()),
			})
			.collect()
	}

	#[test]
	fn merges_class_and_style_runs() {
		let prepared = prepare(vec![attribute("class", "a"), attribute("id", "x"), attribute("class", "b"), attribute("style", "x:1"), attribute("style", "y:2")]);
		assert_eq!(
			names_and_values(&prepared),
			vec![("class".to_owned(), "a b".to_owned()), ("id".to_owned(), "x".to_owned()), ("style".to_owned(), "x:1;y:2".to_owned())]
		);
	}

	#[test]
	fn drops_empty_names_and_empty_classes() {
		let prepared = prepare(vec![attribute("", ""), attribute("class", ""), attribute("title", "t")]);
		assert_eq!(names_and_values(&prepared), vec![("title".to_owned(), "t".to_owned())]);
	}

	#[test]
	fn drops_a_lone_nameless_attribute() {
		assert!(prepare(vec![attribute("", "")]).is_empty());
		assert!(prepare(vec![attribute("class", "")]).is_empty());
		assert_eq!(names_and_values(&prepare(vec![attribute("lang", "en")])), vec![("lang".to_owned(), "en".to_owned())]);
	}

	#[test]
	fn repeated_names_keep_the_last_value() {
		let prepared = prepare(vec![attribute("lang", "en"), attribute("title", "t"), attribute("lang", "de"), attribute("class", "a"), attribute("class", "b")]);
		assert_eq!(
			names_and_values(&prepared),
			vec![("class".to_owned(), "a b".to_owned()), ("lang".to_owned(), "de".to_owned()), ("title".to_owned(), "t".to_owned())]
		);
	}

	#[test]
	fn fragments_advance_past_marker_and_children() {
		let inner = Node::fragment(String::new(), Mapper::identity(), vec![Node::text(String::new(), Mapper::identity(), "a".into())], KeyedChildren::new());
		let outer = Node::fragment(
			String::new(),
			Mapper::identity(),
			vec![inner, Node::text(String::new(), Mapper::identity(), "b".into())],
			KeyedChildren::new(),
		);
		assert_eq!(outer.advance(), 1 + (1 + 1) + 1);
	}

	#[test]
	fn keyed_fragments_namespace_descendant_keys() {
		let child = Node::text("item".into(), Mapper::identity(), "a".into());
		let nested = Node::fragment(String::new(), Mapper::identity(), vec![Node::text("deep".into(), Mapper::identity(), "b".into())], KeyedChildren::new());
		let fragment = Node::fragment(String::new(), Mapper::identity(), vec![child, nested], KeyedChildren::new()).to_keyed("list");

		let Node::Fragment(fragment) = fragment else { panic!("expected a fragment") };
		assert_eq!(fragment.key, "list");
		assert_eq!(fragment.children[0].key(), "list::item");
		assert!(fragment.keyed_children.contains_key("list::item"));
		let Node::Fragment(nested) = &fragment.children[1] else { panic!("expected a nested fragment") };
		assert_eq!(nested.children[0].key(), "list::1::deep");
	}

	#[test]
	fn elements_know_void_tags() {
		let input = Node::element(String::new(), Mapper::identity(), String::new(), "input".into(), vec![], vec![], KeyedChildren::new(), false, false);
		let Node::Element(input) = input else { panic!("expected an element") };
		assert!(input.void);
		assert!(!is_void_element("input", "http://www.w3.org/2000/svg"));
	}

	#[test]
	fn mapper_composition_applies_inner_first() {
		let inner = Mapper::from_fn(|n: i32| n + 1);
		let outer = Mapper::from_fn(|n: i32| n * 10);
		let composed = outer.compose(&inner);
		let result = composed.apply(Box::new(1_i32));
		assert_eq!(*result.downcast::<i32>().unwrap(), 20);
		assert!(Mapper::identity().compose(&Mapper::identity()).is_identity());
	}
}
