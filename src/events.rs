//! The registry of event handlers, keyed by rendered path and event name.
//!
//! The diff engine keeps it in sync with the tree it diffs, so a DOM event can be turned into a message
//! with nothing but the path stored on the DOM node.

use crate::{
	event::DecodeError,
	path::{handler_key, Path},
	vnode::{AnyMessage, Attr, Decoder, Mapper, Node},
};
use hashbrown::HashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, trace};

#[derive(Clone)]
struct Handler {
	decoder: Decoder,
	mapper: Mapper,
	/// The tick during which this was (re)registered.
	tick: u64,
}

#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("no `{name}` handler is registered at path {path:?}")]
	NotFound { path: String, name: String },
	#[error("failed to decode `{name}` event: {source}")]
	Decode {
		name: String,
		#[source]
		source: DecodeError,
	},
}

#[derive(Clone, Default)]
pub struct Events {
	handlers: HashMap<String, Handler>,
	ticks: u64,
	/// Paths that dispatched events during the previous render cycle.
	dispatched_paths: Vec<String>,
	next_dispatched_paths: Vec<String>,
}

impl core::fmt::Debug for Events {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		let mut keys: Vec<_> = self.handlers.keys().collect();
		keys.sort();
		f.debug_struct("Events")
			.field("handlers", &keys)
			.field("ticks", &self.ticks)
			.field("dispatched_paths", &self.dispatched_paths)
			.field("next_dispatched_paths", &self.next_dispatched_paths)
			.finish()
	}
}

impl Events {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts a render cycle: paths dispatched since the last tick become the ones [`Events::is_controlled`] consults.
	///
	/// Handlers registered from here on count as renewed, see [`Events::remove_event`] and [`Events::retain_renewed`].
	pub fn tick(&mut self) {
		self.dispatched_paths = core::mem::take(&mut self.next_dispatched_paths);
		self.ticks += 1;
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	#[must_use]
	pub fn contains(&self, path: &str, name: &str) -> bool {
		self.handlers.contains_key(&handler_key(path, name))
	}

	pub fn add_event(&mut self, mapper: &Mapper, path: &str, name: &str, decoder: &Decoder) {
		self.handlers.insert(handler_key(path, name), Handler { decoder: decoder.clone(), mapper: mapper.clone(), tick: self.ticks });
	}

	/// Unregisters the handler for `name` at `path`, unless it was renewed since the last tick.
	///
	/// During a diff, a renewed handler belongs to a node of the new tree that now occupies the path.
	pub fn remove_event(&mut self, path: &str, name: &str) {
		let key = handler_key(path, name);
		if self.handlers.get(&key).map_or(false, |handler| handler.tick != self.ticks) {
			self.handlers.remove(&key);
		}
	}

	/// Drops every handler that wasn't renewed since the last tick.
	///
	/// A diff renews the handlers of every node it keeps or creates, so this removes those left behind at stale index paths
	/// by unkeyed nodes that changed position.
	pub fn retain_renewed(&mut self) {
		let ticks = self.ticks;
		let before = self.handlers.len();
		self.handlers.retain(|_, handler| handler.tick == ticks);
		if self.handlers.len() < before {
			trace!(dropped = before - self.handlers.len(), "Dropped stale handlers.");
		}
	}

	fn add_attributes(&mut self, mapper: &Mapper, path: &str, attributes: &[Attr]) {
		for attribute in attributes {
			if let Attr::Event(binding) = attribute {
				self.add_event(mapper, path, &binding.name, &binding.handler);
			}
		}
	}

	fn remove_attributes(&mut self, path: &str, attributes: &[Attr]) {
		for attribute in attributes {
			if let Attr::Event(binding) = attribute {
				self.remove_event(path, &binding.name);
			}
		}
	}

	/// Registers every handler in the subtree `child`, placed at `index` below `parent`.
	pub fn add_child(&mut self, mapper: &Mapper, parent: &Path, index: usize, child: &Node) {
		match child {
			Node::Fragment(fragment) => {
				let mapper = mapper.compose(&fragment.mapper);
				self.add_children(&mapper, parent, index + 1, &fragment.children);
			}
			Node::Element(element) => {
				let mapper = mapper.compose(&element.mapper);
				let path = parent.child(index, &element.key);
				self.add_attributes(&mapper, &path.to_string(), &element.attributes);
				self.add_children(&mapper, &path, 0, &element.children);
			}
			Node::Text(_) => (),
			Node::RawHtml(raw_html) => {
				let mapper = mapper.compose(&raw_html.mapper);
				self.add_attributes(&mapper, &parent.child(index, &raw_html.key).to_string(), &raw_html.attributes);
			}
		}
	}

	pub fn add_children(&mut self, mapper: &Mapper, parent: &Path, mut index: usize, children: &[Node]) {
		for child in children {
			self.add_child(mapper, parent, index, child);
			index += child.advance();
		}
	}

	/// Unregisters every handler in the subtree `child`, placed at `index` below `parent`.
	pub fn remove_child(&mut self, parent: &Path, index: usize, child: &Node) {
		match child {
			Node::Fragment(fragment) => self.remove_children(parent, index + 1, &fragment.children),
			Node::Element(element) => {
				let path = parent.child(index, &element.key);
				self.remove_attributes(&path.to_string(), &element.attributes);
				self.remove_children(&path, 0, &element.children);
			}
			Node::Text(_) => (),
			Node::RawHtml(raw_html) => self.remove_attributes(&parent.child(index, &raw_html.key).to_string(), &raw_html.attributes),
		}
	}

	fn remove_children(&mut self, parent: &Path, mut index: usize, children: &[Node]) {
		for child in children {
			self.remove_child(parent, index, child);
			index += child.advance();
		}
	}

	/// Decodes `event` with the handler registered for `name` at `path` and maps the result to the application's message type.
	///
	/// `path` is recorded as dispatched even if that fails.
	///
	/// # Errors
	///
	/// Iff there is no such handler or it fails to decode `event`.
	#[instrument(skip(self, event))]
	pub fn dispatch(&mut self, path: &str, name: &str, event: &Value) -> Result<AnyMessage, DispatchError> {
		self.next_dispatched_paths.push(path.to_owned());
		let handler = self.handlers.get(&handler_key(path, name)).ok_or_else(|| DispatchError::NotFound { path: path.to_owned(), name: name.to_owned() })?;
		let message = (handler.decoder)(event).map_err(|source| DispatchError::Decode { name: name.to_owned(), source })?;
		trace!("Decoded.");
		Ok(handler.mapper.apply(message))
	}

	#[must_use]
	pub fn has_dispatched_events(&self, path: &Path) -> bool {
		path.matches(&self.dispatched_paths)
	}

	/// Whether the form control at `path` is user-driven, so that its `value`, `checked` and `selected` always get re-applied.
	#[must_use]
	pub fn is_controlled(&self, namespace: &str, tag: &str, path: &Path) -> bool {
		namespace.is_empty() && matches!(tag, "input" | "select" | "textarea") && self.has_dispatched_events(path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vnode::{EventBinding, KeyedChildren};
	use std::rc::Rc;

	fn click(message: &'static str) -> Attr {
		Attr::Event(EventBinding {
			name: "click".into(),
			handler: Rc::new(move |_: &Value| Ok(Box::new(message) as AnyMessage)),
			include: Vec::new(),
			prevent_default: false,
			stop_propagation: false,
			immediate: false,
			debounce: 0,
			throttle: 0,
		})
	}

	fn button(key: &str, message: &'static str) -> Node {
		Node::element(key.into(), Mapper::identity(), String::new(), "button".into(), vec![click(message)], vec![], KeyedChildren::new(), false, false)
	}

	#[test]
	fn registers_subtrees_through_fragments() {
		let mut events = Events::new();
		let fragment = Node::fragment(String::new(), Mapper::identity(), vec![button("", "a"), button("b", "b")], KeyedChildren::new());
		let root = Path::root().child(0, "");
		events.add_child(&Mapper::identity(), &root, 0, &fragment);

		assert!(events.contains("0\t1", "click"));
		assert!(events.contains("0\tb", "click"));
		assert_eq!(events.len(), 2);

		// Renewed handlers survive removal until the next tick.
		events.remove_child(&root, 0, &fragment);
		assert_eq!(events.len(), 2);

		events.tick();
		events.remove_child(&root, 0, &fragment);
		assert!(events.is_empty());
	}

	#[test]
	fn only_renewed_handlers_are_retained() {
		let mut events = Events::new();
		events.add_child(&Mapper::identity(), &Path::root(), 0, &button("", "a"));
		events.add_child(&Mapper::identity(), &Path::root(), 1, &button("", "b"));

		events.tick();
		events.add_child(&Mapper::identity(), &Path::root(), 1, &button("", "b"));
		events.retain_renewed();
		assert!(!events.contains("0", "click"));
		assert!(events.contains("1", "click"));
	}

	#[test]
	fn dispatch_applies_composed_mappers() {
		let mut events = Events::new();
		let mapper = Mapper::from_fn(|message: &'static str| message.len());
		events.add_child(&mapper, &Path::root(), 0, &button("", "four"));

		let message = events.dispatch("0", "click", &Value::Null).unwrap();
		assert_eq!(*message.downcast::<usize>().unwrap(), 4);
		assert!(matches!(events.dispatch("0", "input", &Value::Null), Err(DispatchError::NotFound { .. })));
	}

	#[test]
	fn controlled_after_one_tick() {
		let mut events = Events::new();
		let input = Path::root().child(0, "");
		let _ = events.dispatch("0", "input", &Value::Null);
		assert!(!events.is_controlled("", "input", &input));

		events.tick();
		assert!(events.is_controlled("", "input", &input));
		assert!(!events.is_controlled("", "div", &input));
		assert!(!events.is_controlled("http://www.w3.org/2000/svg", "input", &input));

		events.tick();
		assert!(!events.is_controlled("", "input", &input));
	}
}
