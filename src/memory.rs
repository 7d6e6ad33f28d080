//! An in-process [`Document`] and a manually driven [`EventLoop`].
//!
//! These back the native test suite and are usable for server-side or headless rendering.

use crate::host::{Document, EventLoop, EventSink, NodeId, NodeKind, Timeout};
use core::{any::Any, fmt::Write as _};
use serde_json::{json, Value};
use std::{
	cell::{Cell, RefCell},
	collections::{BTreeMap, VecDeque},
	rc::{Rc, Weak},
};
use tracing::{error, trace, warn};

#[derive(Debug)]
struct Slot {
	parent: Option<NodeId>,
	/// Last known index among the parent's children. Only a hint, checked before use.
	position: Cell<usize>,
	children: Vec<NodeId>,
	data: Data,
}

#[derive(Debug)]
enum Data {
	Element(ElementData),
	Text(String),
	Comment(String),
}

#[derive(Debug, Default)]
struct ElementData {
	namespace: String,
	tag: String,
	attributes: Vec<(String, String)>,
	properties: BTreeMap<String, Value>,
	/// Event name to passiveness.
	listeners: BTreeMap<String, bool>,
	inner_html: Option<String>,
}

/// A custom event dispatched through [`Document::emit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
	pub node: NodeId,
	pub name: String,
	pub detail: Value,
}

/// A DOM tree in plain memory, with a `<div>` as mount point.
pub struct MemoryDocument {
	slots: Vec<Option<Slot>>,
	free: Vec<u32>,
	root: NodeId,
	focused: Option<NodeId>,
	emitted: Vec<Emitted>,
	sink: Option<EventSink<NodeId>>,
}

impl Default for MemoryDocument {
	fn default() -> Self {
		Self::new()
	}
}

impl core::fmt::Debug for MemoryDocument {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("MemoryDocument").field("html", &self.to_html(self.root)).finish_non_exhaustive()
	}
}

impl MemoryDocument {
	#[must_use]
	pub fn new() -> Self {
		let mut document = Self { slots: Vec::new(), free: Vec::new(), root: NodeId(0), focused: None, emitted: Vec::new(), sink: None };
		document.root = document.allocate(Data::Element(ElementData { tag: "div".to_owned(), ..ElementData::default() }));
		document
	}

	fn allocate(&mut self, data: Data) -> NodeId {
		let slot = Slot { parent: None, position: Cell::new(0), children: Vec::new(), data };
		if let Some(id) = self.free.pop() {
			self.slots[id as usize] = Some(slot);
			NodeId(id)
		} else {
			self.slots.push(Some(slot));
			NodeId(u32::try_from(self.slots.len() - 1).unwrap_or(u32::MAX))
		}
	}

	fn slot(&self, node: NodeId) -> Option<&Slot> {
		self.slots.get(node.0 as usize).and_then(Option::as_ref)
	}

	fn slot_mut(&mut self, node: NodeId) -> Option<&mut Slot> {
		self.slots.get_mut(node.0 as usize).and_then(Option::as_mut)
	}

	fn element(&self, node: NodeId) -> Option<&ElementData> {
		match self.slot(node).map(|slot| &slot.data) {
			Some(Data::Element(element)) => Some(element),
			_ => None,
		}
	}

	fn element_mut(&mut self, node: NodeId) -> Option<&mut ElementData> {
		match self.slot_mut(node).map(|slot| &mut slot.data) {
			Some(Data::Element(element)) => Some(element),
			_ => None,
		}
	}

	fn detach(&mut self, node: NodeId) {
		let Some(parent) = self.slot(node).and_then(|slot| slot.parent) else { return };
		if let Some(parent) = self.slot_mut(parent) {
			parent.children.retain(|child| *child != node);
		}
		if let Some(slot) = self.slot_mut(node) {
			slot.parent = None;
		}
	}

	fn free_subtree(&mut self, node: NodeId) {
		let Some(slot) = self.slots.get_mut(node.0 as usize).and_then(Option::take) else { return };
		if self.focused == Some(node) {
			self.focused = None;
		}
		self.free.push(node.0);
		for child in slot.children {
			self.free_subtree(child);
		}
	}

	/// Creates a comment node, which the runtime never renders itself.
	pub fn create_comment(&mut self, content: &str) -> NodeId {
		self.allocate(Data::Comment(content.to_owned()))
	}

	/// Appends `child` to `parent`.
	pub fn append(&mut self, parent: NodeId, child: NodeId) {
		self.insert_before(parent, child, None);
	}

	#[must_use]
	pub fn children(&self, node: NodeId) -> Vec<NodeId> {
		self.slot(node).map(|slot| slot.children.clone()).unwrap_or_default()
	}

	/// Installed listeners by event name, with whether they're passive.
	#[must_use]
	pub fn listeners(&self, node: NodeId) -> Vec<(String, bool)> {
		self.element(node).map(|element| element.listeners.iter().map(|(name, passive)| (name.clone(), *passive)).collect()).unwrap_or_default()
	}

	#[must_use]
	pub fn emitted(&self) -> &[Emitted] {
		&self.emitted
	}

	#[must_use]
	pub fn focused(&self) -> Option<NodeId> {
		self.focused
	}

	#[must_use]
	pub fn event_sink(&self) -> Option<EventSink<NodeId>> {
		self.sink.clone()
	}

	/// The nodes an event fired at `target` would reach, in bubbling order, that listen for `event`.
	#[must_use]
	pub fn propagation_path(&self, target: NodeId, event: &str) -> Vec<NodeId> {
		let mut path = Vec::new();
		let mut node = Some(target);
		while let Some(current) = node {
			if self.element(current).map_or(false, |element| element.listeners.contains_key(event)) {
				path.push(current);
			}
			node = self.parent(current);
		}
		path
	}

	/// Serialises the children of `node`.
	#[must_use]
	pub fn to_html(&self, node: NodeId) -> String {
		let mut html = String::new();
		if let Some(slot) = self.slot(node) {
			match &slot.data {
				Data::Element(ElementData { inner_html: Some(inner_html), .. }) => html.push_str(inner_html),
				_ => {
					for child in &slot.children {
						self.write_node(*child, &mut html);
					}
				}
			}
		}
		html
	}

	/// Serialises `node` itself.
	#[must_use]
	pub fn outer_html(&self, node: NodeId) -> String {
		let mut html = String::new();
		self.write_node(node, &mut html);
		html
	}

	fn write_node(&self, node: NodeId, html: &mut String) {
		let Some(slot) = self.slot(node) else { return };
		match &slot.data {
			Data::Text(text) => html.push_str(text),
			Data::Comment(comment) => {
				let _ = write!(html, "<!--{}-->", comment);
			}
			Data::Element(element) => {
				let _ = write!(html, "<{}", element.tag);
				for (name, value) in &element.attributes {
					let _ = write!(html, " {}=\"{}\"", name, value.replace('"', "&quot;"));
				}
				html.push('>');
				if element.namespace.is_empty() && crate::vnode::is_void_element(&element.tag, "") {
					return;
				}
				html.push_str(&self.to_html(node));
				let _ = write!(html, "</{}>", element.tag);
			}
		}
	}
}

impl Document for MemoryDocument {
	type Node = NodeId;

	fn root(&self) -> NodeId {
		self.root
	}

	fn kind(&self, node: NodeId) -> NodeKind {
		match self.slot(node).map(|slot| &slot.data) {
			Some(Data::Element(_)) => NodeKind::Element,
			Some(Data::Text(_)) => NodeKind::Text,
			Some(Data::Comment(_)) | None => NodeKind::Other,
		}
	}

	fn create_element(&mut self, namespace: &str, tag: &str) -> NodeId {
		self.allocate(Data::Element(ElementData { namespace: namespace.to_owned(), tag: tag.to_owned(), ..ElementData::default() }))
	}

	fn create_text(&mut self, content: &str) -> NodeId {
		self.allocate(Data::Text(content.to_owned()))
	}

	fn tag_name(&self, node: NodeId) -> String {
		self.element(node).map(|element| element.tag.clone()).unwrap_or_default()
	}

	fn namespace(&self, node: NodeId) -> String {
		self.element(node).map(|element| element.namespace.clone()).unwrap_or_default()
	}

	fn text(&self, node: NodeId) -> Option<String> {
		match self.slot(node).map(|slot| &slot.data) {
			Some(Data::Text(text) | Data::Comment(text)) => Some(text.clone()),
			_ => None,
		}
	}

	fn set_text(&mut self, node: NodeId, content: &str) {
		match self.slot_mut(node).map(|slot| &mut slot.data) {
			Some(Data::Text(text) | Data::Comment(text)) => *text = content.to_owned(),
			_ => warn!("Tried to set the text of a non-text node {:?}.", node),
		}
	}

	fn set_inner_html(&mut self, node: NodeId, html: &str) {
		for child in self.children(node) {
			self.detach(child);
			self.free_subtree(child);
		}
		if let Some(element) = self.element_mut(node) {
			element.inner_html = Some(html.to_owned());
		}
	}

	fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
		self.element(node).map(|element| element.attributes.clone()).unwrap_or_default()
	}

	fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
		self.element(node)?.attributes.iter().find(|(n, _)| n == name).map(|(_, value)| value.clone())
	}

	fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
		let Some(element) = self.element_mut(node) else { return error!("Tried to set an attribute on a non-element {:?}.", node) };
		match element.attributes.iter_mut().find(|(n, _)| n == name) {
			Some((_, existing)) => *existing = value.to_owned(),
			None => element.attributes.push((name.to_owned(), value.to_owned())),
		}
	}

	fn remove_attribute(&mut self, node: NodeId, name: &str) {
		if let Some(element) = self.element_mut(node) {
			element.attributes.retain(|(n, _)| n != name);
		}
	}

	fn property(&self, node: NodeId, name: &str) -> Option<Value> {
		let element = self.element(node)?;
		if let Some(value) = element.properties.get(name) {
			return Some(value.clone());
		}
		let attribute = |name: &str| element.attributes.iter().find(|(n, _)| n == name).map(|(_, value)| value.clone());
		match name {
			"value" => Some(Value::String(attribute("value").unwrap_or_default())),
			"checked" | "selected" | "disabled" => Some(Value::Bool(attribute(name).is_some())),
			"type" => Some(Value::String(match element.tag.as_str() {
				"input" => attribute("type").unwrap_or_else(|| "text".to_owned()),
				"select" => "select-one".to_owned(),
				other => other.to_owned(),
			})),
			_ => None,
		}
	}

	fn set_property(&mut self, node: NodeId, name: &str, value: &Value) {
		if let Some(element) = self.element_mut(node) {
			element.properties.insert(name.to_owned(), value.clone());
		}
	}

	fn parent(&self, node: NodeId) -> Option<NodeId> {
		self.slot(node)?.parent
	}

	fn first_child(&self, node: NodeId) -> Option<NodeId> {
		self.slot(node)?.children.first().copied()
	}

	fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
		let slot = self.slot(node)?;
		let parent = self.slot(slot.parent?)?;
		let hint = slot.position.get();
		let position = if parent.children.get(hint) == Some(&node) {
			hint
		} else {
			let position = parent.children.iter().position(|child| *child == node)?;
			slot.position.set(position);
			position
		};
		let next = *parent.children.get(position + 1)?;
		if let Some(next) = self.slot(next) {
			next.position.set(position + 1);
		}
		Some(next)
	}

	fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
		let child = *self.slot(parent)?.children.get(index)?;
		if let Some(slot) = self.slot(child) {
			slot.position.set(index);
		}
		Some(child)
	}

	fn child_count(&self, parent: NodeId) -> usize {
		self.slot(parent).map_or(0, |slot| slot.children.len())
	}

	fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
		if reference == Some(child) {
			return;
		}
		self.detach(child);
		let Some(parent_slot) = self.slot_mut(parent) else { return error!("Tried to insert into a missing node {:?}.", parent) };
		let position = reference.and_then(|reference| parent_slot.children.iter().position(|c| *c == reference));
		let position = match position {
			Some(position) => {
				parent_slot.children.insert(position, child);
				position
			}
			None => {
				if reference.is_some() {
					warn!("Insertion reference is not a child of {:?}. Appending instead.", parent);
				}
				parent_slot.children.push(child);
				parent_slot.children.len() - 1
			}
		};
		if let Some(slot) = self.slot_mut(child) {
			slot.parent = Some(parent);
			slot.position.set(position);
		}
	}

	fn remove_child(&mut self, parent: NodeId, child: NodeId) {
		if self.parent(child) != Some(parent) {
			return warn!("{:?} is not a child of {:?}.", child, parent);
		}
		self.detach(child);
		self.free_subtree(child);
	}

	fn listen(&mut self, node: NodeId, event: &str, passive: bool) {
		if let Some(element) = self.element_mut(node) {
			element.listeners.insert(event.to_owned(), passive);
		}
	}

	fn unlisten(&mut self, node: NodeId, event: &str) {
		if let Some(element) = self.element_mut(node) {
			element.listeners.remove(event);
		}
	}

	fn focus(&mut self, node: NodeId) {
		trace!(?node, "Focus.");
		self.focused = Some(node);
	}

	fn is_focused(&self, node: NodeId) -> bool {
		self.focused == Some(node)
	}

	fn event_snapshot(&self, node: NodeId, event: &str) -> Value {
		json!({
			"type": event,
			"target": {
				"value": self.property(node, "value").unwrap_or(Value::Null),
				"checked": self.property(node, "checked").unwrap_or(Value::Bool(false)),
			},
		})
	}

	fn emit(&mut self, node: NodeId, event: &str, detail: &Value) {
		self.emitted.push(Emitted { node, name: event.to_owned(), detail: detail.clone() });
	}

	fn root_handle(&self) -> Box<dyn Any> {
		Box::new(self.root)
	}

	fn set_event_sink(&mut self, sink: EventSink<NodeId>) {
		self.sink = Some(sink);
	}
}

#[derive(Default)]
struct LoopState {
	now: f64,
	next_id: u64,
	frames: Vec<(u64, Box<dyn FnOnce()>)>,
	microtasks: VecDeque<Box<dyn FnOnce()>>,
	timers: Vec<(u64, f64, Box<dyn FnOnce()>)>,
}

/// An [`EventLoop`] that only makes progress when told to.
///
/// Clones share their queues, so a test can keep one while the runtime owns another.
#[derive(Clone, Default)]
pub struct ManualEventLoop {
	state: Rc<RefCell<LoopState>>,
}

impl core::fmt::Debug for ManualEventLoop {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("ManualEventLoop")
			.field("now", &state.now)
			.field("frames", &state.frames.len())
			.field("microtasks", &state.microtasks.len())
			.field("timers", &state.timers.len())
			.finish()
	}
}

impl ManualEventLoop {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn next_id(&self) -> u64 {
		let mut state = self.state.borrow_mut();
		state.next_id += 1;
		state.next_id
	}

	/// Runs queued microtasks, including ones they queue, until none are left.
	pub fn run_microtasks(&self) {
		loop {
			let task = self.state.borrow_mut().microtasks.pop_front();
			match task {
				Some(task) => task(),
				None => break,
			}
		}
	}

	/// Runs all animation frame callbacks requested so far (but not ones they request), each followed by a microtask checkpoint.
	///
	/// Returns how many ran.
	pub fn run_frame(&self) -> usize {
		self.run_microtasks();
		let frames = core::mem::take(&mut self.state.borrow_mut().frames);
		let count = frames.len();
		for (_, callback) in frames {
			callback();
			self.run_microtasks();
		}
		count
	}

	/// Moves the clock forward by `ms`, firing due timeouts in order.
	pub fn advance(&self, ms: f64) {
		self.run_microtasks();
		let target = self.state.borrow().now + ms;
		loop {
			let due = {
				let mut state = self.state.borrow_mut();
				let next = state
					.timers
					.iter()
					.enumerate()
					.filter(|(_, (_, due, _))| *due <= target)
					.min_by(|(_, (a_id, a_due, _)), (_, (b_id, b_due, _))| a_due.total_cmp(b_due).then(a_id.cmp(b_id)))
					.map(|(i, _)| i);
				next.map(|i| {
					let (_, due, callback) = state.timers.remove(i);
					state.now = state.now.max(due);
					callback
				})
			};
			match due {
				Some(callback) => {
					callback();
					self.run_microtasks();
				}
				None => break,
			}
		}
		self.state.borrow_mut().now = target;
	}

	#[must_use]
	pub fn pending_frames(&self) -> usize {
		self.state.borrow().frames.len()
	}

	#[must_use]
	pub fn pending_microtasks(&self) -> usize {
		self.state.borrow().microtasks.len()
	}

	#[must_use]
	pub fn pending_timers(&self) -> usize {
		self.state.borrow().timers.len()
	}
}

impl EventLoop for ManualEventLoop {
	type Frame = u64;

	fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> u64 {
		let id = self.next_id();
		self.state.borrow_mut().frames.push((id, callback));
		id
	}

	fn cancel_animation_frame(&self, frame: u64) {
		self.state.borrow_mut().frames.retain(|(id, _)| *id != frame);
	}

	fn queue_microtask(&self, callback: Box<dyn FnOnce()>) {
		self.state.borrow_mut().microtasks.push_back(callback);
	}

	fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> Timeout {
		let id = self.next_id();
		let due = self.now() + f64::from(delay_ms);
		self.state.borrow_mut().timers.push((id, due, callback));

		let state: Weak<RefCell<LoopState>> = Rc::downgrade(&self.state);
		Timeout::new(move || {
			if let Some(state) = state.upgrade() {
				match state.try_borrow_mut() {
					Ok(mut state) => state.timers.retain(|(timer, _, _)| *timer != id),
					Err(_) => error!("Could not cancel timeout {} while the event loop is busy.", id),
				}
			}
		})
	}

	fn now(&self) -> f64 {
		self.state.borrow().now
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;

	#[test]
	fn sibling_walks_follow_insertions_and_removals() {
		let mut document = MemoryDocument::new();
		let root = document.root();
		let texts: Vec<NodeId> = ["a", "b", "c"].iter().map(|content| document.create_text(content)).collect();
		for text in &texts {
			document.append(root, *text);
		}
		let first = document.create_text("0");
		document.insert_before(root, first, Some(texts[0]));
		document.remove_child(root, texts[1]);

		let mut walked = Vec::new();
		let mut child = document.first_child(root);
		while let Some(current) = child {
			walked.push(current);
			child = document.next_sibling(current);
		}
		assert_eq!(walked, vec![first, texts[0], texts[2]]);
		assert_eq!(document.child_at(root, 2), Some(texts[2]));
		assert_eq!(document.next_sibling(texts[2]), None);
	}

	#[test]
	fn serialises_and_moves_nodes() {
		let mut document = MemoryDocument::new();
		let root = document.root();
		let a = document.create_element("", "b");
		let text = document.create_text("x");
		document.append(a, text);
		let input = document.create_element("", "input");
		document.set_attribute(input, "value", "v");
		document.append(root, a);
		document.append(root, input);
		assert_eq!(document.to_html(root), "<b>x</b><input value=\"v\">");

		document.insert_before(root, input, Some(a));
		assert_eq!(document.to_html(root), "<input value=\"v\"><b>x</b>");
		document.insert_before(root, a, Some(a));
		assert_eq!(document.child_at(root, 1), Some(a));

		document.remove_child(root, a);
		assert_eq!(document.child_count(root), 1);
		assert_eq!(document.property(input, "value"), Some(Value::String("v".into())));
	}

	#[test]
	fn removed_ids_are_reused() {
		let mut document = MemoryDocument::new();
		let root = document.root();
		let text = document.create_text("x");
		document.append(root, text);
		document.remove_child(root, text);
		assert_eq!(document.create_text("y"), text);
	}

	#[test]
	fn timeouts_fire_in_order_and_cancel_on_drop() {
		let event_loop = ManualEventLoop::new();
		let log = Rc::new(RefCell::new(Vec::new()));
		let push = |label: &'static str| {
			let log = log.clone();
			Box::new(move || log.borrow_mut().push(label)) as Box<dyn FnOnce()>
		};
		let late = event_loop.set_timeout(20, push("late"));
		let early = event_loop.set_timeout(10, push("early"));
		let cancelled = event_loop.set_timeout(5, push("cancelled"));
		drop(cancelled);

		event_loop.advance(15.0);
		assert_eq!(*log.borrow(), vec!["early"]);
		event_loop.advance(10.0);
		assert_eq!(*log.borrow(), vec!["early", "late"]);
		early.disarm();
		late.disarm();
	}

	#[test]
	fn frames_requested_by_frames_wait() {
		let event_loop = ManualEventLoop::new();
		let ran = Rc::new(Cell::new(0));
		{
			let inner_loop = event_loop.clone();
			let ran = ran.clone();
			event_loop.request_animation_frame(Box::new(move || {
				ran.set(ran.get() + 1);
				let ran = ran.clone();
				inner_loop.request_animation_frame(Box::new(move || ran.set(ran.get() + 1)));
			}));
		}
		assert_eq!(event_loop.run_frame(), 1);
		assert_eq!(ran.get(), 1);
		assert_eq!(event_loop.pending_frames(), 1);
		event_loop.run_frame();
		assert_eq!(ran.get(), 2);
	}
}
