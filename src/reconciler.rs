//! Applies [`Patch`]es to a [`Document`] and turns DOM events into dispatches.

use crate::{
	host::{Document, EventResponse, Timeout},
	patch::{Change, Patch},
	path::join,
	vnode::{Attr, Node},
};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, trace, trace_span, warn};

/// The attribute carrying node keys in server-rendered markup.
pub const KEY_ATTRIBUTE: &str = "data-twig-key";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
	/// Project event payloads to the fields named by each listener's `include` list, as a server would receive them.
	pub use_server_events: bool,
	/// Write [`KEY_ATTRIBUTE`] onto keyed elements, so the markup can be virtualised again.
	pub expose_keys: bool,
}

/// A DOM event ready to be decoded by the [`Events`](`crate::events::Events`) registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
	pub path: String,
	pub name: String,
	pub payload: Value,
	pub immediate: bool,
}

/// What to do about one DOM event.
#[derive(Debug, Default)]
pub struct EventOutcome {
	pub response: EventResponse,
	/// To dispatch now.
	pub dispatch: Option<Dispatch>,
	/// Milliseconds after which [`Reconciler::take_debounced`] should be called, with the [`Timeout`] passed to [`Reconciler::arm_debounce`].
	pub debounce: Option<u32>,
}

#[derive(Debug, Clone)]
struct Listener {
	prevent_default: bool,
	stop_propagation: bool,
	immediate: bool,
	include: Vec<String>,
}

#[derive(Debug)]
struct Throttle {
	delay: u32,
	last: f64,
	last_event: Option<u64>,
}

#[derive(Debug)]
struct Debouncer {
	delay: u32,
	timer: Option<Timeout>,
	pending: Option<(u64, Dispatch)>,
}

#[derive(Debug)]
struct Meta<N> {
	key: String,
	path: String,
	keyed_children: HashMap<String, N>,
	handlers: HashMap<String, Listener>,
	throttles: HashMap<String, Throttle>,
	debouncers: HashMap<String, Debouncer>,
}

impl<N> Meta<N> {
	fn new(key: String, path: String) -> Self {
		Self { key, path, keyed_children: HashMap::new(), handlers: HashMap::new(), throttles: HashMap::new(), debouncers: HashMap::new() }
	}
}

/// Owns the children of a [`Document`]'s mount point and keeps per-node metadata for them.
///
/// Metadata lives in a side table keyed by node handle. It's released whenever the reconciler removes a node,
/// which also drops pending debounce timers.
pub struct Reconciler<D: Document> {
	document: D,
	root: D::Node,
	meta: HashMap<D::Node, Meta<D::Node>>,
	config: ReconcilerConfig,
	event_sequence: u64,
	pending_focus: Vec<D::Node>,
}

impl<D: Document> core::fmt::Debug for Reconciler<D> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Reconciler").field("root", &self.root).field("tracked_nodes", &self.meta.len()).field("config", &self.config).finish_non_exhaustive()
	}
}

impl<D: Document> Reconciler<D> {
	pub fn new(document: D, config: ReconcilerConfig) -> Self {
		let root = document.root();
		let mut meta = HashMap::new();
		meta.insert(root, Meta::new(String::new(), String::new()));
		Self { document, root, meta, config, event_sequence: 0, pending_focus: Vec::new() }
	}

	pub fn root(&self) -> D::Node {
		self.root
	}

	pub fn document(&self) -> &D {
		&self.document
	}

	pub fn document_mut(&mut self) -> &mut D {
		&mut self.document
	}

	pub fn config(&self) -> &ReconcilerConfig {
		&self.config
	}

	/// The rendered path stored for `node`, if the reconciler tracks it.
	pub fn path_of(&self, node: D::Node) -> Option<&str> {
		self.meta.get(&node).map(|meta| meta.path.as_str())
	}

	pub fn keyed_child(&self, parent: D::Node, key: &str) -> Option<D::Node> {
		self.meta.get(&parent)?.keyed_children.get(key).copied()
	}

	pub fn is_listening(&self, node: D::Node, event: &str) -> bool {
		self.meta.get(&node).map_or(false, |meta| meta.handlers.contains_key(event))
	}

	/// Starts tracking `node`, placed at `index` below `parent`.
	pub(crate) fn initialise(&mut self, parent: Option<D::Node>, node: D::Node, index: usize, key: &str) {
		let parent_path = parent.and_then(|parent| self.meta.get(&parent)).map_or("", |meta| meta.path.as_str());
		let path = join(parent_path, index, key);
		if let Some(parent) = parent.and_then(|parent| self.meta.get_mut(&parent)) {
			if !key.is_empty() {
				parent.keyed_children.insert(key.to_owned(), node);
			}
		}
		self.meta.insert(node, Meta::new(key.to_owned(), path));
	}

	/// Renders `vnode` into the (empty) mount point.
	#[instrument(skip(self, vnode))]
	pub fn mount(&mut self, vnode: &Node) {
		if self.document.child_count(self.root) > 0 {
			warn!("Mounting into a non-empty root. Existing children are kept in front.");
		}
		let before = self.document.child_count(self.root);
		self.insert(self.root, std::slice::from_ref(vnode), before);
		self.flush_focus();
	}

	/// Applies `patch` to the mount point.
	#[instrument(skip_all)]
	pub fn push(&mut self, patch: &Patch) {
		let mut stack = vec![(self.root, patch)];
		while let Some((node, patch)) = stack.pop() {
			for change in &patch.changes {
				self.apply(node, change);
			}

			if patch.removed > 0 {
				let count = self.document.child_count(node);
				let from = count.saturating_sub(patch.removed);
				if from + patch.removed > count {
					error!("Patch removes {} children, but there are only {}.", patch.removed, count);
				}
				self.remove(node, from, patch.removed);
			}

			if patch.removed > 0 || patch.changes.iter().any(|change| !matches!(change, Change::ReplaceText { .. } | Change::ReplaceInnerHtml { .. } | Change::Update { .. })) {
				self.refresh_paths(node);
			}

			let mut previous: Option<(usize, D::Node)> = None;
			let mut resolved = Vec::with_capacity(patch.children.len());
			for child in &patch.children {
				let target = match previous {
					Some((index, previous)) if index + 1 == child.index => self.document.next_sibling(previous),
					_ => self.document.child_at(node, child.index),
				};
				match target {
					Some(target) => {
						previous = Some((child.index, target));
						resolved.push((target, child));
					}
					None => {
						previous = None;
						error!("Patch addresses missing child {} of {:?}.", child.index, node);
					}
				}
			}
			stack.extend(resolved.into_iter().rev());
		}
		self.flush_focus();
	}

	fn apply(&mut self, node: D::Node, change: &Change) {
		let span = trace_span!("Applying change", kind = change.kind());
		let _enter = span.enter();
		match change {
			Change::ReplaceText { content } => self.document.set_text(node, content),
			Change::ReplaceInnerHtml { inner_html } => {
				self.release_children(node);
				self.document.set_inner_html(node, inner_html);
			}
			Change::Update { added, removed } => self.update(node, added, removed),
			Change::Move { key, before, count } => self.move_keyed(node, key, *before, *count),
			Change::RemoveKey { key, count } => {
				let child = self.keyed_child(node, key);
				if child.is_none() {
					error!("No keyed child {:?} to remove.", key);
				}
				self.remove_from(node, child, *count);
			}
			Change::Replace { from, count, with } => {
				self.remove(node, *from, *count);
				self.insert(node, std::slice::from_ref(with), *from);
			}
			Change::Insert { children, before } => self.insert(node, children, *before),
			Change::Remove { from, count } => self.remove(node, *from, *count),
		}
	}

	fn insert(&mut self, parent: D::Node, children: &[Node], before: usize) {
		let reference = self.document.child_at(parent, before);
		let mut created = Vec::new();
		let mut index = before;
		for child in children {
			self.create(parent, index, child, &mut created);
			index += child.advance();
		}
		for node in created {
			self.document.insert_before(parent, node, reference);
		}
	}

	fn move_keyed(&mut self, parent: D::Node, key: &str, before: usize, count: usize) {
		let Some(mut node) = self.keyed_child(parent, key) else { return error!("No keyed child {:?} to move.", key) };
		let reference = self.document.child_at(parent, before);
		for i in 0..count {
			let next = self.document.next_sibling(node);
			self.document.insert_before(parent, node, reference);
			match next {
				Some(next) => node = next,
				None if i + 1 < count => return error!("Ran out of siblings moving {:?}.", key),
				None => break,
			}
		}
	}

	fn remove(&mut self, parent: D::Node, from: usize, count: usize) {
		let child = self.document.child_at(parent, from);
		self.remove_from(parent, child, count);
	}

	fn remove_from(&mut self, parent: D::Node, mut child: Option<D::Node>, count: usize) {
		for _ in 0..count {
			let Some(node) = child else { return error!("Ran out of children to remove.") };
			child = self.document.next_sibling(node);
			if let Some(key) = self.meta.get(&node).map(|meta| meta.key.clone()) {
				if !key.is_empty() {
					if let Some(parent) = self.meta.get_mut(&parent) {
						parent.keyed_children.remove(&key);
					}
				}
			}
			self.release(node);
			self.document.remove_child(parent, node);
		}
	}

	/// Re-derives the stored paths of `parent`'s children from their current positions, recursing into those that changed.
	///
	/// Index-addressed children shift when siblings are inserted, moved or removed in front of them,
	/// and nodes created by changes applied right to left are initialised with an index that later changes shift.
	fn refresh_paths(&mut self, parent: D::Node) {
		let Some(parent_path) = self.meta.get(&parent).map(|meta| meta.path.clone()) else { return };
		let mut child = self.document.first_child(parent);
		let mut index = 0;
		while let Some(node) = child {
			child = self.document.next_sibling(node);
			if let Some(meta) = self.meta.get_mut(&node) {
				let path = join(&parent_path, index, &meta.key);
				if meta.path != path {
					trace!(from = %meta.path, to = %path, "Path shifted.");
					meta.path = path;
					self.refresh_paths(node);
				}
			}
			index += 1;
		}
	}

	/// Forgets `node` and its descendants, cancelling their pending debounces.
	fn release(&mut self, node: D::Node) {
		self.release_children(node);
		self.meta.remove(&node);
		self.pending_focus.retain(|pending| *pending != node);
	}

	fn release_children(&mut self, node: D::Node) {
		let mut child = self.document.first_child(node);
		while let Some(current) = child {
			child = self.document.next_sibling(current);
			self.release(current);
		}
	}

	fn create(&mut self, parent: D::Node, index: usize, vnode: &Node, created: &mut Vec<D::Node>) {
		match vnode {
			Node::Element(element) => {
				let span = trace_span!("Creating element", tag = %element.tag, key = %element.key);
				let _enter = span.enter();

				let node = self.document.create_element(&element.namespace, &element.tag);
				self.initialise(Some(parent), node, index, &element.key);
				if self.config.expose_keys && !element.key.is_empty() {
					self.document.set_attribute(node, KEY_ATTRIBUTE, &element.key);
				}
				for attribute in &element.attributes {
					self.create_attribute(node, attribute);
				}
				self.insert(node, &element.children, 0);
				created.push(node);
			}
			Node::Text(text) => {
				let node = if cfg!(feature = "dangerous-logging") {
					let span = trace_span!("Creating text node", content = %text.content);
					let _enter = span.enter();
					self.document.create_text(&text.content)
				} else {
					self.document.create_text(&text.content)
				};
				self.initialise(Some(parent), node, index, &text.key);
				created.push(node);
			}
			Node::Fragment(fragment) => {
				let marker = self.document.create_text("");
				self.initialise(Some(parent), marker, index, &fragment.key);
				created.push(marker);
				let mut index = index + 1;
				for child in &fragment.children {
					self.create(parent, index, child, created);
					index += child.advance();
				}
			}
			Node::RawHtml(raw_html) => {
				let node = self.document.create_element(&raw_html.namespace, &raw_html.tag);
				self.initialise(Some(parent), node, index, &raw_html.key);
				for attribute in &raw_html.attributes {
					self.create_attribute(node, attribute);
				}
				self.document.set_inner_html(node, &raw_html.inner_html);
				created.push(node);
			}
		}
	}

	fn update(&mut self, node: D::Node, added: &[Attr], removed: &[Attr]) {
		for attribute in removed {
			let name = attribute.name();
			let had_handler = self.meta.get_mut(&node).map_or(false, |meta| {
				meta.throttles.remove(name);
				meta.debouncers.remove(name);
				meta.handlers.remove(name).is_some()
			});
			if had_handler {
				self.document.unlisten(node, name);
			} else {
				self.document.remove_attribute(node, name);
				self.unsync_property(node, name);
			}
		}
		for attribute in added {
			self.create_attribute(node, attribute);
		}
	}

	fn create_attribute(&mut self, node: D::Node, attribute: &Attr) {
		match attribute {
			Attr::Attribute { name, value } if name == "virtual:defaultValue" => {
				self.document.set_property(node, "defaultValue", &Value::String(value.clone()));
			}
			Attr::Attribute { name, value } => {
				if self.document.get_attribute(node, name).as_deref() != Some(value.as_str()) {
					self.document.set_attribute(node, name, value);
				}
				self.sync_property(node, name, value);
			}
			Attr::Property { name, value } => self.document.set_property(node, name, value),
			Attr::Event(binding) => {
				let Some(meta) = self.meta.get_mut(&node) else { return error!("Binding {:?} on an untracked node.", binding.name) };
				if meta.handlers.contains_key(&binding.name) {
					self.document.unlisten(node, &binding.name);
				}
				self.document.listen(node, &binding.name, !binding.prevent_default);

				if binding.throttle > 0 {
					meta.throttles.entry(binding.name.clone()).or_insert(Throttle { delay: binding.throttle, last: f64::NEG_INFINITY, last_event: None }).delay = binding.throttle;
				} else {
					meta.throttles.remove(&binding.name);
				}

				if binding.debounce > 0 {
					meta.debouncers.entry(binding.name.clone()).or_insert(Debouncer { delay: binding.debounce, timer: None, pending: None }).delay = binding.debounce;
				} else {
					meta.debouncers.remove(&binding.name);
				}

				meta.handlers.insert(
					binding.name.clone(),
					Listener {
						prevent_default: binding.prevent_default,
						stop_propagation: binding.stop_propagation,
						immediate: binding.immediate,
						include: binding.include.clone(),
					},
				);
			}
		}
	}

	/// Mirrors attributes whose DOM property drifts from the attribute once the user interacts.
	fn sync_property(&mut self, node: D::Node, name: &str, value: &str) {
		match name {
			"checked" | "selected" => self.document.set_property(node, name, &Value::Bool(true)),
			"value" => self.document.set_property(node, "value", &Value::String(value.to_owned())),
			"autofocus" => self.pending_focus.push(node),
			_ => (),
		}
	}

	fn unsync_property(&mut self, node: D::Node, name: &str) {
		match name {
			"checked" | "selected" => self.document.set_property(node, name, &Value::Bool(false)),
			"value" => self.document.set_property(node, "value", &Value::String(String::new())),
			_ => (),
		}
	}

	fn flush_focus(&mut self) {
		for node in core::mem::take(&mut self.pending_focus) {
			self.document.focus(node);
		}
	}

	/// Decides what to do about an event the host reports for a listener installed on `node`.
	///
	/// `now` is in milliseconds on the same clock as throttle delays.
	#[instrument(skip(self, event))]
	pub fn handle_event(&mut self, node: D::Node, name: &str, event: &Value, now: f64) -> EventOutcome {
		let Some(meta) = self.meta.get_mut(&node) else {
			debug!("Event on an untracked node.");
			return EventOutcome::default();
		};
		let Some(listener) = meta.handlers.get(name) else {
			debug!("Event without a handler.");
			return EventOutcome::default();
		};

		let response = EventResponse { prevent_default: listener.prevent_default, stop_propagation: listener.stop_propagation };
		let payload = if self.config.use_server_events { project(event, &listener.include, name) } else { event.clone() };
		self.event_sequence += 1;
		let sequence = self.event_sequence;
		let dispatch = Dispatch { path: meta.path.clone(), name: name.to_owned(), payload, immediate: listener.immediate };

		let mut outcome = EventOutcome { response, dispatch: None, debounce: None };
		let throttle = meta.throttles.get_mut(name);
		let throttled = throttle.is_some();
		if let Some(throttle) = throttle {
			if now > throttle.last + f64::from(throttle.delay) {
				trace!("Throttle open.");
				throttle.last = now;
				throttle.last_event = Some(sequence);
				outcome.dispatch = Some(dispatch.clone());
			}
		}

		match meta.debouncers.get_mut(name) {
			Some(debouncer) => {
				debouncer.timer = None;
				debouncer.pending = Some((sequence, dispatch));
				outcome.debounce = Some(debouncer.delay);
			}
			None if !throttled => outcome.dispatch = Some(dispatch),
			None => (),
		}
		outcome
	}

	/// Stores the timer of a debounce requested through [`EventOutcome::debounce`].
	///
	/// If the node or listener is gone by now, `timeout` is dropped and so cancelled.
	pub fn arm_debounce(&mut self, node: D::Node, name: &str, timeout: Timeout) {
		if let Some(debouncer) = self.meta.get_mut(&node).and_then(|meta| meta.debouncers.get_mut(name)) {
			debouncer.timer = Some(timeout);
		}
	}

	/// Takes the debounced event once its timer fired, unless the throttle already delivered that same event.
	pub fn take_debounced(&mut self, node: D::Node, name: &str) -> Option<Dispatch> {
		let meta = self.meta.get_mut(&node)?;
		let debouncer = meta.debouncers.get_mut(name)?;
		if let Some(timer) = debouncer.timer.take() {
			timer.disarm();
		}
		let (sequence, dispatch) = debouncer.pending.take()?;
		if meta.throttles.get(name).and_then(|throttle| throttle.last_event) == Some(sequence) {
			trace!("Already delivered by the throttle.");
			None
		} else {
			Some(dispatch)
		}
	}

	/// Removes everything the reconciler rendered and forgets all metadata, cancelling pending timers.
	#[instrument(skip(self))]
	pub fn teardown(&mut self) {
		while let Some(child) = self.document.first_child(self.root) {
			self.release(child);
			self.document.remove_child(self.root, child);
		}
		self.meta.retain(|node, _| *node == self.root);
		if let Some(root) = self.meta.get_mut(&self.root) {
			root.keyed_children.clear();
		}
		self.pending_focus.clear();
	}
}

/// Keeps only the dot paths in `include` (plus `type`), the shape a server-side handler receives.
#[must_use]
pub fn project(event: &Value, include: &[String], name: &str) -> Value {
	let mut projected = Map::new();
	projected.insert("type".to_owned(), Value::String(name.to_owned()));
	let mut include: Vec<&str> = include.iter().map(String::as_str).collect();
	match name {
		"input" | "change" => include.push("target.value"),
		"submit" => include.push("detail.formData"),
		_ => (),
	}
	for path in include {
		let mut value = event;
		let mut found = true;
		for segment in path.split('.') {
			match value.get(segment) {
				Some(inner) => value = inner,
				None => {
					found = false;
					break;
				}
			}
		}
		if !found {
			continue;
		}

		let mut target = &mut projected;
		let mut segments = path.split('.').peekable();
		while let Some(segment) = segments.next() {
			if segments.peek().is_none() {
				target.insert(segment.to_owned(), value.clone());
				break;
			}
			let entry = target.entry(segment.to_owned()).or_insert_with(|| Value::Object(Map::new()));
			match entry {
				Value::Object(inner) => target = inner,
				_ => break,
			}
		}
	}
	Value::Object(projected)
}
