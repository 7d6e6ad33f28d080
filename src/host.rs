//! What the reconciler and runtime need from their environment.
//!
//! [`web`](`crate::web`) implements these against a browser, [`memory`](`crate::memory`) against an in-process tree.

use core::{
	any::Any,
	fmt::{self, Debug, Formatter},
	hash::Hash,
};
use serde_json::Value;
use std::rc::Rc;

/// An opaque handle to a DOM node, stable for as long as the node is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Element,
	Text,
	/// Comments and anything else the runtime doesn't render.
	Other,
}

/// The host's side of event handling: whether to cancel the DOM event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventResponse {
	pub prevent_default: bool,
	pub stop_propagation: bool,
}

/// Called by a [`Document`] whenever a listener it was asked to install fires.
///
/// Arguments are the listening node, the event name and a JSON snapshot of the event.
pub type EventSink<N> = Rc<dyn Fn(N, &str, &Value) -> EventResponse>;

/// A mutable DOM.
pub trait Document {
	type Node: Copy + Eq + Hash + Debug + 'static;

	/// The mount point. Its children are managed by the runtime.
	fn root(&self) -> Self::Node;

	fn kind(&self, node: Self::Node) -> NodeKind;
	/// `namespace` is empty for HTML.
	fn create_element(&mut self, namespace: &str, tag: &str) -> Self::Node;
	fn create_text(&mut self, content: &str) -> Self::Node;
	/// The local name, as created.
	fn tag_name(&self, node: Self::Node) -> String;
	/// Empty for HTML.
	fn namespace(&self, node: Self::Node) -> String;

	fn text(&self, node: Self::Node) -> Option<String>;
	fn set_text(&mut self, node: Self::Node, content: &str);
	fn set_inner_html(&mut self, node: Self::Node, html: &str);

	fn attributes(&self, node: Self::Node) -> Vec<(String, String)>;
	fn get_attribute(&self, node: Self::Node, name: &str) -> Option<String>;
	fn set_attribute(&mut self, node: Self::Node, name: &str, value: &str);
	fn remove_attribute(&mut self, node: Self::Node, name: &str);
	fn property(&self, node: Self::Node, name: &str) -> Option<Value>;
	fn set_property(&mut self, node: Self::Node, name: &str, value: &Value);

	fn parent(&self, node: Self::Node) -> Option<Self::Node>;
	fn first_child(&self, node: Self::Node) -> Option<Self::Node>;
	fn next_sibling(&self, node: Self::Node) -> Option<Self::Node>;
	fn child_at(&self, parent: Self::Node, index: usize) -> Option<Self::Node>;
	fn child_count(&self, parent: Self::Node) -> usize;
	/// Appends if `reference` is [`None`]. (Re)inserting a node before itself is a no-op.
	fn insert_before(&mut self, parent: Self::Node, child: Self::Node, reference: Option<Self::Node>);
	/// Detaches `child`. Its handle, and those of its descendants, may be reused afterwards.
	fn remove_child(&mut self, parent: Self::Node, child: Self::Node);

	/// Installs the shared listener for `event` on `node`. Passive listeners can't prevent defaults.
	fn listen(&mut self, node: Self::Node, event: &str, passive: bool);
	fn unlisten(&mut self, node: Self::Node, event: &str);

	fn focus(&mut self, node: Self::Node);
	fn is_focused(&self, node: Self::Node) -> bool;

	/// A JSON snapshot of the kind a listener would receive for `event` on `node`, used to synthesise events.
	fn event_snapshot(&self, node: Self::Node, event: &str) -> Value;

	/// Dispatches a bubbling, composed custom event on `node`.
	fn emit(&mut self, node: Self::Node, event: &str, detail: &Value);

	/// A host-specific handle of the mount point, handed to effects.
	fn root_handle(&self) -> Box<dyn Any>;

	/// Where listeners installed through [`Document::listen`] report to.
	fn set_event_sink(&mut self, sink: EventSink<Self::Node>);
}

/// A pending timeout. Dropping it cancels the callback.
#[must_use = "Dropping a `Timeout` cancels it."]
pub struct Timeout {
	cancel: Option<Box<dyn FnOnce()>>,
}

impl Timeout {
	pub fn new(cancel: impl FnOnce() + 'static) -> Self {
		Self { cancel: Some(Box::new(cancel)) }
	}

	/// Forgets the timeout without cancelling it, for use once it has fired.
	pub fn disarm(mut self) {
		self.cancel = None;
	}
}

impl Drop for Timeout {
	fn drop(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel();
		}
	}
}

impl Debug for Timeout {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Timeout").field("armed", &self.cancel.is_some()).finish()
	}
}

/// The host's task queues and clock.
pub trait EventLoop {
	type Frame;

	/// Runs `callback` before the next paint.
	fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> Self::Frame;
	fn cancel_animation_frame(&self, frame: Self::Frame);
	/// Runs `callback` once the current task completes, before rendering.
	fn queue_microtask(&self, callback: Box<dyn FnOnce()>);
	fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> Timeout;
	/// Milliseconds, monotonic.
	fn now(&self) -> f64;
}
