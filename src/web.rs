//! The browser backend: a [`Document`] over `web_sys` nodes and an [`EventLoop`] over the window's task queues.

use crate::{
	host::{Document, EventLoop, EventSink, NodeId, NodeKind, Timeout},
	runtime::{Application, Config, Runtime},
	vnode::HTML_NAMESPACE,
};
use core::any::Any;
use js_sys::{Array, Function, Reflect};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{cell::RefCell, rc::Rc};
use thiserror::Error;
use tracing::{error, instrument, trace_span, warn};
use wasm_bindgen::{closure::Closure, JsCast, JsValue, UnwrapThrowExt};

/// Tags DOM nodes with their [`NodeId`].
const ID_PROPERTY: &str = "__twigNodeId";

/// Event fields copied into payload snapshots, where present.
const EVENT_FIELDS: &[&str] = &[
	"key", "code", "repeat", "altKey", "ctrlKey", "metaKey", "shiftKey", "button", "buttons", "clientX", "clientY", "pageX", "pageY", "deltaX", "deltaY", "data", "inputType", "timeStamp",
];

/// Target fields copied into payload snapshots, where present.
const TARGET_FIELDS: &[&str] = &["value", "checked", "selected", "name", "id", "tagName", "type"];

#[derive(Default)]
struct Slab {
	nodes: Vec<Option<web_sys::Node>>,
	free: Vec<u32>,
}

/// A [`Document`] whose mount point is a live DOM element.
///
/// All listeners share one [`Closure`], which reports to the [`EventSink`] with the [`NodeId`] stored on `currentTarget`.
pub struct WebDocument {
	document: web_sys::Document,
	root_element: web_sys::Element,
	root: NodeId,
	slab: RefCell<Slab>,
	sink: Rc<RefCell<Option<EventSink<NodeId>>>>,
	common_handler: Closure<dyn Fn(web_sys::Event)>,
	event_listener_options_cache: [Option<web_sys::AddEventListenerOptions>; 2],
}

impl core::fmt::Debug for WebDocument {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("WebDocument").field("root_element", &self.root_element).field("root", &self.root).finish_non_exhaustive()
	}
}

impl WebDocument {
	#[must_use]
	#[instrument]
	pub fn new(root_element: web_sys::Element) -> Self {
		let document = root_element.owner_document().expect_throw("twig-dom: No owner document found for root element.");
		let sink: Rc<RefCell<Option<EventSink<NodeId>>>> = Rc::default();
		let common_handler = {
			let sink = sink.clone();
			Closure::wrap(Box::new(move |event: web_sys::Event| {
				let span = trace_span!("common_handler", event = %event.type_());
				let _enter = span.enter();

				let Some(node) = event.current_target().and_then(|target| node_id(target.as_ref())) else {
					return error!("twig-dom bug: Listener fired on an untagged node.");
				};
				let Some(sink) = sink.borrow().clone() else { return warn!("Event before the runtime started.") };
				let response = sink(node, &event.type_(), &snapshot(&event));
				if response.prevent_default {
					event.prevent_default();
				}
				if response.stop_propagation {
					event.stop_propagation();
				}
			}) as Box<dyn Fn(web_sys::Event)>)
		};

		let mut this = Self {
			document,
			root_element: root_element.clone(),
			root: NodeId(0),
			slab: RefCell::default(),
			sink,
			common_handler,
			event_listener_options_cache: [None, None],
		};
		this.root = this.adopt(root_element.into());
		this
	}

	fn adopt(&self, node: web_sys::Node) -> NodeId {
		if let Some(id) = node_id(node.as_ref()) {
			if self.slab.borrow().nodes.get(id.0 as usize).and_then(Option::as_ref).map_or(false, |known| known == &node) {
				return id;
			}
		}

		let mut slab = self.slab.borrow_mut();
		let id = match slab.free.pop() {
			Some(id) => {
				slab.nodes[id as usize] = Some(node.clone());
				id
			}
			None => {
				slab.nodes.push(Some(node.clone()));
				u32::try_from(slab.nodes.len() - 1).expect_throw("twig-dom: Too many nodes.")
			}
		};
		if let Err(error) = Reflect::set(node.as_ref(), &ID_PROPERTY.into(), &JsValue::from(id)) {
			error!("Failed to tag node: {:?}", error);
		}
		NodeId(id)
	}

	fn adopt_opt(&self, node: Option<web_sys::Node>) -> Option<NodeId> {
		node.map(|node| self.adopt(node))
	}

	fn get(&self, id: NodeId) -> Option<web_sys::Node> {
		self.slab.borrow().nodes.get(id.0 as usize).and_then(Clone::clone)
	}

	fn element(&self, id: NodeId) -> Option<web_sys::Element> {
		self.get(id)?.dyn_into::<web_sys::Element>().ok()
	}

	fn free_subtree(&self, node: &web_sys::Node) {
		let mut child = node.first_child();
		while let Some(current) = child {
			child = current.next_sibling();
			self.free_subtree(&current);
		}
		if let Some(id) = node_id(node.as_ref()) {
			let mut slab = self.slab.borrow_mut();
			if slab.nodes.get(id.0 as usize).and_then(Option::as_ref).map_or(false, |known| known == node) {
				slab.nodes[id.0 as usize] = None;
				slab.free.push(id.0);
			}
			let _ = Reflect::delete_property(node.unchecked_ref::<js_sys::Object>(), &ID_PROPERTY.into());
		}
	}

	fn listener_options(cache: &mut [Option<web_sys::AddEventListenerOptions>; 2], passive: bool) -> &web_sys::AddEventListenerOptions {
		let entry = &mut cache[usize::from(passive)];
		entry.get_or_insert_with(|| {
			let options = web_sys::AddEventListenerOptions::new();
			options.set_passive(passive);
			options
		})
	}
}

fn node_id(value: &JsValue) -> Option<NodeId> {
	let id = Reflect::get(value, &ID_PROPERTY.into()).ok()?.as_f64()?;
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	Some(NodeId(id as u32))
}

fn js_to_json(value: &JsValue) -> Option<Value> {
	if value.is_undefined() || value.is_null() || value.is_function() {
		None
	} else {
		serde_wasm_bindgen::from_value(value.clone()).ok()
	}
}

fn json_to_js(value: &Value) -> JsValue {
	value.serialize(&serde_wasm_bindgen::Serializer::json_compatible()).unwrap_or_else(|error| {
		error!("Failed to convert {}: {}", value, error);
		JsValue::UNDEFINED
	})
}

fn copy_fields(source: &JsValue, fields: &[&str], into: &mut Map<String, Value>) {
	for field in fields {
		if let Some(value) = Reflect::get(source, &JsValue::from_str(field)).ok().as_ref().and_then(js_to_json) {
			into.insert((*field).to_owned(), value);
		}
	}
}

fn target_snapshot(target: &JsValue) -> Value {
	let mut map = Map::new();
	copy_fields(target, TARGET_FIELDS, &mut map);
	Value::Object(map)
}

fn form_entries(form: &web_sys::HtmlFormElement) -> Value {
	let Ok(form_data) = web_sys::FormData::new_with_form(form) else { return Value::Array(Vec::new()) };
	let Ok(Some(entries)) = js_sys::try_iter(form_data.as_ref()) else { return Value::Array(Vec::new()) };
	Value::Array(
		entries
			.filter_map(Result::ok)
			.map(|entry| {
				let entry = Array::from(&entry);
				json!([entry.get(0).as_string(), entry.get(1).as_string()])
			})
			.collect(),
	)
}

/// A JSON view of `event`, limited to commonly decoded fields.
fn snapshot(event: &web_sys::Event) -> Value {
	let mut map = Map::new();
	map.insert("type".to_owned(), Value::String(event.type_()));
	copy_fields(event.as_ref(), EVENT_FIELDS, &mut map);

	let target = event.target();
	if let Some(target) = &target {
		map.insert("target".to_owned(), target_snapshot(target.as_ref()));
	}

	let mut detail = Reflect::get(event.as_ref(), &"detail".into()).ok().as_ref().and_then(js_to_json).unwrap_or(Value::Null);
	if event.type_() == "submit" {
		if let Some(form) = target.and_then(|target| target.dyn_into::<web_sys::HtmlFormElement>().ok()) {
			let mut object = match detail {
				Value::Object(object) => object,
				_ => Map::new(),
			};
			object.insert("formData".to_owned(), form_entries(&form));
			detail = Value::Object(object);
		}
	}
	if !detail.is_null() {
		map.insert("detail".to_owned(), detail);
	}
	Value::Object(map)
}

impl Document for WebDocument {
	type Node = NodeId;

	fn root(&self) -> NodeId {
		self.root
	}

	fn kind(&self, node: NodeId) -> NodeKind {
		match self.get(node).map(|node| node.node_type()) {
			Some(web_sys::Node::ELEMENT_NODE) => NodeKind::Element,
			Some(web_sys::Node::TEXT_NODE) => NodeKind::Text,
			_ => NodeKind::Other,
		}
	}

	fn create_element(&mut self, namespace: &str, tag: &str) -> NodeId {
		let element = if namespace.is_empty() { self.document.create_element(tag) } else { self.document.create_element_ns(Some(namespace), tag) };
		match element {
			Ok(element) => self.adopt(element.into()),
			Err(error) => {
				error!("Failed to create <{}>: {:?}. Using a placeholder comment.", tag, error);
				self.adopt(self.document.create_comment(tag).into())
			}
		}
	}

	fn create_text(&mut self, content: &str) -> NodeId {
		self.adopt(self.document.create_text_node(content).into())
	}

	fn tag_name(&self, node: NodeId) -> String {
		self.element(node).map(|element| element.local_name()).unwrap_or_default()
	}

	fn namespace(&self, node: NodeId) -> String {
		match self.element(node).and_then(|element| element.namespace_uri()) {
			Some(namespace) if namespace != HTML_NAMESPACE => namespace,
			_ => String::new(),
		}
	}

	fn text(&self, node: NodeId) -> Option<String> {
		Some(self.get(node)?.dyn_ref::<web_sys::CharacterData>()?.data())
	}

	fn set_text(&mut self, node: NodeId, content: &str) {
		match self.get(node).and_then(|node| node.dyn_into::<web_sys::CharacterData>().ok()) {
			Some(text) => text.set_data(content),
			None => error!("Expected character data at {:?}.", node),
		}
	}

	fn set_inner_html(&mut self, node: NodeId, html: &str) {
		let Some(element) = self.element(node) else { return error!("Expected an element at {:?}.", node) };
		let mut child = element.first_child();
		while let Some(current) = child {
			child = current.next_sibling();
			self.free_subtree(&current);
		}
		element.set_inner_html(html);
	}

	fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
		let Some(element) = self.element(node) else { return Vec::new() };
		let attributes = element.attributes();
		(0..attributes.length()).filter_map(|i| attributes.item(i)).map(|attribute| (attribute.name(), attribute.value())).collect()
	}

	fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
		self.element(node)?.get_attribute(name)
	}

	fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
		let Some(element) = self.element(node) else { return error!("Expected an element at {:?}.", node) };
		if let Err(error) = element.set_attribute(name, value) {
			error!("Failed to set attribute {:?}: {:?}", name, error);
		}
	}

	fn remove_attribute(&mut self, node: NodeId, name: &str) {
		let Some(element) = self.element(node) else { return error!("Expected an element at {:?}.", node) };
		if let Err(error) = element.remove_attribute(name) {
			error!("Failed to remove attribute {:?}: {:?}", name, error);
		}
	}

	fn property(&self, node: NodeId, name: &str) -> Option<Value> {
		js_to_json(&Reflect::get(self.get(node)?.as_ref(), &JsValue::from_str(name)).ok()?)
	}

	fn set_property(&mut self, node: NodeId, name: &str, value: &Value) {
		let Some(node) = self.get(node) else { return error!("Expected a node at {:?}.", node) };
		if let Err(error) = Reflect::set(node.as_ref(), &JsValue::from_str(name), &json_to_js(value)) {
			error!("Failed to set property {:?}: {:?}", name, error);
		}
	}

	fn parent(&self, node: NodeId) -> Option<NodeId> {
		self.adopt_opt(self.get(node)?.parent_node())
	}

	fn first_child(&self, node: NodeId) -> Option<NodeId> {
		self.adopt_opt(self.get(node)?.first_child())
	}

	fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
		self.adopt_opt(self.get(node)?.next_sibling())
	}

	fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
		let index = u32::try_from(index).ok()?;
		self.adopt_opt(self.get(parent)?.child_nodes().item(index))
	}

	fn child_count(&self, parent: NodeId) -> usize {
		self.get(parent).map_or(0, |parent| parent.child_nodes().length() as usize)
	}

	fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
		if reference == Some(child) {
			return;
		}
		let (Some(parent), Some(child)) = (self.get(parent), self.get(child)) else { return error!("Insertion between untracked nodes.") };
		let reference = reference.and_then(|reference| self.get(reference));
		if let Err(error) = parent.insert_before(&child, reference.as_ref()) {
			error!("Failed to insert node: {:?}", error);
		}
	}

	fn remove_child(&mut self, parent: NodeId, child: NodeId) {
		let (Some(parent), Some(child)) = (self.get(parent), self.get(child)) else { return error!("Removal between untracked nodes.") };
		match parent.remove_child(&child) {
			Ok(removed) => self.free_subtree(&removed),
			Err(error) => error!("Failed to remove node: {:?}", error),
		}
	}

	fn listen(&mut self, node: NodeId, event: &str, passive: bool) {
		let Some(node) = self.get(node) else { return error!("Expected a node at {:?}.", node) };
		let options = Self::listener_options(&mut self.event_listener_options_cache, passive);
		if let Err(error) = node.add_event_listener_with_callback_and_add_event_listener_options(event, self.common_handler.as_ref().unchecked_ref::<Function>(), options) {
			error!("Failed to add event listener: {:?}", error);
		}
	}

	fn unlisten(&mut self, node: NodeId, event: &str) {
		let Some(node) = self.get(node) else { return error!("Expected a node at {:?}.", node) };
		if let Err(error) = node.remove_event_listener_with_callback(event, self.common_handler.as_ref().unchecked_ref::<Function>()) {
			error!("Failed to remove event listener: {:?}", error);
		}
	}

	fn focus(&mut self, node: NodeId) {
		match self.get(node).and_then(|node| node.dyn_into::<web_sys::HtmlElement>().ok()) {
			Some(element) => {
				if let Err(error) = element.focus() {
					warn!("Failed to focus: {:?}", error);
				}
			}
			None => warn!("Can't focus {:?}.", node),
		}
	}

	fn is_focused(&self, node: NodeId) -> bool {
		match (self.document.active_element(), self.element(node)) {
			(Some(active), Some(element)) => active == element,
			_ => false,
		}
	}

	fn event_snapshot(&self, node: NodeId, event: &str) -> Value {
		let target = self.get(node).map_or(Value::Null, |node| target_snapshot(node.as_ref()));
		json!({ "type": event, "target": target })
	}

	fn emit(&mut self, node: NodeId, event: &str, detail: &Value) {
		let Some(node) = self.get(node) else { return error!("Expected a node at {:?}.", node) };
		let init = web_sys::CustomEventInit::new();
		init.set_bubbles(true);
		init.set_composed(true);
		init.set_detail(&json_to_js(detail));
		match web_sys::CustomEvent::new_with_event_init_dict(event, &init) {
			Ok(custom_event) => {
				if let Err(error) = node.dispatch_event(&custom_event) {
					error!("Failed to dispatch {:?}: {:?}", event, error);
				}
			}
			Err(error) => error!("Failed to create {:?}: {:?}", event, error),
		}
	}

	fn root_handle(&self) -> Box<dyn Any> {
		Box::new(self.root_element.clone())
	}

	fn set_event_sink(&mut self, sink: EventSink<NodeId>) {
		*self.sink.borrow_mut() = Some(sink);
	}
}

/// The window's animation frames, microtasks and timeouts.
#[derive(Debug, Clone)]
pub struct WebEventLoop {
	window: web_sys::Window,
}

impl WebEventLoop {
	/// [`None`] outside a browser window.
	#[must_use]
	pub fn new() -> Option<Self> {
		web_sys::window().map(|window| Self { window })
	}
}

impl EventLoop for WebEventLoop {
	type Frame = i32;

	fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) -> i32 {
		let callback = Closure::once_into_js(move || callback());
		self.window.request_animation_frame(callback.unchecked_ref()).unwrap_or_else(|error| {
			error!("Failed to request an animation frame: {:?}", error);
			0
		})
	}

	fn cancel_animation_frame(&self, frame: i32) {
		if let Err(error) = self.window.cancel_animation_frame(frame) {
			error!("Failed to cancel animation frame: {:?}", error);
		}
	}

	fn queue_microtask(&self, callback: Box<dyn FnOnce()>) {
		let callback = Closure::once_into_js(move || callback());
		self.window.queue_microtask(callback.unchecked_ref());
	}

	fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> Timeout {
		let callback = Closure::once_into_js(move || callback());
		let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
		match self.window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), delay) {
			Ok(handle) => {
				let window = self.window.clone();
				Timeout::new(move || window.clear_timeout_with_handle(handle))
			}
			Err(error) => {
				error!("Failed to set a timeout: {:?}", error);
				Timeout::new(|| ())
			}
		}
	}

	fn now(&self) -> f64 {
		js_sys::Date::now()
	}
}

#[derive(Debug, Error)]
pub enum StartError {
	#[error("not running in a browser window")]
	NotABrowser,
	#[error("no element matches the selector {0:?}")]
	ElementNotFound(String),
}

/// Starts `app` on the first element matching `selector`, adopting its server-rendered content.
///
/// # Errors
///
/// Iff there is no window (with a document), or no element matches `selector`.
pub fn start<A: Application>(app: A, selector: &str, config: Config) -> Result<Runtime<A, WebDocument, WebEventLoop>, StartError> {
	let event_loop = WebEventLoop::new().ok_or(StartError::NotABrowser)?;
	let document = event_loop.window.document().ok_or(StartError::NotABrowser)?;
	let root = document.query_selector(selector).ok().flatten().ok_or_else(|| StartError::ElementNotFound(selector.to_owned()))?;
	Ok(Runtime::start(app, WebDocument::new(root), event_loop, config))
}

