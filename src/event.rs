//! Event listeners and decoders for their JSON payloads.

use crate::{
	attribute::Attribute,
	vnode::{AnyMessage, Attr, EventBinding},
};
use serde_json::Value;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
	#[error("missing field `{0}`")]
	MissingField(String),
	#[error("expected {expected} at `{path}`")]
	UnexpectedType { path: String, expected: &'static str },
	#[error("{0}")]
	Custom(String),
}

/// Events whose handlers flush the render synchronously by default, so controlled inputs don't lag behind typing.
#[must_use]
pub fn is_immediate_event(name: &str) -> bool {
	matches!(name, "input" | "change" | "focus" | "focusin" | "focusout" | "blur" | "select")
}

/// Listens for `name`, turning each event into a message through `decoder`.
///
/// Events that fail to decode are logged and ignored.
pub fn on<Msg: 'static>(name: &str, decoder: impl Fn(&Value) -> Result<Msg, DecodeError> + 'static) -> Attribute<Msg> {
	Attribute::from_attr(Attr::Event(EventBinding {
		name: name.to_owned(),
		handler: Rc::new(move |event: &Value| decoder(event).map(|message| Box::new(message) as AnyMessage)),
		include: Vec::new(),
		prevent_default: false,
		stop_propagation: false,
		immediate: is_immediate_event(name),
		debounce: 0,
		throttle: 0,
	}))
}

/// Follows a dot-separated `path` into `event`.
///
/// # Errors
///
/// Iff a segment is missing.
pub fn field<'a>(event: &'a Value, path: &str) -> Result<&'a Value, DecodeError> {
	path.split('.').try_fold(event, |value, segment| value.get(segment).ok_or_else(|| DecodeError::MissingField(path.to_owned())))
}

/// # Errors
///
/// Iff the field is missing or not a string.
pub fn string_field(event: &Value, path: &str) -> Result<String, DecodeError> {
	field(event, path)?.as_str().map(str::to_owned).ok_or_else(|| DecodeError::UnexpectedType { path: path.to_owned(), expected: "a string" })
}

/// # Errors
///
/// Iff the field is missing or not a boolean.
pub fn bool_field(event: &Value, path: &str) -> Result<bool, DecodeError> {
	field(event, path)?.as_bool().ok_or_else(|| DecodeError::UnexpectedType { path: path.to_owned(), expected: "a boolean" })
}

/// Reads form entries from a `submit` event as `[name, value]` pairs.
///
/// Non-string values (files) are skipped.
///
/// # Errors
///
/// Iff `detail.formData` is missing or not a list of pairs.
pub fn form_data(event: &Value) -> Result<Vec<(String, String)>, DecodeError> {
	const PATH: &str = "detail.formData";
	let entries = field(event, PATH)?.as_array().ok_or(DecodeError::UnexpectedType { path: PATH.to_owned(), expected: "a list" })?;
	let mut pairs = Vec::with_capacity(entries.len());
	for entry in entries {
		match entry.as_array().map(Vec::as_slice) {
			Some([Value::String(name), Value::String(value)]) => pairs.push((name.clone(), value.clone())),
			Some([Value::String(_), _]) => (),
			_ => return Err(DecodeError::UnexpectedType { path: PATH.to_owned(), expected: "[name, value] pairs" }),
		}
	}
	Ok(pairs)
}

pub fn on_click<Msg: Clone + 'static>(message: Msg) -> Attribute<Msg> {
	on("click", move |_| Ok(message.clone()))
}

pub fn on_mouse_down<Msg: Clone + 'static>(message: Msg) -> Attribute<Msg> {
	on("mousedown", move |_| Ok(message.clone()))
}

pub fn on_mouse_up<Msg: Clone + 'static>(message: Msg) -> Attribute<Msg> {
	on("mouseup", move |_| Ok(message.clone()))
}

/// Receives `target.value`.
pub fn on_input<Msg: 'static>(handler: impl Fn(String) -> Msg + 'static) -> Attribute<Msg> {
	on("input", move |event| string_field(event, "target.value").map(&handler))
}

/// Receives `target.value`.
pub fn on_change<Msg: 'static>(handler: impl Fn(String) -> Msg + 'static) -> Attribute<Msg> {
	on("change", move |event| string_field(event, "target.value").map(&handler))
}

/// Receives `target.checked` on `change`.
pub fn on_check<Msg: 'static>(handler: impl Fn(bool) -> Msg + 'static) -> Attribute<Msg> {
	on("change", move |event| bool_field(event, "target.checked").map(&handler)).include(["target.checked"])
}

/// Receives the form's entries. Prevents the browser's own submission.
pub fn on_submit<Msg: 'static>(handler: impl Fn(Vec<(String, String)>) -> Msg + 'static) -> Attribute<Msg> {
	on("submit", move |event| form_data(event).map(&handler)).prevent_default()
}

/// Receives `key`.
pub fn on_keydown<Msg: 'static>(handler: impl Fn(String) -> Msg + 'static) -> Attribute<Msg> {
	on("keydown", move |event| string_field(event, "key").map(&handler)).include(["key"])
}

/// Receives `key`.
pub fn on_keyup<Msg: 'static>(handler: impl Fn(String) -> Msg + 'static) -> Attribute<Msg> {
	on("keyup", move |event| string_field(event, "key").map(&handler)).include(["key"])
}

pub fn on_focus<Msg: Clone + 'static>(message: Msg) -> Attribute<Msg> {
	on("focus", move |_| Ok(message.clone()))
}

pub fn on_blur<Msg: Clone + 'static>(message: Msg) -> Attribute<Msg> {
	on("blur", move |_| Ok(message.clone()))
}
