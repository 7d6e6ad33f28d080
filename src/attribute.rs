//! Attributes, properties and listener options of elements.

use crate::vnode::{Attr, Mapper};
use core::marker::PhantomData;
use serde_json::Value;
use std::rc::Rc;
use tracing::warn;

/// An [`Attr`] whose event handlers (if any) produce `Msg`.
pub struct Attribute<Msg> {
	attr: Attr,
	_message: PhantomData<fn() -> Msg>,
}

impl<Msg> Clone for Attribute<Msg> {
	fn clone(&self) -> Self {
		Self { attr: self.attr.clone(), _message: PhantomData }
	}
}

impl<Msg> core::fmt::Debug for Attribute<Msg> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		self.attr.fmt(f)
	}
}

impl<Msg> Attribute<Msg> {
	#[must_use]
	pub fn from_attr(attr: Attr) -> Self {
		Self { attr, _message: PhantomData }
	}

	#[must_use]
	pub fn as_attr(&self) -> &Attr {
		&self.attr
	}

	#[must_use]
	pub fn into_attr(self) -> Attr {
		self.attr
	}

	fn modify_event(mut self, option: &str, modify: impl FnOnce(&mut crate::vnode::EventBinding)) -> Self {
		match &mut self.attr {
			Attr::Event(binding) => modify(binding),
			other => warn!("`{}` applies only to event listeners, not {:?}.", option, other.name()),
		}
		self
	}

	/// Calls `preventDefault()` on the DOM event. This makes the listener non-passive.
	#[must_use]
	pub fn prevent_default(self) -> Self {
		self.modify_event("prevent_default", |binding| binding.prevent_default = true)
	}

	#[must_use]
	pub fn stop_propagation(self) -> Self {
		self.modify_event("stop_propagation", |binding| binding.stop_propagation = true)
	}

	/// Whether the resulting message flushes the render synchronously instead of on the next frame.
	#[must_use]
	pub fn immediate(self, immediate: bool) -> Self {
		self.modify_event("immediate", |binding| binding.immediate = immediate)
	}

	/// Delivers only the last event of each burst, `ms` after it.
	#[must_use]
	pub fn debounce(self, ms: u32) -> Self {
		self.modify_event("debounce", |binding| binding.debounce = ms)
	}

	/// Delivers at most one event per `ms`.
	#[must_use]
	pub fn throttle(self, ms: u32) -> Self {
		self.modify_event("throttle", |binding| binding.throttle = ms)
	}

	/// Adds dot paths of the event to forward when events are projected for a server.
	#[must_use]
	pub fn include<'a>(self, paths: impl IntoIterator<Item = &'a str>) -> Self {
		self.modify_event("include", |binding| binding.include.extend(paths.into_iter().map(str::to_owned)))
	}
}

impl<Msg: 'static> Attribute<Msg> {
	/// Converts the messages produced by this attribute's handler.
	#[must_use]
	pub fn map<B: 'static>(self, f: impl Fn(Msg) -> B + 'static) -> Attribute<B> {
		let attr = match self.attr {
			Attr::Event(mut binding) => {
				let mapper = Mapper::from_fn(f);
				let handler = binding.handler;
				binding.handler = Rc::new(move |event: &Value| handler(event).map(|message| mapper.apply(message)));
				Attr::Event(binding)
			}
			other => other,
		};
		Attribute::from_attr(attr)
	}
}

pub fn attribute<Msg>(name: &str, value: &str) -> Attribute<Msg> {
	Attribute::from_attr(Attr::Attribute { name: name.to_owned(), value: value.to_owned() })
}

/// Sets a DOM property rather than an attribute.
pub fn property<Msg>(name: &str, value: impl Into<Value>) -> Attribute<Msg> {
	Attribute::from_attr(Attr::Property { name: name.to_owned(), value: value.into() })
}

/// Renders nothing. Useful in conditionally built attribute lists.
pub fn none<Msg>() -> Attribute<Msg> {
	attribute("", "")
}

fn boolean<Msg>(name: &str, present: bool) -> Attribute<Msg> {
	if present {
		attribute(name, "")
	} else {
		none()
	}
}

/// Merges with other `class` attributes of the same element.
pub fn class<Msg>(name: &str) -> Attribute<Msg> {
	attribute("class", name)
}

/// Merges with other `style` attributes of the same element.
pub fn style<Msg>(property: &str, value: &str) -> Attribute<Msg> {
	attribute("style", &format!("{}:{}", property, value))
}

pub fn id<Msg>(id: &str) -> Attribute<Msg> {
	attribute("id", id)
}

pub fn value<Msg>(value: &str) -> Attribute<Msg> {
	attribute("value", value)
}

/// The value a form control resets to, without touching what the user typed.
pub fn default_value<Msg>(value: &str) -> Attribute<Msg> {
	attribute("virtual:defaultValue", value)
}

pub fn checked<Msg>(checked: bool) -> Attribute<Msg> {
	boolean("checked", checked)
}

pub fn selected<Msg>(selected: bool) -> Attribute<Msg> {
	boolean("selected", selected)
}

pub fn disabled<Msg>(disabled: bool) -> Attribute<Msg> {
	boolean("disabled", disabled)
}

/// Focuses the element once it's attached.
pub fn autofocus<Msg>(autofocus: bool) -> Attribute<Msg> {
	boolean("autofocus", autofocus)
}

pub fn type_<Msg>(kind: &str) -> Attribute<Msg> {
	attribute("type", kind)
}

pub fn name<Msg>(name: &str) -> Attribute<Msg> {
	attribute("name", name)
}

pub fn placeholder<Msg>(text: &str) -> Attribute<Msg> {
	attribute("placeholder", text)
}

pub fn href<Msg>(url: &str) -> Attribute<Msg> {
	attribute("href", url)
}
