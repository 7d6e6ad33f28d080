#![cfg(target_arch = "wasm32")]

use js_sys::{Map, Reflect};
use serde_json::json;
use std::{cell::RefCell, rc::Rc, sync::Once};
use twig_dom::{
	attribute::id,
	element::{element, text},
	event::on_click,
	web::{WebDocument, WebEventLoop},
	Application, Config, Effect, Html, Runtime,
};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::{window, HtmlElement};

wasm_bindgen_test_configure!(run_in_browser);

static LOG_INITIALIZED: Once = Once::new();

struct Clicks(u32);

impl Application for Clicks {
	type Msg = ();

	fn update(&mut self, (): ()) -> Effect<()> {
		self.0 += 1;
		Effect::none()
	}

	fn view(&self) -> Html<()> {
		element("button", [id("test-button"), on_click(())], [text(&self.0.to_string())])
	}
}

#[wasm_bindgen_test]
fn click() {
	LOG_INITIALIZED.call_once(tracing_wasm::set_as_global_default);

	let document = window().unwrap().document().unwrap();
	let container = document.create_element("div").unwrap();
	document.body().unwrap().append_child(&container).unwrap();

	let runtime = Runtime::start(Clicks(0), WebDocument::new(container.clone()), WebEventLoop::new().unwrap(), Config::default());
	let button = container.query_selector("#test-button").unwrap().unwrap().dyn_into::<HtmlElement>().unwrap();
	button.click();
	button.click();
	assert_eq!(runtime.with_app(|app| app.0), 2);

	runtime.unmount();
	assert_eq!(container.child_nodes().length(), 0);
}

#[wasm_bindgen_test]
fn emitted_details_are_plain_objects() {
	LOG_INITIALIZED.call_once(tracing_wasm::set_as_global_default);

	let document = window().unwrap().document().unwrap();
	let container = document.create_element("div").unwrap();
	document.body().unwrap().append_child(&container).unwrap();

	let received = Rc::new(RefCell::new(JsValue::UNDEFINED));
	let listener = {
		let received = received.clone();
		Closure::<dyn Fn(web_sys::CustomEvent)>::new(move |event: web_sys::CustomEvent| *received.borrow_mut() = event.detail())
	};
	container.add_event_listener_with_callback("ready", listener.as_ref().unchecked_ref()).unwrap();

	let runtime = Runtime::start(Clicks(0), WebDocument::new(container.clone()), WebEventLoop::new().unwrap(), Config::default());
	runtime.emit("ready", &json!({ "version": 1, "tags": ["a"] }));

	let detail = received.borrow().clone();
	assert!(!detail.is_instance_of::<Map>());
	assert_eq!(Reflect::get(&detail, &"version".into()).unwrap().as_f64(), Some(1.0));
	assert_eq!(Reflect::get(&detail, &"tags".into()).unwrap().dyn_into::<js_sys::Array>().unwrap().length(), 1);

	runtime.unmount();
}
