//! The application loop: messages in, model updates, renders coalesced into animation frames, effects around paint.

use crate::{
	diff::{diff, Diff},
	effect::{Actions, Effect, Task},
	element::Html,
	events::Events,
	host::{Document, EventLoop, EventResponse},
	load::{virtualise, Prefilled, Virtualised},
	reconciler::{Dispatch, Reconciler, ReconcilerConfig},
	vnode::{Mapper, Node},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
	cell::{Cell, RefCell},
	collections::VecDeque,
	rc::{Rc, Weak},
};
use tracing::{debug, error, instrument, trace, trace_span, warn};

/// An application in model-update-view form. The implementing value is the model.
pub trait Application: 'static {
	type Msg: 'static;

	fn init(&mut self) -> Effect<Self::Msg> {
		Effect::none()
	}

	fn update(&mut self, message: Self::Msg) -> Effect<Self::Msg>;

	fn view(&self) -> Html<Self::Msg>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Messages queued while an update is running beyond this many are dropped (and logged).
	pub queue_limit: usize,
	pub reconciler: ReconcilerConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self { queue_limit: 10_000, reconciler: ReconcilerConfig::default() }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Idle,
	/// Running `update`s and synchronous effects. Messages are queued.
	Ticking,
	/// A render is waiting for the next animation frame.
	RenderScheduled,
	/// Diffing and patching. DOM events are deferred.
	Rendering,
	Unmounted,
}

struct View<D: Document> {
	vdom: Node,
	events: Events,
	reconciler: Reconciler<D>,
}

struct Shared<A: Application, D: Document, L: EventLoop> {
	this: Weak<Self>,
	app: RefCell<A>,
	view: RefCell<View<D>>,
	event_loop: L,
	config: Config,
	queue: RefCell<VecDeque<A::Msg>>,
	before_paint: RefCell<Vec<Task<A::Msg>>>,
	after_paint: RefCell<Vec<Task<A::Msg>>>,
	phase: Cell<Phase>,
	should_flush: Cell<bool>,
	render_frame: RefCell<Option<L::Frame>>,
	deferred: RefCell<Vec<(D::Node, String, Value)>>,
}

/// A running [`Application`], mounted on a [`Document`].
///
/// Dropping the runtime releases everything it holds. Callbacks it scheduled on the event loop then do nothing.
pub struct Runtime<A: Application, D: Document + 'static, L: EventLoop + 'static> {
	shared: Rc<Shared<A, D, L>>,
}

impl<A: Application, D: Document + 'static, L: EventLoop + 'static> core::fmt::Debug for Runtime<A, D, L> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Runtime").field("phase", &self.shared.phase.get()).field("queued", &self.shared.queue.borrow().len()).finish_non_exhaustive()
	}
}

impl<A: Application, D: Document + 'static, L: EventLoop + 'static> Runtime<A, D, L> {
	/// Takes over the document's mount point, adopting its current content, and renders `app` synchronously.
	///
	/// Form controls that already hold user input get it replayed as `input`/`change`/`blur` events in a microtask,
	/// so the model catches up with what the user typed before the application loaded.
	#[instrument(skip_all)]
	pub fn start(app: A, document: D, event_loop: L, config: Config) -> Self {
		let mut reconciler = Reconciler::new(document, config.reconciler.clone());
		let Virtualised { node, prefilled } = virtualise(&mut reconciler);

		let shared = Rc::new_cyclic(|this| Shared {
			this: this.clone(),
			app: RefCell::new(app),
			view: RefCell::new(View { vdom: node, events: Events::new(), reconciler }),
			event_loop,
			config,
			queue: RefCell::new(VecDeque::new()),
			before_paint: RefCell::new(Vec::new()),
			after_paint: RefCell::new(Vec::new()),
			phase: Cell::new(Phase::Idle),
			should_flush: Cell::new(false),
			render_frame: RefCell::new(None),
			deferred: RefCell::new(Vec::new()),
		});

		let sink_target = Rc::downgrade(&shared);
		shared.view.borrow_mut().reconciler.document_mut().set_event_sink(Rc::new(move |node: D::Node, name: &str, payload: &Value| {
			sink_target.upgrade().map_or_else(EventResponse::default, |shared| shared.handle_event(node, name, payload))
		}));

		let init = shared.app.borrow_mut().init();
		shared.should_flush.set(true);
		shared.tick(init);

		if !prefilled.is_empty() {
			let weak = Rc::downgrade(&shared);
			shared.event_loop.queue_microtask(Box::new(move || {
				if let Some(shared) = weak.upgrade() {
					for prefilled in prefilled {
						shared.replay_input(prefilled);
					}
				}
			}));
		}

		Self { shared }
	}

	pub fn dispatch(&self, message: A::Msg, immediate: bool) {
		self.shared.dispatch(message, immediate);
	}

	#[must_use]
	pub fn actions(&self) -> Actions<A::Msg> {
		self.shared.actions()
	}

	/// Dispatches a bubbling custom event on the mount point.
	pub fn emit(&self, name: &str, data: &Value) {
		self.shared.emit(name, data);
	}

	/// Delivers a DOM event to `node`'s listener for `name`, as the host does through the [`EventSink`](`crate::host::EventSink`).
	pub fn handle_event(&self, node: D::Node, name: &str, payload: &Value) -> EventResponse {
		self.shared.handle_event(node, name, payload)
	}

	/// Delivers a DOM event to `target` and then to each of its ancestors (up to the mount point) that listens for it,
	/// until one stops propagation.
	pub fn fire(&self, target: D::Node, name: &str, payload: &Value) -> EventResponse {
		self.shared.fire(target, name, payload)
	}

	#[must_use]
	pub fn phase(&self) -> Phase {
		self.shared.phase.get()
	}

	/// The tree rendered last.
	#[must_use]
	pub fn vdom(&self) -> Node {
		self.shared.view.borrow().vdom.clone()
	}

	pub fn with_app<R>(&self, f: impl FnOnce(&A) -> R) -> R {
		f(&self.shared.app.borrow())
	}

	pub fn with_document<R>(&self, f: impl FnOnce(&D) -> R) -> R {
		f(self.shared.view.borrow().reconciler.document())
	}

	/// Mutable access to the document, like a user editing form controls would have.
	///
	/// Structural changes to rendered nodes aren't tracked and will confuse later patches.
	pub fn with_document_mut<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
		f(self.shared.view.borrow_mut().reconciler.document_mut())
	}

	pub fn with_reconciler<R>(&self, f: impl FnOnce(&Reconciler<D>) -> R) -> R {
		f(&self.shared.view.borrow().reconciler)
	}

	/// Stops the application and removes everything it rendered.
	pub fn unmount(&self) {
		self.shared.unmount();
	}
}

impl<A: Application, D: Document + 'static, L: EventLoop + 'static> Shared<A, D, L> {
	fn actions(&self) -> Actions<A::Msg> {
		let dispatch = self.this.clone();
		let emit = self.this.clone();
		let root = self.this.clone();
		Actions::new(
			move |message, immediate| {
				if let Some(shared) = dispatch.upgrade() {
					shared.dispatch(message, immediate);
				}
			},
			move |name, data| {
				if let Some(shared) = emit.upgrade() {
					shared.emit(name, &data);
				}
			},
			move || {
				let shared = root.upgrade()?;
				let view = shared.view.try_borrow().ok()?;
				Some(view.reconciler.document().root_handle())
			},
		)
	}

	fn dispatch(&self, message: A::Msg, immediate: bool) {
		match self.phase.get() {
			Phase::Unmounted => debug!("Dropped a message dispatched after unmounting."),
			Phase::Ticking | Phase::Rendering => {
				if immediate {
					self.should_flush.set(true);
				}
				self.enqueue(message);
			}
			Phase::Idle | Phase::RenderScheduled => {
				if immediate {
					self.should_flush.set(true);
				}
				let effect = self.app.borrow_mut().update(message);
				self.tick(effect);
			}
		}
	}

	fn enqueue(&self, message: A::Msg) {
		let mut queue = self.queue.borrow_mut();
		if queue.len() >= self.config.queue_limit {
			return error!("Message queue is full ({} messages). Dropping a message.", queue.len());
		}
		queue.push_back(message);
	}

	/// Runs `effect` and drains the queue into `update`, then renders or schedules a render.
	fn tick(&self, mut effect: Effect<A::Msg>) {
		let span = trace_span!("tick");
		let _enter = span.enter();

		let phase = self.phase.get();
		if phase == Phase::Unmounted {
			return;
		}
		self.phase.set(Phase::Ticking);

		let actions = self.actions();
		let mut updates = 0_usize;
		loop {
			let Effect { synchronous, before_paint, after_paint } = effect;
			for task in synchronous {
				task(&actions);
				if self.phase.get() == Phase::Unmounted {
					return;
				}
			}
			self.before_paint.borrow_mut().extend(before_paint);
			self.after_paint.borrow_mut().extend(after_paint);

			let Some(message) = self.queue.borrow_mut().pop_front() else { break };
			updates += 1;
			effect = self.app.borrow_mut().update(message);
		}
		trace!(updates, "Drained the queue.");

		if self.should_flush.get() {
			if let Some(frame) = self.render_frame.borrow_mut().take() {
				self.event_loop.cancel_animation_frame(frame);
			}
			self.render();
		} else if self.render_frame.borrow().is_none() {
			let weak = self.this.clone();
			let frame = self.event_loop.request_animation_frame(Box::new(move || {
				if let Some(shared) = weak.upgrade() {
					shared.render_frame.borrow_mut().take();
					shared.render();
				}
			}));
			*self.render_frame.borrow_mut() = Some(frame);
			self.phase.set(Phase::RenderScheduled);
		} else {
			self.phase.set(Phase::RenderScheduled);
		}
	}

	#[instrument(skip(self))]
	fn render(&self) {
		if self.phase.get() == Phase::Unmounted {
			return;
		}
		self.should_flush.set(false);
		self.phase.set(Phase::Rendering);

		let next = self.app.borrow().view().into_node();
		{
			let mut view = self.view.borrow_mut();
			let View { vdom, events, reconciler } = &mut *view;
			let Diff { patch, events: next_events } = diff(core::mem::take(events), vdom, &next);
			*events = next_events;
			reconciler.push(&patch);
			*vdom = next;
		}
		self.phase.set(Phase::Idle);

		let before_paint = core::mem::take(&mut *self.before_paint.borrow_mut());
		if !before_paint.is_empty() {
			let weak = self.this.clone();
			self.event_loop.queue_microtask(Box::new(move || {
				if let Some(shared) = weak.upgrade() {
					shared.should_flush.set(true);
					shared.tick(Effect::from_tasks(before_paint));
				}
			}));
		}

		let after_paint = core::mem::take(&mut *self.after_paint.borrow_mut());
		if !after_paint.is_empty() {
			let weak = self.this.clone();
			// Not the render frame: this one runs after the patch above was painted.
			let _ = self.event_loop.request_animation_frame(Box::new(move || {
				if let Some(shared) = weak.upgrade() {
					shared.should_flush.set(true);
					shared.tick(Effect::from_tasks(after_paint));
				}
			}));
		}

		let deferred = core::mem::take(&mut *self.deferred.borrow_mut());
		for (node, name, payload) in deferred {
			trace!(%name, "Delivering a deferred event.");
			self.handle_event(node, &name, &payload);
		}

		if self.phase.get() == Phase::Idle && !self.queue.borrow().is_empty() {
			self.tick(Effect::none());
		}
	}

	fn emit(&self, name: &str, data: &Value) {
		match self.view.try_borrow_mut() {
			Ok(mut view) => {
				let root = view.reconciler.root();
				view.reconciler.document_mut().emit(root, name, data);
			}
			Err(_) => error!("Can't emit {:?} while rendering.", name),
		}
	}

	#[instrument(skip(self, payload))]
	fn handle_event(&self, node: D::Node, name: &str, payload: &Value) -> EventResponse {
		match self.phase.get() {
			Phase::Unmounted => return EventResponse::default(),
			Phase::Rendering => {
				debug!("Deferred until the render completes.");
				self.deferred.borrow_mut().push((node, name.to_owned(), payload.clone()));
				return EventResponse::default();
			}
			Phase::Idle | Phase::Ticking | Phase::RenderScheduled => (),
		}

		let now = self.event_loop.now();
		let outcome = self.view.borrow_mut().reconciler.handle_event(node, name, payload, now);

		if let Some(delay) = outcome.debounce {
			let weak = self.this.clone();
			let event = name.to_owned();
			let timeout = self.event_loop.set_timeout(
				delay,
				Box::new(move || {
					if let Some(shared) = weak.upgrade() {
						shared.fire_debounced(node, &event);
					}
				}),
			);
			self.view.borrow_mut().reconciler.arm_debounce(node, name, timeout);
		}

		if let Some(dispatch) = outcome.dispatch {
			self.deliver(dispatch);
		}
		outcome.response
	}

	fn fire(&self, target: D::Node, name: &str, payload: &Value) -> EventResponse {
		let mut response = EventResponse::default();
		let mut node = Some(target);
		while let Some(current) = node {
			let (listening, parent, is_root) = {
				let view = self.view.borrow();
				let reconciler = &view.reconciler;
				(reconciler.is_listening(current, name), reconciler.document().parent(current), current == reconciler.root())
			};
			if listening {
				let handled = self.handle_event(current, name, payload);
				response.prevent_default |= handled.prevent_default;
				if handled.stop_propagation {
					response.stop_propagation = true;
					break;
				}
			}
			if is_root {
				break;
			}
			node = parent;
		}
		response
	}

	fn fire_debounced(&self, node: D::Node, name: &str) {
		let dispatch = self.view.borrow_mut().reconciler.take_debounced(node, name);
		if let Some(dispatch) = dispatch {
			self.deliver(dispatch);
		}
	}

	fn deliver(&self, dispatch: Dispatch) {
		let result = self.view.borrow_mut().events.dispatch(&dispatch.path, &dispatch.name, &dispatch.payload);
		match result {
			Ok(message) => match message.downcast::<A::Msg>() {
				Ok(message) => self.dispatch(*message, dispatch.immediate),
				Err(_) => error!(path = %dispatch.path, name = %dispatch.name, "Handler produced a message of the wrong type. Is a `map` missing?"),
			},
			Err(error) => warn!(%error, "Dropped an event."),
		}
	}

	/// Restores a prefilled form control's state, which the first render may have overwritten,
	/// and replays it as the events typing it would have produced.
	fn replay_input(&self, prefilled: Prefilled<D::Node>) {
		let Prefilled { node, value, checked } = prefilled;
		let (input, change, focused) = {
			let mut view = self.view.borrow_mut();
			let document = view.reconciler.document_mut();
			if let Some(value) = &value {
				document.set_property(node, "value", value);
			}
			if let Some(checked) = &checked {
				document.set_property(node, "checked", checked);
			}
			(document.event_snapshot(node, "input"), document.event_snapshot(node, "change"), document.is_focused(node))
		};
		self.fire(node, "input", &input);
		self.fire(node, "change", &change);
		if !focused {
			let blur = self.view.borrow().reconciler.document().event_snapshot(node, "blur");
			self.fire(node, "blur", &blur);
		}
	}

	#[instrument(skip(self))]
	fn unmount(&self) {
		self.phase.set(Phase::Unmounted);
		if let Some(frame) = self.render_frame.borrow_mut().take() {
			self.event_loop.cancel_animation_frame(frame);
		}
		self.queue.borrow_mut().clear();
		self.before_paint.borrow_mut().clear();
		self.after_paint.borrow_mut().clear();
		self.deferred.borrow_mut().clear();

		let mut view = self.view.borrow_mut();
		view.reconciler.teardown();
		view.events = Events::new();
		view.vdom = Node::text(String::new(), Mapper::identity(), String::new());
	}
}
