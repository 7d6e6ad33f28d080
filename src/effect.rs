//! Side effects returned from `init` and `update`, and the handle they run with.

use core::any::Any;
use serde_json::Value;
use std::rc::Rc;

/// What an effect may do to the running application.
pub struct Actions<Msg> {
	dispatch: Rc<dyn Fn(Msg, bool)>,
	emit: Rc<dyn Fn(&str, Value)>,
	root: Rc<dyn Fn() -> Option<Box<dyn Any>>>,
}

impl<Msg> Clone for Actions<Msg> {
	fn clone(&self) -> Self {
		Self { dispatch: self.dispatch.clone(), emit: self.emit.clone(), root: self.root.clone() }
	}
}

impl<Msg> core::fmt::Debug for Actions<Msg> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Actions").finish_non_exhaustive()
	}
}

impl<Msg: 'static> Actions<Msg> {
	pub fn new(dispatch: impl Fn(Msg, bool) + 'static, emit: impl Fn(&str, Value) + 'static, root: impl Fn() -> Option<Box<dyn Any>> + 'static) -> Self {
		Self { dispatch: Rc::new(dispatch), emit: Rc::new(emit), root: Rc::new(root) }
	}

	/// Queues `message` for `update`. With `immediate`, the resulting render happens synchronously instead of on the next frame.
	pub fn dispatch(&self, message: Msg, immediate: bool) {
		(self.dispatch)(message, immediate);
	}

	/// Dispatches a bubbling custom event named `name` on the mount point.
	pub fn emit(&self, name: &str, data: Value) {
		(self.emit)(name, data);
	}

	/// The host's handle of the mount point, like a `web_sys::Element`.
	#[must_use]
	pub fn root(&self) -> Option<Box<dyn Any>> {
		(self.root)()
	}

	/// Actions for effects producing `A`, which `f` converts.
	pub fn map<A: 'static>(&self, f: Rc<dyn Fn(A) -> Msg>) -> Actions<A> {
		let dispatch = self.dispatch.clone();
		Actions { dispatch: Rc::new(move |message: A, immediate: bool| dispatch(f(message), immediate)), emit: self.emit.clone(), root: self.root.clone() }
	}
}

pub(crate) type Task<Msg> = Box<dyn FnOnce(&Actions<Msg>)>;

/// Deferred work, in three flavours by timing:
///
/// - synchronous: right after the `update` that returned it, before rendering.
/// - before paint: after the DOM is patched, before the browser paints it.
/// - after paint: in the animation frame after the patched DOM was painted.
#[must_use]
pub struct Effect<Msg> {
	pub(crate) synchronous: Vec<Task<Msg>>,
	pub(crate) before_paint: Vec<Task<Msg>>,
	pub(crate) after_paint: Vec<Task<Msg>>,
}

impl<Msg> Default for Effect<Msg> {
	fn default() -> Self {
		Self { synchronous: Vec::new(), before_paint: Vec::new(), after_paint: Vec::new() }
	}
}

impl<Msg> core::fmt::Debug for Effect<Msg> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Effect")
			.field("synchronous", &self.synchronous.len())
			.field("before_paint", &self.before_paint.len())
			.field("after_paint", &self.after_paint.len())
			.finish()
	}
}

impl<Msg: 'static> Effect<Msg> {
	pub fn none() -> Self {
		Self::default()
	}

	#[allow(clippy::should_implement_trait)]
	pub fn from(task: impl FnOnce(&Actions<Msg>) + 'static) -> Self {
		Self { synchronous: vec![Box::new(task)], ..Self::default() }
	}

	pub fn before_paint(task: impl FnOnce(&Actions<Msg>) + 'static) -> Self {
		Self { before_paint: vec![Box::new(task)], ..Self::default() }
	}

	pub fn after_paint(task: impl FnOnce(&Actions<Msg>) + 'static) -> Self {
		Self { after_paint: vec![Box::new(task)], ..Self::default() }
	}

	/// Runs all `effects`, keeping their order within each flavour.
	pub fn batch(effects: impl IntoIterator<Item = Self>) -> Self {
		effects.into_iter().fold(Self::default(), |mut batch, effect| {
			batch.synchronous.extend(effect.synchronous);
			batch.before_paint.extend(effect.before_paint);
			batch.after_paint.extend(effect.after_paint);
			batch
		})
	}

	#[must_use]
	pub fn is_none(&self) -> bool {
		self.synchronous.is_empty() && self.before_paint.is_empty() && self.after_paint.is_empty()
	}

	/// Converts the messages this effect dispatches.
	pub fn map<B: 'static>(self, f: impl Fn(Msg) -> B + 'static) -> Effect<B> {
		let f: Rc<dyn Fn(Msg) -> B> = Rc::new(f);
		let map = |tasks: Vec<Task<Msg>>| -> Vec<Task<B>> {
			tasks
				.into_iter()
				.map(|task| {
					let f = f.clone();
					Box::new(move |actions: &Actions<B>| task(&actions.map(f))) as Task<B>
				})
				.collect()
		};
		Effect { synchronous: map(self.synchronous), before_paint: map(self.before_paint), after_paint: map(self.after_paint) }
	}

	pub(crate) fn from_tasks(tasks: Vec<Task<Msg>>) -> Self {
		Self { synchronous: tasks, ..Self::default() }
	}
}
