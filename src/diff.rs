//! Keyed diff of two node trees into a [`Patch`], keeping an [`Events`] registry in sync along the way.

use crate::{
	events::Events,
	patch::{Change, Patch},
	path::Path,
	vnode::{Attr, KeyedChildren, Mapper, Node},
};
use hashbrown::HashSet;
use tracing::{field, instrument, level_filters::STATIC_MAX_LEVEL, trace, trace_span, Level};

/// The result of [`diff`]: a patch turning the DOM rendered from `old` into that of `new`, and the registry matching `new`.
#[derive(Debug)]
pub struct Diff {
	pub patch: Patch,
	pub events: Events,
}

/// Diffs `old` against `new`, both rendered as the only child of the mount point.
///
/// This also starts a new dispatch cycle on `events` (see [`Events::tick`]),
/// and the returned registry holds exactly the handlers of `new`.
#[instrument(skip_all)]
pub fn diff(mut events: Events, old: &Node, new: &Node) -> Diff {
	events.tick();
	let siblings = Siblings::default();
	let siblings = diff_siblings(
		Scope {
			old: std::slice::from_ref(old),
			old_keyed: &KeyedChildren::new(),
			new: std::slice::from_ref(new),
			new_keyed: &KeyedChildren::new(),
			path: &Path::root(),
			mapper: &Mapper::identity(),
		},
		0,
		0,
		siblings,
		&mut events,
	);
	events.retain_renewed();
	let patch = siblings.into_patch(0);
	if STATIC_MAX_LEVEL >= Level::TRACE {
		trace!(changes = patch.changes_recursive().count(), handlers = events.len(), "Diffed.");
	}
	Diff { patch, events }
}

#[derive(Clone, Copy)]
struct Scope<'a> {
	old: &'a [Node],
	old_keyed: &'a KeyedChildren,
	new: &'a [Node],
	new_keyed: &'a KeyedChildren,
	path: &'a Path,
	mapper: &'a Mapper,
}

/// Output of one sibling-list diff.
#[derive(Default)]
struct Siblings {
	/// In emission order, which is the reverse of application order.
	changes: Vec<Change>,
	children: Vec<Patch>,
	removed: usize,
}

impl Siblings {
	fn is_empty(&self) -> bool {
		self.changes.is_empty() && self.children.is_empty() && self.removed == 0
	}

	fn into_patch(mut self, index: usize) -> Patch {
		self.changes.reverse();
		Patch { index, removed: self.removed, changes: self.changes, children: self.children }
	}
}

/// Converts a position in the new tree to one in the DOM as it is while the change is applied.
fn offset_index(node_index: usize, moved_offset: isize) -> usize {
	let index = node_index as isize - moved_offset;
	debug_assert!(index >= 0, "negative DOM index");
	index.max(0) as usize
}

#[allow(clippy::too_many_lines)]
fn diff_siblings(scope: Scope<'_>, mut moved_offset: isize, mut node_index: usize, mut siblings: Siblings, events: &mut Events) -> Siblings {
	let Scope { old: old_children, old_keyed, new, new_keyed, path, mapper } = scope;

	// Reversed, so that a matched keyed node can be put back in front.
	let mut old: Vec<Node> = old_children.iter().rev().cloned().collect();
	let mut new = new.iter();
	let mut moved = HashSet::<&str>::new();
	// Emitted after the moved node's own changes, so that it is applied before them.
	let mut pending_move: Option<(String, usize, usize)> = None;

	loop {
		let Some(prev) = old.last().cloned() else {
			let rest = new.as_slice();
			if !rest.is_empty() {
				events.add_children(mapper, path, node_index, rest);
				siblings.changes.push(Change::Insert { children: rest.to_vec(), before: offset_index(node_index, moved_offset) });
			}
			break;
		};

		let Some(next) = new.as_slice().first() else {
			old.pop();
			// A stale copy of a moved node: the DOM node was already claimed, along with its handlers.
			if prev.key().is_empty() || !moved.contains(prev.key()) {
				siblings.removed += prev.advance();
				events.remove_child(path, offset_index(node_index, moved_offset), &prev);
			}
			node_index += prev.advance();
			continue;
		};

		if prev.key() != next.key() {
			let next_did_exist = if next.key().is_empty() { None } else { old_keyed.get(next.key()) };
			let prev_does_exist = !prev.key().is_empty() && new_keyed.contains_key(prev.key());

			match next_did_exist {
				Some(_) if prev_does_exist && moved.contains(prev.key()) => {
					old.pop();
					moved_offset -= prev.advance() as isize;
				}
				Some(matched) if prev_does_exist => {
					let count = matched.advance();
					trace!(key = next.key(), count, "Move.");
					pending_move = Some((next.key().to_owned(), offset_index(node_index, moved_offset), count));
					moved.insert(next.key());
					old.push(matched.clone());
				}
				Some(_) => {
					old.pop();
					let count = prev.advance();
					let from = offset_index(node_index, moved_offset);
					moved_offset -= count as isize;
					events.remove_child(path, from, &prev);
					if prev.key().is_empty() {
						siblings.changes.push(Change::Remove { from, count });
					} else {
						siblings.changes.push(Change::RemoveKey { key: prev.key().to_owned(), count });
					}
				}
				None if prev_does_exist => {
					let count = next.advance();
					events.add_child(mapper, path, node_index, next);
					siblings.changes.push(Change::Insert { children: vec![next.clone()], before: offset_index(node_index, moved_offset) });
					moved_offset += count as isize;
					node_index += count;
					new.next();
				}
				None => {
					old.pop();
					new.next();
					replace(&prev, next, path, mapper, &mut moved_offset, &mut node_index, &mut siblings, events);
				}
			}
			continue;
		}

		old.pop();
		new.next();
		match (&prev, next) {
			(Node::Fragment(prev), Node::Fragment(next)) => {
				let span = trace_span!("Diffing fragment", key = %next.key, path = field::Empty);
				if cfg!(feature = "log-paths") {
					span.record("path", &field::display(path));
				}
				let _enter = span.enter();

				let mapper = mapper.compose(&next.mapper);
				let first_child = node_index + 1;
				let nested = diff_siblings(
					Scope { old: &prev.children, old_keyed: &prev.keyed_children, new: &next.children, new_keyed: &next.keyed_children, path, mapper: &mapper },
					moved_offset,
					first_child,
					Siblings { changes: Vec::new(), children: core::mem::take(&mut siblings.children), removed: 0 },
					events,
				);
				if nested.removed > 0 {
					siblings.changes.push(Change::Remove { from: offset_index(first_child + next.children_count, moved_offset), count: nested.removed });
				}
				siblings.changes.extend(nested.changes);
				siblings.children = nested.children;

				moved_offset += next.children_count as isize - prev.children_count as isize;
				node_index = first_child + next.children_count;
			}

			(Node::Element(prev), Node::Element(next)) if prev.namespace == next.namespace && prev.tag == next.tag => {
				let span = trace_span!("Diffing element", tag = %next.tag, key = %next.key, path = field::Empty);
				if cfg!(feature = "log-paths") {
					span.record("path", &field::display(path));
				}
				let _enter = span.enter();

				let mapper = mapper.compose(&next.mapper);
				let child_path = path.child(node_index, &next.key);
				let controlled = events.is_controlled(&next.namespace, &next.tag, &child_path);
				let mut nested = Siblings::default();
				if let Some(update) = diff_attributes(controlled, &child_path.to_string(), &mapper, events, &prev.attributes, &next.attributes) {
					nested.changes.push(update);
				}
				let nested = diff_siblings(
					Scope {
						old: &prev.children,
						old_keyed: &prev.keyed_children,
						new: &next.children,
						new_keyed: &next.keyed_children,
						path: &child_path,
						mapper: &mapper,
					},
					0,
					0,
					nested,
					events,
				);
				if !nested.is_empty() {
					siblings.children.push(nested.into_patch(node_index));
				}
				node_index += 1;
			}

			(Node::Text(prev), Node::Text(next)) => {
				if prev.content != next.content {
					siblings.children.push(Patch { changes: vec![Change::ReplaceText { content: next.content.clone() }], ..Patch::new(node_index) });
				}
				node_index += 1;
			}

			(Node::RawHtml(prev), Node::RawHtml(next)) if prev.namespace == next.namespace && prev.tag == next.tag => {
				let span = trace_span!("Diffing raw HTML element", tag = %next.tag, key = %next.key);
				let _enter = span.enter();

				let mapper = mapper.compose(&next.mapper);
				let child_path = path.child(node_index, &next.key);
				let mut changes = Vec::new();
				if prev.inner_html != next.inner_html {
					changes.push(Change::ReplaceInnerHtml { inner_html: next.inner_html.clone() });
				}
				if let Some(update) = diff_attributes(false, &child_path.to_string(), &mapper, events, &prev.attributes, &next.attributes) {
					changes.push(update);
				}
				if !changes.is_empty() {
					siblings.children.push(Patch { changes, ..Patch::new(node_index) });
				}
				node_index += 1;
			}

			(prev, next) => replace(prev, next, path, mapper, &mut moved_offset, &mut node_index, &mut siblings, events),
		}

		if let Some((key, before, count)) = pending_move.take() {
			siblings.changes.push(Change::Move { key, before, count });
			moved_offset += count as isize;
		}
	}

	siblings
}

#[allow(clippy::too_many_arguments)]
fn replace(prev: &Node, next: &Node, path: &Path, mapper: &Mapper, moved_offset: &mut isize, node_index: &mut usize, siblings: &mut Siblings, events: &mut Events) {
	let (prev_count, next_count) = (prev.advance(), next.advance());
	trace!(prev_count, next_count, "Replace.");
	let from = offset_index(*node_index, *moved_offset);
	siblings.changes.push(Change::Replace { from, count: prev_count, with: next.clone() });
	events.remove_child(path, from, prev);
	events.add_child(mapper, path, *node_index, next);
	*moved_offset += next_count as isize - prev_count as isize;
	*node_index += next_count;
}

/// Merges two attribute lists (sorted by name) into an [`Change::Update`], if anything changed.
///
/// Event handlers are re-registered unconditionally, since their closures can't be compared.
/// Only changed listener options make it into the patch.
fn diff_attributes(controlled: bool, path: &str, mapper: &Mapper, events: &mut Events, old: &[Attr], new: &[Attr]) -> Option<Change> {
	let mut added = Vec::new();
	let mut removed = Vec::new();

	let mut old = old.iter().peekable();
	let mut new = new.iter().peekable();
	loop {
		let (prev, next) = match (old.peek(), new.peek()) {
			(None, None) => break,
			(Some(prev), None) => {
				if let Attr::Event(binding) = prev {
					events.remove_event(path, &binding.name);
				}
				removed.push((*prev).clone());
				old.next();
				continue;
			}
			(None, Some(next)) => {
				if let Attr::Event(binding) = next {
					events.add_event(mapper, path, &binding.name, &binding.handler);
				}
				added.push((*next).clone());
				new.next();
				continue;
			}
			(Some(prev), Some(next)) => (*prev, *next),
		};

		match prev.name().cmp(next.name()) {
			core::cmp::Ordering::Less => {
				if let Attr::Event(binding) = prev {
					events.remove_event(path, &binding.name);
				}
				removed.push(prev.clone());
				old.next();
			}
			core::cmp::Ordering::Greater => {
				if let Attr::Event(binding) = next {
					events.add_event(mapper, path, &binding.name, &binding.handler);
				}
				added.push(next.clone());
				new.next();
			}
			core::cmp::Ordering::Equal => {
				old.next();
				new.next();
				match (prev, next) {
					(Attr::Attribute { name, value: old_value }, Attr::Attribute { value: new_value, .. }) => {
						let changed = match name.as_str() {
							"value" | "checked" | "selected" => controlled || old_value != new_value,
							_ => old_value != new_value,
						};
						if changed {
							added.push(next.clone());
						}
					}
					(Attr::Property { name, value: old_value }, Attr::Property { value: new_value, .. }) => {
						let changed = match name.as_str() {
							"scrollLeft" | "scrollRight" => true,
							"value" | "checked" | "selected" => controlled || old_value != new_value,
							_ => old_value != new_value,
						};
						if changed {
							added.push(next.clone());
						}
					}
					(Attr::Event(old_binding), Attr::Event(new_binding)) => {
						events.add_event(mapper, path, &new_binding.name, &new_binding.handler);
						if !old_binding.same_modifiers(new_binding) {
							added.push(next.clone());
						}
					}
					(prev, next) => {
						if let Attr::Event(binding) = prev {
							events.remove_event(path, &binding.name);
						}
						if let Attr::Event(binding) = next {
							events.add_event(mapper, path, &binding.name, &binding.handler);
						}
						removed.push(prev.clone());
						added.push(next.clone());
					}
				}
			}
		}
	}

	if added.is_empty() && removed.is_empty() {
		None
	} else {
		Some(Change::Update { added, removed })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vnode::EventBinding;
	use pretty_assertions::assert_eq;
	use serde_json::json;
	use std::rc::Rc;

	fn text(key: &str, content: &str) -> Node {
		Node::text(key.into(), Mapper::identity(), content.into())
	}

	fn element(tag: &str, attributes: Vec<Attr>, children: Vec<Node>) -> Node {
		Node::element(String::new(), Mapper::identity(), String::new(), tag.into(), attributes, children, KeyedChildren::new(), false, false)
	}

	fn keyed_list(keys: &[&str]) -> Node {
		let children: Vec<Node> = keys.iter().map(|key| element("li", vec![], vec![text("", key)]).to_keyed(key)).collect();
		let keyed_children = children.iter().map(|child| (child.key().to_owned(), child.clone())).collect();
		Node::element(String::new(), Mapper::identity(), String::new(), "ul".into(), vec![], children, keyed_children, false, false)
	}

	fn attribute(name: &str, value: &str) -> Attr {
		Attr::Attribute { name: name.into(), value: value.into() }
	}

	fn on(name: &str) -> Attr {
		Attr::Event(EventBinding {
			name: name.into(),
			handler: Rc::new(|_: &serde_json::Value| Ok(Box::new(()) as crate::vnode::AnyMessage)),
			include: Vec::new(),
			prevent_default: false,
			stop_propagation: false,
			immediate: false,
			debounce: 0,
			throttle: 0,
		})
	}

	/// `(patch index path, change kind)` pairs, depth-first.
	fn summary(patch: &Patch) -> Vec<(Vec<usize>, &'static str)> {
		fn walk(patch: &Patch, prefix: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, &'static str)>) {
			for change in &patch.changes {
				out.push((prefix.clone(), change.kind()));
			}
			for child in &patch.children {
				prefix.push(child.index);
				walk(child, prefix, out);
				prefix.pop();
			}
		}
		let mut out = Vec::new();
		walk(patch, &mut Vec::new(), &mut out);
		out
	}

	#[test]
	fn identical_trees_produce_an_empty_patch() {
		let tree = element("div", vec![attribute("class", "a"), on("click")], vec![text("", "hello"), keyed_list(&["a", "b"])]);
		let Diff { patch, events } = diff(Events::new(), &tree, &tree);
		assert!(patch.is_empty(), "{:?}", patch);

		let Diff { patch, events } = diff(events, &tree, &tree);
		assert!(patch.is_empty());
		assert_eq!(events.len(), 1);
	}

	#[test]
	fn swapping_two_keys_is_one_move() {
		let Diff { patch, .. } = diff(Events::new(), &keyed_list(&["k1", "k2"]), &keyed_list(&["k2", "k1"]));
		assert!(patch.changes.is_empty());
		let ul = &patch.children[0];
		assert_eq!(ul.index, 0);
		assert_eq!(ul.removed, 0);
		match ul.changes.as_slice() {
			[Change::Move { key, before: 0, count: 1 }] => assert_eq!(key, "k2"),
			other => panic!("unexpected changes: {:?}", other),
		}
	}

	#[test]
	fn rotating_keys_moves_each_displaced_node_once() {
		let Diff { patch, .. } = diff(Events::new(), &keyed_list(&["a", "b", "c"]), &keyed_list(&["b", "c", "a"]));
		let moves: Vec<_> = patch.children[0]
			.changes
			.iter()
			.map(|change| match change {
				Change::Move { key, before, count } => (key.as_str(), *before, *count),
				other => panic!("unexpected change: {:?}", other),
			})
			.collect();
		// Applied in this order.
		assert_eq!(moves, vec![("c", 0, 1), ("b", 0, 1)]);
	}

	#[test]
	fn different_tags_replace() {
		let Diff { patch, .. } = diff(Events::new(), &element("div", vec![], vec![]), &element("span", vec![], vec![]));
		match patch.changes.as_slice() {
			[Change::Replace { from: 0, count: 1, with: Node::Element(span) }] => assert_eq!(span.tag, "span"),
			other => panic!("unexpected changes: {:?}", other),
		}
	}

	#[test]
	fn text_changes_are_child_patches() {
		let Diff { patch, .. } = diff(Events::new(), &element("p", vec![], vec![text("", "a")]), &element("p", vec![], vec![text("", "b")]));
		assert_eq!(summary(&patch), vec![(vec![0, 0], "replace_text")]);
	}

	#[test]
	fn removed_keys_leave_the_registry() {
		let item = |key: &str| element("li", vec![on("click")], vec![]).to_keyed(key);
		let list = |keys: &[&str]| {
			let children: Vec<Node> = keys.iter().map(|key| item(key)).collect();
			let keyed = children.iter().map(|child| (child.key().to_owned(), child.clone())).collect();
			Node::element(String::new(), Mapper::identity(), String::new(), "ul".into(), vec![], children, keyed, false, false)
		};

		let Diff { events, .. } = diff(Events::new(), &element("ul", vec![], vec![]), &list(&["a", "b", "c"]));
		assert_eq!(events.len(), 3);

		let Diff { patch, events } = diff(events, &list(&["a", "b", "c"]), &list(&["c", "a"]));
		assert_eq!(events.len(), 2);
		assert!(events.contains("0\tc", "click"));
		assert!(events.contains("0\ta", "click"));
		assert!(!events.contains("0\tb", "click"));
		let ul = &patch.children[0];
		assert!(matches!(ul.changes.as_slice(), [Change::Move { key, before: 0, count: 1 }] if key == "c"));
		assert_eq!(ul.removed, 1);

		let Diff { patch, events } = diff(events, &list(&["c", "a"]), &list(&["a"]));
		assert_eq!(events.len(), 1);
		assert!(matches!(patch.children[0].changes.as_slice(), [Change::RemoveKey { key, count: 1 }] if key == "c"));
	}

	#[test]
	fn trailing_removals_are_counted_not_listed() {
		let Diff { patch, .. } = diff(Events::new(), &element("p", vec![], vec![text("", "a"), text("", "b"), text("", "c")]), &element("p", vec![], vec![text("", "a")]));
		let p = &patch.children[0];
		assert_eq!(p.removed, 2);
		assert!(p.changes.is_empty());
	}

	#[test]
	fn attribute_changes_collect_into_one_update() {
		let old = element("div", vec![attribute("class", "a"), attribute("id", "x"), attribute("title", "t")], vec![]);
		let new = element("div", vec![attribute("class", "a"), attribute("id", "y"), Attr::Property { name: "title".into(), value: json!("t") }], vec![]);
		let Diff { patch, .. } = diff(Events::new(), &old, &new);
		let [Change::Update { added, removed }] = patch.children[0].changes.as_slice() else {
			panic!("unexpected patch: {:?}", patch)
		};
		assert_eq!(added.iter().map(Attr::name).collect::<Vec<_>>(), vec!["id", "title"]);
		assert_eq!(removed.iter().map(Attr::name).collect::<Vec<_>>(), vec!["title"]);
	}

	#[test]
	fn rebinding_a_handler_with_the_same_options_is_silent() {
		let tree = || element("button", vec![on("click")], vec![]);
		let Diff { patch, events } = diff(Events::new(), &tree(), &tree());
		assert!(patch.is_empty());
		assert!(events.contains("0", "click"));
	}

	#[test]
	fn controlled_inputs_reapply_their_value() {
		let input = || element("input", vec![attribute("value", "a")], vec![]);
		let Diff { mut events, .. } = diff(Events::new(), &input(), &input());
		let _ = events.dispatch("0", "input", &json!({}));

		let Diff { patch, events } = diff(events, &input(), &input());
		assert_eq!(summary(&patch), vec![(vec![0], "update")]);

		// Only for one cycle after the dispatch.
		let Diff { patch, .. } = diff(events, &input(), &input());
		assert!(patch.is_empty());
	}

	#[test]
	fn fragments_splice_into_their_parent() {
		let fragment = |items: &[&str]| Node::fragment(String::new(), Mapper::identity(), items.iter().map(|item| text("", item)).collect(), KeyedChildren::new());
		let old = element("div", vec![], vec![fragment(&["a", "b", "c"]), text("", "tail")]);
		let new = element("div", vec![], vec![fragment(&["a"]), text("", "tail")]);
		let Diff { patch, .. } = diff(Events::new(), &old, &new);
		let div = &patch.children[0];
		match div.changes.as_slice() {
			[Change::Remove { from: 2, count: 2 }] => (),
			other => panic!("unexpected changes: {:?}", other),
		}
		assert!(div.children.is_empty());
	}

	fn keyed_ul(children: Vec<Node>) -> Node {
		let keyed_children = children.iter().map(|child| (child.key().to_owned(), child.clone())).collect();
		Node::element(String::new(), Mapper::identity(), String::new(), "ul".into(), vec![], children, keyed_children, false, false)
	}

	#[test]
	fn moved_nodes_are_replaced_where_they_land() {
		let old = keyed_ul(vec![text("", "1").to_keyed("b"), element("a", vec![], vec![]).to_keyed("a")]);
		let new = keyed_ul(vec![text("", "2").to_keyed("a"), text("", "2").to_keyed("b")]);
		let Diff { patch, .. } = diff(Events::new(), &old, &new);
		let ul = &patch.children[0];
		match ul.changes.as_slice() {
			[Change::Move { key, before: 0, count: 1 }, Change::Replace { from: 0, count: 1, with: Node::Text(_) }] => assert_eq!(key, "a"),
			other => panic!("unexpected changes: {:?}", other),
		}
		assert_eq!(summary(ul), vec![(vec![], "move"), (vec![], "replace"), (vec![1], "replace_text")]);
	}

	#[test]
	fn moved_fragments_carry_their_old_children() {
		let fragment = |items: &[&str]| Node::fragment(String::new(), Mapper::identity(), items.iter().map(|item| text("", item)).collect(), KeyedChildren::new()).to_keyed("f");
		let i = element("i", vec![], vec![]).to_keyed("g");
		let Diff { patch, .. } = diff(Events::new(), &keyed_ul(vec![i.clone(), fragment(&["x"])]), &keyed_ul(vec![fragment(&["x", "y"]), i]));
		match patch.children[0].changes.as_slice() {
			[Change::Move { key, before: 0, count: 2 }, Change::Insert { children, before: 2 }] => {
				assert_eq!(key, "f");
				assert_eq!(children.len(), 1);
			}
			other => panic!("unexpected changes: {:?}", other),
		}
	}
}
