use pretty_assertions::assert_eq;
use serde_json::Value;
use twig_dom::{
	attribute::{attribute, checked, class, none},
	diff::{diff, Diff},
	element::{element, text, unsafe_raw_html},
	event::on_click,
	events::Events,
	host::{Document, NodeId, NodeKind},
	keyed,
	memory::MemoryDocument,
	patch::Change,
	path::SEPARATOR_ELEMENT,
	reconciler::{Reconciler, ReconcilerConfig, KEY_ATTRIBUTE},
	Html,
};

fn mounted(tree: &Html<()>) -> Reconciler<MemoryDocument> {
	let mut reconciler = Reconciler::new(MemoryDocument::new(), ReconcilerConfig::default());
	reconciler.mount(tree.node());
	reconciler
}

/// The registry a first render of `tree` leaves behind.
fn registry(tree: &Html<()>) -> Events {
	diff(Events::new(), tree.node(), tree.node()).events
}

/// Structure, text and listeners, with empty text nodes visible.
fn dump(document: &MemoryDocument, parent: NodeId) -> String {
	document
		.children(parent)
		.into_iter()
		.map(|child| match document.kind(child) {
			NodeKind::Element => {
				let listeners: Vec<String> = document.listeners(child).into_iter().map(|(name, _)| name).collect();
				let tag = document.tag_name(child);
				format!("<{} {:?}>{}</{}>", tag, listeners, dump(document, child), tag)
			}
			NodeKind::Text | NodeKind::Other => format!("{:?}", document.text(child).unwrap_or_default()),
		})
		.collect()
}

/// Asserts that every listening DOM node is addressed by exactly one handler the registry can dispatch.
fn assert_dispatchable(reconciler: &Reconciler<MemoryDocument>, events: &mut Events) {
	fn walk(reconciler: &Reconciler<MemoryDocument>, node: NodeId, events: &mut Events, listening: &mut usize) {
		for child in reconciler.document().children(node) {
			if reconciler.document().listeners(child).iter().any(|(name, _)| name == "click") {
				assert!(reconciler.is_listening(child, "click"));
				let path = reconciler.path_of(child).expect("untracked node").to_owned();
				assert!(events.dispatch(&path, "click", &Value::Null).is_ok(), "no handler at {:?}", path);
				*listening += 1;
			}
			walk(reconciler, child, events, listening);
		}
	}
	let mut listening = 0;
	walk(reconciler, reconciler.root(), events, &mut listening);
	assert_eq!(events.len(), listening);
}

fn list(keys: &[&str]) -> Html<()> {
	keyed::element("ul", [], keys.iter().map(|key| ((*key).to_owned(), element("li", [], [text(key)]))))
}

fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
	if items.len() <= 1 {
		return vec![items.to_vec()];
	}
	let mut permutations = Vec::new();
	for (i, first) in items.iter().enumerate() {
		let mut rest = items.to_vec();
		rest.remove(i);
		for mut tail in self::permutations(&rest) {
			tail.insert(0, *first);
			permutations.push(tail);
		}
	}
	permutations
}

#[test]
fn keyed_permutations_only_move_nodes() {
	let original = ["a", "b", "c", "d"];
	for order in permutations(&original) {
		let mut reconciler = mounted(&list(&original));
		let ul = reconciler.document().children(reconciler.root())[0];
		let items: Vec<NodeId> = original.iter().map(|key| reconciler.keyed_child(ul, key).unwrap()).collect();

		let Diff { patch, .. } = diff(registry(&list(&original)), list(&original).node(), list(&order).node());
		assert!(patch.changes_recursive().all(|change| matches!(change, Change::Move { .. })), "{:?} -> {:?}: {:?}", original, order, patch);
		assert!(patch.changes_recursive().count() < original.len());

		reconciler.push(&patch);
		let expected: Vec<NodeId> = order.iter().map(|key| items[original.iter().position(|k| k == key).unwrap()]).collect();
		assert_eq!(reconciler.document().children(ul), expected);
		assert_eq!(reconciler.document().to_html(ul), order.iter().map(|key| format!("<li>{}</li>", key)).collect::<String>());
	}
}

#[test]
fn moved_nodes_are_replaced_where_they_land() {
	let old: Html<()> = keyed::element("ul", [], [("b".to_owned(), text("1")), ("a".to_owned(), element("a", [], []))]);
	let new: Html<()> = keyed::element("ul", [], [("a".to_owned(), text("2")), ("b".to_owned(), text("2"))]);

	let mut reconciler = mounted(&old);
	let ul = reconciler.document().children(reconciler.root())[0];
	let b = reconciler.keyed_child(ul, "b").unwrap();
	reconciler.push(&diff(registry(&old), old.node(), new.node()).patch);

	let fresh = mounted(&new);
	assert_eq!(dump(reconciler.document(), reconciler.root()), dump(fresh.document(), fresh.root()));
	assert_eq!(reconciler.keyed_child(ul, "b"), Some(b));
	assert_eq!(reconciler.document().children(ul)[1], b);
}

#[test]
fn moved_fragments_carry_their_children() {
	let fragment = |items: &[&str]| keyed::fragment(items.iter().map(|item| ((*item).to_owned(), text(item))));
	let old: Html<()> = keyed::element("ul", [], [("g".to_owned(), element("i", [], [])), ("f".to_owned(), fragment(&["x"]))]);
	let new: Html<()> = keyed::element("ul", [], [("f".to_owned(), fragment(&["x", "y"])), ("g".to_owned(), element("i", [], []))]);

	let mut reconciler = mounted(&old);
	reconciler.push(&diff(registry(&old), old.node(), new.node()).patch);
	let fresh = mounted(&new);
	assert_eq!(dump(reconciler.document(), reconciler.root()), dump(fresh.document(), fresh.root()));
}

#[test]
fn shifted_unkeyed_listeners_follow_their_node() {
	let view = |keys: &[&str]| -> Html<()> {
		keyed::element(
			"div",
			[],
			keys.iter()
				.map(|key| ((*key).to_owned(), element("p", [], [text(key)])))
				.chain([(String::new(), element("button", [on_click(())], [text("go")]))]),
		)
	};
	let old = view(&["a"]);
	let new = view(&["b", "a"]);

	let mut reconciler = mounted(&old);
	let div = reconciler.document().children(reconciler.root())[0];
	let button = reconciler.document().children(div)[1];
	assert_eq!(reconciler.path_of(button), Some(format!("0{}1", SEPARATOR_ELEMENT).as_str()));

	let Diff { patch, mut events } = diff(registry(&old), old.node(), new.node());
	reconciler.push(&patch);

	assert_eq!(reconciler.document().children(div)[2], button);
	let path = format!("0{}2", SEPARATOR_ELEMENT);
	assert_eq!(reconciler.path_of(button), Some(path.as_str()));
	assert!(events.contains(&path, "click"));
	assert!(!events.contains(&format!("0{}1", SEPARATOR_ELEMENT), "click"));
	assert_dispatchable(&reconciler, &mut events);
}

#[test]
fn raw_html_is_replaced_wholesale() {
	let old: Html<()> = unsafe_raw_html("", "article", [class("post")], "<b>draft</b>");
	let new: Html<()> = unsafe_raw_html("", "article", [class("post")], "<i>final</i>");

	let mut reconciler = mounted(&old);
	let article = reconciler.document().children(reconciler.root())[0];
	reconciler.push(&diff(registry(&old), old.node(), new.node()).patch);
	assert_eq!(reconciler.document().children(reconciler.root()), vec![article]);
	assert_eq!(reconciler.document().outer_html(article), "<article class=\"post\"><i>final</i></article>");
}

#[test]
fn absent_attributes_render_nothing() {
	let reconciler = mounted(&element("div", [none()], [element("input", [checked(false)], []), element("p", [class("")], [])]));
	assert_eq!(reconciler.document().to_html(reconciler.root()), "<div><input><p></p></div>");
}

#[test]
fn repeated_attribute_names_round_trip() {
	let view = |attributes: Vec<(&str, &str)>| -> Html<()> { element("div", [], [element("p", attributes.into_iter().map(|(name, value)| attribute(name, value)), [])]) };
	let transitions = [
		(vec![("lang", "en"), ("lang", "en")], vec![("lang", "en")]),
		(vec![("lang", "en")], vec![("lang", "de"), ("lang", "en")]),
		(vec![("id", "y"), ("lang", "en"), ("id", "x")], vec![("lang", "en"), ("id", "y"), ("lang", "en")]),
		(vec![("class", "c"), ("title", "t"), ("title", "u")], vec![("title", "u"), ("class", "c"), ("lang", "en"), ("lang", "en")]),
	];
	for (old, new) in transitions {
		let (old, new) = (view(old), view(new));
		let mut reconciler = mounted(&old);
		reconciler.push(&diff(registry(&old), old.node(), new.node()).patch);
		let fresh = mounted(&new);
		assert_eq!(paragraph_attributes(&reconciler), paragraph_attributes(&fresh));
	}
}

fn paragraph_attributes(reconciler: &Reconciler<MemoryDocument>) -> Vec<(String, String)> {
	let document = reconciler.document();
	let p = document.children(document.children(reconciler.root())[0])[0];
	let mut attributes = document.attributes(p);
	attributes.sort();
	attributes
}

#[test]
fn exposed_keys_are_written_as_attributes() {
	let mut reconciler = Reconciler::new(MemoryDocument::new(), ReconcilerConfig { expose_keys: true, ..ReconcilerConfig::default() });
	reconciler.mount(list(&["a"]).node());
	let ul = reconciler.document().children(reconciler.root())[0];
	let li = reconciler.keyed_child(ul, "a").unwrap();
	assert_eq!(reconciler.document().get_attribute(li, KEY_ATTRIBUTE).as_deref(), Some("a"));
}

#[test]
fn teardown_empties_the_mount_point() {
	let mut reconciler = mounted(&list(&["a", "b"]));
	reconciler.teardown();
	assert_eq!(reconciler.document().child_count(reconciler.root()), 0);
	assert_eq!(reconciler.path_of(NodeId(1)), None);
}

/// A small deterministic generator (PCG-style LCG), so failures reproduce.
struct Rng(u64);

impl Rng {
	fn next(&mut self) -> u64 {
		self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
		self.0 >> 33
	}

	fn below(&mut self, n: usize) -> usize {
		(self.next() % n as u64) as usize
	}

	fn chance(&mut self, percent: u64) -> bool {
		self.next() % 100 < percent
	}
}

/// Keyed and unkeyed children. Keys of nested fragments are prefixed by their position, so they stay unique once spliced.
fn children(rng: &mut Rng, depth: usize, pool: &[String], prefix: &str) -> Vec<(String, Html<()>)> {
	let mut keys = pool.to_vec();
	for i in (1..keys.len()).rev() {
		keys.swap(i, rng.below(i + 1));
	}
	keys.truncate(rng.below(pool.len() + 1));

	let mut items: Vec<(String, Html<()>)> = keys.into_iter().map(|key| (key, child(rng, depth, &format!("{}k", prefix)))).collect();
	for i in 0..rng.below(3) {
		let position = rng.below(items.len() + 1);
		items.insert(position, (String::new(), child(rng, depth, &format!("{}{}", prefix, i))));
	}
	items
}

fn child(rng: &mut Rng, depth: usize, prefix: &str) -> Html<()> {
	let roll = rng.below(100);
	let tag = ["a", "b"][rng.below(2)];
	let listeners = if rng.chance(50) { vec![on_click(())] } else { vec![] };
	if depth > 0 && roll < 25 {
		let pool: Vec<String> = ["x", "y", "z"].iter().map(|key| format!("{}{}", prefix, key)).collect();
		keyed::fragment(children(rng, depth - 1, &pool, prefix))
	} else if depth > 0 && roll < 45 {
		let pool: Vec<String> = ["p", "q", "r"].iter().map(|key| (*key).to_owned()).collect();
		keyed::element(tag, listeners, children(rng, depth - 1, &pool, ""))
	} else if roll < 70 {
		text(["1", "2"][rng.below(2)])
	} else {
		element(tag, listeners, [])
	}
}

fn tree(rng: &mut Rng, depth: usize) -> Html<()> {
	let pool: Vec<String> = ["a", "b", "c", "d", "e", "f"].iter().map(|key| (*key).to_owned()).collect();
	if rng.chance(30) {
		keyed::fragment(children(rng, depth, &pool, ""))
	} else {
		keyed::element("ul", [], children(rng, depth, &pool, ""))
	}
}

#[test]
fn random_transitions_match_a_fresh_render() {
	let mut rng = Rng(0x7769_6720);
	for depth in [1, 2, 2, 3] {
		for _ in 0..150 {
			let mut reconciler = Reconciler::new(MemoryDocument::new(), ReconcilerConfig::default());
			let mut current: Html<()> = text("");
			reconciler.mount(current.node());
			let mut events = Events::new();

			for _ in 0..4 {
				let next = tree(&mut rng, depth);
				let Diff { patch, events: next_events } = diff(events, current.node(), next.node());
				reconciler.push(&patch);
				events = next_events;

				let fresh = mounted(&next);
				assert_eq!(dump(reconciler.document(), reconciler.root()), dump(fresh.document(), fresh.root()), "after {:?}", patch);
				assert_dispatchable(&reconciler, &mut events);

				let Diff { patch, events: next_events } = diff(events, next.node(), next.node());
				assert!(patch.is_empty(), "not idempotent: {:?}", patch);
				events = next_events;
				current = next;
			}
		}
	}
}
