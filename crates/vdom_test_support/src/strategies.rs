//! proptest strategies for node trees.
//!
//! Vocabularies are deliberately tiny so random pairs of trees share types,
//! keys and attributes often enough to exercise matching, not just remounts.
//! `NaN` is included on purpose; it must compare equal to itself.

use proptest::prelude::*;
use std::sync::Arc;
use vdom::{AttrValue, Attributes, Node};

const KINDS: &[&str] = &["div", "p", "span", "li"];
const ATTR_NAMES: &[&str] = &["class", "id", "n", "on"];
const KEYS: &[&str] = &["k0", "k1", "k2", "k3", "k4"];

pub fn attr_value() -> impl Strategy<Value = AttrValue> {
    prop_oneof![
        Just(AttrValue::Null),
        any::<bool>().prop_map(AttrValue::Bool),
        (0i64..4).prop_map(AttrValue::Int),
        (-4i32..4).prop_map(|v| AttrValue::Float(f64::from(v) / 2.0)),
        Just(AttrValue::Float(f64::NAN)),
        prop::sample::select(vec!["x", "y", "z"]).prop_map(AttrValue::from),
    ]
}

fn attributes() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(
        prop::sample::select(ATTR_NAMES.to_vec()).prop_map(Arc::<str>::from),
        attr_value(),
        0..3,
    )
}

fn text_leaf() -> impl Strategy<Value = Node> {
    prop_oneof![
        prop::sample::select(vec!["a", "b", "c"]).prop_map(Node::text),
        (0i64..3).prop_map(Node::text),
    ]
}

/// Well-formed trees; sibling keys may repeat, which exercises the
/// positional fallback.
pub fn tree() -> impl Strategy<Value = Node> {
    text_leaf().prop_recursive(4, 48, 4, |inner| {
        (
            prop::sample::select(KINDS.to_vec()),
            prop::option::of(prop::sample::select(KEYS.to_vec())),
            attributes(),
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(kind, key, attributes, children)| {
                Node::from_parts(
                    Some(Arc::from(kind)),
                    key.map(Arc::from),
                    attributes,
                    children,
                )
            })
    })
}

/// Root element whose children are unique-keyed items.
pub fn keyed_list(keys: &[usize]) -> Node {
    Node::element("ul").with_children(keys.iter().map(|k| {
        Node::element("li")
            .with_key(format!("item-{k}"))
            .with_child(Node::text(format!("item {k}")))
    }))
}

/// A keyed list and a permutation of a subset of it plus fresh items.
pub fn keyed_edit() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (1usize..10).prop_flat_map(|len| {
        (
            Just((0..len).collect::<Vec<usize>>()),
            prop::collection::vec(any::<bool>(), len),
            0usize..3,
        )
            .prop_flat_map(|(before, keep, fresh)| {
                let mut after: Vec<usize> = before
                    .iter()
                    .zip(&keep)
                    .filter(|(_, keep)| **keep)
                    .map(|(k, _)| *k)
                    .collect();
                after.extend((0..fresh).map(|i| 100 + i));
                (Just(before), Just(after).prop_shuffle())
            })
    })
}
