use crate::node::{AttrValue, Node};
use std::fmt::{self, Write};
use std::sync::OnceLock;

/// Deterministic tree serialization and equality rules for round-trip tests.
/// Not a public stable format; intended for test comparisons.
///
/// Equivalence rules:
/// - Types must match (text leaves have no type).
/// - Keys must match unless `ignore_keys` is set.
/// - Attribute sets must match by name and strictly by value.
/// - Child lists must match in length and order.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotOptions {
    pub ignore_keys: bool,
}

#[derive(Debug)]
pub struct TreeSnapshot {
    lines: Vec<String>,
}

impl TreeSnapshot {
    pub fn new(root: &Node, options: SnapshotOptions) -> Self {
        let mut lines = Vec::new();
        walk_snapshot(root, &options, 0, &mut lines);
        Self { lines }
    }

    pub fn as_lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

impl fmt::Display for TreeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug)]
pub struct TreeMismatch<'a> {
    path: String,
    detail: String,
    expected_node: &'a Node,
    actual_node: &'a Node,
    options: SnapshotOptions,
    expected_subtree: OnceLock<String>,
    actual_subtree: OnceLock<String>,
}

impl fmt::Display for TreeMismatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected_subtree = self
            .expected_subtree
            .get_or_init(|| TreeSnapshot::new(self.expected_node, self.options).render());
        let actual_subtree = self
            .actual_subtree
            .get_or_init(|| TreeSnapshot::new(self.actual_node, self.options).render());
        writeln!(f, "tree mismatch at {}: {}", self.path, self.detail)?;
        writeln!(f, "expected: {}", format_node_line(self.expected_node, &self.options))?;
        writeln!(f, "actual:   {}", format_node_line(self.actual_node, &self.options))?;
        writeln!(f, "expected subtree:\n{expected_subtree}")?;
        writeln!(f, "actual subtree:\n{actual_subtree}")?;
        Ok(())
    }
}

impl std::error::Error for TreeMismatch<'_> {}

pub fn assert_tree_eq(expected: &Node, actual: &Node, options: SnapshotOptions) {
    if let Err(mismatch) = compare_trees(expected, actual, options) {
        panic!("{mismatch}");
    }
}

pub fn compare_trees<'a>(
    expected: &'a Node,
    actual: &'a Node,
    options: SnapshotOptions,
) -> Result<(), Box<TreeMismatch<'a>>> {
    let mut path = vec![node_label(expected)];
    compare_nodes(expected, actual, &options, &mut path)
}

fn compare_nodes<'a>(
    expected: &'a Node,
    actual: &'a Node,
    options: &SnapshotOptions,
    path: &mut Vec<String>,
) -> Result<(), Box<TreeMismatch<'a>>> {
    if expected.kind() != actual.kind() {
        return Err(mismatch(path, "node type", expected, actual, options));
    }
    if !options.ignore_keys && expected.key() != actual.key() {
        return Err(mismatch(path, "key", expected, actual, options));
    }
    if expected.attributes() != actual.attributes() {
        let name = expected
            .attributes()
            .iter()
            .find(|(name, value)| actual.attr(name) != Some(*value))
            .map(|(name, _)| name.to_string())
            .or_else(|| {
                actual
                    .attributes()
                    .keys()
                    .find(|name| expected.attr(name).is_none())
                    .map(|name| name.to_string())
            })
            .unwrap_or_default();
        return Err(mismatch(
            path,
            &format!("attribute {name:?}"),
            expected,
            actual,
            options,
        ));
    }
    let expected_children = expected.children();
    let actual_children = actual.children();
    if expected_children.len() != actual_children.len() {
        return Err(mismatch(
            path,
            &format!(
                "child count (expected {}, actual {})",
                expected_children.len(),
                actual_children.len()
            ),
            expected,
            actual,
            options,
        ));
    }
    for (idx, (exp, act)) in expected_children.iter().zip(actual_children).enumerate() {
        path.push(format!("{}[{}]", node_label(exp), idx));
        let result = compare_nodes(exp, act, options, path);
        path.pop();
        result?;
    }
    Ok(())
}

fn mismatch<'a>(
    path: &[String],
    detail: &str,
    expected: &'a Node,
    actual: &'a Node,
    options: &SnapshotOptions,
) -> Box<TreeMismatch<'a>> {
    Box::new(TreeMismatch {
        path: format!("/{}", path.join("/")),
        detail: detail.to_string(),
        expected_node: expected,
        actual_node: actual,
        options: *options,
        expected_subtree: OnceLock::new(),
        actual_subtree: OnceLock::new(),
    })
}

fn node_label(node: &Node) -> String {
    let Some(kind) = node.kind() else {
        return "#text".to_string();
    };
    match node.key() {
        Some(key) => format!("{kind}:{key}"),
        None => kind.to_string(),
    }
}

fn walk_snapshot(node: &Node, options: &SnapshotOptions, depth: usize, out: &mut Vec<String>) {
    const INDENT_STEP: usize = 2;
    let mut line = " ".repeat(depth.saturating_mul(INDENT_STEP));
    write_node_line(&mut line, node, options);
    out.push(line);
    for child in node.children() {
        walk_snapshot(child, options, depth + 1, out);
    }
}

fn format_node_line(node: &Node, options: &SnapshotOptions) -> String {
    let mut line = String::new();
    write_node_line(&mut line, node, options);
    line
}

fn write_node_line(out: &mut String, node: &Node, options: &SnapshotOptions) {
    if let Some(value) = node.text_value() {
        write_value(out, value);
    } else {
        out.push('<');
        out.push_str(node.kind().unwrap_or("#text"));
        for (name, value) in node.attributes() {
            out.push(' ');
            out.push_str(name);
            out.push('=');
            write_value(out, value);
        }
        out.push('>');
    }
    if !options.ignore_keys {
        if let Some(key) = node.key() {
            out.push_str(" key=");
            write_escaped(out, key);
        }
    }
}

fn write_value(out: &mut String, value: &AttrValue) {
    match value {
        AttrValue::Str(text) => {
            out.push('"');
            write_escaped(out, text);
            out.push('"');
        }
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

fn write_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ if ch.is_ascii() => out.push(ch),
            _ => {
                let _ = write!(out, "\\u{{{:X}}}", ch as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SnapshotOptions, TreeSnapshot, assert_tree_eq, compare_trees};
    use crate::Node;

    fn sample(text: &str) -> Node {
        Node::element("div")
            .with_attr("id", "main")
            .with_child(Node::element("p").with_key("a").with_child(Node::text(text)))
    }

    #[test]
    fn snapshot_renders_indented_lines() {
        let snapshot = TreeSnapshot::new(&sample("hi"), SnapshotOptions::default());
        assert_eq!(
            snapshot.as_lines(),
            &[
                "<div id=\"main\">".to_string(),
                "  <p> key=a".to_string(),
                "    \"hi\"".to_string(),
            ]
        );
    }

    #[test]
    fn equal_trees_compare_equal() {
        assert_tree_eq(&sample("hi"), &sample("hi"), SnapshotOptions::default());
    }

    #[test]
    fn mismatch_points_to_text() {
        let expected = sample("a");
        let actual = sample("b");
        let err = compare_trees(&expected, &actual, SnapshotOptions::default())
            .expect_err("expected mismatch");
        let rendered = err.to_string();
        assert!(rendered.contains("/div/p:a[0]/#text[0]"), "{rendered}");
        assert!(rendered.contains("attribute \"value\""), "{rendered}");
    }

    #[test]
    fn keys_can_be_ignored() {
        let expected = Node::element("p").with_key("a");
        let actual = Node::element("p").with_key("b");
        assert!(compare_trees(&expected, &actual, SnapshotOptions::default()).is_err());
        assert!(
            compare_trees(&expected, &actual, SnapshotOptions { ignore_keys: true }).is_ok()
        );
    }
}
