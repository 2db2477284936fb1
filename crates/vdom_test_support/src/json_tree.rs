//! JSON encoding of node trees used by fixtures.
//!
//! ```json
//! { "type": "ul", "key": "list", "attrs": { "class": "items" },
//!   "children": [ { "type": "li", "children": ["one"] }, 2 ] }
//! ```
//!
//! A bare scalar is a text leaf. An object without `type` is a text leaf
//! whose scalar is its `value` field (and may carry a `key`).

use serde_json::{Map, Value};
use std::sync::Arc;
use vdom::{AttrValue, Attributes, Node, TEXT_VALUE};

pub fn parse_tree(source: &str) -> Result<Node, String> {
    let value: Value =
        serde_json::from_str(source).map_err(|err| format!("invalid tree JSON: {err}"))?;
    node_from_json(&value, "$")
}

pub fn node_from_json(value: &Value, path: &str) -> Result<Node, String> {
    match value {
        Value::Object(fields) => node_from_object(fields, path),
        Value::Array(_) => Err(format!("{path}: arrays are not nodes")),
        scalar => Ok(Node::text(attr_from_json(scalar, path)?)),
    }
}

fn node_from_object(fields: &Map<String, Value>, path: &str) -> Result<Node, String> {
    for name in fields.keys() {
        if !matches!(name.as_str(), "type" | "key" | "attrs" | "children" | "value") {
            return Err(format!("{path}: unknown field '{name}'"));
        }
    }
    let kind = match fields.get("type") {
        None => None,
        Some(Value::String(kind)) => Some(Arc::from(kind.as_str())),
        Some(other) => return Err(format!("{path}.type: expected string, got {other}")),
    };
    let key = match fields.get("key") {
        None => None,
        Some(Value::String(key)) => Some(Arc::from(key.as_str())),
        Some(other) => return Err(format!("{path}.key: expected string, got {other}")),
    };

    let mut attributes = Attributes::new();
    if let Some(attrs) = fields.get("attrs") {
        let Value::Object(attrs) = attrs else {
            return Err(format!("{path}.attrs: expected object"));
        };
        for (name, value) in attrs {
            let attr_path = format!("{path}.attrs.{name}");
            attributes.insert(Arc::from(name.as_str()), attr_from_json(value, &attr_path)?);
        }
    }
    if let Some(value) = fields.get("value") {
        if kind.is_some() {
            return Err(format!("{path}.value: only text leaves carry a value"));
        }
        let value_path = format!("{path}.value");
        attributes.insert(Arc::from(TEXT_VALUE), attr_from_json(value, &value_path)?);
    }

    let mut children = Vec::new();
    if let Some(list) = fields.get("children") {
        let Value::Array(list) = list else {
            return Err(format!("{path}.children: expected array"));
        };
        for (idx, child) in list.iter().enumerate() {
            children.push(node_from_json(child, &format!("{path}.children[{idx}]"))?);
        }
    }
    Ok(Node::from_parts(kind, key, attributes, children))
}

fn attr_from_json(value: &Value, path: &str) -> Result<AttrValue, String> {
    match value {
        Value::Null => Ok(AttrValue::Null),
        Value::Bool(v) => Ok(AttrValue::Bool(*v)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(AttrValue::Int(v))
            } else if let Some(v) = n.as_f64() {
                Ok(AttrValue::Float(v))
            } else {
                Err(format!("{path}: number {n} is out of range"))
            }
        }
        Value::String(v) => Ok(AttrValue::from(v.as_str())),
        other => Err(format!("{path}: expected scalar, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_tree;
    use vdom::{AttrValue, Node};

    #[test]
    fn parses_elements_text_and_attributes() {
        let node = parse_tree(
            r#"{ "type": "ul", "key": "list", "attrs": { "n": 1, "x": 1.5, "on": true },
                 "children": [ { "type": "li", "children": ["one"] },
                               { "key": "t", "value": 2 } ] }"#,
        )
        .expect("valid tree");
        let expected = Node::element("ul")
            .with_key("list")
            .with_attr("n", 1)
            .with_attr("x", 1.5)
            .with_attr("on", true)
            .with_child(Node::element("li").with_child(Node::text("one")))
            .with_child(Node::text(2).with_key("t"));
        assert_eq!(node, expected);
        assert_eq!(
            node.children()[1].text_value(),
            Some(&AttrValue::Int(2))
        );
    }

    #[test]
    fn rejects_unknown_fields_with_path() {
        let err = parse_tree(r#"{ "type": "div", "children": [ { "tag": "p" } ] }"#)
            .expect_err("unknown field");
        assert_eq!(err, "$.children[0]: unknown field 'tag'");
    }

    #[test]
    fn rejects_nested_attribute_values() {
        let err = parse_tree(r#"{ "type": "div", "attrs": { "style": { "a": 1 } } }"#)
            .expect_err("nested attr");
        assert!(err.starts_with("$.attrs.style: expected scalar"), "{err}");
    }
}
