//! Accessibility-tree projection.
//!
//! `Accessibility.getFullAXTree` returns a flat node list. Roots are the
//! non-ignored nodes no other node references as a child; each root is
//! projected recursively into a cleaned node carrying role, name, value,
//! heading level, focusability, and children, with ignored descendants
//! spliced out. When every node is referenced (no explicit root), the first
//! non-ignored node stands in.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct AxTree {
    pub page_id: String,
    pub nodes: Vec<AxNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AxNode {
    pub role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub focusable: bool,
    pub children: Vec<AxNode>,
}

#[derive(Debug, Deserialize)]
struct RawTree {
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(rename = "nodeId")]
    node_id: String,
    #[serde(default)]
    ignored: bool,
    role: Option<RawValue>,
    name: Option<RawValue>,
    value: Option<RawValue>,
    #[serde(default)]
    properties: Vec<RawProperty>,
    #[serde(rename = "childIds", default)]
    child_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawValue {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RawProperty {
    name: String,
    value: RawValue,
}

pub fn build_tree(page_id: &str, payload: Value) -> Result<AxTree, serde_json::Error> {
    let raw: RawTree = serde_json::from_value(payload)?;

    let index: HashMap<&str, &RawNode> = raw
        .nodes
        .iter()
        .map(|node| (node.node_id.as_str(), node))
        .collect();
    let referenced: HashSet<&str> = raw
        .nodes
        .iter()
        .flat_map(|node| node.child_ids.iter().map(String::as_str))
        .collect();

    let mut roots: Vec<AxNode> = raw
        .nodes
        .iter()
        .filter(|node| !node.ignored && !referenced.contains(node.node_id.as_str()))
        .map(|node| project(node, &index))
        .collect();

    if roots.is_empty() {
        if let Some(first) = raw.nodes.iter().find(|node| !node.ignored) {
            roots.push(project(first, &index));
        }
    }

    Ok(AxTree {
        page_id: page_id.to_string(),
        nodes: roots,
    })
}

fn project(node: &RawNode, index: &HashMap<&str, &RawNode>) -> AxNode {
    let mut out = AxNode {
        role: node.role.as_ref().map(string_value).unwrap_or_default(),
        name: node.name.as_ref().map(string_value).unwrap_or_default(),
        value: node.value.as_ref().map(string_value).unwrap_or_default(),
        level: None,
        focusable: false,
        children: Vec::new(),
    };

    for property in &node.properties {
        match property.name.as_str() {
            "level" => out.level = property.value.value.as_i64(),
            "focusable" => out.focusable = property.value.value.as_bool().unwrap_or(false),
            _ => {}
        }
    }

    for child_id in &node.child_ids {
        match index.get(child_id.as_str()) {
            Some(child) if !child.ignored => out.children.push(project(child, index)),
            _ => {}
        }
    }

    out
}

fn string_value(raw: &RawValue) -> String {
    match &raw.value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
