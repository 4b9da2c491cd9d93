//! JSON parsing and serialization of behavior trees.
//!
//! The on-disk format is `{"root": <node>}` where each node object carries
//! a `type` plus type-specific fields. Leaves reference their callbacks by
//! name; binding happens at tick time.

use std::path::Path;

use reflex_core::Value;

use crate::error::{BtError, Result};
use crate::node::{BtNode, ParallelPolicy};

/// Parse a full tree document (`{"root": <node>}`).
pub fn parse_tree(json: &serde_json::Value) -> Result<BtNode> {
    let root = json
        .get("root")
        .ok_or_else(|| BtError::Parse("tree document is missing 'root'".to_string()))?;
    parse_node(root)
}

/// Read and parse a tree document from a file.
pub fn parse_tree_file(path: impl AsRef<Path>) -> Result<BtNode> {
    let text = std::fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&text)?;
    parse_tree(&json)
}

/// Serialize a tree back into the document format. Defaults (empty names,
/// empty params, `succeed_on_one`, `repeat_count = -1`) are omitted.
pub fn tree_to_json(root: &BtNode) -> serde_json::Value {
    serde_json::json!({ "root": node_to_json(root) })
}

fn parse_node(json: &serde_json::Value) -> Result<BtNode> {
    let obj = json
        .as_object()
        .ok_or_else(|| BtError::Parse(format!("node must be an object, got {json}")))?;
    let kind = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BtError::Parse("node is missing 'type'".to_string()))?;
    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    match kind {
        "action" => Ok(BtNode::Action {
            action: leaf_ref(obj, "action")?,
            params: leaf_params(obj),
            name,
        }),
        "condition" => Ok(BtNode::Condition {
            condition: leaf_ref(obj, "condition")?,
            params: leaf_params(obj),
            name,
        }),
        "sequence" => Ok(BtNode::Sequence {
            name,
            children: parse_children(obj)?,
        }),
        "selector" => Ok(BtNode::Selector {
            name,
            children: parse_children(obj)?,
        }),
        "parallel" => {
            let policy = match obj.get("policy").and_then(|v| v.as_str()) {
                None | Some("succeed_on_one") => ParallelPolicy::SucceedOnOne,
                Some("succeed_on_all") => ParallelPolicy::SucceedOnAll,
                Some("fail_on_one") => ParallelPolicy::FailOnOne,
                Some("fail_on_all") => ParallelPolicy::FailOnAll,
                Some(other) => {
                    return Err(BtError::Parse(format!("unknown parallel policy: {other}")))
                }
            };
            Ok(BtNode::Parallel {
                name,
                policy,
                children: parse_children(obj)?,
            })
        }
        "inverter" => Ok(BtNode::Inverter {
            name,
            child: parse_child(obj, kind)?,
        }),
        "repeater" => Ok(BtNode::Repeater {
            name,
            repeat_count: obj
                .get("repeat_count")
                .and_then(|v| v.as_i64())
                .unwrap_or(-1),
            current_count: 0,
            child: parse_child(obj, kind)?,
        }),
        "until_fail" => Ok(BtNode::UntilFail {
            name,
            child: parse_child(obj, kind)?,
        }),
        "until_success" => Ok(BtNode::UntilSuccess {
            name,
            child: parse_child(obj, kind)?,
        }),
        other => Err(BtError::Parse(format!("unknown node type: {other}"))),
    }
}

fn leaf_ref(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BtError::Parse(format!("{key} node is missing its '{key}' reference")))
}

fn leaf_params(obj: &serde_json::Map<String, serde_json::Value>) -> Value {
    obj.get("params")
        .map(Value::from)
        .unwrap_or_else(|| Value::Object(Default::default()))
}

fn parse_children(obj: &serde_json::Map<String, serde_json::Value>) -> Result<Vec<BtNode>> {
    match obj.get("children") {
        Some(serde_json::Value::Array(items)) => items.iter().map(parse_node).collect(),
        Some(other) => Err(BtError::Parse(format!(
            "'children' must be an array, got {other}"
        ))),
        None => Ok(Vec::new()),
    }
}

fn parse_child(
    obj: &serde_json::Map<String, serde_json::Value>,
    kind: &str,
) -> Result<Box<BtNode>> {
    let child = obj
        .get("child")
        .ok_or_else(|| BtError::Parse(format!("{kind} node is missing its 'child'")))?;
    Ok(Box::new(parse_node(child)?))
}

fn node_to_json(node: &BtNode) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("type".to_string(), node.kind().into());
    if !node.name().is_empty() {
        obj.insert("name".to_string(), node.name().into());
    }
    match node {
        BtNode::Action { action, params, .. } => {
            obj.insert("action".to_string(), action.as_str().into());
            insert_params(&mut obj, params);
        }
        BtNode::Condition {
            condition, params, ..
        } => {
            obj.insert("condition".to_string(), condition.as_str().into());
            insert_params(&mut obj, params);
        }
        BtNode::Sequence { children, .. } | BtNode::Selector { children, .. } => {
            insert_children(&mut obj, children);
        }
        BtNode::Parallel {
            policy, children, ..
        } => {
            if *policy != ParallelPolicy::SucceedOnOne {
                let policy_name = match policy {
                    ParallelPolicy::SucceedOnOne => "succeed_on_one",
                    ParallelPolicy::SucceedOnAll => "succeed_on_all",
                    ParallelPolicy::FailOnOne => "fail_on_one",
                    ParallelPolicy::FailOnAll => "fail_on_all",
                };
                obj.insert("policy".to_string(), policy_name.into());
            }
            insert_children(&mut obj, children);
        }
        BtNode::Inverter { child, .. }
        | BtNode::UntilFail { child, .. }
        | BtNode::UntilSuccess { child, .. } => {
            obj.insert("child".to_string(), node_to_json(child));
        }
        BtNode::Repeater {
            repeat_count,
            child,
            ..
        } => {
            if *repeat_count >= 0 {
                obj.insert("repeat_count".to_string(), (*repeat_count).into());
            }
            obj.insert("child".to_string(), node_to_json(child));
        }
    }
    serde_json::Value::Object(obj)
}

fn insert_params(obj: &mut serde_json::Map<String, serde_json::Value>, params: &Value) {
    let json = serde_json::Value::from(params);
    if json.as_object().map(|m| !m.is_empty()).unwrap_or(true) {
        obj.insert("params".to_string(), json);
    }
}

fn insert_children(obj: &mut serde_json::Map<String, serde_json::Value>, children: &[BtNode]) {
    obj.insert(
        "children".to_string(),
        serde_json::Value::Array(children.iter().map(node_to_json).collect()),
    );
}
