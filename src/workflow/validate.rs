//! Create-time validation of workflow definitions
//!
//! Rejects definitions the engine cannot run: no (or multiple) start nodes,
//! dangling edge endpoints, unparseable node configs, and cycles. The only
//! cycle the engine understands is the explicit self-edge on a
//! `wait_for_reply` node, which models suspension re-entry.

use super::spec::NodeSpec;
use super::WorkflowDefinition;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("workflow must have exactly one start node, found {0}")]
    StartNodeCount(usize),
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
    #[error("edge references missing node: {edge_source} -> {target}")]
    DanglingEdge { edge_source: String, target: String },
    #[error("node {node_id}: {source}")]
    BadNode {
        node_id: String,
        #[source]
        source: super::spec::SpecError,
    },
    #[error("self-loop on non-wait node: {0}")]
    IllegalSelfLoop(String),
    #[error("workflow graph contains a cycle through node {0}")]
    Cycle(String),
    #[error("unknown trigger type: {0}")]
    UnknownTriggerKind(String),
}

/// Validate a definition, returning the parsed spec per node id.
pub fn validate_definition(
    def: &WorkflowDefinition,
) -> Result<HashMap<String, NodeSpec>, ValidationError> {
    if super::TriggerKind::parse(&def.trigger_type).is_none() {
        return Err(ValidationError::UnknownTriggerKind(def.trigger_type.clone()));
    }

    let mut specs = HashMap::new();
    let mut start_count = 0;
    for node in &def.nodes {
        let spec = NodeSpec::parse(&node.kind, &node.config).map_err(|source| {
            ValidationError::BadNode {
                node_id: node.id.clone(),
                source,
            }
        })?;
        if matches!(spec, NodeSpec::Start) {
            start_count += 1;
        }
        if specs.insert(node.id.clone(), spec).is_some() {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }
    if start_count != 1 {
        return Err(ValidationError::StartNodeCount(start_count));
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &def.edges {
        if !specs.contains_key(&edge.source) || !specs.contains_key(&edge.target) {
            return Err(ValidationError::DanglingEdge {
                edge_source: edge.source.clone(),
                target: edge.target.clone(),
            });
        }
        if edge.source == edge.target {
            // Suspension re-entry is the one legal self-edge
            if !matches!(specs[&edge.source], NodeSpec::WaitForReply) {
                return Err(ValidationError::IllegalSelfLoop(edge.source.clone()));
            }
            continue;
        }
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    detect_cycle(&specs, &adjacency)?;
    Ok(specs)
}

fn detect_cycle(
    specs: &HashMap<String, NodeSpec>,
    adjacency: &HashMap<&str, Vec<&str>>,
) -> Result<(), ValidationError> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Result<(), ValidationError> {
        if on_stack.contains(node) {
            return Err(ValidationError::Cycle(node.to_string()));
        }
        if !visited.insert(node) {
            return Ok(());
        }
        on_stack.insert(node);
        if let Some(next) = adjacency.get(node) {
            for &target in next {
                visit(target, adjacency, visited, on_stack)?;
            }
        }
        on_stack.remove(node);
        Ok(())
    }

    for id in specs.keys() {
        visit(id.as_str(), adjacency, &mut visited, &mut on_stack)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{EdgeDefinition, NodeDefinition};
    use serde_json::json;

    fn node(id: &str, kind: &str) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            kind: kind.to_string(),
            label: None,
            config: json!({}),
            position: None,
        }
    }

    fn cond_node(id: &str) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            kind: "condition".to_string(),
            label: None,
            config: json!({ "variable": "x" }),
            position: None,
        }
    }

    fn edge(source: &str, target: &str) -> EdgeDefinition {
        EdgeDefinition {
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
        }
    }

    fn def(nodes: Vec<NodeDefinition>, edges: Vec<EdgeDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "wf".to_string(),
            trigger_type: "keyword".to_string(),
            trigger_config: json!({ "keyword": "hi" }),
            description: None,
            nodes,
            edges,
        }
    }

    #[test]
    fn test_accepts_linear_workflow() {
        let d = def(
            vec![node("a", "start"), node("b", "action"), node("c", "end")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        let specs = validate_definition(&d).unwrap();
        assert_eq!(specs.len(), 3);
    }

    #[test]
    fn test_rejects_missing_start() {
        let d = def(vec![node("a", "action")], vec![]);
        assert!(matches!(
            validate_definition(&d),
            Err(ValidationError::StartNodeCount(0))
        ));
    }

    #[test]
    fn test_rejects_two_starts() {
        let d = def(vec![node("a", "start"), node("b", "start")], vec![]);
        assert!(matches!(
            validate_definition(&d),
            Err(ValidationError::StartNodeCount(2))
        ));
    }

    #[test]
    fn test_rejects_dangling_edge() {
        let d = def(vec![node("a", "start")], vec![edge("a", "ghost")]);
        assert!(matches!(
            validate_definition(&d),
            Err(ValidationError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_node_kind() {
        let d = def(vec![node("a", "start"), node("b", "quantum")], vec![]);
        assert!(matches!(
            validate_definition(&d),
            Err(ValidationError::BadNode { .. })
        ));
    }

    #[test]
    fn test_allows_wait_self_loop_only() {
        let ok = def(
            vec![node("a", "start"), node("w", "wait_for_reply")],
            vec![edge("a", "w"), edge("w", "w")],
        );
        assert!(validate_definition(&ok).is_ok());

        let bad = def(
            vec![node("a", "start"), node("b", "action")],
            vec![edge("a", "b"), edge("b", "b")],
        );
        assert!(matches!(
            validate_definition(&bad),
            Err(ValidationError::IllegalSelfLoop(_))
        ));
    }

    #[test]
    fn test_rejects_cycle() {
        let d = def(
            vec![node("a", "start"), cond_node("b"), node("c", "action")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "b")],
        );
        assert!(matches!(
            validate_definition(&d),
            Err(ValidationError::Cycle(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_trigger() {
        let mut d = def(vec![node("a", "start")], vec![]);
        d.trigger_type = "cosmic".to_string();
        assert!(matches!(
            validate_definition(&d),
            Err(ValidationError::UnknownTriggerKind(_))
        ));
    }
}
