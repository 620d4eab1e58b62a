//! DAG navigation
//!
//! Given the edges leaving a just-completed node and its output document,
//! pick the successors to dispatch. Unguarded edges always fire; guarded
//! edges fire iff the guard equals the stringified `condition_eval` output.
//! Multiple successors may fire (parallel branches); their order carries no
//! meaning.

use crate::db::EdgeRow;
use serde_json::{Map, Value};

pub fn select_successors(edges: &[EdgeRow], output: &Map<String, Value>) -> Vec<String> {
    let eval = output.get("condition_eval").map(guard_string);

    edges
        .iter()
        // Self-edges model suspension re-entry, never forward flow
        .filter(|edge| edge.source_id != edge.target_id)
        .filter(|edge| match &edge.guard {
            None => true,
            Some(guard) => eval.as_deref() == Some(guard.as_str()),
        })
        .map(|edge| edge.target_id.clone())
        .collect()
}

fn guard_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge(source: &str, target: &str, guard: Option<&str>) -> EdgeRow {
        EdgeRow {
            id: format!("{source}-{target}"),
            workflow_id: "wf".to_string(),
            source_id: source.to_string(),
            target_id: target.to_string(),
            guard: guard.map(ToString::to_string),
        }
    }

    fn output(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_unguarded_edges_always_taken() {
        let edges = vec![edge("a", "b", None), edge("a", "c", None)];
        let next = select_successors(&edges, &Map::new());
        assert_eq!(next, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_guard_matches_condition_eval() {
        let edges = vec![
            edge("cond", "vip", Some("true")),
            edge("cond", "standard", Some("false")),
        ];
        let next = select_successors(&edges, &output(json!({ "condition_eval": "true" })));
        assert_eq!(next, vec!["vip".to_string()]);

        let next = select_successors(&edges, &output(json!({ "condition_eval": "false" })));
        assert_eq!(next, vec!["standard".to_string()]);
    }

    #[test]
    fn test_guarded_edge_skipped_without_eval() {
        let edges = vec![edge("a", "b", Some("true")), edge("a", "c", None)];
        let next = select_successors(&edges, &Map::new());
        assert_eq!(next, vec!["c".to_string()]);
    }

    #[test]
    fn test_non_string_eval_stringified() {
        let edges = vec![edge("a", "b", Some("7"))];
        let next = select_successors(&edges, &output(json!({ "condition_eval": 7 })));
        assert_eq!(next, vec!["b".to_string()]);
    }

    #[test]
    fn test_self_edge_never_forward() {
        let edges = vec![edge("w", "w", None), edge("w", "next", None)];
        let next = select_successors(&edges, &Map::new());
        assert_eq!(next, vec!["next".to_string()]);
    }
}
