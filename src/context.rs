//! Execution context document and template hydration
//!
//! Every workflow execution carries a JSON document that accumulates node
//! outputs. Variables are addressed with dotted paths (`trigger.message_body`)
//! and `{{ expr }}` placeholders in node configs are rewritten against it.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Identity keys that no node output may clobber.
pub const PROTECTED_KEYS: &[&str] = &["trigger", "tenant_id"];

/// Additionally off-limits to extraction merges, whose key names come from
/// model output rather than workflow authors.
pub const EXTRACTION_RESERVED_KEYS: &[&str] = &[
    "trigger",
    "tenant_id",
    "condition_eval",
    "orchestration_signal",
];

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").unwrap())
}

/// The per-execution variable document.
///
/// Wraps a top-level JSON object. Merges are last-writer-wins at the top
/// level only; nested objects are replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    root: Map<String, Value>,
}

impl Context {
    /// Build the initial context for a new execution.
    pub fn seed(trigger: Value, tenant_id: &str) -> Self {
        let mut root = Map::new();
        root.insert("trigger".to_string(), trigger);
        root.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
        Self { root }
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(root) => Self { root },
            _ => Self::default(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Resolve a variable.
    ///
    /// Order: dotted-path walk from the root; then the bare key at the root;
    /// then the bare key inside `trigger`. Missing paths resolve to `None`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return None;
        }

        let mut current: Option<&Value> = None;
        for (i, part) in key.split('.').enumerate() {
            current = if i == 0 {
                self.root.get(part)
            } else {
                current.and_then(|v| v.get(part))
            };
            if current.is_none() {
                break;
            }
        }
        if let Some(v) = current.filter(|v| !v.is_null()) {
            return Some(v);
        }

        if !key.contains('.') {
            return self
                .root
                .get("trigger")
                .and_then(|t| t.get(key))
                .filter(|v| !v.is_null());
        }
        None
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn tenant_id(&self) -> &str {
        self.root
            .get("tenant_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn trigger(&self) -> Option<&Value> {
        self.root.get("trigger")
    }

    /// Channel-side identifier of the counterpart: WhatsApp `from_number`
    /// if present in the trigger, otherwise the web `user_id`.
    pub fn participant(&self) -> Option<&str> {
        let trigger = self.trigger()?;
        trigger
            .get("from_number")
            .and_then(Value::as_str)
            .or_else(|| trigger.get("user_id").and_then(Value::as_str))
    }

    /// Merge a node output into the context, top-level last-writer-wins.
    pub fn merge(&mut self, output: &Map<String, Value>) {
        for (k, v) in output {
            self.root.insert(k.clone(), v.clone());
        }
    }

    /// Merge, skipping the protected identity keys.
    pub fn merge_guarded(&mut self, output: &Map<String, Value>) {
        for (k, v) in output {
            if PROTECTED_KEYS.contains(&k.as_str()) {
                continue;
            }
            self.root.insert(k.clone(), v.clone());
        }
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.root.insert(key.to_string(), value);
    }

    /// Rewrite `{{ expr }}` placeholders using the resolver.
    ///
    /// Unresolvable placeholders are left intact so partial hydration stays
    /// observable downstream. Pure: no side effects, deterministic for a
    /// given context.
    pub fn hydrate(&self, template: &str) -> String {
        placeholder_re()
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let key = caps[1].trim();
                match self.get(key) {
                    Some(v) => value_to_display(v),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Hydrate every string leaf of a JSON value in place.
    pub fn hydrate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.hydrate(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.hydrate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.hydrate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Render a JSON value the way it should appear inside hydrated text.
fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        Context::from_value(json!({
            "trigger": {
                "message_body": "what is pricing?",
                "from_number": "15550001111",
                "intent": "pricing"
            },
            "tenant_id": "t1",
            "ai_output": "Our plans start at $49.",
            "budget": 10000,
            "nested": { "inner": { "leaf": "deep" } }
        }))
    }

    #[test]
    fn test_dotted_path_resolution() {
        let c = ctx();
        assert_eq!(c.get_str("trigger.message_body"), Some("what is pricing?"));
        assert_eq!(c.get_str("nested.inner.leaf"), Some("deep"));
        assert!(c.get("nested.inner.missing").is_none());
    }

    #[test]
    fn test_bare_key_falls_back_to_trigger() {
        let c = ctx();
        // Root key wins
        assert_eq!(c.get_str("ai_output"), Some("Our plans start at $49."));
        // Not at root, found inside trigger
        assert_eq!(c.get_str("from_number"), Some("15550001111"));
        assert_eq!(c.get_str("intent"), Some("pricing"));
        assert!(c.get("no_such_key").is_none());
    }

    #[test]
    fn test_participant_prefers_from_number() {
        let c = ctx();
        assert_eq!(c.participant(), Some("15550001111"));

        let web = Context::from_value(json!({ "trigger": { "user_id": "visitor-9" } }));
        assert_eq!(web.participant(), Some("visitor-9"));
    }

    #[test]
    fn test_hydrate_replaces_and_preserves_unknown() {
        let c = ctx();
        let out = c.hydrate("Hi, you said {{trigger.message_body}} with budget {{budget}} ({{unknown}})");
        assert_eq!(
            out,
            "Hi, you said what is pricing? with budget 10000 ({{unknown}})"
        );
    }

    #[test]
    fn test_hydrate_value_walks_structures() {
        let c = ctx();
        let v = json!({ "url": "https://x.test/{{tenant_id}}", "n": 3, "list": ["{{budget}}"] });
        let out = c.hydrate_value(&v);
        assert_eq!(out, json!({ "url": "https://x.test/t1", "n": 3, "list": ["10000"] }));
    }

    #[test]
    fn test_merge_overwrites_top_level_only() {
        let mut c = ctx();
        let output = json!({ "ai_output": "updated", "fresh": true });
        c.merge(output.as_object().unwrap());
        assert_eq!(c.get_str("ai_output"), Some("updated"));
        assert_eq!(c.get("fresh"), Some(&json!(true)));
        // Untouched keys survive
        assert_eq!(c.get_str("trigger.message_body"), Some("what is pricing?"));
    }

    #[test]
    fn test_merge_guarded_protects_reserved_keys() {
        let mut c = ctx();
        let output = json!({ "trigger": "clobbered", "email": "a@b.c" });
        c.merge_guarded(output.as_object().unwrap());
        assert_eq!(c.get_str("trigger.message_body"), Some("what is pricing?"));
        assert_eq!(c.get_str("email"), Some("a@b.c"));
    }

    #[test]
    fn test_null_values_resolve_as_missing() {
        let c = Context::from_value(json!({ "a": null, "trigger": { "a": "from-trigger" } }));
        assert_eq!(c.get_str("a"), Some("from-trigger"));
    }
}
