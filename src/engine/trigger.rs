//! Trigger matching
//!
//! Decides which authored workflows an inbound event can start. The event
//! kind narrows the candidate trigger kinds; the trigger config's predicate
//! keys are AND-composed, and an absent config matches everything.

use serde_json::Value;

/// Trigger kinds compatible with an event kind.
pub fn compatible_kinds(event_kind: &str) -> &'static [&'static str] {
    match event_kind {
        "message_created" => &["keyword", "intent"],
        "lead_status_update" => &["lead_event"],
        _ => &[],
    }
}

/// Evaluate a trigger config against event data.
pub fn matches(config: &Value, data: &Value) -> bool {
    let Some(config) = config.as_object() else {
        return true;
    };
    if config.is_empty() {
        return true;
    }

    if let Some(keyword) = config.get("keyword").and_then(Value::as_str) {
        let message = data
            .get("message")
            .or_else(|| data.get("message_body"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if !message.contains(&keyword.to_lowercase()) {
            return false;
        }
    }

    if let Some(intent) = config.get("intent").and_then(Value::as_str) {
        if data.get("intent").and_then(Value::as_str) != Some(intent) {
            return false;
        }
    }

    if let Some(status) = config.get("status").and_then(Value::as_str) {
        let new_status = data
            .get("new_status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !new_status.eq_ignore_ascii_case(status) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compatible_kinds() {
        assert_eq!(compatible_kinds("message_created"), &["keyword", "intent"]);
        assert_eq!(compatible_kinds("lead_status_update"), &["lead_event"]);
        assert!(compatible_kinds("something_else").is_empty());
    }

    #[test]
    fn test_empty_config_matches() {
        assert!(matches(&json!({}), &json!({ "message": "anything" })));
        assert!(matches(&Value::Null, &json!({})));
    }

    #[test]
    fn test_keyword_substring_case_insensitive() {
        let config = json!({ "keyword": "Pricing" });
        assert!(matches(&config, &json!({ "message": "what is PRICING?" })));
        assert!(!matches(&config, &json!({ "message": "hello there" })));
        assert!(!matches(&config, &json!({})));
    }

    #[test]
    fn test_intent_exact_match() {
        let config = json!({ "intent": "booking_request" });
        assert!(matches(&config, &json!({ "intent": "booking_request" })));
        assert!(!matches(&config, &json!({ "intent": "pricing" })));
    }

    #[test]
    fn test_status_match_case_insensitive() {
        let config = json!({ "status": "Qualified" });
        assert!(matches(&config, &json!({ "new_status": "qualified" })));
        assert!(!matches(&config, &json!({ "new_status": "converted" })));
    }

    #[test]
    fn test_predicates_and_composed() {
        let config = json!({ "keyword": "demo", "intent": "booking_request" });
        assert!(matches(
            &config,
            &json!({ "message": "book a demo", "intent": "booking_request" })
        ));
        assert!(!matches(
            &config,
            &json!({ "message": "book a demo", "intent": "pricing" })
        ));
    }
}
