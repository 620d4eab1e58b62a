//! Schema-constrained JSON extraction
//!
//! Wraps the gateway to pull typed fields out of free-form chat text.
//! Parse failures are a typed soft error, never an exception: a workflow
//! condition downstream decides what an empty extraction means.

use super::gateway::{GenerateRequest, LlmGateway};
use crate::workflow::FieldDef;
use serde_json::{Map, Value};
use std::fmt::Write;

/// Soft extraction failure, reported as a context field.
pub const PARSE_FAILURE: &str = "failed_to_parse_json";

/// Extract the given fields from a text blob.
///
/// Returns the extracted mapping (`name -> value|null`); an unparseable
/// provider reply is the soft `ExtractionFailure`, never a panic.
pub async fn extract_fields(
    gateway: &LlmGateway,
    tenant_id: &str,
    fields: &[FieldDef],
    text: &str,
) -> Result<Map<String, Value>, ExtractionFailure> {
    let system_instruction = build_extraction_prompt(fields);
    let reply = gateway
        .generate(
            GenerateRequest::new(tenant_id, text).with_system(system_instruction),
        )
        .await;

    parse_extraction(&reply).ok_or_else(|| {
        tracing::error!(reply = %reply, "Failed to parse extraction JSON");
        ExtractionFailure
    })
}

/// Marker for an unparseable extraction reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionFailure;

/// Build the strict extraction system prompt from the field schema.
pub fn build_extraction_prompt(fields: &[FieldDef]) -> String {
    let mut fields_str = String::new();
    for f in fields {
        let description = f
            .description
            .clone()
            .unwrap_or_else(|| format!("The {}", f.name));
        let _ = writeln!(
            fields_str,
            "- {}: {} (Type: {})",
            f.name, description, f.field_type
        );
    }

    format!(
        r#"You are an elite Data Extraction Specialist.
Your task is to extract specific attributes from the provided chat snippet and return a RAW JSON object.

FIELDS TO EXTRACT:
{fields_str}
CRITICAL RULES:
1. Return ONLY valid JSON.
2. No markdown blocks. No conversational text.
3. If you can't find a value, set it to null.
4. Be precise. If the user says 'I am from Apple', company is 'Apple'.
5. For numbers (budget, etc.), return only the numeric value (no $ or commas).

EXAMPLE RESPONSE:
{{ "company": "Tesla", "budget": 50000 }}"#
    )
}

/// Parse a model reply into the extracted mapping: strip Markdown fences,
/// parse, and coerce numeric-looking strings to numbers.
pub fn parse_extraction(reply: &str) -> Option<Map<String, Value>> {
    let cleaned = reply
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Some(map.into_iter().map(|(k, v)| (k, coerce_number(v))).collect()),
        _ => None,
    }
}

/// "$50,000" → 50000. Leaves anything non-numeric untouched.
fn coerce_number(value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    let stripped: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    // Only coerce when the original was clearly a formatted number
    let looks_numeric = !stripped.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | ',' | '$' | ' ' | '€' | '£'));
    if !looks_numeric {
        return value;
    }
    if let Ok(i) = stripped.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = stripped.parse::<f64>() {
        return serde_json::Number::from_f64(f).map_or(value, Value::Number);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_extraction_plain_json() {
        let map = parse_extraction(r#"{"email": "a@b.c", "budget": 5000}"#).unwrap();
        assert_eq!(map["email"], json!("a@b.c"));
        assert_eq!(map["budget"], json!(5000));
    }

    #[test]
    fn test_parse_extraction_strips_fences() {
        let reply = "```json\n{\"company\": \"Tesla\"}\n```";
        let map = parse_extraction(reply).unwrap();
        assert_eq!(map["company"], json!("Tesla"));
    }

    #[test]
    fn test_parse_extraction_rejects_prose() {
        assert!(parse_extraction("Sure! The email is a@b.c").is_none());
        assert!(parse_extraction("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_numeric_strings_coerced() {
        let map = parse_extraction(r#"{"budget": "$10,000", "note": "call me"}"#).unwrap();
        assert_eq!(map["budget"], json!(10000));
        assert_eq!(map["note"], json!("call me"));
    }

    #[test]
    fn test_decimal_coercion() {
        let map = parse_extraction(r#"{"price": "19.99"}"#).unwrap();
        assert_eq!(map["price"], json!(19.99));
    }

    #[test]
    fn test_extraction_prompt_lists_fields() {
        let fields = vec![
            FieldDef {
                name: "email".to_string(),
                field_type: "email".to_string(),
                description: None,
            },
            FieldDef {
                name: "budget".to_string(),
                field_type: "number".to_string(),
                description: Some("Customer budget".to_string()),
            },
        ];
        let prompt = build_extraction_prompt(&fields);
        assert!(prompt.contains("- email: The email (Type: email)"));
        assert!(prompt.contains("- budget: Customer budget (Type: number)"));
        assert!(prompt.contains("ONLY valid JSON"));
    }
}
