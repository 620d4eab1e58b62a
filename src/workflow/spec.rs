//! Typed node variants
//!
//! Node rows store `(kind, config)` as strings/JSON; `NodeSpec::parse` lifts
//! them into a sum type so unknown kinds and malformed configs are caught at
//! the boundary instead of deep inside the dispatcher.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unknown node type: {0}")]
    UnknownKind(String),
    #[error("invalid config for {kind} node: {source}")]
    InvalidConfig {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// One workflow node, fully typed.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Start,
    Action(ActionConfig),
    AiInference(InferenceConfig),
    AiExtract(ExtractConfig),
    Condition(ConditionConfig),
    WaitForReply,
    TimeDelay(DelayConfig),
    HttpRequest(HttpConfig),
    LeadCapture(LeadCaptureConfig),
    AppointmentBooking(BookingConfig),
    End,
}

impl NodeSpec {
    pub fn parse(kind: &str, config: &Value) -> Result<Self, SpecError> {
        fn typed<T: serde::de::DeserializeOwned>(
            kind: &'static str,
            config: &Value,
        ) -> Result<T, SpecError> {
            let source = if config.is_null() {
                Value::Object(Map::new())
            } else {
                config.clone()
            };
            serde_json::from_value(source).map_err(|source| SpecError::InvalidConfig { kind, source })
        }

        match kind {
            "start" => Ok(NodeSpec::Start),
            "end" => Ok(NodeSpec::End),
            "wait_for_reply" => Ok(NodeSpec::WaitForReply),
            "action" => {
                // action_type defaults to send_message when the author omits it
                let mut config = config.clone();
                if let Some(obj) = config.as_object_mut() {
                    obj.entry("action_type")
                        .or_insert_with(|| Value::String("send_message".to_string()));
                } else if config.is_null() {
                    config = serde_json::json!({ "action_type": "send_message" });
                }
                typed("action", &config).map(NodeSpec::Action)
            }
            "ai_inference" => typed("ai_inference", config).map(NodeSpec::AiInference),
            "ai_extract" => typed("ai_extract", config).map(NodeSpec::AiExtract),
            "condition" => typed("condition", config).map(NodeSpec::Condition),
            "time_delay" => typed("time_delay", config).map(NodeSpec::TimeDelay),
            "http_request" => typed("http_request", config).map(NodeSpec::HttpRequest),
            "lead_capture" => typed("lead_capture", config).map(NodeSpec::LeadCapture),
            "appointment_booking" => {
                typed("appointment_booking", config).map(NodeSpec::AppointmentBooking)
            }
            other => Err(SpecError::UnknownKind(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeSpec::Start => "start",
            NodeSpec::Action(_) => "action",
            NodeSpec::AiInference(_) => "ai_inference",
            NodeSpec::AiExtract(_) => "ai_extract",
            NodeSpec::Condition(_) => "condition",
            NodeSpec::WaitForReply => "wait_for_reply",
            NodeSpec::TimeDelay(_) => "time_delay",
            NodeSpec::HttpRequest(_) => "http_request",
            NodeSpec::LeadCapture(_) => "lead_capture",
            NodeSpec::AppointmentBooking(_) => "appointment_booking",
            NodeSpec::End => "end",
        }
    }
}

/// Action node: one of the built-in side-effect operations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum ActionConfig {
    SendMessage {
        #[serde(default = "default_template")]
        template: String,
    },
    CreateTicket {
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        priority: Option<String>,
    },
    AssignAgent {
        #[serde(default)]
        agent_id: Option<String>,
    },
}

fn default_template() -> String {
    "Hello from Flowline!".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceConfig {
    /// The workflow-specific goal appended to the tenant persona
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Overrides the user message (defaults to the trigger message body)
    #[serde(default)]
    pub input_text: Option<String>,
    /// Send the model reply to the participant immediately
    #[serde(default = "default_true")]
    pub auto_send: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractConfig {
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// One field of the extraction target schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_field_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionConfig {
    pub variable: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Comparison operators available to condition nodes.
///
/// `GreaterThan` strips non-numeric characters ("$10,000" compares as 10000)
/// and falls back to lexicographic string comparison when neither operand
/// parses. Surprising, but matched to authored workflows in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Exists,
    Equals,
    #[default]
    Contains,
    GreaterThan,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DelayConfig {
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub seconds: i64,
}

// Authors sometimes type the delay as a quoted number; accept both.
fn lenient_seconds<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    let v = Value::deserialize(de)?;
    match v {
        Value::Number(n) => Ok(n.as_i64().unwrap_or(0)),
        Value::String(s) => Ok(s.trim().parse().unwrap_or(0)),
        _ => Ok(0),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeadCaptureConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookingConfig {
    #[serde(default)]
    pub appointment_type_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let err = NodeSpec::parse("teleport", &json!({})).unwrap_err();
        assert!(matches!(err, SpecError::UnknownKind(k) if k == "teleport"));
    }

    #[test]
    fn test_action_defaults_to_send_message() {
        let spec = NodeSpec::parse("action", &json!({ "template": "Hi {{name}}" })).unwrap();
        match spec {
            NodeSpec::Action(ActionConfig::SendMessage { template }) => {
                assert_eq!(template, "Hi {{name}}");
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_action_null_config_parses() {
        let spec = NodeSpec::parse("action", &Value::Null).unwrap();
        assert!(matches!(spec, NodeSpec::Action(ActionConfig::SendMessage { .. })));
    }

    #[test]
    fn test_condition_operator_default_is_contains() {
        let spec = NodeSpec::parse("condition", &json!({ "variable": "x" })).unwrap();
        match spec {
            NodeSpec::Condition(c) => assert_eq!(c.operator, Operator::Contains),
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_delay_accepts_string_seconds() {
        let spec = NodeSpec::parse("time_delay", &json!({ "seconds": "120" })).unwrap();
        match spec {
            NodeSpec::TimeDelay(d) => assert_eq!(d.seconds, 120),
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_inference_auto_send_defaults_true() {
        let spec = NodeSpec::parse("ai_inference", &json!({})).unwrap();
        match spec {
            NodeSpec::AiInference(c) => assert!(c.auto_send),
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_extract_field_type_default() {
        let spec =
            NodeSpec::parse("ai_extract", &json!({ "fields": [{ "name": "email" }] })).unwrap();
        match spec {
            NodeSpec::AiExtract(c) => {
                assert_eq!(c.fields[0].field_type, "string");
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }
}
