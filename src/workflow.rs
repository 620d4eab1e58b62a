//! Workflow schema: typed node specs and create-time validation

mod spec;
mod validate;

pub use spec::{
    ActionConfig, BookingConfig, ConditionConfig, DelayConfig, ExtractConfig, FieldDef,
    HttpConfig, InferenceConfig, LeadCaptureConfig, NodeSpec, Operator, SpecError,
};
pub use validate::{validate_definition, ValidationError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a workflow is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Keyword,
    Intent,
    LeadEvent,
    Manual,
}

impl TriggerKind {
    #[allow(dead_code)] // API completeness
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Keyword => "keyword",
            TriggerKind::Intent => "intent",
            TriggerKind::LeadEvent => "lead_event",
            TriggerKind::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keyword" => Some(TriggerKind::Keyword),
            "intent" => Some(TriggerKind::Intent),
            "lead_event" => Some(TriggerKind::LeadEvent),
            "manual" => Some(TriggerKind::Manual),
            _ => None,
        }
    }
}

/// A node as submitted by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub config: Value,
    /// UI placement, stored opaquely for graph restoration
    #[serde(default)]
    pub position: Option<Value>,
}

/// An edge as submitted by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    /// Guard matched against the source's `condition_eval` output
    #[serde(default)]
    pub condition: Option<String>,
}

/// Full workflow definition as submitted by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}
