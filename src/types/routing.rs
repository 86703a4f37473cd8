use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::task_type::TaskType;

/// A single tool a task type is expected to need. Purely declarative: it
/// names a capability, it does not hold a reference to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolRequirement {
    pub tool_name: String,
    pub tool_type: String,
    pub required: bool,
    pub parameters: HashMap<String, Value>,
}

impl Default for ToolRequirement {
    fn default() -> Self {
        Self {
            tool_name: String::new(),
            tool_type: String::new(),
            required: true,
            parameters: HashMap::new(),
        }
    }
}

impl ToolRequirement {
    pub fn new(tool_name: impl Into<String>, tool_type: impl Into<String>, required: bool) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_type: tool_type.into(),
            required,
            parameters: HashMap::new(),
        }
    }
}

impl fmt::Display for ToolRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let req = if self.required { "required" } else { "optional" };
        write!(f, "{} ({}, {})", self.tool_name, self.tool_type, req)
    }
}

/// The outcome of routing a query: which task type it belongs to, how
/// confident we are, and what it would take to execute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub query: String,
    pub primary_task_type: TaskType,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub tools_needed: Vec<ToolRequirement>,
    #[serde(default)]
    pub multi_intent: bool,
    #[serde(default)]
    pub alternative_task_types: Vec<TaskType>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl RoutingDecision {
    /// Fallible constructor enforcing the confidence invariant. Everything
    /// downstream assumes a `RoutingDecision` is already valid.
    pub fn new(
        query: impl Into<String>,
        primary_task_type: TaskType,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Result<Self, CoreError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::InvalidConfidence(confidence));
        }
        Ok(Self {
            query: query.into(),
            primary_task_type,
            confidence,
            reasoning: reasoning.into(),
            tools_needed: Vec::new(),
            multi_intent: false,
            alternative_task_types: Vec::new(),
            metadata: HashMap::new(),
        })
    }

    pub fn with_tools(mut self, tools: Vec<ToolRequirement>) -> Self {
        self.tools_needed = tools;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RoutingDecision(task={}, confidence={:.2}, tools={})",
            self.primary_task_type,
            self.confidence,
            self.tools_needed.len()
        )
    }
}
