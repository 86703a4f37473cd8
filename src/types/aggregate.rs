use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    Synthesis,
    Concatenate,
    Ranking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRecord {
    pub source: String,
    pub content: String,
    pub score: f64,
    pub credibility: f64,
    pub extra: HashMap<String, Value>,
}

impl Default for SourceRecord {
    fn default() -> Self {
        Self {
            source: String::new(),
            content: String::new(),
            score: 0.0,
            credibility: 0.5,
            extra: HashMap::new(),
        }
    }
}

impl SourceRecord {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub summary: String,
    pub sources: Vec<SourceRecord>,
    pub key_points: Vec<String>,
    pub confidence: f64,
    pub metadata: HashMap<String, Value>,
}
