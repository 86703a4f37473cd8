use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Language hint used to steer prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

/// Caller-supplied, read-only configuration for every component in the crate.
/// Nothing here is read from the environment by this crate itself; building
/// this value from env/file/flags is the caller's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_parallel_tasks: usize,
    pub default_task_timeout: Duration,
    pub default_retry_count: u32,
    pub retry_base_delay: Duration,
    pub routing_cache_capacity: usize,
    pub routing_confidence_threshold: f64,
    pub max_subtasks: usize,
    pub max_query_len: usize,
    pub dedup_similarity_threshold: f64,
    pub default_language: Language,
    pub sequential_marks_remaining_skipped: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 5,
            default_task_timeout: Duration::from_secs(300),
            default_retry_count: 3,
            retry_base_delay: Duration::from_secs(1),
            routing_cache_capacity: 1000,
            routing_confidence_threshold: 0.7,
            max_subtasks: 10,
            max_query_len: 10_000,
            dedup_similarity_threshold: 0.85,
            default_language: Language::En,
            sequential_marks_remaining_skipped: false,
        }
    }
}

/// Shared validator used by the keyword classifier, the LLM classifier, and
/// the hybrid router so the three never drift apart on what counts as a
/// well-formed query.
pub fn validate_query(query: &str, max_len: usize) -> Result<(), crate::error::CoreError> {
    if query.trim().is_empty() {
        return Err(crate::error::CoreError::InvalidQuery(
            "query cannot be empty".into(),
        ));
    }
    if query.chars().count() > max_len {
        return Err(crate::error::CoreError::InvalidQuery(format!(
            "query is too long (max {max_len} characters)"
        )));
    }
    Ok(())
}
