use thiserror::Error;

/// Closed error taxonomy for the orchestrator core. Every variant maps to a
/// specific recovery policy documented alongside the component that raises it.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("query is invalid: {0}")]
    InvalidQuery(String),

    #[error("llm backend unavailable: {0}")]
    LlmUnavailable(String),

    #[error("llm returned malformed output: {0}")]
    MalformedLlmOutput(String),

    #[error("plan validation failed: {0}")]
    PlanValidationError(String),

    #[error("task '{0}' timed out")]
    ExecutorTimeout(String),

    #[error("task '{task}' executor failed: {source}")]
    ExecutorError {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("task '{task}' skipped because dependency '{dependency}' did not complete")]
    DependencyFailure { task: String, dependency: String },

    #[error("dependency cycle detected involving task '{0}'")]
    CycleDetected(String),

    #[error("confidence must be within [0.0, 1.0], got {0}")]
    InvalidConfidence(f64),
}
