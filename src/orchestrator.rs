use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::aggregator::ResultAggregator;
use crate::config::Config;
use crate::decomposer::TaskDecomposer;
use crate::engine::{Engine, ProgressFn};
use crate::error::CoreError;
use crate::executor::ExecutorRegistry;
use crate::router::{HybridRouter, RoutingContext};
use crate::types::{AggregationStrategy, ExecutionMode, SourceRecord, Task, Workflow};

/// A caller-supplied file attachment. The core never reads file bytes
/// itself — intake is a hint-producing step only.
pub struct FileHandle {
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileIntakeHint {
    Ocr,
    Vision,
    None,
}

/// Pluggable heuristic deciding whether an attached file looks like an OCR
/// or a vision target. Exposed as a trait because the default heuristic is
/// deliberately thin and callers may have a better signal (real MIME
/// sniffing, a vision-capable router, etc).
pub trait FileIntakePredicate: Send + Sync {
    fn classify(&self, file: &FileHandle, query: &str) -> FileIntakeHint;
}

pub struct DefaultFileIntakePredicate;

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".bmp", ".tiff"];
const OCR_PHRASES: &[&str] = &["extract text", "ocr", "读取文字"];
const VISION_PHRASES: &[&str] = &["what is this image", "describe", "图片"];

impl FileIntakePredicate for DefaultFileIntakePredicate {
    fn classify(&self, file: &FileHandle, query: &str) -> FileIntakeHint {
        let name = file.name.to_lowercase();
        let is_image = IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
            || file.mime_type.starts_with("image/");
        if !is_image {
            return FileIntakeHint::None;
        }

        let q = query.to_lowercase();
        if OCR_PHRASES.iter().any(|p| q.contains(p)) {
            FileIntakeHint::Ocr
        } else if VISION_PHRASES.iter().any(|p| q.contains(p)) {
            FileIntakeHint::Vision
        } else {
            FileIntakeHint::Vision
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorResponse {
    pub answer: String,
    pub tools_used: Vec<String>,
    pub sources: Option<Vec<SourceRecord>>,
    pub details: HashMap<String, Value>,
    pub key_points: Option<Vec<String>>,
    pub confidence: f64,
}

/// Top-level façade wiring router, decomposer, engine, and aggregator into
/// the single entry point callers use.
pub struct Orchestrator {
    router: HybridRouter,
    decomposer: TaskDecomposer,
    registry: ExecutorRegistry,
    aggregator: ResultAggregator,
    file_intake: Box<dyn FileIntakePredicate>,
    config: Config,
}

impl Orchestrator {
    pub fn new(
        router: HybridRouter,
        decomposer: TaskDecomposer,
        registry: ExecutorRegistry,
        aggregator: ResultAggregator,
        config: Config,
    ) -> Self {
        Self {
            router,
            decomposer,
            registry,
            aggregator,
            file_intake: Box::new(DefaultFileIntakePredicate),
            config,
        }
    }

    pub fn with_file_intake(mut self, predicate: Box<dyn FileIntakePredicate>) -> Self {
        self.file_intake = predicate;
        self
    }

    #[tracing::instrument(skip(self, file, on_progress))]
    pub async fn process(
        &self,
        query: &str,
        file: Option<&FileHandle>,
        on_progress: Option<Arc<ProgressFn>>,
    ) -> Result<OrchestratorResponse, CoreError> {
        crate::config::validate_query(query, self.config.max_query_len)?;

        let mut context = RoutingContext::default();
        if let Some(f) = file {
            let hint = self.file_intake.classify(f, query);
            match hint {
                FileIntakeHint::Ocr => {
                    context.extra.insert("file_hint".into(), Value::String("ocr".into()));
                }
                FileIntakeHint::Vision => {
                    context.extra.insert("file_hint".into(), Value::String("vision".into()));
                }
                FileIntakeHint::None => {}
            }
        }

        // The router's own decision is informational context for logging
        // and metrics; the decomposer is the authority on what actually runs.
        let _ = self.router.route(query, Some(&context)).await?;

        let plan = self.decomposer.decompose(query, Some(&context), &self.config).await;

        let mut tasks = IndexMap::new();
        for st in &plan.subtasks {
            let task = Task::new(
                st.id.clone(),
                resolve_executor_name(&st.tool),
                st.query_template.clone(),
                st.dependencies.clone(),
                st.output_variable_or_id().to_string(),
                self.config.default_retry_count,
                self.config.default_task_timeout,
            );
            tasks.insert(st.id.clone(), task);
        }
        let workflow = Workflow::new(tasks, ExecutionMode::Dag);

        let engine = Engine::new(self.registry.clone(), self.config.clone());
        let workflow_result = engine.execute(workflow, on_progress).await?;

        let tools_used: Vec<String> = plan
            .subtasks
            .iter()
            .filter(|st| workflow_result.results.contains_key(&st.id))
            .map(|st| st.tool.clone())
            .collect();

        let sources: Vec<SourceRecord> = plan
            .subtasks
            .iter()
            .filter_map(|st| {
                workflow_result.results.get(&st.id).map(|value| {
                    SourceRecord::new(st.id.clone(), crate::engine::template::stringify(value))
                })
            })
            .collect();

        let aggregated = self
            .aggregator
            .aggregate(sources.clone(), Some(query), AggregationStrategy::Synthesis)
            .await;

        let details: HashMap<String, Value> = plan
            .subtasks
            .iter()
            .filter_map(|st| {
                workflow_result
                    .results
                    .get(&st.id)
                    .map(|v| (st.output_variable_or_id().to_string(), v.clone()))
            })
            .collect();

        let answer = if workflow_result.completed_count == 0 {
            format!(
                "All {} steps failed; no result could be produced.",
                workflow_result.task_count
            )
        } else {
            aggregated.summary.clone()
        };

        Ok(OrchestratorResponse {
            answer,
            tools_used,
            sources: if sources.is_empty() { None } else { Some(aggregated.sources) },
            details,
            key_points: if aggregated.key_points.is_empty() {
                None
            } else {
                Some(aggregated.key_points)
            },
            confidence: if workflow_result.completed_count == 0 {
                0.0
            } else {
                aggregated.confidence
            },
        })
    }
}

fn resolve_executor_name(tool: &str) -> String {
    match tool {
        "search" => "search",
        "code" => "code_executor",
        "chat" => "chat",
        "rag" => "rag",
        "weather" => "weather_api",
        "finance" => "stock_api",
        "routing" => "routing_api",
        "ocr" => "ocr",
        "vision" => "vision",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CapabilityExecutor;
    use crate::llm_client::{LlmClient, Message};
    use crate::router::LlmClassifier;
    use async_trait::async_trait;

    struct StubClient {
        response: String,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _m: &[Message], _t: f32, _mt: u32) -> anyhow::Result<String> {
            Ok(self.response.clone())
        }
    }

    struct EchoExecutor;
    #[async_trait]
    impl CapabilityExecutor for EchoExecutor {
        async fn execute(&self, query: &str, _ctx: &HashMap<String, Value>) -> anyhow::Result<Value> {
            Ok(Value::String(query.to_string()))
        }
    }

    fn build_orchestrator(decompose_response: &str) -> Orchestrator {
        let config = Config::default();
        let router_llm = LlmClassifier::new(Arc::new(StubClient {
            response: "{\"task_type\": \"weather\", \"confidence\": 0.9, \"reasoning\": \"r\"}".into(),
        }));
        let router = HybridRouter::new(router_llm, config.clone());
        let decomposer = TaskDecomposer::new(Arc::new(StubClient {
            response: decompose_response.to_string(),
        }));
        let registry = ExecutorRegistry::builder()
            .register("weather_api", Arc::new(EchoExecutor))
            .register("chat", Arc::new(EchoExecutor))
            .build();
        let aggregator = ResultAggregator::new(None, config.dedup_similarity_threshold);
        Orchestrator::new(router, decomposer, registry, aggregator, config)
    }

    #[tokio::test]
    async fn end_to_end_single_step_plan_produces_an_answer() {
        let plan = r#"{"goal":"g","subtasks":[{"id":"t1","tool":"weather","query":"Beijing"}]}"#;
        let orchestrator = build_orchestrator(plan);
        let response = orchestrator.process("What's the weather in Beijing?", None, None).await.unwrap();
        assert_eq!(response.tools_used, vec!["weather"]);
        assert!(response.confidence > 0.0);
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_any_work() {
        let orchestrator = build_orchestrator("{}");
        assert!(orchestrator.process("", None, None).await.is_err());
    }
}
