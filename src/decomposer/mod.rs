use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::Config;
use crate::json_extract::extract_json_object;
use crate::llm_client::{LlmClient, Message};
use crate::router::RoutingContext;
use crate::types::{Complexity, SubTask, TaskPlan};

const TOOL_CATALOG: &str = "\
- search: web search and retrieval of fresh information\n\
- code: run code to compute, solve, or transform data\n\
- chat: general conversation, reasoning over already-gathered context\n\
- rag: retrieve from an indexed document/knowledge base\n\
- weather: current weather or forecast for a place\n\
- finance: stock/market data for a ticker\n\
- routing: directions/distance between two places\n\
- vision: describe or reason about an attached image\n\
- ocr: extract text from an attached image";

#[derive(Deserialize)]
struct RawSubTask {
    id: String,
    #[serde(default)]
    description: String,
    tool: String,
    query: String,
    #[serde(default)]
    dependencies: BTreeSet<String>,
    #[serde(default)]
    output_variable: String,
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    goal: String,
    #[serde(default = "default_complexity")]
    complexity: Complexity,
    subtasks: Vec<RawSubTask>,
}

fn default_complexity() -> Complexity {
    Complexity::Medium
}

/// Produces a validated `TaskPlan` from an LLM, degrading to a single-task
/// fallback plan whenever the model's output doesn't parse or validate.
/// Infallible at the call boundary by design — a broken decomposition must
/// never halt the pipeline.
pub struct TaskDecomposer {
    client: Arc<dyn LlmClient>,
}

impl TaskDecomposer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    #[tracing::instrument(skip(self, context))]
    pub async fn decompose(
        &self,
        query: &str,
        context: Option<&RoutingContext>,
        config: &Config,
    ) -> TaskPlan {
        let _ = context;
        let prompt = build_prompt(query, config.max_subtasks);
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];

        match self.client.complete(&messages, 0.3, 1500).await {
            Ok(raw) => match parse_plan(query, &raw, config.max_subtasks) {
                Ok(plan) => {
                    tracing::info!(steps = plan.subtasks.len(), "decomposed plan from llm");
                    plan
                }
                Err(reason) => {
                    tracing::warn!(reason, "decomposition failed validation, using fallback plan");
                    fallback_plan(query, config.max_subtasks)
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "llm unavailable for decomposition, using fallback plan");
                fallback_plan(query, config.max_subtasks)
            }
        }
    }

    /// Pure rendering helper for logging/preview. Never parsed back.
    pub fn visualize_plan(plan: &TaskPlan) -> String {
        let mut out = format!("Goal: {}\n", plan.goal);
        for (i, st) in plan.subtasks.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] {} (deps: {:?}, out: {})\n",
                i + 1,
                st.tool,
                st.description,
                st.dependencies,
                st.output_variable_or_id()
            ));
        }
        out
    }
}

const SYSTEM_PROMPT: &str = "\
You decompose a user query into a small DAG of subtasks. Respond with a single JSON object: \
{\"goal\": ..., \"complexity\": \"low\"|\"medium\"|\"high\", \"subtasks\": [{\"id\": ..., \
\"description\": ..., \"tool\": ..., \"query\": ..., \"dependencies\": [...], \
\"output_variable\": ...}]}. Weather/finance/routing subtasks must carry an English-normalized \
entity in their query field (city name, ticker symbol, or \"X to Y\"); other tools may keep the \
query in its original language. Use {{outputVariable}} in a query to reference an upstream \
result. Respond with JSON only.";

fn build_prompt(query: &str, max_subtasks: usize) -> String {
    format!(
        "Available tools:\n{TOOL_CATALOG}\n\nDecompose the following query into at most \
         {max_subtasks} subtasks:\n\n{query}"
    )
}

fn parse_plan(query: &str, raw: &str, max_subtasks: usize) -> Result<TaskPlan, String> {
    let json_str = extract_json_object(raw).ok_or("no json object in response")?;
    let parsed: RawPlan = serde_json::from_str(&json_str).map_err(|e| e.to_string())?;

    let subtasks: Vec<SubTask> = parsed
        .subtasks
        .into_iter()
        .map(|s| SubTask {
            id: s.id,
            description: s.description,
            tool: s.tool,
            query_template: s.query,
            dependencies: s.dependencies,
            output_variable: s.output_variable,
        })
        .collect();

    for st in &subtasks {
        if !is_known_tool(&st.tool) {
            return Err(format!("unknown tool '{}'", st.tool));
        }
    }

    TaskPlan::new(query, parsed.goal, subtasks, parsed.complexity, max_subtasks)
        .map_err(|e| e.to_string())
}

fn is_known_tool(tool: &str) -> bool {
    matches!(
        tool,
        "search" | "code" | "chat" | "rag" | "weather" | "finance" | "routing" | "vision" | "ocr"
    )
}

/// Coarser, last-resort keyword heuristic — intentionally simpler than the
/// full keyword classifier, since it only needs to pick *a* tool, not
/// calibrate a confidence score.
fn fallback_plan(query: &str, max_subtasks: usize) -> TaskPlan {
    let q = query.to_lowercase();
    let tool = if q.contains("weather") || q.contains("天气") {
        "weather"
    } else if q.contains("stock") || q.contains("ticker") || q.contains("股票") {
        "finance"
    } else if q.contains("route") || q.contains("directions") || q.contains("怎么走") {
        "routing"
    } else if q.contains("ocr") || q.contains("extract text") || q.contains("读取文字") {
        "ocr"
    } else if q.contains("image") || q.contains("picture") || q.contains("图片") {
        "vision"
    } else if q.contains("calculate") || q.contains("solve") || q.contains("compute") {
        "code"
    } else if q.contains("document") || q.contains("knowledge base") {
        "rag"
    } else if q.contains("search") || q.contains("what is") || q.contains("who is") {
        "search"
    } else {
        "search"
    };

    let subtask = SubTask {
        id: "task_1".into(),
        description: "fallback single-step plan".into(),
        tool: tool.into(),
        query_template: query.to_string(),
        dependencies: BTreeSet::new(),
        output_variable: "task_1".into(),
    };

    TaskPlan::new(query, "fallback", vec![subtask], Complexity::Low, max_subtasks)
        .expect("a single, self-consistent subtask always validates")
}

#[cfg(test)]
mod tests {
    use super::*;
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

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _m: &[Message], _t: f32, _mt: u32) -> anyhow::Result<String> {
            anyhow::bail!("down")
        }
    }

    #[tokio::test]
    async fn parses_multi_step_plan_with_dependency() {
        let response = r#"{
            "goal": "compare tickers",
            "complexity": "medium",
            "subtasks": [
                {"id": "a", "tool": "finance", "query": "AAPL", "dependencies": []},
                {"id": "b", "tool": "finance", "query": "TSLA", "dependencies": []},
                {"id": "c", "tool": "chat", "query": "compare {{a}} and {{b}}", "dependencies": ["a", "b"]}
            ]
        }"#;
        let decomposer = TaskDecomposer::new(Arc::new(StubClient { response: response.into() }));
        let plan = decomposer.decompose("compare AAPL and TSLA", None, &Config::default()).await;
        assert_eq!(plan.subtasks.len(), 3);
        assert_eq!(plan.subtasks[2].dependencies.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_single_task_on_llm_failure() {
        let decomposer = TaskDecomposer::new(Arc::new(FailingClient));
        let plan = decomposer
            .decompose("what's the weather in Paris", None, &Config::default())
            .await;
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(plan.subtasks[0].tool, "weather");
    }

    #[tokio::test]
    async fn falls_back_on_unknown_tool_name() {
        let response = r#"{"goal":"g","subtasks":[{"id":"a","tool":"teleport","query":"q"}]}"#;
        let decomposer = TaskDecomposer::new(Arc::new(StubClient { response: response.into() }));
        let plan = decomposer.decompose("search for cats", None, &Config::default()).await;
        assert_eq!(plan.goal, "fallback");
    }

    #[test]
    fn oversized_plan_from_decomposer_falls_back() {
        let subtasks: Vec<RawSubTask> = (0..5)
            .map(|i| RawSubTask {
                id: format!("t{i}"),
                description: String::new(),
                tool: "chat".into(),
                query: "q".into(),
                dependencies: BTreeSet::new(),
                output_variable: String::new(),
            })
            .collect();
        let raw = RawPlan {
            goal: "g".into(),
            complexity: Complexity::Low,
            subtasks,
        };
        let json = serde_json::json!({
            "goal": raw.goal,
            "complexity": "low",
            "subtasks": raw.subtasks.iter().map(|s| serde_json::json!({
                "id": s.id, "tool": s.tool, "query": s.query,
            })).collect::<Vec<_>>(),
        });
        let err = parse_plan("q", &json.to_string(), 2).unwrap_err();
        assert!(err.contains("exceeding"));
    }
}
