use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::json_extract::extract_json_object;
use crate::llm_client::{LlmClient, Message};
use crate::types::{RoutingDecision, TaskType, ToolRequirement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    Zh,
}

#[derive(Debug, Default, Clone)]
pub struct RoutingContext {
    pub language: Option<Language>,
    pub extra: HashMap<String, Value>,
}

impl RoutingContext {
    pub fn as_map(&self) -> HashMap<String, Value> {
        let mut map = self.extra.clone();
        if let Some(lang) = self.language {
            map.insert(
                "language".to_string(),
                Value::String(match lang {
                    Language::En => "en".to_string(),
                    Language::Zh => "zh".to_string(),
                }),
            );
        }
        map
    }
}

#[derive(Deserialize)]
struct RawToolRequirement {
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    tool_type: String,
    #[serde(default = "default_true")]
    required: bool,
    #[serde(default)]
    parameters: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct RawDecision {
    task_type: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    tools_needed: Vec<RawToolRequirement>,
    #[serde(default)]
    multi_intent: bool,
    #[serde(default)]
    alternative_tasks: Vec<String>,
}

/// Prompted classifier. Infallible at the type level: any LLM or parse
/// failure degrades to a fallback decision rather than propagating.
pub struct LlmClassifier {
    client: Arc<dyn LlmClient>,
}

impl LlmClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    pub async fn route(
        &self,
        query: &str,
        context: Option<&RoutingContext>,
        config: &Config,
    ) -> RoutingDecision {
        let language = context
            .and_then(|c| c.language)
            .unwrap_or(match config.default_language {
                crate::config::Language::En => Language::En,
                crate::config::Language::Zh => Language::Zh,
            });

        let prompt = build_prompt(query, language);
        let messages = vec![Message::system(system_prompt(language)), Message::user(prompt)];

        match self.client.complete(&messages, 0.2, 500).await {
            Ok(raw) => match parse_response(query, &raw) {
                Ok(decision) => decision.with_metadata("method", "llm"),
                Err(reason) => fallback(query, &reason),
            },
            Err(err) => fallback(query, &err.to_string()),
        }
    }
}

fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::En => {
            "You are a query router. Classify the user's query into exactly one task type \
             from: research, code, chat, rag, weather, finance, routing. Respond with a single \
             JSON object only: {\"task_type\": ..., \"confidence\": 0..1, \"reasoning\": ..., \
             \"tools_needed\": [...], \"multi_intent\": bool, \"alternative_tasks\": [...]}."
        }
        Language::Zh => {
            "你是一个查询路由器。请将用户的查询精确分类为以下任务类型之一：research, code, \
             chat, rag, weather, finance, routing。只返回一个 JSON 对象：{\"task_type\": ..., \
             \"confidence\": 0..1, \"reasoning\": ..., \"tools_needed\": [...], \
             \"multi_intent\": bool, \"alternative_tasks\": [...]}。"
        }
    }
}

fn build_prompt(query: &str, language: Language) -> String {
    match language {
        Language::En => format!("Query: {query}\n\nClassify this query."),
        Language::Zh => format!("查询：{query}\n\n请对此查询进行分类。"),
    }
}

fn parse_response(query: &str, raw: &str) -> Result<RoutingDecision, String> {
    let json_str = extract_json_object(raw).ok_or_else(|| "malformed_response".to_string())?;
    let parsed: RawDecision =
        serde_json::from_str(&json_str).map_err(|_| "malformed_response".to_string())?;

    let task_type = TaskType::from_loose_str(&parsed.task_type);
    let confidence = parsed.confidence.clamp(0.0, 1.0);
    let alternatives: Vec<TaskType> = parsed
        .alternative_tasks
        .iter()
        .map(|s| TaskType::from_loose_str(s))
        .collect();
    let tools: Vec<ToolRequirement> = parsed
        .tools_needed
        .into_iter()
        .map(|t| ToolRequirement {
            tool_name: t.tool_name,
            tool_type: t.tool_type,
            required: t.required,
            parameters: t.parameters,
        })
        .collect();

    let mut decision = RoutingDecision::new(query, task_type, confidence, parsed.reasoning)
        .map_err(|e| e.to_string())?;
    decision.tools_needed = tools;
    decision.multi_intent = parsed.multi_intent;
    decision.alternative_task_types = alternatives;
    Ok(decision)
}

fn fallback(query: &str, reason: &str) -> RoutingDecision {
    RoutingDecision::new(query, TaskType::Chat, 0.3, "llm classification unavailable")
        .expect("0.3 is a valid confidence")
        .with_metadata("method", "llm_fallback")
        .with_metadata("error", reason.to_string())
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
            anyhow::bail!("network error")
        }
    }

    #[tokio::test]
    async fn parses_well_formed_response() {
        let client = Arc::new(StubClient {
            response: "```json\n{\"task_type\": \"weather\", \"confidence\": 0.9, \"reasoning\": \"r\"}\n```".into(),
        });
        let classifier = LlmClassifier::new(client);
        let decision = classifier.route("test", None, &Config::default()).await;
        assert_eq!(decision.primary_task_type, TaskType::Weather);
        assert_eq!(decision.metadata.get("method").unwrap(), "llm");
    }

    #[tokio::test]
    async fn falls_back_on_transport_error() {
        let classifier = LlmClassifier::new(Arc::new(FailingClient));
        let decision = classifier.route("test", None, &Config::default()).await;
        assert_eq!(decision.metadata.get("method").unwrap(), "llm_fallback");
        assert_eq!(decision.primary_task_type, TaskType::Chat);
    }

    #[tokio::test]
    async fn falls_back_on_non_json_response() {
        let client = Arc::new(StubClient {
            response: "I cannot help with that.".into(),
        });
        let classifier = LlmClassifier::new(client);
        let decision = classifier.route("test", None, &Config::default()).await;
        assert_eq!(decision.metadata.get("error").unwrap(), "malformed_response");
    }
}
