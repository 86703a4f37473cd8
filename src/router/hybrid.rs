use serde_json::Value;

use crate::config::{validate_query, Config};
use crate::error::CoreError;
use crate::router::cache::RoutingCache;
use crate::router::keyword::KeywordClassifier;
use crate::router::llm::{LlmClassifier, RoutingContext};
use crate::types::RoutingDecision;

/// Combines the deterministic keyword classifier with an LLM fallback and a
/// result cache. Keyword classification always runs first within a single
/// call; the LLM is only consulted when confidence is below threshold.
pub struct HybridRouter {
    keyword: KeywordClassifier,
    llm: LlmClassifier,
    cache: RoutingCache,
    config: Config,
}

impl HybridRouter {
    pub fn new(llm: LlmClassifier, config: Config) -> Self {
        let cache = RoutingCache::new(config.routing_cache_capacity);
        Self {
            keyword: KeywordClassifier::new(),
            llm,
            cache,
            config,
        }
    }

    #[tracing::instrument(skip(self, context))]
    pub async fn route(
        &self,
        query: &str,
        context: Option<&RoutingContext>,
    ) -> Result<RoutingDecision, CoreError> {
        validate_query(query, self.config.max_query_len)?;

        let ctx_map = context.map(|c| c.as_map());
        let cache_key = RoutingCache::key_for(query, ctx_map.as_ref());
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }

        let keyword_decision = self.keyword.classify(query, &self.config)?;

        let decision = if keyword_decision.confidence >= self.config.routing_confidence_threshold {
            let mut d = keyword_decision.clone();
            d.metadata.insert("method".into(), Value::String("hybrid_keyword".into()));
            d
        } else {
            let llm_decision = self.llm.route(query, context, &self.config).await;
            if llm_decision.metadata.get("method").and_then(|v| v.as_str()) == Some("llm_fallback") {
                tracing::warn!("llm classification degraded, preferring keyword guess");
                let mut d = keyword_decision.clone();
                d.metadata.insert(
                    "method".into(),
                    Value::String("hybrid_keyword_fallback".into()),
                );
                if let Some(err) = llm_decision.metadata.get("error") {
                    d.metadata.insert("llm_error".into(), err.clone());
                }
                d
            } else {
                let mut d = llm_decision;
                d.metadata.insert("method".into(), Value::String("hybrid_llm".into()));
                d
            }
        };

        let mut decision = decision;
        decision.metadata.insert(
            "keyword_confidence".into(),
            Value::from(keyword_decision.confidence),
        );
        decision.metadata.insert(
            "keyword_task".into(),
            Value::String(keyword_decision.primary_task_type.to_string()),
        );

        self.cache.insert(cache_key, decision.clone());
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{LlmClient, Message};
    use crate::types::TaskType;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubClient;

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _m: &[Message], _t: f32, _mt: u32) -> anyhow::Result<String> {
            Ok("{\"task_type\": \"research\", \"confidence\": 0.95, \"reasoning\": \"r\"}".into())
        }
    }

    fn router() -> HybridRouter {
        HybridRouter::new(LlmClassifier::new(Arc::new(StubClient)), Config::default())
    }

    #[tokio::test]
    async fn high_confidence_keyword_skips_llm() {
        let decision = router()
            .route("What's the weather in Beijing?", None)
            .await
            .unwrap();
        assert_eq!(decision.metadata.get("method").unwrap(), "hybrid_keyword");
        assert_eq!(decision.primary_task_type, TaskType::Weather);
    }

    #[tokio::test]
    async fn low_confidence_keyword_escalates_to_llm() {
        let decision = router().route("hello there", None).await.unwrap();
        assert_eq!(decision.metadata.get("method").unwrap(), "hybrid_llm");
        assert_eq!(decision.primary_task_type, TaskType::Research);
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let r = router();
        let first = r.route("hello there", None).await.unwrap();
        let second = r.route("hello there", None).await.unwrap();
        assert_eq!(first.primary_task_type, second.primary_task_type);
        assert_eq!(second.metadata.get("cached"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn empty_query_rejected_before_any_classification() {
        assert!(router().route("", None).await.is_err());
    }
}
