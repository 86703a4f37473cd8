use std::collections::HashMap;
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::Value;
use similar::TextDiff;

use crate::json_extract::extract_json_object;
use crate::llm_client::{LlmClient, Message};
use crate::types::{AggregatedResult, AggregationStrategy, SourceRecord};

#[derive(Deserialize)]
struct RawSynthesis {
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

/// Deduplicates and combines per-task results into one presentable answer.
pub struct ResultAggregator {
    client: Option<Arc<dyn LlmClient>>,
    dedup_threshold: f64,
}

impl ResultAggregator {
    pub fn new(client: Option<Arc<dyn LlmClient>>, dedup_threshold: f64) -> Self {
        Self {
            client,
            dedup_threshold,
        }
    }

    #[tracing::instrument(skip(self, results))]
    pub async fn aggregate(
        &self,
        results: Vec<SourceRecord>,
        query: Option<&str>,
        strategy: AggregationStrategy,
    ) -> AggregatedResult {
        if results.is_empty() {
            return AggregatedResult {
                summary: "No results to aggregate".to_string(),
                sources: vec![],
                key_points: vec![],
                confidence: 0.0,
                metadata: HashMap::new(),
            };
        }

        let deduped = self.deduplicate(results);

        let effective_strategy = if strategy == AggregationStrategy::Synthesis && self.client.is_none() {
            AggregationStrategy::Concatenate
        } else {
            strategy
        };

        match effective_strategy {
            AggregationStrategy::Synthesis => self.synthesize(deduped, query).await,
            AggregationStrategy::Concatenate => concatenate(deduped),
            AggregationStrategy::Ranking => rank(deduped),
        }
    }

    /// Exact-duplicate short-circuit via MD5, then a pairwise LCS-ratio-style
    /// near-duplicate pass against every previously kept result.
    pub fn deduplicate(&self, results: Vec<SourceRecord>) -> Vec<SourceRecord> {
        let mut kept: Vec<SourceRecord> = Vec::new();
        let mut seen_hashes: std::collections::HashSet<String> = std::collections::HashSet::new();

        for record in results {
            let hash = content_hash(&record.content);
            if !seen_hashes.insert(hash) {
                continue;
            }

            let is_near_duplicate = kept.iter().any(|existing| {
                TextDiff::from_chars(existing.content.as_str(), record.content.as_str()).ratio() as f64
                    >= self.dedup_threshold
            });
            if is_near_duplicate {
                continue;
            }

            kept.push(record);
        }
        kept
    }

    async fn synthesize(&self, sources: Vec<SourceRecord>, query: Option<&str>) -> AggregatedResult {
        let client = self.client.as_ref().expect("checked by caller");
        let listing = sources
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. [{}] {}", i + 1, s.source, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "Query: {}\n\nSources:\n{listing}\n\nWrite a unified summary, 3-5 key points, and a \
             self-assessed confidence. Respond with a single JSON object: {{\"summary\": ..., \
             \"key_points\": [...], \"confidence\": 0..1}}.",
            query.unwrap_or("(none)")
        );
        let messages = vec![Message::user(prompt)];

        match client.complete(&messages, 0.3, 800).await {
            Ok(raw) => match extract_json_object(&raw).and_then(|s| serde_json::from_str::<RawSynthesis>(&s).ok()) {
                Some(parsed) => AggregatedResult {
                    summary: parsed.summary,
                    sources,
                    key_points: parsed.key_points,
                    confidence: parsed.confidence.clamp(0.0, 1.0),
                    metadata: [("strategy".to_string(), Value::String("synthesis".into()))].into(),
                },
                None => {
                    tracing::warn!("synthesis response unparseable, falling back to concatenate");
                    concatenate(sources)
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "llm unavailable for synthesis, falling back to concatenate");
                concatenate(sources)
            }
        }
    }

    /// `0.4 * min(count/5, 1) + 0.6 * mean(credibility)`, clamped to 1.0.
    pub fn compute_aggregate_confidence(results: &[SourceRecord]) -> f64 {
        if results.is_empty() {
            return 0.0;
        }
        let count_term = (results.len() as f64 / 5.0).min(1.0);
        let mean_credibility: f64 =
            results.iter().map(|r| r.credibility).sum::<f64>() / results.len() as f64;
        (0.4 * count_term + 0.6 * mean_credibility).min(1.0)
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn concatenate(sources: Vec<SourceRecord>) -> AggregatedResult {
    let summary = sources
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    let key_points = sources
        .iter()
        .filter_map(|s| s.extra.get("title").and_then(|t| t.as_str()).map(str::to_string))
        .take(5)
        .collect();
    let confidence = ResultAggregator::compute_aggregate_confidence(&sources);

    AggregatedResult {
        summary,
        sources,
        key_points,
        confidence: if confidence == 0.0 { 0.5 } else { confidence },
        metadata: [("strategy".to_string(), Value::String("concatenate".into()))].into(),
    }
}

fn rank(mut sources: Vec<SourceRecord>) -> AggregatedResult {
    sources.sort_by(|a, b| {
        (b.score + b.credibility)
            .partial_cmp(&(a.score + a.credibility))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top: Vec<SourceRecord> = sources.into_iter().take(3).collect();

    let summary = top
        .iter()
        .map(|s| {
            let snippet: String = s.content.chars().take(300).collect();
            let ellipsis = if s.content.chars().count() > 300 { "..." } else { "" };
            format!("[{}] {snippet}{ellipsis}", s.source)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let key_points = top
        .iter()
        .filter_map(|s| s.extra.get("title").and_then(|t| t.as_str()).map(str::to_string))
        .collect();

    AggregatedResult {
        summary,
        sources: top,
        key_points,
        confidence: 0.7,
        metadata: [("strategy".to_string(), Value::String("ranking".into()))].into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn rec(source: &str, content: &str) -> SourceRecord {
        SourceRecord::new(source, content)
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let agg = ResultAggregator::new(None, 0.85);
        let result = agg.aggregate(vec![], None, AggregationStrategy::Concatenate).await;
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.summary, "No results to aggregate");
    }

    #[tokio::test]
    async fn exact_duplicate_is_dropped() {
        let agg = ResultAggregator::new(None, 0.85);
        let input = vec![rec("a", "same text"), rec("b", "same text")];
        let deduped = agg.deduplicate(input);
        assert_eq!(deduped.len(), 1);
    }

    #[tokio::test]
    async fn near_duplicate_above_threshold_is_dropped() {
        let agg = ResultAggregator::new(None, 0.85);
        let input = vec![
            rec("a", "the quick brown fox jumps over the lazy dog"),
            rec("b", "the quick brown fox jumps over the lazy dog!"),
        ];
        let deduped = agg.deduplicate(input);
        assert_eq!(deduped.len(), 1);
    }

    #[tokio::test]
    async fn synthesis_without_client_falls_back_to_concatenate() {
        let agg = ResultAggregator::new(None, 0.85);
        let input = vec![rec("a", "alpha"), rec("b", "beta")];
        let result = agg.aggregate(input, Some("q"), AggregationStrategy::Synthesis).await;
        assert!(result.summary.contains("alpha"));
        assert!(result.summary.contains("beta"));
    }

    #[tokio::test]
    async fn ranking_picks_top_three_by_score_plus_credibility() {
        let agg = ResultAggregator::new(None, 0.85);
        let mut low = rec("low", "low content");
        low.score = 0.1;
        let mut high = rec("high", "high content");
        high.score = 0.9;
        let input = vec![low, high];
        let result = agg.aggregate(input, None, AggregationStrategy::Ranking).await;
        assert!(result.summary.starts_with("[high]"));
        assert_eq!(result.confidence, 0.7);
    }

    struct StubClient {
        response: String,
    }
    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _m: &[Message], _t: f32, _mt: u32) -> anyhow::Result<String> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn synthesis_parses_llm_response() {
        let client: Arc<dyn LlmClient> = Arc::new(StubClient {
            response: "{\"summary\": \"unified\", \"key_points\": [\"p1\"], \"confidence\": 0.8}".into(),
        });
        let agg = ResultAggregator::new(Some(client), 0.85);
        let input = vec![rec("a", "alpha")];
        let result = agg.aggregate(input, Some("q"), AggregationStrategy::Synthesis).await;
        assert_eq!(result.summary, "unified");
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn aggregate_confidence_formula() {
        let sources = vec![rec("a", "x"), rec("b", "y")];
        let c = ResultAggregator::compute_aggregate_confidence(&sources);
        assert!((c - (0.4 * 0.4 + 0.6 * 0.5)).abs() < 1e-9);
    }
}
