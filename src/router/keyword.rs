use once_cell_like::Lazy;
use regex::Regex;

use crate::config::{validate_query, Config};
use crate::error::CoreError;
use crate::types::{RoutingDecision, TaskType, ToolRequirement};

mod once_cell_like {
    use std::sync::OnceLock;

    /// Tiny lazy-once wrapper so this module doesn't need the `once_cell`
    /// crate just for a handful of compiled regexes.
    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self {
                cell: OnceLock::new(),
                init,
            }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

const WEATHER_KEYWORDS: &[&str] = &[
    "weather", "temperature", "forecast", "rain", "snow", "sunny", "cloudy", "humidity", "wind",
    "天气", "气温", "预报", "下雨", "下雪",
];

const FINANCE_KEYWORDS: &[&str] = &[
    "stock", "stocks", "share price", "market cap", "ticker", "nasdaq", "dow jones", "股票",
    "股价", "行情", "涨停", "跌停",
];

const ROUTING_KEYWORDS: &[&str] = &[
    "route", "directions", "navigate", "distance between", "how far", "路线", "导航", "怎么走",
    "怎么去",
];
const ROUTING_DIRECTION_WORDS: &[&str] = &["from", "to", "从", "到", "去"];

const CODE_KEYWORDS: &[&str] = &[
    "calculate", "solve", "plot", "compute", "draw", "algorithm", "function", "program", "代码",
    "编程", "计算", "求解", "画", "函数",
];

const RESEARCH_KEYWORDS: &[&str] = &[
    "search", "find", "what is", "who is", "when was", "where is", "explain", "tell me about",
    "information about", "是什么", "什么是", "查询", "搜索", "查找", "了解",
];

const REALTIME_MARKERS: &[&str] = &[
    "now", "current", "today", "present", "real-time", "live", "现在", "目前", "当下", "实时",
    "今天",
];

const TIME_DISTANCE_UNITS: &[&str] = &[
    "hour", "hours", "day", "days", "minute", "minutes", "second", "seconds", "week", "weeks",
    "km", "mile", "miles", "kg", "pound", "小时", "天", "分钟", "周", "公里",
];

const CALC_INDICATORS: &[&str] = &[
    "how many", "how much", "多少", "几个", "convert", "百分比", "%",
];

static MATH_OPERATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[+\-*/^]").unwrap());
static MATH_RELATIONAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[=<>]").unwrap());
static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+").unwrap());
static MATH_SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x{2211}\x{222B}\x{2202}\x{221A}\x{03C0}\x{221E}]").unwrap());
static MATH_FN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(sin|cos|tan|log|sqrt|exp)\s*\(").unwrap());
static UNIT_CONVERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(hours? in a|days? in a|minutes? in an|小时在|天在)").unwrap()
});

fn lower(s: &str) -> String {
    s.chars().flat_map(|c| c.to_lowercase()).collect()
}

fn count_matches(haystack: &str, needles: &[&str]) -> usize {
    needles.iter().filter(|n| haystack.contains(*n)).count()
}

fn any_match(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(*n))
}

fn tools_for(task_type: TaskType) -> Vec<ToolRequirement> {
    match task_type {
        TaskType::Research => vec![
            ToolRequirement::new("search_tool", "search", true),
            ToolRequirement::new("scraper_tool", "web_scraper", true),
        ],
        TaskType::Code => vec![ToolRequirement::new("code_executor", "code_execution", true)],
        TaskType::Weather => vec![ToolRequirement::new("weather_tool", "weather_api", true)],
        TaskType::Finance => vec![ToolRequirement::new("finance_tool", "finance_api", true)],
        TaskType::Routing => vec![ToolRequirement::new("routing_tool", "routing_api", true)],
        TaskType::Rag => vec![
            ToolRequirement::new("vector_store", "embedding_db", true),
            ToolRequirement::new("document_processor", "doc_processor", true),
        ],
        TaskType::Ocr | TaskType::Vision | TaskType::Chat => vec![],
    }
}

/// Deterministic, ordered-precedence classifier. Never calls an LLM; never
/// fails on well-formed input.
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str, config: &Config) -> Result<RoutingDecision, CoreError> {
        validate_query(query, config.max_query_len)?;
        let q = lower(query);

        let (task_type, mut confidence, reasoning) = self.decide(&q);
        confidence = confidence.clamp(0.0, 1.0);

        let decision = RoutingDecision::new(query, task_type, confidence, reasoning)?
            .with_tools(tools_for(task_type))
            .with_metadata("method", "keyword");
        Ok(decision)
    }

    fn decide(&self, q: &str) -> (TaskType, f64, String) {
        let weather_hits = count_matches(q, WEATHER_KEYWORDS);
        if weather_hits > 0 {
            return (
                TaskType::Weather,
                0.5 + 0.25 * weather_hits as f64 + 0.3,
                "matched weather keywords".into(),
            );
        }

        let finance_hits = count_matches(q, FINANCE_KEYWORDS);
        if finance_hits > 0 {
            return (
                TaskType::Finance,
                0.5 + 0.25 * finance_hits as f64 + 0.3,
                "matched finance keywords".into(),
            );
        }

        let routing_hits = count_matches(q, ROUTING_KEYWORDS);
        if routing_hits > 0 && any_match(q, ROUTING_DIRECTION_WORDS) {
            return (
                TaskType::Routing,
                0.5 + 0.25 * routing_hits as f64 + 0.3,
                "matched routing keywords with a direction word".into(),
            );
        }

        let code_hits = count_matches(q, CODE_KEYWORDS);

        let mut math_pattern_hits = 0;
        if MATH_OPERATOR_RE.is_match(q) {
            math_pattern_hits += 1;
        }
        if MATH_RELATIONAL_RE.is_match(q) {
            math_pattern_hits += 1;
        }
        if DECIMAL_RE.is_match(q) {
            math_pattern_hits += 1;
        }
        if MATH_SYMBOL_RE.is_match(q) {
            math_pattern_hits += 1;
        }
        if MATH_FN_RE.is_match(q) {
            math_pattern_hits += 1;
        }
        if q.contains('!') {
            math_pattern_hits += 1;
        }

        let unit_conversion_match = UNIT_CONVERSION_RE.is_match(q);

        let has_calc_indicator = any_match(q, CALC_INDICATORS);
        let has_unit_word = any_match(q, TIME_DISTANCE_UNITS);
        let has_realtime_marker = any_match(q, REALTIME_MARKERS);
        let calc_indicator_match = has_calc_indicator && has_unit_word && !has_realtime_marker;

        if code_hits > 0 || math_pattern_hits > 0 || unit_conversion_match || calc_indicator_match {
            // Every contributing signal for the winning type adds its share,
            // not just the one that first tipped the precedence ladder.
            let confidence = 0.5
                + 0.25 * code_hits as f64
                + 0.15 * math_pattern_hits as f64
                + if unit_conversion_match { 0.20 } else { 0.0 }
                + if calc_indicator_match { 0.10 } else { 0.0 };
            return (
                TaskType::Code,
                confidence,
                "matched code/math signals".into(),
            );
        }

        let research_hits = count_matches(q, RESEARCH_KEYWORDS);
        let question_mark = q.contains('?') || q.contains('\u{ff1f}');
        if research_hits > 0 || question_mark {
            let confidence =
                0.5 + 0.25 * research_hits as f64 + if question_mark { 0.25 } else { 0.0 };
            return (
                TaskType::Research,
                confidence,
                "matched research signals".into(),
            );
        }

        (TaskType::Chat, 0.5, "no rule matched, defaulting to chat".into())
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn weather_query_routes_high_confidence() {
        let d = KeywordClassifier::new()
            .classify("What's the weather in Beijing?", &cfg())
            .unwrap();
        assert_eq!(d.primary_task_type, TaskType::Weather);
        assert!(d.confidence >= 0.7);
    }

    #[test]
    fn math_expression_routes_to_code() {
        let d = KeywordClassifier::new().classify("Calculate 2^10", &cfg()).unwrap();
        assert_eq!(d.primary_task_type, TaskType::Code);
    }

    #[test]
    fn chinese_research_question() {
        let d = KeywordClassifier::new()
            .classify("\u{4ec0}\u{4e48}\u{662f}\u{533a}\u{5757}\u{94fe}\u{ff1f}", &cfg())
            .unwrap();
        assert_eq!(d.primary_task_type, TaskType::Research);
        assert!(d.confidence >= 0.75);
    }

    #[test]
    fn realtime_marker_demotes_unit_calc_rule() {
        let d = KeywordClassifier::new()
            .classify("how many hours until now", &cfg())
            .unwrap();
        assert_ne!(d.reasoning, "calculation indicator with a unit word, no real-time marker");
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(KeywordClassifier::new().classify("", &cfg()).is_err());
    }

    #[test]
    fn default_falls_to_chat() {
        let d = KeywordClassifier::new().classify("hello there", &cfg()).unwrap();
        assert_eq!(d.primary_task_type, TaskType::Chat);
    }
}
