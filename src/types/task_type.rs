use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of capability classes a query can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Research,
    Code,
    Chat,
    Rag,
    Weather,
    Finance,
    Routing,
    Ocr,
    Vision,
}

impl TaskType {
    /// Case-insensitive lookup with a CHAT fallback for anything the model
    /// made up. Never fails.
    pub fn from_loose_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "research" => TaskType::Research,
            "code" => TaskType::Code,
            "chat" => TaskType::Chat,
            "rag" => TaskType::Rag,
            "weather" | "domain_weather" => TaskType::Weather,
            "finance" | "domain_finance" => TaskType::Finance,
            "routing" | "domain_routing" => TaskType::Routing,
            "ocr" => TaskType::Ocr,
            "vision" => TaskType::Vision,
            _ => TaskType::Chat,
        }
    }

    /// The tool/executor name this task type binds to in the registry.
    pub fn tool_name(&self) -> &'static str {
        match self {
            TaskType::Research => "search",
            TaskType::Code => "code_executor",
            TaskType::Chat => "chat",
            TaskType::Rag => "rag",
            TaskType::Weather => "weather_api",
            TaskType::Finance => "stock_api",
            TaskType::Routing => "routing_api",
            TaskType::Ocr => "ocr",
            TaskType::Vision => "vision",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Research => "research",
            TaskType::Code => "code",
            TaskType::Chat => "chat",
            TaskType::Rag => "rag",
            TaskType::Weather => "weather",
            TaskType::Finance => "finance",
            TaskType::Routing => "routing",
            TaskType::Ocr => "ocr",
            TaskType::Vision => "vision",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_parse_is_case_insensitive() {
        assert_eq!(TaskType::from_loose_str("WEATHER"), TaskType::Weather);
        assert_eq!(TaskType::from_loose_str("  code "), TaskType::Code);
    }

    #[test]
    fn unknown_falls_back_to_chat() {
        assert_eq!(TaskType::from_loose_str("frobnicate"), TaskType::Chat);
    }
}
