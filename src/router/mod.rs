pub mod cache;
pub mod hybrid;
pub mod keyword;
pub mod llm;

pub use cache::RoutingCache;
pub use hybrid::HybridRouter;
pub use keyword::KeywordClassifier;
pub use llm::{Language, LlmClassifier, RoutingContext};
