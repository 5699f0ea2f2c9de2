pub mod excerpt_limiter;
pub mod llm_service;
pub mod navigation;
pub mod pattern_detector;
pub mod text_chunker;

pub use excerpt_limiter::{ExcerptLimiter, LimitedAnswer};
pub use llm_service::LlmService;
pub use pattern_detector::{Evaluation, HeuristicPolicy, PendingRequest, RequestPolicy};
pub use text_chunker::{ChunkRetriever, KeywordRetriever};
