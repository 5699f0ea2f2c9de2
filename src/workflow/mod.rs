pub mod qa_ctx;
pub mod qa_flow;

pub use qa_ctx::QaCtx;
pub use qa_flow::{QaFlow, QaResponse, DEGRADED_NOTICE};
