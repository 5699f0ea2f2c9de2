//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层持有作业存储、会话存储和 LLM 客户端，是整个系统的"指挥中心"。
//!
//! ## 层次关系
//!
//! ```text
//! evaluator::App (上传 / 提问 / 删除 / 清理)
//!     ↓
//! workflow::QaFlow (处理单个问题)
//!     ↓
//! services (能力层：检测 / 摘录限制 / LLM / 分块检索 / 导航)
//!     ↓
//! infrastructure (基础设施：AssignmentStore、SessionStore)
//! ```
//!
//! ## 设计原则
//!
//! 1. **资源隔离**：只有编排层持有存储
//! 2. **向下依赖**：编排层 → workflow → services → infrastructure
//! 3. **无业务逻辑**：只做调度，不做限流或摘录判断

pub mod evaluator;

pub use evaluator::App;
