//! # Secure Evaluator
//!
//! 作业评估问答的内容保护层：候选人上传作业，评估者通过 LLM 提问，
//! 本系统在提问前检测可疑的请求模式，在回答后限制原文摘录长度。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有状态，只暴露存取能力
//! - `AssignmentStore` - 作业存储（内存 / 文件）
//! - `SessionStore` - 评估会话存储，每个会话一把锁
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个请求
//! - `HeuristicPolicy` - 请求模式检测（放行 / 限流 / 拒绝）
//! - `ExcerptLimiter` - 摘录限制
//! - `LlmService` - 带超时和重试的 LLM 调用
//! - `KeywordRetriever` - 片段检索
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个问题"的完整处理流程
//! - `QaCtx` - 上下文封装（作业 + 评估者 + 问题序号）
//! - `QaFlow` - 流程编排（检测 → LLM → 摘录限制 → 记录）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/evaluator` - 应用入口，持有存储，管理会话
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{LlmClient, LlmRequest, OpenAiClient};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{AssignmentId, Decision, ResponseFlag, SuspicionReason, ThrottleState};
pub use orchestrator::App;
pub use workflow::{QaCtx, QaFlow, QaResponse};
