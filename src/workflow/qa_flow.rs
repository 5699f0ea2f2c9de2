//! 问答处理流程 - 流程层
//!
//! 核心职责：定义"一个问题"的完整处理流程
//!
//! 流程顺序：
//! 1. 检索相关片段 → 请求模式检测（拒绝则直接返回，不调用 LLM）
//! 2. 限流则先等待 → 最小上下文调用 LLM
//! 3. 摘录限制 → 不连贯则第二轮概括（最多一次）→ 仍不行则返回降级提示
//! 4. 写入会话历史

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{Assignment, Decision, Exchange, ResponseFlag, Session, SuspicionReason};
use crate::services::{ChunkRetriever, ExcerptLimiter, LlmService, PendingRequest, RequestPolicy};
use crate::utils::logging::truncate_text;
use crate::workflow::qa_ctx::QaCtx;

/// 无法在保护限制内回答时的提示
pub const DEGRADED_NOTICE: &str = "Unable to answer within content-protection limits. \
     Please ask a more specific question about the assignment.";

/// 返回给界面的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QaResponse {
    pub answer: String,
    pub flag: ResponseFlag,
}

/// 拒绝时的固定回复
pub fn refusal_message(reason: SuspicionReason) -> &'static str {
    match reason {
        SuspicionReason::ExtractionRequest => {
            "I'm not able to extract or display large portions of the assignment content directly. \
             This restriction helps protect the assignment's intellectual property. \
             However, I can answer specific questions about the content, explain concepts, \
             summarize sections, or analyze particular elements."
        }
        SuspicionReason::SequentialScan => {
            "I've noticed a series of requests stepping through the assignment piece by piece. \
             To protect the assignment's integrity I can't continue this sequence. \
             Please ask about a specific concept or request an analysis instead."
        }
        SuspicionReason::RepeatedRegion => {
            "I've noticed multiple consecutive requests for similar content sections. \
             To protect the assignment's integrity, I'll need to limit direct content extraction. \
             Please try asking a different question or request an analysis rather than direct text."
        }
        SuspicionReason::RephraseScan => {
            "Requests that repeat the same question across different parts of the assignment are limited. \
             Please ask a more specific question."
        }
    }
}

/// 问答处理流程
///
/// - 编排单个问题的完整处理
/// - 不持有作业或会话（由编排层传入）
/// - 只依赖业务能力（services）
pub struct QaFlow {
    llm_service: LlmService,
    policy: Arc<dyn RequestPolicy>,
    retriever: Arc<dyn ChunkRetriever>,
    limiter: ExcerptLimiter,
    top_k: usize,
    verbose_logging: bool,
}

impl QaFlow {
    pub fn new(
        config: &Config,
        llm_service: LlmService,
        policy: Arc<dyn RequestPolicy>,
        retriever: Arc<dyn ChunkRetriever>,
    ) -> Self {
        Self {
            llm_service,
            policy,
            retriever,
            limiter: ExcerptLimiter::new(config.protection.clone()),
            top_k: config.chunking.top_k,
            verbose_logging: config.verbose_logging,
        }
    }

    pub fn llm_service(&self) -> &LlmService {
        &self.llm_service
    }

    pub fn limiter(&self) -> &ExcerptLimiter {
        &self.limiter
    }

    /// 处理一个问题
    ///
    /// LLM 调用失败时返回错误，会话历史不变；其余情况都会写入一条记录
    pub async fn run(
        &self,
        assignment: &Assignment,
        session: &mut Session,
        question: &str,
        ctx: &QaCtx,
    ) -> AppResult<QaResponse> {
        let now = Utc::now();
        info!("{} 问题: {}", ctx, truncate_text(question, 80));

        // ========== 1. 检索 + 检测 ==========
        let chunks = self
            .retriever
            .relevant_chunks(question, &assignment.chunks, self.top_k);
        let chunk_ids: Vec<usize> = chunks.iter().map(|c| c.index).collect();

        let evaluation = self.policy.evaluate(
            session,
            &PendingRequest {
                question,
                chunk_ids: &chunk_ids,
            },
            now,
        );

        let throttled = match &evaluation.decision {
            Decision::Block { reason } => {
                let reason = *reason;
                warn!("{} ⛔ 请求被拒绝: {}", ctx, reason);
                let response = QaResponse {
                    answer: refusal_message(reason).to_string(),
                    flag: ResponseFlag::Blocked,
                };
                session.record(Exchange {
                    question: question.to_string(),
                    answer: response.answer.clone(),
                    timestamp: now,
                    flag: response.flag,
                    reason: Some(reason),
                    signals: evaluation.signals,
                });
                return Ok(response);
            }
            Decision::Throttle { delay, reason } => {
                warn!("{} ⏳ 请求被限流 {:?}: {}", ctx, delay, reason);
                tokio::time::sleep(*delay).await;
                true
            }
            Decision::Allow => false,
        };

        // ========== 2. 调用 LLM ==========
        let raw_answer = self.llm_service.answer_from_context(question, &chunks).await?;
        if self.verbose_logging {
            info!("{} LLM 原始回答: {}", ctx, truncate_text(&raw_answer, 200));
        }

        // ========== 3. 摘录限制 ==========
        let index = self.limiter.index(&assignment.source_text);
        let mut limited = self.limiter.limit_with_index(&raw_answer, &index);
        let mut modified = limited.was_modified();

        if !limited.coherent {
            info!("{} 截断后回答不连贯，请求第二轮概括", ctx);
            let summary = self
                .llm_service
                .summarize_without_extraction(question, &chunks)
                .await?;
            limited = self.limiter.limit_with_index(&summary, &index);
            modified = true;
        }

        // 截断优先于限流：限流原因已记录在会话历史里，截断只能从这里看出
        let (answer, flag) = if !limited.coherent || self.limiter.exceeds_limit(&limited.text, &index) {
            warn!("{} ⚠️ 无法在保护限制内回答", ctx);
            (DEGRADED_NOTICE.to_string(), ResponseFlag::Degraded)
        } else if modified {
            (limited.text, ResponseFlag::Truncated)
        } else if throttled {
            (limited.text, ResponseFlag::Throttled)
        } else {
            (limited.text, ResponseFlag::Answered)
        };

        // ========== 4. 写入历史 ==========
        session.record(Exchange {
            question: question.to_string(),
            answer: answer.clone(),
            timestamp: now,
            flag,
            reason: evaluation.decision.reason(),
            signals: evaluation.signals,
        });

        info!("{} ✓ 回答完成 ({:?})", ctx, flag);
        Ok(QaResponse { answer, flag })
    }
}
