//! 作业评估应用 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责资源管理和请求调度。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、创建 LLM 客户端和作业存储
//! 2. **上传**：分块并保存作业，返回不可猜测的 ID
//! 3. **问答**：按 (作业, 评估者) 取会话并加锁，委托 `QaFlow` 处理单个问题
//! 4. **导航建议**：根据文档概览生成后续问题，输出同样经过摘录限制
//! 5. **生命周期**：删除作业、清理过期作业，并同时清除对应会话
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有作业存储和会话存储的模块
//! - **会话隔离**：同一评估者的请求串行，不同评估者并发
//! - **向下委托**：不做限流或摘录判断，全部交给 workflow / services

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::clients::{LlmClient, OpenAiClient};
use crate::config::Config;
use crate::error::{AppError, AppResult, AssignmentError};
use crate::infrastructure::{AssignmentStore, FileAssignmentStore, MemoryAssignmentStore, SessionStore};
use crate::models::{Assignment, AssignmentId, Session, SessionKey, ThrottleState};
use crate::services::navigation::{build_suggestion_prompt, default_suggestions, parse_suggestions};
use crate::services::text_chunker::chunk_text;
use crate::services::{ChunkRetriever, HeuristicPolicy, KeywordRetriever, LlmService, RequestPolicy};
use crate::utils::logging::log_startup;
use crate::workflow::{QaCtx, QaFlow, QaResponse};

/// 应用主结构
pub struct App {
    config: Config,
    assignments: Arc<dyn AssignmentStore>,
    sessions: SessionStore,
    flow: QaFlow,
}

impl App {
    /// 初始化应用
    ///
    /// 使用 OpenAI 兼容接口和文件存储
    pub async fn initialize(config: Config) -> AppResult<Self> {
        config.validate()?;
        log_startup(&config);

        let client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config));
        let store: Arc<dyn AssignmentStore> = Arc::new(FileAssignmentStore::open(&config.data_dir).await?);

        Ok(Self::with_components(
            config,
            client,
            store,
            Arc::new(KeywordRetriever),
        ))
    }

    /// 使用指定 LLM 客户端和内存存储
    pub fn with_client(config: Config, client: Arc<dyn LlmClient>) -> Self {
        Self::with_components(
            config,
            client,
            Arc::new(MemoryAssignmentStore::new()),
            Arc::new(KeywordRetriever),
        )
    }

    /// 使用指定组件创建应用
    pub fn with_components(
        config: Config,
        client: Arc<dyn LlmClient>,
        assignments: Arc<dyn AssignmentStore>,
        retriever: Arc<dyn ChunkRetriever>,
    ) -> Self {
        let policy: Arc<dyn RequestPolicy> = Arc::new(HeuristicPolicy::new(config.detection.clone()));
        let llm_service = LlmService::new(client, &config);
        let flow = QaFlow::new(&config, llm_service, policy, retriever);

        Self {
            config,
            assignments,
            sessions: SessionStore::new(),
            flow,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 上传作业，返回作业 ID
    pub async fn upload(&self, owner: &str, text: &str) -> AppResult<AssignmentId> {
        if text.trim().is_empty() {
            return Err(AssignmentError::EmptyDocument.into());
        }

        let chunks = chunk_text(text, &self.config.chunking);
        let assignment = Assignment::new(owner, text.to_string(), chunks);
        let id = assignment.id.clone();
        info!(
            "📄 作业已上传: {} ({} 字符, {} 个片段)",
            id,
            assignment.source_text.chars().count(),
            assignment.chunks.len()
        );

        self.assignments.insert(assignment).await?;
        Ok(id)
    }

    /// 评估者提问
    ///
    /// 同一会话的请求在会话锁内串行执行
    pub async fn ask(&self, assignment_id: &AssignmentId, evaluator: &str, question: &str) -> AppResult<QaResponse> {
        let question = question.trim();
        let evaluator = evaluator.trim();
        if question.is_empty() {
            return Err(AssignmentError::EmptyQuestion.into());
        }
        if evaluator.is_empty() {
            return Err(AssignmentError::EmptyEvaluator.into());
        }

        let assignment = self.load_assignment(assignment_id).await?;
        let key = SessionKey::new(assignment_id.clone(), evaluator);
        let shared = self.sessions.session(&key);
        let mut session = shared.lock().await;

        let ctx = QaCtx::new(key, session.len() + 1);
        self.flow.run(&assignment, &mut session, question, &ctx).await
    }

    /// 生成后续可问的问题
    ///
    /// 指定评估者时，带上其最近一次问答作为参考。LLM 失败时返回默认问题。
    pub async fn suggest_questions(&self, assignment_id: &AssignmentId, evaluator: Option<&str>) -> AppResult<Vec<String>> {
        let assignment = self.load_assignment(assignment_id).await?;

        let mut previous = None;
        if let Some(shared) = evaluator.and_then(|e| self.sessions.get(&SessionKey::new(assignment_id.clone(), e))) {
            let session = shared.lock().await;
            previous = session
                .exchanges()
                .last()
                .map(|e| (e.question.clone(), e.answer.clone()));
        }

        let prompt = build_suggestion_prompt(
            &assignment.chunks,
            previous.as_ref().map(|(q, a)| (q.as_str(), a.as_str())),
        );
        let suggestions = match self.flow.llm_service().suggest_questions(&prompt).await {
            Ok(response) => parse_suggestions(&response),
            Err(e) => {
                warn!("生成导航建议失败，使用默认问题: {}", e);
                default_suggestions()
            }
        };

        let limiter = self.flow.limiter();
        let index = limiter.index(&assignment.source_text);
        Ok(suggestions
            .into_iter()
            .map(|q| limiter.limit_with_index(&q, &index).text)
            .collect())
    }

    /// 当前限流状态（由会话历史推导）
    ///
    /// 作业不存在时返回 NotFound；评估者还没有提问时返回空状态
    pub async fn throttle_state(&self, assignment_id: &AssignmentId, evaluator: &str) -> AppResult<ThrottleState> {
        self.load_assignment(assignment_id).await?;

        let key = SessionKey::new(assignment_id.clone(), evaluator);
        let now = Utc::now();
        let Some(shared) = self.sessions.get(&key) else {
            return Ok(ThrottleState::derive(&Session::new(key), &self.config.detection, now));
        };
        let session = shared.lock().await;
        Ok(ThrottleState::derive(&session, &self.config.detection, now))
    }

    /// 删除作业及其所有会话，返回作业是否存在
    pub async fn delete(&self, assignment_id: &AssignmentId) -> AppResult<bool> {
        let existed = self.assignments.delete(assignment_id).await?;
        let sessions = self.sessions.remove_assignment(assignment_id);
        if existed {
            info!("🗑️ 作业已删除: {} (清除 {} 个会话)", assignment_id, sessions);
        }
        Ok(existed)
    }

    /// 清理过期作业
    ///
    /// 未配置保留时长时不做任何事
    pub async fn purge_expired(&self) -> AppResult<Vec<AssignmentId>> {
        let Some(retention) = self.config.retention() else {
            debug!("未配置保留时长，跳过清理");
            return Ok(Vec::new());
        };

        let expired = self.assignments.purge_expired(retention, Utc::now()).await?;
        for id in &expired {
            self.sessions.remove_assignment(id);
        }
        if !expired.is_empty() {
            info!("🗑️ 已清理 {} 个过期作业", expired.len());
        }
        Ok(expired)
    }

    async fn load_assignment(&self, assignment_id: &AssignmentId) -> AppResult<Arc<Assignment>> {
        self.assignments
            .get(assignment_id)
            .await?
            .ok_or_else(|| AppError::not_found(assignment_id.as_str()))
    }
}
